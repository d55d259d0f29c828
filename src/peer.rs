//! Peer Layer
//!
//! One [`PeerConnection`] per configured backend refreshes its own
//! [`TableCache`](crate::table::TableCache) in an independent task;
//! [`PeerSetManager`] owns the ordered peer list and swaps it on reload.

mod connection;
mod error;
mod set;
mod source;

pub use connection::{
    DEFAULT_SHUTDOWN_TIMEOUT, PeerConnection, PeerHealth, PeerState, PeerStatus, table_request,
};
pub use error::PeerError;
pub use set::{PeerSetManager, ReloadSummary, SourceFactory, livestatus_factory};
pub use source::{LivestatusSource, MAX_RESPONSE_BYTES, PeerSource, StaticSource};
