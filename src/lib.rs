//! livemux - Livestatus Query Multiplexer
//!
//! This crate provides the core of a caching multiplexer for the Livestatus
//! query language. It can be used as a library by other Rust projects, or run
//! as a standalone binary with the `livemux` executable.
//!
//! # Architecture
//!
//! - **Table**: typed rows and immutable per-peer snapshots
//! - **Query**: request parsing, filtering, stats, merging and response rendering
//! - **Peer**: one refresh task per backend plus the reloadable peer set
//! - **Config**: ordered YAML files merged into one configuration
//! - **Server**: line-protocol sockets and a small HTTP API
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use livemux::{PeerConfig, PeerSetManager, QueryExecutor, RefreshSettings, Request, Response};
//!
//! let peers = Arc::new(PeerSetManager::new(livemux::peer::livestatus_factory()));
//! peers.reload(&[PeerConfig::new("site1", "127.0.0.1:6557")], RefreshSettings::default());
//!
//! let executor = QueryExecutor::new(peers);
//! let request = Request::parse("GET hosts\nColumns: name state\n\n")?;
//! let result = executor.execute(&request).await;
//! let bytes = Response::from_result(&request, result).to_bytes();
//! ```

pub mod config;
pub mod peer;
pub mod query;
pub mod server;
pub mod table;

pub use config::{AppConfig, ConfigError, PeerConfig, RefreshSettings};
pub use peer::{PeerConnection, PeerError, PeerSetManager, PeerSource, PeerState, StaticSource};
pub use query::{QueryExecutor, QueryResult, Request, RequestError, Response};
pub use table::{TableCache, TableName, Value};
