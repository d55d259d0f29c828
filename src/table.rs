//! Table Layer
//!
//! Typed rows and the immutable per-peer snapshots the query engine reads.
//!
//! - [`Value`] / [`ValueType`]: closed set of cell types
//! - [`TableName`] / [`Column`]: static schemas shared by every peer
//! - [`TableCache`]: one peer's tables at one refresh instant

mod cache;
mod schema;
mod value;

pub use cache::{Row, Table, TableCache, TableError};
pub use schema::{Column, PEER_KEY, PEER_NAME, TableName};
pub use value::{Value, ValueType};
