//! Peer communication errors.

use std::time::Duration;

use thiserror::Error;

use crate::table::TableError;

/// Errors confined to a single peer connection.
///
/// A refresh failing with any of these drives the peer to `Down`; queries
/// against other peers are unaffected.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Socket could not be opened or broke mid-exchange.
    #[error("connection to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Peer did not answer within the connect timeout.
    #[error("peer {addr} timed out after {timeout:?}")]
    Timeout { addr: String, timeout: Duration },

    /// Peer answered with a non-success status or an unreadable preamble.
    #[error("peer protocol error: {0}")]
    Protocol(String),

    /// Peer payload does not match the table schema.
    #[error("malformed peer payload: {0}")]
    Payload(#[from] TableError),

    /// Peer refresh loop is paused; commands are rejected.
    #[error("peer {0} is paused")]
    Paused(String),

    /// Peer is down; commands are rejected without contacting it.
    #[error("peer {key} is down: {reason}")]
    Unavailable { key: String, reason: String },

    /// Peer is being stopped.
    #[error("peer {0} is shutting down")]
    ShuttingDown(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = PeerError::Timeout {
            addr: "127.0.0.1:6557".to_string(),
            timeout: Duration::from_secs(10),
        };
        assert_eq!(err.to_string(), "peer 127.0.0.1:6557 timed out after 10s");

        let err = PeerError::Unavailable {
            key: "id0".to_string(),
            reason: "connection refused".to_string(),
        };
        assert_eq!(err.to_string(), "peer id0 is down: connection refused");
    }
}
