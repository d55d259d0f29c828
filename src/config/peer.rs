//! Peer connection configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::validation::{ConfigError, require_non_zero};

// =============================================================================
// Constants
// =============================================================================

/// Default delay between two refreshes of a healthy peer (5 seconds).
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Default delay between two full refreshes (60 seconds).
pub const DEFAULT_FULL_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Default age after which an unrefreshed peer is reported stale (30 seconds).
pub const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(30);

/// Default timeout for connecting to and querying a peer (10 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default upper bound of the retry backoff (60 seconds).
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

// =============================================================================
// Peer Configuration
// =============================================================================

/// One configured backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Unique key, exposed as `peer_key`.
    pub key: String,

    /// Display name, exposed as `peer_name` (default: the key).
    #[serde(default)]
    pub name: Option<String>,

    /// `host:port` for TCP or a filesystem path for a Unix socket.
    pub addr: String,
}

impl PeerConfig {
    pub fn new(key: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: None,
            addr: addr.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Display name, falling back to the key.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.key)
    }

    /// Validate a single peer entry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "peer key cannot be empty".to_string(),
            ));
        }
        if self.key.contains(char::is_whitespace) {
            return Err(ConfigError::ValidationError(format!(
                "peer key '{}' cannot contain whitespace",
                self.key
            )));
        }
        if self.addr.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "peer '{}' has an empty addr",
                self.key
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Refresh Settings
// =============================================================================

/// Timing shared by every peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSettings {
    /// Delay between refreshes, also the first backoff step.
    pub refresh_interval: Duration,
    /// Delay between full refreshes; delta refreshes run in between.
    pub full_refresh_interval: Duration,
    /// Age of the last successful refresh after which an up peer turns stale.
    pub stale_threshold: Duration,
    pub connect_timeout: Duration,
    pub max_backoff: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            full_refresh_interval: DEFAULT_FULL_REFRESH_INTERVAL,
            stale_threshold: DEFAULT_STALE_THRESHOLD,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RefreshSettings {
    /// Retry delay after `failures` consecutive failed refreshes.
    ///
    /// Doubles from `refresh_interval` and is capped at `max_backoff`.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.refresh_interval
            .saturating_mul(1 << exponent)
            .min(self.max_backoff)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_zero("refresh_interval", self.refresh_interval)?;
        require_non_zero("full_refresh_interval", self.full_refresh_interval)?;
        require_non_zero("stale_threshold", self.stale_threshold)?;
        require_non_zero("connect_timeout", self.connect_timeout)?;
        if self.max_backoff < self.refresh_interval {
            return Err(ConfigError::ValidationError(format!(
                "max_backoff ({:?}) must not be shorter than refresh_interval ({:?})",
                self.max_backoff, self.refresh_interval
            )));
        }
        Ok(())
    }
}
