//! Configuration module for livemux.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Listener settings (line-protocol sockets, optional HTTP address)
//! - Peer definitions (key, display name, address)
//! - Refresh timing (interval, full refresh, staleness, backoff)
//!
//! Configuration is an ordered list of files merged into one [`AppConfig`].

mod app;
mod peer;
mod validation;

pub use app::{AppConfig, ConfigSource, DEFAULT_LOG_LEVEL};
pub use peer::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_FULL_REFRESH_INTERVAL, DEFAULT_MAX_BACKOFF,
    DEFAULT_REFRESH_INTERVAL, DEFAULT_STALE_THRESHOLD, PeerConfig, RefreshSettings,
};
pub use validation::{ConfigError, expand_env_vars};
