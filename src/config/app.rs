//! Application configuration and multi-file merging.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::peer::{PeerConfig, RefreshSettings};
use super::validation::{ConfigError, expand_env_vars};

/// Default log level directive.
pub const DEFAULT_LOG_LEVEL: &str = "info";

// =============================================================================
// Config Source
// =============================================================================

/// Contents of a single configuration file.
///
/// Every key is optional so that a file may contribute any subset.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigSource {
    pub log_level: Option<String>,
    pub http_listen: Option<String>,
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub full_refresh_interval: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub stale_threshold: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub max_backoff: Option<Duration>,
    pub listen: Vec<String>,
    pub connections: Vec<PeerConfig>,
}

impl ConfigSource {
    /// Parse YAML text after environment variable expansion.
    pub fn parse(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(content);
        if expanded.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str::<Option<Self>>(&expanded)
            .map(Option::unwrap_or_default)
            .map_err(|source| ConfigError::ParseError {
                path: origin.to_string(),
                source,
            })
    }

    /// Read one file. A missing file contributes nothing.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let origin = path.display().to_string();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %origin, "Config file not found, skipping");
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::IoError { path: origin, source }),
        };
        if content.trim().is_empty() {
            tracing::warn!(path = %origin, "Config file is empty, skipping");
        }
        Self::parse(&content, &origin)
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Effective configuration after merging every source.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// `tracing` filter directive (default: "info").
    pub log_level: String,

    /// Address of the optional HTTP surface.
    pub http_listen: Option<String>,

    /// Line-protocol listeners; a value containing `/` is a Unix socket path.
    pub listen: Vec<String>,

    /// Configured peers in order.
    pub connections: Vec<PeerConfig>,

    pub refresh: RefreshSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            http_listen: None,
            listen: Vec::new(),
            connections: Vec::new(),
            refresh: RefreshSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load and merge an ordered list of files, then validate.
    ///
    /// # Errors
    /// Returns `ConfigError` if a present file cannot be read or parsed, or
    /// if the merged configuration is invalid.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for path in paths {
            tracing::debug!(path = %path.as_ref().display(), "Loading config file");
            config.merge(ConfigSource::load(path)?);
        }
        config.validate()?;
        Ok(config)
    }

    /// Apply one source on top of the current values.
    ///
    /// Scalars are replaced when the source sets them; lists are appended
    /// in load order without de-duplication.
    pub fn merge(&mut self, source: ConfigSource) {
        if let Some(level) = source.log_level {
            self.log_level = level;
        }
        if let Some(addr) = source.http_listen {
            self.http_listen = Some(addr);
        }
        let refresh = &mut self.refresh;
        refresh.refresh_interval = source.refresh_interval.unwrap_or(refresh.refresh_interval);
        refresh.full_refresh_interval = source
            .full_refresh_interval
            .unwrap_or(refresh.full_refresh_interval);
        refresh.stale_threshold = source.stale_threshold.unwrap_or(refresh.stale_threshold);
        refresh.connect_timeout = source.connect_timeout.unwrap_or(refresh.connect_timeout);
        refresh.max_backoff = source.max_backoff.unwrap_or(refresh.max_backoff);

        self.listen.extend(source.listen);
        self.connections.extend(source.connections);
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "log_level cannot be empty".to_string(),
            ));
        }
        self.refresh.validate()?;

        let mut keys = HashSet::new();
        for peer in &self.connections {
            peer.validate()?;
            if !keys.insert(peer.key.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate peer key '{}'",
                    peer.key
                )));
            }
        }
        Ok(())
    }
}
