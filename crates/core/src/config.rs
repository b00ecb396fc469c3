//! Configuration
//!
//! Loaded from a TOML file (every field optional) and then overridden by
//! environment variables:
//!
//! | Variable | Field |
//! |---|---|
//! | `APHRODITE_BIND` | `server.bind` |
//! | `APHRODITE_LOG_FILTER` | `log_filter` |
//! | `APHRODITE_WEBHOOK_URL` | `webhook.url` |
//! | `APHRODITE_ARCHIVE_PATH` | `storage.archive_path` |

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::media::{CatalogEntry, CatalogResolver};
use crate::session::SessionLimits;
use crate::sync::DEFAULT_DRIFT_THRESHOLD;

/// Default port for Aphrodite servers
pub const DEFAULT_PORT: u16 = 7431;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log filter directive (e.g. `info`, `aphrodite_net=debug`)
    pub log_filter: String,
    pub server: ServerConfig,
    pub sync: SyncConfig,
    pub directory: DirectoryConfig,
    pub media: MediaConfig,
    pub webhook: WebhookConfig,
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: "info".into(),
            server: ServerConfig::default(),
            sync: SyncConfig::default(),
            directory: DirectoryConfig::default(),
            media: MediaConfig::default(),
            webhook: WebhookConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
        }
    }
}

/// Timing knobs for the synchronization protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Drift (seconds) tolerated before a corrective seek
    pub drift_threshold_secs: f64,
    /// How often followers compare their player against the anchor
    pub drift_check_interval_ms: u64,
    /// How often clients send a heartbeat
    pub heartbeat_interval_ms: u64,
    /// Participants silent for longer than this are removed
    pub liveness_timeout_ms: u64,
    /// Upper bound on connect + join
    pub join_timeout_ms: u64,
    /// Upper bound on a single player call
    pub player_call_timeout_ms: u64,
    /// Attempts for a player call that fails transiently
    pub player_retry_attempts: u32,
    /// Also send `Sync` back to the host that issued the command
    pub echo_to_origin: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            drift_threshold_secs: DEFAULT_DRIFT_THRESHOLD,
            drift_check_interval_ms: 1_000,
            heartbeat_interval_ms: 10_000,
            liveness_timeout_ms: 30_000,
            join_timeout_ms: 10_000,
            player_call_timeout_ms: 5_000,
            player_retry_attempts: 3,
            echo_to_origin: false,
        }
    }
}

impl SyncConfig {
    pub fn drift_check_interval(&self) -> Duration {
        Duration::from_millis(self.drift_check_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn player_call_timeout(&self) -> Duration {
        Duration::from_millis(self.player_call_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Capacity used when a create request does not name one
    pub default_capacity: usize,
    /// Largest capacity a session may request
    pub max_capacity: usize,
    /// Upper bound on concurrently open sessions
    pub max_sessions: usize,
    pub chat_history_limit: usize,
    pub max_chat_len: usize,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        let limits = SessionLimits::default();
        Self {
            default_capacity: 16,
            max_capacity: 64,
            max_sessions: 256,
            chat_history_limit: limits.chat_history_limit,
            max_chat_len: limits.max_chat_len,
        }
    }
}

impl DirectoryConfig {
    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            chat_history_limit: self.chat_history_limit,
            max_chat_len: self.max_chat_len,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Accept any well-formed video id, not just catalog entries
    pub accept_video_ids: bool,
    pub catalog: Vec<CatalogEntry>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            accept_video_ids: true,
            catalog: Vec::new(),
        }
    }
}

impl MediaConfig {
    pub fn resolver(&self) -> CatalogResolver {
        CatalogResolver::new(self.catalog.clone(), self.accept_video_ids)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Discord-style webhook notified when sessions are created
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file for session snapshots; archiving is off when unset
    pub archive_path: Option<PathBuf>,
}

impl Config {
    /// Parse a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from `path`, or from the default location when `None`
    ///
    /// A missing default file yields defaults; a missing explicit file is
    /// an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_toml(&std::fs::read_to_string(p)?)?,
            None => match Self::default_path() {
                Some(p) if p.exists() => {
                    debug!(path = %p.display(), "Loading config");
                    Self::from_toml(&std::fs::read_to_string(&p)?)?
                }
                _ => Self::default(),
            },
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// `<config dir>/aphrodite.toml` for this platform
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "aphrodite", "aphrodite")
            .map(|dirs| dirs.config_dir().join("aphrodite.toml"))
    }

    pub fn apply_env(&mut self) {
        self.apply_env_fn(|key| std::env::var(key));
    }

    /// Testable override step that accepts an environment lookup function
    fn apply_env_fn<F>(&mut self, env: F)
    where
        F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
    {
        if let Ok(bind) = env("APHRODITE_BIND") {
            match bind.parse() {
                Ok(addr) => self.server.bind = addr,
                Err(_) => warn!(value = %bind, "Ignoring invalid APHRODITE_BIND"),
            }
        }
        if let Ok(filter) = env("APHRODITE_LOG_FILTER") {
            self.log_filter = filter;
        }
        if let Ok(url) = env("APHRODITE_WEBHOOK_URL") {
            self.webhook.url = (!url.trim().is_empty()).then_some(url);
        }
        if let Ok(path) = env("APHRODITE_ARCHIVE_PATH") {
            self.storage.archive_path = (!path.trim().is_empty()).then(|| PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.sync.drift_threshold_secs.is_finite() && self.sync.drift_threshold_secs > 0.0) {
            return Err(Error::Config("sync.drift_threshold_secs must be positive".into()));
        }
        if self.sync.drift_check_interval_ms == 0 || self.sync.heartbeat_interval_ms == 0 {
            return Err(Error::Config("sync intervals must be non-zero".into()));
        }
        if self.sync.liveness_timeout_ms <= self.sync.heartbeat_interval_ms {
            return Err(Error::Config(
                "sync.liveness_timeout_ms must exceed sync.heartbeat_interval_ms".into(),
            ));
        }
        if self.sync.player_retry_attempts == 0 {
            return Err(Error::Config("sync.player_retry_attempts must be at least 1".into()));
        }
        if self.directory.default_capacity == 0
            || self.directory.default_capacity > self.directory.max_capacity
        {
            return Err(Error::Config(
                "directory.default_capacity must be within 1..=max_capacity".into(),
            ));
        }
        for entry in &self.media.catalog {
            if entry.duration_seconds.is_some() && entry.known_duration().is_none() {
                return Err(Error::Config(format!(
                    "media.catalog entry '{}' needs a positive duration_seconds",
                    entry.media_ref
                )));
            }
        }
        Ok(())
    }
}
