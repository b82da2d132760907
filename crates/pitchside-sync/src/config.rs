//! # Sync Configuration
//!
//! Configuration management for the sync layer.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     PITCHSIDE_WS_URL=wss://live.example.com/ws                         │
//! │     PITCHSIDE_TOKEN=...                                                │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/pitchside/sync.toml (Linux)                              │
//! │     ~/Library/Application Support/app.pitchside.pitchside/sync.toml    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [connection]
//! url = "wss://live.example.com/ws"
//! base_delay_ms = 1000
//! max_attempts = 5
//! heartbeat_secs = 30
//!
//! [api]
//! base_url = "https://api.example.com"
//! token = "..."
//!
//! [offline]
//! backend = "sqlite"   # sqlite | file | memory
//! max_retries = 3
//!
//! [cache]
//! default_ttl_secs = 300
//! max_entries = 10000
//!
//! [loader]
//! retries = 3
//! base_delay_ms = 1000
//!
//! [sync]
//! reconcile_interval_secs = 30
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Connection Settings
// =============================================================================

/// Duplex channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// WebSocket URL of the live server.
    #[serde(default = "default_ws_url")]
    pub url: String,

    /// Delay before the first reconnect attempt (milliseconds).
    /// Attempt n waits `base_delay_ms * 2^(n-1)`.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Automatic reconnect attempts before waiting for a back-online signal.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Ping interval while connected (seconds).
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,

    /// Connection timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Close the channel when a ping goes unanswered this long (seconds).
    /// Unset disables the check.
    #[serde(default)]
    pub liveness_timeout_secs: Option<u64>,
}

fn default_ws_url() -> String {
    "ws://localhost:8080/ws".to_string()
}

fn default_base_delay() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_heartbeat() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        ConnectionSettings {
            url: default_ws_url(),
            base_delay_ms: default_base_delay(),
            max_attempts: default_max_attempts(),
            heartbeat_secs: default_heartbeat(),
            connect_timeout_secs: default_connect_timeout(),
            liveness_timeout_secs: None,
        }
    }
}

impl ConnectionSettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn liveness_timeout(&self) -> Option<Duration> {
        self.liveness_timeout_secs.map(Duration::from_secs)
    }
}

// =============================================================================
// API Settings
// =============================================================================

/// REST collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Base URL for `/api/...` endpoints.
    #[serde(default = "default_api_url")]
    pub base_url: String,

    /// Bearer credential sent on every request and on the channel handshake.
    #[serde(default)]
    pub token: Option<String>,

    /// Request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            base_url: default_api_url(),
            token: None,
            timeout_secs: default_request_timeout(),
        }
    }
}

impl ApiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// =============================================================================
// Offline Queue Settings
// =============================================================================

/// Durable backend for the offline queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    /// SQLite database (WAL mode).
    #[default]
    Sqlite,

    /// Single JSON snapshot file.
    File,

    /// Process memory only. Nothing survives a restart.
    Memory,
}

impl QueueBackend {
    /// File name used under the data directory when no path is configured.
    pub fn default_file_name(&self) -> Option<&'static str> {
        match self {
            QueueBackend::Sqlite => Some("offline_queue.db"),
            QueueBackend::File => Some("offline_queue.json"),
            QueueBackend::Memory => None,
        }
    }
}

impl std::fmt::Display for QueueBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueBackend::Sqlite => write!(f, "sqlite"),
            QueueBackend::File => write!(f, "file"),
            QueueBackend::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for QueueBackend {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" | "db" => Ok(QueueBackend::Sqlite),
            "file" | "json" => Ok(QueueBackend::File),
            "memory" | "mem" => Ok(QueueBackend::Memory),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown queue backend: '{}'. Valid options: sqlite, file, memory",
                other
            ))),
        }
    }
}

/// Offline durability queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineSettings {
    /// Replays allowed after the first failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub backend: QueueBackend,

    /// Storage path. Defaults to a file under the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_max_retries() -> u32 {
    pitchside_core::DEFAULT_MAX_REPLAY_RETRIES
}

impl Default for OfflineSettings {
    fn default() -> Self {
        OfflineSettings {
            max_retries: default_max_retries(),
            backend: QueueBackend::default(),
            path: None,
        }
    }
}

// =============================================================================
// Cache / Loader / Reconcile Settings
// =============================================================================

/// Read-through cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// TTL used when a caller does not pass one (seconds).
    #[serde(default = "default_ttl")]
    pub default_ttl_secs: u64,

    /// LRU bound. Unset means TTL-only eviction.
    #[serde(default = "default_max_entries")]
    pub max_entries: Option<usize>,
}

fn default_ttl() -> u64 {
    300
}

fn default_max_entries() -> Option<usize> {
    Some(10_000)
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            default_ttl_secs: default_ttl(),
            max_entries: default_max_entries(),
        }
    }
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// Priority loader settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderSettings {
    /// Retries after the first failed load.
    #[serde(default = "default_loader_retries")]
    pub retries: u32,

    /// First retry delay (milliseconds), doubled on each retry.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
}

fn default_loader_retries() -> u32 {
    3
}

impl Default for LoaderSettings {
    fn default() -> Self {
        LoaderSettings {
            retries: default_loader_retries(),
            base_delay_ms: default_base_delay(),
        }
    }
}

impl LoaderSettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

/// Reconciliation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSettings {
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
}

fn default_reconcile_interval() -> u64 {
    30
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        ReconcileSettings {
            reconcile_interval_secs: default_reconcile_interval(),
        }
    }
}

impl ReconcileSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub connection: ConnectionSettings,

    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub offline: OfflineSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub loader: LoaderSettings,

    #[serde(default)]
    pub sync: ReconcileSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        let ws = url::Url::parse(&self.connection.url)?;
        if !matches!(ws.scheme(), "ws" | "wss") {
            return Err(SyncError::InvalidUrl(format!(
                "Channel URL must start with ws:// or wss://, got: {}",
                self.connection.url
            )));
        }

        let api = url::Url::parse(&self.api.base_url)?;
        if !matches!(api.scheme(), "http" | "https") {
            return Err(SyncError::InvalidUrl(format!(
                "API URL must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }

        if self.connection.base_delay_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "base_delay_ms must be greater than 0".into(),
            ));
        }

        if self.connection.heartbeat_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "heartbeat_secs must be greater than 0".into(),
            ));
        }

        if self.sync.reconcile_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "reconcile_interval_secs must be greater than 0".into(),
            ));
        }

        if self.cache.max_entries == Some(0) {
            return Err(SyncError::InvalidConfig(
                "max_entries must be greater than 0 (omit it for no bound)".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("PITCHSIDE_WS_URL") {
            debug!(url = %url, "Overriding channel URL from environment");
            self.connection.url = url;
        }

        if let Some(url) = lookup("PITCHSIDE_API_URL") {
            debug!(url = %url, "Overriding API URL from environment");
            self.api.base_url = url;
        }

        if let Some(token) = lookup("PITCHSIDE_TOKEN") {
            self.api.token = Some(token);
        }

        if let Some(backend) = lookup("PITCHSIDE_QUEUE_BACKEND") {
            match backend.parse() {
                Ok(parsed) => self.offline.backend = parsed,
                Err(_) => warn!(backend = %backend, "Unknown queue backend in environment"),
            }
        }

        if let Some(path) = lookup("PITCHSIDE_QUEUE_PATH") {
            self.offline.path = Some(PathBuf::from(path));
        }

        if let Some(attempts) = lookup("PITCHSIDE_MAX_ATTEMPTS") {
            if let Ok(n) = attempts.parse::<u32>() {
                debug!(max_attempts = n, "Overriding reconnect attempts from environment");
                self.connection.max_attempts = n;
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("app", "pitchside", "pitchside")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    /// Resolves where the offline queue lives. `None` for the memory backend.
    pub fn queue_path(&self) -> SyncResult<Option<PathBuf>> {
        let Some(file_name) = self.offline.backend.default_file_name() else {
            return Ok(None);
        };
        if let Some(path) = &self.offline.path {
            return Ok(Some(path.clone()));
        }
        directories::ProjectDirs::from("app", "pitchside", "pitchside")
            .map(|dirs| Some(dirs.data_dir().join(file_name)))
            .ok_or_else(|| {
                SyncError::InvalidConfig("No data directory available; set offline.path".into())
            })
    }

    /// Returns the bearer token if configured.
    pub fn token(&self) -> Option<&str> {
        self.api.token.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_backend_parsing() {
        assert_eq!("sqlite".parse::<QueueBackend>().unwrap(), QueueBackend::Sqlite);
        assert_eq!("JSON".parse::<QueueBackend>().unwrap(), QueueBackend::File);
        assert_eq!("memory".parse::<QueueBackend>().unwrap(), QueueBackend::Memory);
        assert!("redis".parse::<QueueBackend>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.connection.base_delay_ms, 1000);
        assert_eq!(config.connection.max_attempts, 5);
        assert_eq!(config.connection.heartbeat_secs, 30);
        assert_eq!(config.connection.liveness_timeout(), None);
        assert_eq!(config.offline.max_retries, 3);
        assert_eq!(config.cache.max_entries, Some(10_000));
        assert_eq!(config.sync.reconcile_interval_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SyncConfig::default();

        config.connection.url = "http://not-a-socket".to_string();
        assert!(config.validate().unwrap_err().is_config_error());

        config.connection.url = "wss://live.example.com/ws".to_string();
        config.api.base_url = "ftp://files".to_string();
        assert!(config.validate().is_err());

        config.api.base_url = "https://api.example.com".to_string();
        assert!(config.validate().is_ok());

        config.cache.max_entries = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PITCHSIDE_WS_URL", "wss://live.example.com/ws"),
            ("PITCHSIDE_TOKEN", "secret"),
            ("PITCHSIDE_QUEUE_BACKEND", "file"),
            ("PITCHSIDE_QUEUE_PATH", "/tmp/q.json"),
            ("PITCHSIDE_MAX_ATTEMPTS", "7"),
        ]
        .into_iter()
        .collect();

        let mut config = SyncConfig::default();
        config.apply_overrides_from(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.connection.url, "wss://live.example.com/ws");
        assert_eq!(config.token(), Some("secret"));
        assert_eq!(config.offline.backend, QueueBackend::File);
        assert_eq!(
            config.queue_path().unwrap(),
            Some(PathBuf::from("/tmp/q.json"))
        );
        assert_eq!(config.connection.max_attempts, 7);
    }

    #[test]
    fn test_memory_backend_has_no_path() {
        let mut config = SyncConfig::default();
        config.offline.backend = QueueBackend::Memory;
        assert_eq!(config.queue_path().unwrap(), None);
    }

    #[test]
    fn test_toml_round_trip_keeps_sections() {
        let config = SyncConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[connection]"));
        assert!(toml_str.contains("[offline]"));

        let parsed: SyncConfig = toml::from_str("[connection]\nmax_attempts = 2\n").unwrap();
        assert_eq!(parsed.connection.max_attempts, 2);
        assert_eq!(parsed.connection.base_delay_ms, 1000);
    }
}
