//! Engine configuration.
//!
//! Provides [`EngineConfig`] for configuring the Stowage storage engine.
//! Configuration values are loaded from environment variables prefixed with
//! `STOWAGE_`, falling back to defaults suitable for a single-node server.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Directory under the data root that holds engine-private state.
pub const SYSTEM_DIR_NAME: &str = ".stowage";

/// Storage engine configuration.
///
/// # Examples
///
/// ```
/// use stowage_s3_core::config::EngineConfig;
///
/// let config = EngineConfig::default();
/// assert_eq!(config.data_dir, "./data");
/// assert_eq!(config.sync_debounce_millis, 500);
/// assert!(config.watch_filesystem);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Root directory holding bucket trees, trash, uploads and the index.
    #[builder(default = String::from("./data"))]
    pub data_dir: String,

    /// Path of the sqlite index. Empty means `<data_dir>/.stowage/index.db`.
    #[builder(default)]
    pub index_path: String,

    /// Seconds between periodic reconciliation sweeps.
    #[builder(default = 60)]
    pub sync_interval_secs: u64,

    /// Debounce window for filesystem change notifications, in milliseconds.
    #[builder(default = 500)]
    pub sync_debounce_millis: u64,

    /// Whether to watch the data directory for out-of-band edits.
    #[builder(default = true)]
    pub watch_filesystem: bool,

    /// Seconds between trash retention sweeps.
    #[builder(default = 3600)]
    pub trash_interval_secs: u64,

    /// Seconds between lifecycle expiration sweeps.
    #[builder(default = 3600)]
    pub lifecycle_interval_secs: u64,

    /// Listing cache TTL in seconds. Zero disables the cache.
    #[builder(default = 30)]
    pub listing_cache_ttl_secs: u64,

    /// Hex-encoded 32-byte master key. Unset means generate and persist one.
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,

    /// Log level filter string (e.g. `"info"`, `"debug"`).
    #[builder(default = String::from("info"))]
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: String::from("./data"),
            index_path: String::new(),
            sync_interval_secs: 60,
            sync_debounce_millis: 500,
            watch_filesystem: true,
            trash_interval_secs: 3600,
            lifecycle_interval_secs: 3600,
            listing_cache_ttl_secs: 30,
            encryption_key: None,
            log_level: String::from("info"),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Reads the following environment variables (falling back to defaults):
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `STOWAGE_DATA_DIR` | `./data` |
    /// | `STOWAGE_INDEX_PATH` | `<data_dir>/.stowage/index.db` |
    /// | `STOWAGE_SYNC_INTERVAL_SECS` | `60` |
    /// | `STOWAGE_SYNC_DEBOUNCE_MS` | `500` |
    /// | `STOWAGE_WATCH_FS` | `true` |
    /// | `STOWAGE_TRASH_INTERVAL_SECS` | `3600` |
    /// | `STOWAGE_LIFECYCLE_INTERVAL_SECS` | `3600` |
    /// | `STOWAGE_CACHE_TTL_SECS` | `30` |
    /// | `STOWAGE_ENCRYPTION_KEY` | unset |
    /// | `LOG_LEVEL` | `info` |
    ///
    /// Unparseable numeric values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("STOWAGE_DATA_DIR") {
            config.data_dir = v;
        }
        if let Ok(v) = std::env::var("STOWAGE_INDEX_PATH") {
            config.index_path = v;
        }
        if let Some(n) = env_u64("STOWAGE_SYNC_INTERVAL_SECS") {
            config.sync_interval_secs = n;
        }
        if let Some(n) = env_u64("STOWAGE_SYNC_DEBOUNCE_MS") {
            config.sync_debounce_millis = n;
        }
        if let Ok(v) = std::env::var("STOWAGE_WATCH_FS") {
            config.watch_filesystem = parse_bool(&v);
        }
        if let Some(n) = env_u64("STOWAGE_TRASH_INTERVAL_SECS") {
            config.trash_interval_secs = n;
        }
        if let Some(n) = env_u64("STOWAGE_LIFECYCLE_INTERVAL_SECS") {
            config.lifecycle_interval_secs = n;
        }
        if let Some(n) = env_u64("STOWAGE_CACHE_TTL_SECS") {
            config.listing_cache_ttl_secs = n;
        }
        if let Ok(v) = std::env::var("STOWAGE_ENCRYPTION_KEY") {
            if !v.trim().is_empty() {
                config.encryption_key = Some(v.trim().to_owned());
            }
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            config.log_level = v;
        }

        config
    }

    /// Root data directory as a path.
    #[must_use]
    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    /// Resolved sqlite index location.
    #[must_use]
    pub fn resolved_index_path(&self) -> PathBuf {
        if self.index_path.is_empty() {
            self.data_path().join(SYSTEM_DIR_NAME).join("index.db")
        } else {
            PathBuf::from(&self.index_path)
        }
    }

    /// Periodic sync interval. Never zero.
    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    /// Debounce window for change notifications.
    #[must_use]
    pub fn sync_debounce(&self) -> Duration {
        Duration::from_millis(self.sync_debounce_millis)
    }

    /// Trash sweep interval. Never zero.
    #[must_use]
    pub fn trash_interval(&self) -> Duration {
        Duration::from_secs(self.trash_interval_secs.max(1))
    }

    /// Lifecycle sweep interval. Never zero.
    #[must_use]
    pub fn lifecycle_interval(&self) -> Duration {
        Duration::from_secs(self.lifecycle_interval_secs.max(1))
    }

    /// Listing cache TTL, or `None` when caching is disabled.
    #[must_use]
    pub fn listing_cache_ttl(&self) -> Option<Duration> {
        (self.listing_cache_ttl_secs > 0).then(|| Duration::from_secs(self.listing_cache_ttl_secs))
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<u64>().ok())
}

/// Parse a string as a boolean, accepting `"1"` and `"true"` (case-insensitive).
fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}
