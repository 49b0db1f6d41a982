//! Configuration structures for the sync core.
//!
//! Defines where the manifest comes from, where the durable cache and
//! preferences live, how often periodic checks run, and which builds are
//! compatible with this device.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// File name of the durable manifest cache inside `cache_dir`.
pub const MANIFEST_CACHE_FILE: &str = "updates.json";

/// File name of the preferences store inside `data_dir`.
pub const PREFERENCES_FILE: &str = "preferences.json";

/// Main sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// URL of the update manifest
    #[serde(default = "default_manifest_url")]
    pub manifest_url: String,

    /// Directory holding the durable manifest cache (empty = default location)
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Directory holding persisted preferences (empty = default location)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Periodic check interval used until the user picks one
    #[serde(default)]
    pub check_interval: CheckInterval,

    /// Delay before the one-shot retry after a failed automatic check
    #[serde(default = "default_retry_delay")]
    pub retry_delay_minutes: u64,

    /// Device compatibility filter
    #[serde(default)]
    pub compatibility: CompatibilityConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            manifest_url: default_manifest_url(),
            cache_dir: None,
            data_dir: None,
            check_interval: CheckInterval::default(),
            retry_delay_minutes: default_retry_delay(),
            compatibility: CompatibilityConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, SyncError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the default location, or defaults if there is no file.
    pub fn load_default() -> Result<Self, SyncError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load from `custom_path` when given, otherwise from the default location.
    pub fn load_from(custom_path: Option<&Path>) -> Result<Self, SyncError> {
        match custom_path {
            Some(path) => Self::load_from_file(path),
            None => Self::load_default(),
        }
    }

    /// Platform-specific config file path, e.g. `~/.config/ota-sync/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "ota", "ota-sync")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Write a default config file if none exists; returns whether one was
    /// written.
    pub fn create_default_if_missing() -> Result<bool, SyncError> {
        match Self::default_path() {
            Some(path) if !path.exists() => {
                Self::default().save_to_file(&path)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), SyncError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| SyncError::ConfigError(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the sync core cannot work with.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.manifest_url.trim().is_empty() {
            return Err(SyncError::ConfigError("manifest_url must not be empty".to_string()));
        }
        if self.retry_delay_minutes == 0 {
            return Err(SyncError::ConfigError(
                "retry_delay_minutes must be at least 1".to_string(),
            ));
        }
        if self.retry_delay_minutes > MAX_RETRY_DELAY_MINUTES {
            return Err(SyncError::ConfigError(format!(
                "retry_delay_minutes must be at most {} (30 days)",
                MAX_RETRY_DELAY_MINUTES
            )));
        }
        Ok(())
    }

    /// Path of the durable manifest cache.
    pub fn manifest_cache_path(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| default_dir(DirKind::Cache))
            .join(MANIFEST_CACHE_FILE)
    }

    /// Path of the preferences store.
    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| default_dir(DirKind::Data))
            .join(PREFERENCES_FILE)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_minutes.saturating_mul(60))
    }
}

/// How often the periodic manifest check runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckInterval {
    Never,
    Daily,
    Weekly,
    Monthly,
}

impl Default for CheckInterval {
    fn default() -> Self {
        Self::Weekly
    }
}

impl CheckInterval {
    /// Whether periodic checking is enabled at all.
    pub fn is_enabled(&self) -> bool {
        *self != Self::Never
    }

    /// Interval between periodic checks, `None` when disabled.
    pub fn period(&self) -> Option<Duration> {
        const DAY: u64 = 24 * 60 * 60;
        match self {
            Self::Never => None,
            Self::Daily => Some(Duration::from_secs(DAY)),
            Self::Weekly => Some(Duration::from_secs(7 * DAY)),
            Self::Monthly => Some(Duration::from_secs(30 * DAY)),
        }
    }
}

impl std::fmt::Display for CheckInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Never => write!(f, "never"),
            Self::Daily => write!(f, "daily"),
            Self::Weekly => write!(f, "weekly"),
            Self::Monthly => write!(f, "monthly"),
        }
    }
}

impl std::str::FromStr for CheckInterval {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "never" => Ok(Self::Never),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(SyncError::ConfigError(format!(
                "invalid check interval '{}', expected never|daily|weekly|monthly",
                other
            ))),
        }
    }
}

/// Which builds from the manifest may be offered on this device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompatibilityConfig {
    /// Build time of the installed system; older or equal builds are hidden
    #[serde(default)]
    pub installed_build_timestamp: Option<i64>,

    /// Only offer builds of this release type
    #[serde(default)]
    pub release_type: Option<String>,

    /// Offer builds older than the installed one
    #[serde(default)]
    pub allow_downgrading: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions for serde
fn default_manifest_url() -> String {
    "https://updates.example.org/api/v1/updates.json".to_string()
}

/// Upper bound for the retry delay: 30 days.
const MAX_RETRY_DELAY_MINUTES: u64 = 30 * 24 * 60;

fn default_retry_delay() -> u64 {
    120
}

fn default_log_level() -> String {
    "warn".to_string()
}

enum DirKind {
    Cache,
    Data,
}

/// Platform-appropriate default directory.
fn default_dir(kind: DirKind) -> PathBuf {
    match directories::ProjectDirs::from("org", "ota", "ota-sync") {
        Some(dirs) => match kind {
            DirKind::Cache => dirs.cache_dir().to_path_buf(),
            DirKind::Data => dirs.data_dir().to_path_buf(),
        },
        // Fallback
        None => PathBuf::from(".").join("ota-sync"),
    }
}
