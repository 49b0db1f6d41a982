//! Command-line overrides for the sync configuration.
//!
//! The configuration itself lives in [`ota_sync::SyncConfig`]; flags given
//! on the command line take precedence over the file.

use ota_sync::SyncConfig;

/// Values taken from command-line flags.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// Manifest URL override (`--url` / `OTA_SYNC_MANIFEST_URL`)
    pub manifest_url: Option<String>,
    /// Force debug logging
    pub debug: bool,
}

impl CliOverrides {
    /// Apply the overrides; CLI values win over the config file.
    pub fn apply(&self, mut config: SyncConfig) -> SyncConfig {
        if let Some(url) = self.manifest_url.as_deref() {
            if !url.trim().is_empty() {
                config.manifest_url = url.to_string();
            }
        }
        if self.debug {
            config.logging.level = "debug".to_string();
        }
        config
    }
}
