// ABOUTME: Platform configuration types and parsing for flotilla.yml.
// ABOUTME: Handles YAML parsing, discovery, and interval defaults.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "flotilla.yml";
pub const CONFIG_FILENAME_ALT: &str = "flotilla.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".flotilla/config.yml";

/// Platform-level settings for the orchestration core.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformConfig {
    /// How often the status reconciler re-derives aggregate statuses.
    #[serde(default = "default_reconcile_interval", with = "humantime_serde")]
    pub reconcile_interval: Duration,

    /// Default for product runs that don't specify it explicitly.
    #[serde(default)]
    pub continue_on_error: bool,

    /// Master switch for progress and in-app notifications.
    #[serde(default = "default_notifications_enabled")]
    pub notifications_enabled: bool,
}

fn default_reconcile_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_notifications_enabled() -> bool {
    true
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: default_reconcile_interval(),
            continue_on_error: false,
            notifications_enabled: default_notifications_enabled(),
        }
    }
}

impl PlatformConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        if config.reconcile_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "reconcile_interval must be greater than zero".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ConfigNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Look for a config file in the conventional locations under `dir`.
    /// Falls back to defaults when none exists.
    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }
}
