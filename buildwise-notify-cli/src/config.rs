//! Configuration management for the bwn CLI.

use anyhow::{Context, Result};
use buildwise_notify::{NotificationConfig, NotificationService, DEFAULT_KEY_PREFIX};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CLI configuration.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where conversations are stored.
    pub storage: StorageConfig,
    /// Notification behaviour.
    pub notifications: NotificationSettings,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage directory; defaults to `bwn-data` next to the executable.
    pub data_dir: Option<PathBuf>,
}

/// Notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// Prefix of storage keys.
    pub key_prefix: String,
    /// Days to keep messages; 0 keeps them forever.
    pub retention_days: u32,
    /// Seconds a new message keeps blinking.
    pub blink_seconds: u64,
    /// Milliseconds between storage polls while watching.
    pub poll_interval_ms: u64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        let defaults = NotificationConfig::default();
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_owned(),
            retention_days: defaults.retention_days.unwrap_or(0),
            blink_seconds: defaults.blink_duration.as_secs(),
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
        }
    }
}

impl NotificationSettings {
    /// Convert to the library configuration.
    pub fn to_library(&self) -> NotificationConfig {
        NotificationConfig {
            key_prefix: self.key_prefix.clone(),
            retention_days: (self.retention_days > 0).then_some(self.retention_days),
            blink_duration: Duration::from_secs(self.blink_seconds),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
        }
    }
}

fn exe_dir() -> Result<PathBuf> {
    let exe_path = env::current_exe().context("Could not determine executable path")?;
    let exe_dir = exe_path
        .parent()
        .context("Could not determine executable directory")?;
    Ok(exe_dir.to_path_buf())
}

/// Get the configuration file path.
pub fn config_path() -> Result<PathBuf> {
    Ok(exe_dir()?.join("bwn.toml"))
}

/// Load configuration from file.
pub fn load_config() -> Result<Config> {
    let path = config_path()?;

    if !path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&path).context("Failed to read config file")?;
    tracing::debug!(path = %path.display(), "loaded config");

    parse_config(&content)
}

fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).context("Failed to parse config file")
}

/// Save configuration to file.
pub fn save_config(config: &Config) -> Result<()> {
    let path = config_path()?;
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;

    fs::write(&path, content).context("Failed to write config file")?;

    Ok(())
}

/// Resolve the storage directory: command line, then config file, then the
/// default next to the executable.
pub fn data_dir(config: &Config, cli_override: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = cli_override {
        return Ok(dir.to_path_buf());
    }
    if let Some(dir) = &config.storage.data_dir {
        return Ok(dir.clone());
    }
    Ok(exe_dir()?.join("bwn-data"))
}

/// Build a notification service from the current configuration.
///
/// With `startup_sweep` off the configured retention is not applied, for
/// commands that sweep with their own window.
pub fn build_service(
    cli_data_dir: Option<&Path>,
    startup_sweep: bool,
) -> Result<NotificationService> {
    let config = load_config()?;
    let dir = data_dir(&config, cli_data_dir)?;
    open_service(&config, &dir, startup_sweep)
}

fn open_service(config: &Config, dir: &Path, startup_sweep: bool) -> Result<NotificationService> {
    tracing::debug!(dir = %dir.display(), startup_sweep, "opening notification storage");

    let mut settings = config.notifications.to_library();
    if !startup_sweep {
        settings.retention_days = None;
    }

    NotificationService::builder()
        .directory(dir)
        .config(settings)
        .build()
        .with_context(|| format!("Failed to open notification storage at {}", dir.display()))
}
