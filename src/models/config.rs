//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP and scheduling behavior settings
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Rule persistence settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Push event settings
    #[serde(default)]
    pub events: EventsConfig,

    /// Change notification settings
    #[serde(default)]
    pub notification: NotificationConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.monitor.user_agent.trim().is_empty() {
            return Err(AppError::validation("monitor.user_agent is empty"));
        }
        if self.monitor.timeout_secs == 0 {
            return Err(AppError::validation("monitor.timeout_secs must be > 0"));
        }
        if self.monitor.max_body_bytes == 0 {
            return Err(AppError::validation("monitor.max_body_bytes must be > 0"));
        }
        if self.monitor.min_interval_secs == 0 {
            return Err(AppError::validation("monitor.min_interval_secs must be > 0"));
        }
        if self.storage.rules_file.as_os_str().is_empty() {
            return Err(AppError::validation("storage.rules_file is empty"));
        }
        if self.events.capacity == 0 {
            return Err(AppError::validation("events.capacity must be > 0"));
        }
        if self.logging.max_file_bytes == 0 {
            return Err(AppError::validation("logging.max_file_bytes must be > 0"));
        }
        Ok(())
    }

    /// Resolve the rules file against the directory holding the config file.
    pub fn rules_path(&self, config_dir: &Path) -> PathBuf {
        if self.storage.rules_file.is_absolute() {
            self.storage.rules_file.clone()
        } else {
            config_dir.join(&self.storage.rules_file)
        }
    }

    /// Resolve the log file, if any, the same way as the rules file.
    pub fn log_path(&self, config_dir: &Path) -> Option<PathBuf> {
        let file = self.logging.file.as_ref()?;
        Some(if file.is_absolute() {
            file.clone()
        } else {
            config_dir.join(file)
        })
    }
}

/// HTTP client and scheduling behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Per-request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Largest response body accepted
    #[serde(default = "defaults::max_body_bytes")]
    pub max_body_bytes: usize,

    /// Redirects followed before giving up
    #[serde(default = "defaults::max_redirects")]
    pub max_redirects: usize,

    /// Fire the first tick as soon as a timer is armed
    #[serde(default = "defaults::check_on_start")]
    pub check_on_start: bool,

    /// Smallest interval a rule may use
    #[serde(default = "defaults::min_interval")]
    pub min_interval_secs: u64,
}

impl MonitorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            max_body_bytes: defaults::max_body_bytes(),
            max_redirects: defaults::max_redirects(),
            check_on_start: defaults::check_on_start(),
            min_interval_secs: defaults::min_interval(),
        }
    }
}

/// Rule persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Rules file; relative paths resolve against the config directory
    #[serde(default = "defaults::rules_file")]
    pub rules_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            rules_file: defaults::rules_file(),
        }
    }
}

/// Push event settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Events buffered per listener before the oldest are dropped
    #[serde(default = "defaults::event_capacity")]
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: defaults::event_capacity(),
        }
    }
}

/// Change notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Master switch; rules still need `notify_enabled`
    #[serde(default = "defaults::notification_enabled")]
    pub enabled: bool,

    /// Content longer than this is truncated in the message
    #[serde(default = "defaults::max_message_chars")]
    pub max_message_chars: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::notification_enabled(),
            max_message_chars: defaults::max_message_chars(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "defaults::log_level")]
    pub level: String,

    /// Write log lines to this file instead of stderr
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Rotate the log file at startup once it exceeds this size
    #[serde(default = "defaults::log_max_bytes")]
    pub max_file_bytes: u64,

    /// Rotated files to keep (`<file>.1` is the newest)
    #[serde(default = "defaults::log_max_backups")]
    pub max_backups: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
            file: None,
            max_file_bytes: defaults::log_max_bytes(),
            max_backups: defaults::log_max_backups(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // Monitor defaults
    pub fn user_agent() -> String {
        concat!("pagewatch/", env!("CARGO_PKG_VERSION")).into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn max_body_bytes() -> usize {
        10 * 1024 * 1024
    }
    pub fn max_redirects() -> usize {
        10
    }
    pub fn check_on_start() -> bool {
        true
    }
    pub fn min_interval() -> u64 {
        1
    }

    // Storage defaults
    pub fn rules_file() -> PathBuf {
        PathBuf::from("rules.json")
    }

    // Event defaults
    pub fn event_capacity() -> usize {
        256
    }

    // Notification defaults
    pub fn notification_enabled() -> bool {
        true
    }
    pub fn max_message_chars() -> usize {
        200
    }

    // Logging defaults
    pub fn log_level() -> String {
        "info".into()
    }
    pub fn log_max_bytes() -> u64 {
        10 * 1024 * 1024
    }
    pub fn log_max_backups() -> usize {
        5
    }
}
