//! Service configuration.
//!
//! Read from a TOML file (`$REMINDER_CONFIG`, else `config/reminder.toml`);
//! a missing file means defaults. `REMINDER_BIND` and `REMINDER_DB_PATH`
//! override the file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::models::DEFAULT_CATEGORY;
use crate::notify::PermissionState;
use crate::store::DEFAULT_DB_PATH;

pub const CONFIG_ENV: &str = "REMINDER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/reminder.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub reminders: ReminderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP API listens on.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON file holding all tasks.
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderConfig {
    /// Category given to tasks created without one.
    pub default_category: String,
    /// How many upcoming tasks the summary widget shows.
    pub widget_limit: usize,
    /// Most timers the facility will hold at once; further registrations
    /// are rejected.
    pub max_pending_timers: usize,
    /// Initial state of the notification-posting permission.
    pub notifications_allowed: bool,
    /// Initial state of the exact-alarm permission.
    pub exact_alarms_allowed: bool,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            default_category: DEFAULT_CATEGORY.to_string(),
            widget_limit: 3,
            max_pending_timers: 500,
            notifications_allowed: true,
            exact_alarms_allowed: true,
        }
    }
}

impl AppConfig {
    /// Load from the configured path, then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(bind) = lookup("REMINDER_BIND") {
            self.server.bind = bind;
        }
        if let Some(db_path) = lookup("REMINDER_DB_PATH") {
            self.storage.db_path = PathBuf::from(db_path);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        if self.reminders.default_category.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "reminders.default_category must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .bind
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("server.bind {:?}: {e}", self.server.bind)))
    }

    pub fn initial_permissions(&self) -> PermissionState {
        PermissionState {
            notifications: self.reminders.notifications_allowed,
            exact_alarms: self.reminders.exact_alarms_allowed,
        }
    }
}
