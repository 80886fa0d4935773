use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error_handling::types::ConfigError;

/// Configuration of one service, read from a TOML file.
///
/// Every field is optional in the file and falls back to [`Config::default`].
///
/// ```toml
/// name = "echo"
/// listen = ["0.0.0.0:7777"]
/// connect = ["198.51.100.7:9000"]
/// update_interval_ms = 20
/// journal_path = "/var/log/echo.jsonl"
/// ```
///
/// # Fields Overview
///
/// - `name`: Service name used in logs and the journal
/// - `listen`: Addresses the raw TCP engine binds at startup
/// - `connect`: Peers connected to asynchronously once the service runs
/// - `allow_empty`: Accept a configuration with neither `listen` nor `connect`
/// - `update_interval_ms`: Length of one processing cycle
/// - `max_events_per_cycle`: Engine events delivered per cycle at most
/// - `event_queue_capacity`: Bound of the engine-to-service event queue
/// - `max_sessions`: Concurrent sessions before new ones are refused
/// - `connect_timeout_ms`: Time an outbound attempt may take before it fails
/// - `read_buffer_size`: Largest chunk read from a socket at once
/// - `log_level`: `off`, `error`, `warn`, `info`, `debug` or `trace`
/// - `journal_path`: When set, every session event is appended there as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub name: String,
    pub listen: Vec<SocketAddr>,
    pub connect: Vec<SocketAddr>,
    pub allow_empty: bool,
    pub update_interval_ms: u64,
    pub max_events_per_cycle: usize,
    pub event_queue_capacity: usize,
    pub max_sessions: usize,
    pub connect_timeout_ms: u64,
    pub read_buffer_size: usize,
    pub log_level: String,
    pub journal_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: String::from("netfacade"),
            listen: Vec::new(),
            connect: Vec::new(),
            allow_empty: false,
            update_interval_ms: 50,
            max_events_per_cycle: 1024,
            event_queue_capacity: 1024,
            max_sessions: 1024,
            connect_timeout_ms: 5000,
            read_buffer_size: 16 * 1024,
            log_level: String::from("info"),
            journal_path: None,
        }
    }
}

impl Config {
    /// Reads and validates a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingServiceName);
        }
        if self.listen.is_empty() && self.connect.is_empty() && !self.allow_empty {
            return Err(ConfigError::NoEndpoints);
        }
        if !(1..=60_000).contains(&self.update_interval_ms) {
            return Err(ConfigError::NotInRange(format!(
                "update_interval_ms must be within 1..=60000, got {}",
                self.update_interval_ms
            )));
        }
        if self.max_events_per_cycle == 0 {
            return Err(ConfigError::NotInRange(
                "max_events_per_cycle must be positive".to_string(),
            ));
        }
        if self.event_queue_capacity == 0 {
            return Err(ConfigError::NotInRange(
                "event_queue_capacity must be positive".to_string(),
            ));
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::NotInRange(
                "max_sessions must be positive".to_string(),
            ));
        }
        if self.read_buffer_size == 0 {
            return Err(ConfigError::NotInRange(
                "read_buffer_size must be positive".to_string(),
            ));
        }
        self.level_filter()?;
        Ok(())
    }

    pub fn level_filter(&self) -> Result<LevelFilter, ConfigError> {
        self.log_level
            .parse::<LevelFilter>()
            .map_err(|_| ConfigError::BadLogLevel(self.log_level.clone()))
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
