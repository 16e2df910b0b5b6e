//! Scheduler configuration.
//!
//! Values come from an optional TOML file and are then overridden by
//! environment variables:
//!
//! | variable | field |
//! |---|---|
//! | `LIVECAST_ENV` | `environment` |
//! | `LIVECAST_FFMPEG` | `executable` |
//! | `LIVECAST_LOG_DIR` | `log_directory` |
//! | `LIVECAST_TICK_SECS` | `tick_interval_secs` |
//! | `LIVECAST_PROCESS_TIMEOUT_SECS` | `process_timeout_secs` |
//! | `LIVECAST_SCHEDULE` | `schedule_path` |

use std::path::{Path, PathBuf};
use std::time::Duration;

use livecast_core::{is_shell_safe, LiveBroadcastError};
use livecast_protocol::DEFAULT_LOG_PREFIX;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default transcoder executable.
pub const DEFAULT_EXECUTABLE: &str = "ffmpeg";

/// Default seconds between scheduler ticks.
pub const DEFAULT_TICK_SECS: u64 = 10;

/// Default upper bound for a single process-table call.
pub const DEFAULT_PROCESS_TIMEOUT_SECS: u64 = 5;

/// Errors while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Runtime configuration for the scheduler and supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Deployment environment tagged onto every process (e.g. `prod`).
    pub environment: String,
    /// Transcoder executable, also the process name used for listing.
    pub executable: String,
    /// Directory for per-process transcoder logs; `None` discards output.
    pub log_directory: Option<PathBuf>,
    /// Log file name prefix.
    pub log_prefix: String,
    pub tick_interval_secs: u64,
    pub process_timeout_secs: u64,
    /// Schedule file used by the binary's file-backed store.
    pub schedule_path: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            environment: String::new(),
            executable: DEFAULT_EXECUTABLE.to_string(),
            log_directory: None,
            log_prefix: DEFAULT_LOG_PREFIX.to_string(),
            tick_interval_secs: DEFAULT_TICK_SECS,
            process_timeout_secs: DEFAULT_PROCESS_TIMEOUT_SECS,
            schedule_path: None,
        }
    }
}

impl SchedulerConfig {
    /// Creates a config for the given environment with default settings.
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            ..Self::default()
        }
    }

    /// Set the transcoder log directory.
    #[must_use]
    pub fn with_log_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_directory = Some(dir.into());
        self
    }

    /// Loads a TOML file (if given) and applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Parses a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies overrides from a variable lookup (the process env in
    /// production, a map in tests).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        if let Some(env) = lookup("LIVECAST_ENV") {
            self.environment = env;
        }
        if let Some(exe) = lookup("LIVECAST_FFMPEG") {
            self.executable = exe;
        }
        if let Some(dir) = lookup("LIVECAST_LOG_DIR") {
            self.log_directory = (!dir.is_empty()).then(|| PathBuf::from(dir));
        }
        if let Some(secs) = lookup("LIVECAST_TICK_SECS") {
            self.tick_interval_secs = parse_secs("LIVECAST_TICK_SECS", secs)?;
        }
        if let Some(secs) = lookup("LIVECAST_PROCESS_TIMEOUT_SECS") {
            self.process_timeout_secs = parse_secs("LIVECAST_PROCESS_TIMEOUT_SECS", secs)?;
        }
        if let Some(path) = lookup("LIVECAST_SCHEDULE") {
            self.schedule_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    /// Checks the settings the scheduler cannot run without.
    ///
    /// # Errors
    ///
    /// `LiveBroadcastError::ScheduleFatal` if the environment or executable
    /// is empty, or the environment cannot be written as a bare tag value.
    pub fn validate(&self) -> Result<(), LiveBroadcastError> {
        if self.environment.trim().is_empty() {
            return Err(LiveBroadcastError::fatal(
                "runtime environment is not set (LIVECAST_ENV)",
            ));
        }
        if !self.environment.chars().all(is_shell_safe) {
            return Err(LiveBroadcastError::fatal(format!(
                "runtime environment {:?} may only contain letters, digits and /._-:=%@+,",
                self.environment
            )));
        }
        if self.executable.trim().is_empty() {
            return Err(LiveBroadcastError::fatal("transcoder executable is empty"));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.process_timeout_secs.max(1))
    }
}

fn parse_secs(var: &'static str, value: String) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { var, value })
}
