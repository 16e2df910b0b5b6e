//! Transcoder process supervision.
//!
//! The supervisor starts transcoders with identity-bearing command lines,
//! lists the ones currently running and stops them by pid. It keeps no
//! handles: a process started by one scheduler run is found again by a
//! later run through the tags on its command line.
//!
//! ```text
//! Scheduler ──start(input, output, tags)──▶ ProcessSupervisor
//!                                             │  + env tag, log target (clock)
//!                                             ▼
//!                                   livecast_protocol::encode
//!                                             │
//!                                             ▼
//!                                 ProcessBackend::launch ("sh -c ... &")
//! ```
//!
//! Every backend call runs under the configured timeout, so a hung process
//! listing cannot stall a tick.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use livecast_core::{LiveBroadcastError, SharedClock};
use livecast_protocol::{encode, LogTarget, TagError, Tags, TAG_ENVIRONMENT};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;

mod backend;

pub use backend::{ProcessBackend, SystemBackend};

// ============================================================================
// Error Types
// ============================================================================

/// Errors from individual supervisor operations.
///
/// None of these abort a tick; the scheduler logs them per process.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The shell could not be spawned.
    #[error("failed to launch transcoder: {0}")]
    Spawn(#[source] std::io::Error),

    /// The shell exited with a failure status.
    #[error("transcoder shell exited with status {0:?}")]
    ShellExit(Option<i32>),

    /// The pid cannot address a single process.
    #[error("refusing to signal invalid pid {0}")]
    InvalidPid(u32),

    /// Sending the signal failed for a reason other than a missing process.
    #[error("failed to signal process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    /// The process table could not be read.
    #[error("failed to list processes: {0}")]
    Listing(String),

    /// The OS call did not finish in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// A tag cannot be embedded in the command line.
    #[error(transparent)]
    InvalidTags(#[from] TagError),
}

// ============================================================================
// Process Supervisor
// ============================================================================

/// Starts, stops and lists transcoder processes for one environment.
pub struct ProcessSupervisor {
    backend: Arc<dyn ProcessBackend>,
    clock: SharedClock,
    environment: String,
    executable: String,
    log_directory: Option<PathBuf>,
    log_prefix: String,
    timeout: Duration,
}

impl ProcessSupervisor {
    /// Creates a supervisor from configuration.
    ///
    /// # Errors
    ///
    /// `LiveBroadcastError::ScheduleFatal` if the configuration has no
    /// environment or executable.
    pub fn new(
        config: &SchedulerConfig,
        backend: Arc<dyn ProcessBackend>,
        clock: SharedClock,
    ) -> Result<Self, LiveBroadcastError> {
        config.validate()?;

        Ok(Self {
            backend,
            clock,
            environment: config.environment.clone(),
            executable: config.executable.clone(),
            log_directory: config.log_directory.clone(),
            log_prefix: config.log_prefix.clone(),
            timeout: config.process_timeout(),
        })
    }

    /// The environment this supervisor tags onto and accepts from processes.
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Builds the command line `start` would launch.
    ///
    /// The `env` tag is appended after the caller's tags (or overrides a
    /// caller-supplied `env` in place).
    pub fn command_line(&self, input: &str, output: &str, tags: &Tags) -> Result<String, SupervisorError> {
        let mut tags = tags.clone();
        tags.push(TAG_ENVIRONMENT, &self.environment);
        tags.validate()?;

        let target = LogTarget::for_start(
            self.log_directory.as_deref(),
            &self.log_prefix,
            self.clock.now(),
        );
        Ok(encode(&self.executable, input, output, &tags, &target))
    }

    /// Launches a detached transcoder and returns its command line.
    ///
    /// Fire-and-forget: the call returns once the shell has forked the
    /// transcoder. Nothing is kept about the new process.
    pub async fn start(&self, input: &str, output: &str, tags: &Tags) -> Result<String, SupervisorError> {
        let command_line = self.command_line(input, output, tags)?;

        if let Some(dir) = &self.log_directory {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                warn!(dir = %dir.display(), error = %e, "Failed to create transcoder log directory");
            }
        }

        self.bounded("process start", self.backend.launch(&command_line))
            .await?;

        info!(command = %command_line, "Started transcoder");
        Ok(command_line)
    }

    /// Sends a termination signal to `pid`.
    ///
    /// A pid whose process has already exited is not an error.
    pub async fn stop(&self, pid: u32) -> Result<(), SupervisorError> {
        self.bounded("process stop", self.backend.terminate(pid))
            .await?;
        info!(pid, "Stopped transcoder");
        Ok(())
    }

    /// Returns `"<pid> <command line>"` for every running transcoder.
    ///
    /// Order is whatever the OS reports.
    pub async fn list_running(&self) -> Result<Vec<String>, SupervisorError> {
        let lines = self
            .bounded("process listing", self.backend.list(&self.executable))
            .await?;
        debug!(count = lines.len(), "Listed running transcoders");
        Ok(lines)
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, SupervisorError>
    where
        F: Future<Output = Result<T, SupervisorError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SupervisorError::Timeout {
                operation,
                after: self.timeout,
            }),
        }
    }
}
