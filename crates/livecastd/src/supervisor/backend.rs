//! OS access for the supervisor: launching, signalling and listing
//! transcoder processes.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - A vanished process is a normal outcome, not an error

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use sysinfo::System;
use tokio::process::Command;
use tracing::{debug, trace};

use super::SupervisorError;

/// Low-level process operations used by [`super::ProcessSupervisor`].
///
/// The OS implementation is [`SystemBackend`]; tests substitute recorders.
#[async_trait]
pub trait ProcessBackend: Send + Sync {
    /// Hands a complete shell command line to `sh -c`.
    ///
    /// The line ends in `&`, so the shell returns as soon as the transcoder
    /// is forked and the transcoder outlives this program.
    async fn launch(&self, command_line: &str) -> Result<(), SupervisorError>;

    /// Sends SIGTERM to `pid`. Succeeds if the process no longer exists.
    async fn terminate(&self, pid: u32) -> Result<(), SupervisorError>;

    /// Lists running processes named `executable` as `"<pid> <args>"` lines.
    async fn list(&self, executable: &str) -> Result<Vec<String>, SupervisorError>;
}

/// Backend talking to the local operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBackend;

#[async_trait]
impl ProcessBackend for SystemBackend {
    async fn launch(&self, command_line: &str) -> Result<(), SupervisorError> {
        let status = Command::new("sh")
            .arg("-c")
            .arg(command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(SupervisorError::Spawn)?;

        if !status.success() {
            return Err(SupervisorError::ShellExit(status.code()));
        }
        Ok(())
    }

    async fn terminate(&self, pid: u32) -> Result<(), SupervisorError> {
        send_sigterm(pid)
    }

    async fn list(&self, executable: &str) -> Result<Vec<String>, SupervisorError> {
        let executable = executable.to_string();
        tokio::task::spawn_blocking(move || scan_processes(&executable))
            .await
            .map_err(|e| SupervisorError::Listing(format!("process scan task failed: {e}")))
    }
}

/// Signals a single process.
fn send_sigterm(pid: u32) -> Result<(), SupervisorError> {
    // kill(0) and negative pids address process groups.
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => kill_term(raw, pid),
        _ => Err(SupervisorError::InvalidPid(pid)),
    }
}

#[cfg(unix)]
fn kill_term(raw: i32, pid: u32) -> Result<(), SupervisorError> {
    // SAFETY: kill has no memory-safety preconditions.
    let result = unsafe { libc::kill(raw, libc::SIGTERM) };
    if result == 0 {
        return Ok(());
    }

    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        debug!(pid, "Process already gone");
        return Ok(());
    }
    Err(SupervisorError::Signal { pid, source: err })
}

#[cfg(not(unix))]
fn kill_term(_raw: i32, pid: u32) -> Result<(), SupervisorError> {
    Err(SupervisorError::Signal {
        pid,
        source: std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "signals are only supported on Unix systems",
        ),
    })
}

/// Scans the process table for transcoder processes.
///
/// This function performs blocking I/O and should be called via `spawn_blocking`.
fn scan_processes(executable: &str) -> Vec<String> {
    let wanted = executable_name(executable);
    let mut system = System::new();
    system.refresh_all();

    let mut lines = Vec::new();
    for (pid, process) in system.processes() {
        // Linux reports threads as tasks sharing the parent's command line.
        if process.thread_kind().is_some() {
            continue;
        }

        let args: Vec<String> = process.cmd().iter().map(lossy).collect();
        let Some(first) = args.first() else {
            continue;
        };

        if lossy(process.name()) != wanted && executable_name(first) != wanted {
            continue;
        }

        trace!(pid = pid.as_u32(), "Matched transcoder process");
        lines.push(format!("{} {}", pid.as_u32(), args.join(" ")));
    }

    debug!(executable = %wanted, count = lines.len(), "Scanned process table");
    lines
}

/// File name part of an executable path.
fn executable_name(executable: &str) -> String {
    Path::new(executable)
        .file_name()
        .map(lossy)
        .unwrap_or_else(|| executable.to_string())
}

fn lossy<S: AsRef<OsStr> + ?Sized>(value: &S) -> String {
    value.as_ref().to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executable_name() {
        assert_eq!(executable_name("ffmpeg"), "ffmpeg");
        assert_eq!(executable_name("/usr/local/bin/ffmpeg"), "ffmpeg");
    }

    #[test]
    fn test_sigterm_rejects_group_pids() {
        assert!(matches!(send_sigterm(0), Err(SupervisorError::InvalidPid(0))));
        assert!(matches!(
            send_sigterm(u32::MAX),
            Err(SupervisorError::InvalidPid(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_sigterm_missing_process_is_ok() {
        // PID far above the default pid_max
        assert!(send_sigterm(999_999_999).is_ok());
    }

    #[tokio::test]
    async fn test_scan_finds_nothing_for_unknown_name() {
        let lines = SystemBackend
            .list("no-such-transcoder-binary")
            .await
            .unwrap();
        assert!(lines.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_runs_shell_line() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("launched");
        let line = format!("touch {}", marker.display());
        SystemBackend.launch(&line).await.unwrap();
        assert!(marker.exists());
    }
}
