//! livecast daemon - broadcast scheduler and ffmpeg supervisor
//!
//! Reads the broadcast schedule, starts and stops ffmpeg so that exactly
//! the broadcasts live right now are streaming, and sends end signals to
//! platforms once broadcasts are over.
//!
//! # Usage
//!
//! ```bash
//! # Run a single scheduling pass (e.g. from cron)
//! LIVECAST_ENV=prod LIVECAST_SCHEDULE=/etc/livecast/schedule.toml livecastd tick
//!
//! # Run the scheduling loop (foreground)
//! livecastd run
//!
//! # Run the scheduling loop in the background
//! livecastd run -d
//!
//! # Stop the background loop
//! livecastd stop
//!
//! # Check whether the loop is running
//! livecastd status
//!
//! # Enable debug logging
//! RUST_LOG=livecastd=debug livecastd tick
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: finish the current tick, then exit

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use livecast_core::system_clock;
use livecastd::api::ChannelApiStack;
use livecastd::repository::ScheduleFile;
use livecastd::{ProcessSupervisor, Scheduler, SchedulerConfig, SystemBackend};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// livecast daemon - broadcast scheduler
#[derive(Parser, Debug)]
#[command(name = "livecastd", version, about)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "LIVECAST_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one scheduling pass and exit
    Tick,
    /// Run the scheduling loop
    Run {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,
    },
    /// Stop the running loop
    Stop,
    /// Show loop status
    Status,
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("livecast")
}

/// Returns the path to the PID file.
fn pid_file_path() -> PathBuf {
    state_dir().join("livecastd.pid")
}

/// Returns the path to the log file used when daemonized.
fn log_file_path() -> PathBuf {
    state_dir().join("livecastd.log")
}

/// Reads the PID from the PID file, if it exists.
fn read_pid() -> Option<u32> {
    let mut file = File::open(pid_file_path()).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

/// Writes the current PID to the PID file.
fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

fn is_process_running(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

/// Returns the pid of a running loop, clearing a stale PID file.
fn running_loop() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        remove_pid_file();
    }
    None
}

fn stop_loop(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let raw = i32::try_from(pid).context("PID out of range")?;
        // SAFETY: kill has no memory-safety preconditions.
        let result = unsafe { libc::kill(raw, libc::SIGTERM) };
        if result != 0 {
            bail!("Failed to send SIGTERM to process {}", pid);
        }
    }
    #[cfg(not(unix))]
    {
        bail!("Stop command is only supported on Unix systems");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Tick);

    match command {
        Command::Tick => {
            // A tick must not overlap a running loop.
            if let Some(pid) = running_loop() {
                eprintln!("Scheduler loop is running (PID {pid}); skipping tick.");
                return Ok(());
            }
            let config = load_config(args.config.as_deref())?;
            run_tick(config)
        }
        Command::Run { daemon } => {
            if let Some(pid) = running_loop() {
                eprintln!("Scheduler loop is already running (PID {pid})");
                eprintln!("Use 'livecastd stop' to stop it first.");
                process::exit(1);
            }
            let config = load_config(args.config.as_deref())?;

            if daemon {
                // Daemonize before starting tokio runtime
                daemonize()?;
            }

            write_pid()?;
            let result = run_loop(config);
            remove_pid_file();
            result
        }
        Command::Stop => {
            let Some(pid) = running_loop() else {
                println!("Scheduler loop is not running.");
                return Ok(());
            };
            println!("Stopping scheduler loop (PID {pid})...");
            stop_loop(pid)?;

            // The current tick finishes first; allow for a slow one.
            for _ in 0..100 {
                if !is_process_running(pid) {
                    println!("Scheduler loop stopped.");
                    return Ok(());
                }
                std::thread::sleep(std::time::Duration::from_millis(100));
            }

            eprintln!("Scheduler loop did not stop within 10 seconds.");
            process::exit(1);
        }
        Command::Status => match running_loop() {
            Some(pid) => {
                println!("Scheduler loop is running (PID {pid})");
                Ok(())
            }
            None => {
                println!("Scheduler loop is not running.");
                process::exit(1);
            }
        },
    }
}

fn load_config(path: Option<&Path>) -> Result<SchedulerConfig> {
    let config = SchedulerConfig::load(path).context("Failed to load configuration")?;
    config.validate()?;
    if config.schedule_path.is_none() {
        bail!("No schedule file configured (set LIVECAST_SCHEDULE or schedule_path)");
    }
    Ok(config)
}

/// Daemonizes the current process.
fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("livecastd=info".parse()?)
                .add_directive("livecast_core=info".parse()?)
                .add_directive("livecast_protocol=info".parse()?),
        )
        .init();
    Ok(())
}

fn build_scheduler(config: &SchedulerConfig) -> Result<Scheduler> {
    let clock = system_clock();
    let supervisor = ProcessSupervisor::new(config, Arc::new(SystemBackend), clock.clone())?;

    let schedule_path = config
        .schedule_path
        .clone()
        .context("No schedule file configured")?;
    let store = Arc::new(ScheduleFile::new(schedule_path));

    // Platform transports are supplied by embedders of the library; this
    // binary streams plain channels only.
    let apis = ChannelApiStack::new();
    warn!("No live-event APIs registered; planned channels will fail to start");

    Ok(Scheduler::new(supervisor, store.clone(), store, apis, clock))
}

#[tokio::main]
async fn run_tick(config: SchedulerConfig) -> Result<()> {
    init_tracing()?;
    let mut scheduler = build_scheduler(&config)?;

    let report = scheduler.tick().await.context("Scheduling pass aborted")?;
    info!(
        started = report.started,
        stopped = report.stopped,
        end_signals = report.end_signals,
        failures = report.failures,
        "Scheduling pass finished"
    );
    Ok(())
}

#[tokio::main]
async fn run_loop(config: SchedulerConfig) -> Result<()> {
    init_tracing()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        environment = %config.environment,
        "livecast scheduler starting"
    );

    let mut scheduler = build_scheduler(&config)?;

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    scheduler.run(config.tick_interval(), cancel_token).await;

    info!("livecast scheduler stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
