//! livecast daemon - broadcast scheduler and transcoder supervisor
//!
//! This crate provides the scheduling machinery behind `livecastd`:
//! - `supervisor` - starts, stops and lists tagged ffmpeg processes
//! - `registry` - rebuilds running broadcasts from the process table
//! - `diff` - channel set changes between broadcast versions
//! - `api` - platform live-event APIs (YouTube)
//! - `reconciler` - keeps platform live events in step with the schedule
//! - `repository` - schedule and stream-event storage
//! - `scheduler` - the periodic tick tying it together
//! - `config` - file and environment configuration
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        livecastd                              │
//! ├───────────────────────────────────────────────────────────────┤
//! │                                                               │
//! │  ┌──────────────┐   planned    ┌─────────────────────────┐    │
//! │  │  Repository  │─────────────▶│       Scheduler         │    │
//! │  │ (schedule +  │              │  stop / start / end     │    │
//! │  │   events)    │◀──────┐      └───┬──────────────┬──────┘    │
//! │  └──────────────┘       │          │              │           │
//! │                         │          ▼              ▼           │
//! │                ┌────────┴────────────┐   ┌─────────────────┐  │
//! │                │   EventReconciler   │   │ProcessSupervisor│  │
//! │                │  (ChannelApiStack)  │   │ (sh -c, SIGTERM,│  │
//! │                └─────────────────────┘   │  process table) │  │
//! │                                          └─────────────────┘  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! No broadcast-to-process mapping is stored. Every tick re-derives it from
//! the `-metadata` tags on running transcoder command lines.
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - OS calls are bounded by timeouts

pub mod api;
pub mod config;
pub mod diff;
pub mod reconciler;
pub mod registry;
pub mod repository;
pub mod scheduler;
pub mod supervisor;

pub use config::{ConfigError, SchedulerConfig};
pub use reconciler::{EventReconciler, ReconcileReport};
pub use scheduler::{Scheduler, TickReport};
pub use supervisor::{ProcessBackend, ProcessSupervisor, SupervisorError, SystemBackend};
