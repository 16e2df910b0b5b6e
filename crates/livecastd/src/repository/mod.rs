//! Persistence boundary for planned broadcasts and platform live events.
//!
//! The scheduler only reads broadcasts. Stream events are written by the
//! channel APIs (on create/remove) and by the end-signal step.
//!
//! Two implementations ship with the crate:
//! - [`MemoryStore`] - in-process maps, used by tests and embedders
//! - [`ScheduleFile`] - a TOML schedule plus a JSON event file, used by the
//!   `livecastd` binary

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use livecast_core::{
    BroadcastId, ChannelId, LiveBroadcastError, OutputChannel, PlannedBroadcast, StreamEvent,
};
use thiserror::Error;

mod file;
mod memory;

pub use file::ScheduleFile;
pub use memory::MemoryStore;

/// Errors from a repository backend.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// The store refused the write.
    #[error("write rejected: {0}")]
    Rejected(String),
}

impl From<RepositoryError> for LiveBroadcastError {
    fn from(err: RepositoryError) -> Self {
        LiveBroadcastError::Persistence(err.to_string())
    }
}

/// Read access to the broadcast schedule.
#[async_trait]
pub trait BroadcastRepository: Send + Sync {
    /// Broadcasts whose window has not closed at `now`, ordered by start.
    async fn planned_broadcasts(&self, now: DateTime<Utc>) -> Result<Vec<PlannedBroadcast>, RepositoryError>;

    async fn broadcast_by_id(&self, id: BroadcastId) -> Result<Option<PlannedBroadcast>, RepositoryError>;

    async fn channel_by_id(&self, id: ChannelId) -> Result<Option<OutputChannel>, RepositoryError>;
}

/// Storage for platform live-event registrations.
///
/// At most one event exists per (broadcast, channel) pair; saving replaces.
#[async_trait]
pub trait StreamEventRepository: Send + Sync {
    async fn find_event(
        &self,
        broadcast_id: BroadcastId,
        channel_id: ChannelId,
    ) -> Result<Option<StreamEvent>, RepositoryError>;

    async fn save_event(&self, event: &StreamEvent) -> Result<(), RepositoryError>;

    /// Removes the pair's event. Removing a missing event is a no-op.
    async fn remove_event(&self, broadcast_id: BroadcastId, channel_id: ChannelId) -> Result<(), RepositoryError>;

    /// Events that have not yet had an end signal sent and whose broadcast
    /// has ended at `now` or is no longer in the schedule.
    async fn events_pending_end(&self, now: DateTime<Utc>) -> Result<Vec<StreamEvent>, RepositoryError>;

    /// Drops events whose end signal has been sent. Returns how many went.
    async fn prune_signalled(&self) -> Result<usize, RepositoryError>;
}

/// Filters and orders a schedule for [`BroadcastRepository::planned_broadcasts`].
fn still_planned<I>(broadcasts: I, now: DateTime<Utc>) -> Vec<PlannedBroadcast>
where
    I: IntoIterator<Item = PlannedBroadcast>,
{
    let mut planned: Vec<PlannedBroadcast> = broadcasts
        .into_iter()
        .filter(|b| !b.has_ended_at(now))
        .collect();
    planned.sort_by_key(|b| (b.start, b.broadcast_id));
    planned
}

/// Selects unsignalled events whose broadcast (looked up by `end_of`) has
/// ended or no longer exists.
fn pending_end<F>(events: &[StreamEvent], now: DateTime<Utc>, end_of: F) -> Vec<StreamEvent>
where
    F: Fn(BroadcastId) -> Option<DateTime<Utc>>,
{
    events
        .iter()
        .filter(|event| !event.end_signal_sent)
        .filter(|event| end_of(event.broadcast_id).map_or(true, |end| end <= now))
        .cloned()
        .collect()
}
