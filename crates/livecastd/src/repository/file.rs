//! File-backed repository for the `livecastd` binary.
//!
//! The schedule is a TOML document edited by operators; the scheduler never
//! writes it. Stream events are machine state and live in a JSON file next
//! to it (`schedule.toml` -> `schedule.events.json`).
//!
//! ```toml
//! [[channels]]
//! channel_id = 1
//! name = "main"
//! type = "youtube"
//! refresh_token = "1//0g..."
//!
//! [[channels]]
//! channel_id = 2
//! name = "twitch"
//! type = "twitch"
//! server = "live-ams.twitch.tv"
//! stream_key = "live_123"
//!
//! [[broadcasts]]
//! broadcast_id = 7
//! name = "Evening show"
//! start = "2024-05-01T20:00:00Z"
//! end = "2024-05-01T21:00:00Z"
//! privacy_status = "unlisted"
//! channels = [1, 2]
//! input = { type = "file", source = "/srv/video/show.mp4" }
//! ```
//!
//! Timestamps are quoted RFC 3339 strings. Both files are re-read on every
//! call, so schedule edits take effect on the next tick.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use livecast_core::{
    BroadcastId, BroadcastInput, ChannelId, OutputChannel, PlannedBroadcast, PrivacyStatus,
    StreamEvent,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{pending_end, still_planned, BroadcastRepository, RepositoryError, StreamEventRepository};

// ============================================================================
// Document Format
// ============================================================================

#[derive(Debug, Default, Deserialize, Serialize)]
struct ScheduleDocument {
    #[serde(default)]
    channels: Vec<OutputChannel>,
    #[serde(default)]
    broadcasts: Vec<BroadcastRecord>,
}

/// A broadcast as written in the schedule, with channels by id.
#[derive(Debug, Deserialize, Serialize)]
struct BroadcastRecord {
    broadcast_id: BroadcastId,
    name: String,
    #[serde(default)]
    description: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    #[serde(default)]
    privacy_status: PrivacyStatus,
    #[serde(default)]
    thumbnail: Option<PathBuf>,
    input: BroadcastInput,
    #[serde(default)]
    channels: Vec<ChannelId>,
}

/// A parsed schedule with channel references resolved.
struct Schedule {
    broadcasts: Vec<PlannedBroadcast>,
    channels: HashMap<ChannelId, OutputChannel>,
}

impl ScheduleDocument {
    fn resolve(self) -> Schedule {
        let channels: HashMap<ChannelId, OutputChannel> = self
            .channels
            .into_iter()
            .map(|c| (c.channel_id, c))
            .collect();

        let broadcasts = self
            .broadcasts
            .into_iter()
            .map(|record| {
                let output_channels = record
                    .channels
                    .iter()
                    .filter_map(|id| {
                        let channel = channels.get(id).cloned();
                        if channel.is_none() {
                            warn!(
                                broadcast_id = %record.broadcast_id,
                                channel_id = %id,
                                "Broadcast references unknown channel"
                            );
                        }
                        channel
                    })
                    .collect();

                PlannedBroadcast {
                    broadcast_id: record.broadcast_id,
                    name: record.name,
                    description: record.description,
                    start: record.start,
                    end: record.end,
                    privacy_status: record.privacy_status,
                    thumbnail: record.thumbnail,
                    input: record.input,
                    output_channels,
                }
            })
            .collect();

        Schedule {
            broadcasts,
            channels,
        }
    }
}

// ============================================================================
// Schedule File
// ============================================================================

/// Repository over a TOML schedule and a JSON stream-event file.
#[derive(Debug)]
pub struct ScheduleFile {
    schedule_path: PathBuf,
    events_path: PathBuf,
    /// Serializes read-modify-write cycles on the event file.
    events_lock: Mutex<()>,
}

impl ScheduleFile {
    /// Uses `schedule_path` with events stored beside it.
    pub fn new(schedule_path: impl Into<PathBuf>) -> Self {
        let schedule_path = schedule_path.into();
        let events_path = schedule_path.with_extension("events.json");
        Self {
            schedule_path,
            events_path,
            events_lock: Mutex::new(()),
        }
    }

    /// Overrides the event file location.
    #[must_use]
    pub fn with_events_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.events_path = path.into();
        self
    }

    pub fn schedule_path(&self) -> &Path {
        &self.schedule_path
    }

    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    async fn load_schedule(&self) -> Result<Schedule, RepositoryError> {
        let contents = tokio::fs::read_to_string(&self.schedule_path)
            .await
            .map_err(|source| RepositoryError::Io {
                path: self.schedule_path.clone(),
                source,
            })?;
        let document: ScheduleDocument =
            toml::from_str(&contents).map_err(|e| RepositoryError::Parse {
                path: self.schedule_path.clone(),
                message: e.to_string(),
            })?;
        Ok(document.resolve())
    }

    async fn load_events(&self) -> Result<Vec<StreamEvent>, RepositoryError> {
        let contents = match tokio::fs::read_to_string(&self.events_path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(RepositoryError::Io {
                    path: self.events_path.clone(),
                    source,
                })
            }
        };
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&contents).map_err(|e| RepositoryError::Parse {
            path: self.events_path.clone(),
            message: e.to_string(),
        })
    }

    /// Writes the event list through a temp file and rename.
    async fn store_events(&self, events: &[StreamEvent]) -> Result<(), RepositoryError> {
        let io_err = |source: std::io::Error| RepositoryError::Io {
            path: self.events_path.clone(),
            source,
        };
        let json = serde_json::to_string_pretty(events).map_err(|e| RepositoryError::Parse {
            path: self.events_path.clone(),
            message: e.to_string(),
        })?;

        let tmp = self.events_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.events_path)
            .await
            .map_err(io_err)?;

        debug!(path = %self.events_path.display(), count = events.len(), "Stored stream events");
        Ok(())
    }
}

#[async_trait]
impl BroadcastRepository for ScheduleFile {
    async fn planned_broadcasts(&self, now: DateTime<Utc>) -> Result<Vec<PlannedBroadcast>, RepositoryError> {
        let schedule = self.load_schedule().await?;
        Ok(still_planned(schedule.broadcasts, now))
    }

    async fn broadcast_by_id(&self, id: BroadcastId) -> Result<Option<PlannedBroadcast>, RepositoryError> {
        let schedule = self.load_schedule().await?;
        Ok(schedule
            .broadcasts
            .into_iter()
            .find(|b| b.broadcast_id == id))
    }

    async fn channel_by_id(&self, id: ChannelId) -> Result<Option<OutputChannel>, RepositoryError> {
        let mut schedule = self.load_schedule().await?;
        Ok(schedule.channels.remove(&id))
    }
}

#[async_trait]
impl StreamEventRepository for ScheduleFile {
    async fn find_event(
        &self,
        broadcast_id: BroadcastId,
        channel_id: ChannelId,
    ) -> Result<Option<StreamEvent>, RepositoryError> {
        let events = self.load_events().await?;
        Ok(events
            .into_iter()
            .find(|e| e.matches(broadcast_id, channel_id)))
    }

    async fn save_event(&self, event: &StreamEvent) -> Result<(), RepositoryError> {
        let _guard = self.events_lock.lock().await;
        let mut events = self.load_events().await?;
        match events
            .iter_mut()
            .find(|e| e.matches(event.broadcast_id, event.channel_id))
        {
            Some(existing) => *existing = event.clone(),
            None => events.push(event.clone()),
        }
        self.store_events(&events).await
    }

    async fn remove_event(&self, broadcast_id: BroadcastId, channel_id: ChannelId) -> Result<(), RepositoryError> {
        let _guard = self.events_lock.lock().await;
        let mut events = self.load_events().await?;
        let before = events.len();
        events.retain(|e| !e.matches(broadcast_id, channel_id));
        if events.len() == before {
            return Ok(());
        }
        self.store_events(&events).await
    }

    async fn events_pending_end(&self, now: DateTime<Utc>) -> Result<Vec<StreamEvent>, RepositoryError> {
        let events = self.load_events().await?;
        if events.is_empty() {
            return Ok(events);
        }
        let schedule = self.load_schedule().await?;
        let ends: HashMap<BroadcastId, DateTime<Utc>> = schedule
            .broadcasts
            .iter()
            .map(|b| (b.broadcast_id, b.end))
            .collect();
        Ok(pending_end(&events, now, |id| ends.get(&id).copied()))
    }

    async fn prune_signalled(&self) -> Result<usize, RepositoryError> {
        let _guard = self.events_lock.lock().await;
        let mut events = self.load_events().await?;
        let before = events.len();
        events.retain(|e| !e.end_signal_sent);
        let pruned = before - events.len();
        if pruned > 0 {
            self.store_events(&events).await?;
        }
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use livecast_core::ChannelKind;

    const SCHEDULE: &str = r#"
[[channels]]
channel_id = 1
name = "main"
type = "youtube"
refresh_token = "token"

[[channels]]
channel_id = 2
name = "twitch"
type = "twitch"
server = "live-ams.twitch.tv"
stream_key = "live_123"

[[broadcasts]]
broadcast_id = 7
name = "Evening show"
start = "2024-05-01T20:00:00Z"
end = "2024-05-01T21:00:00Z"
privacy_status = "unlisted"
channels = [1, 2, 9]
input = { type = "file", source = "/srv/video/show.mp4" }
"#;

    fn write_schedule(dir: &Path) -> ScheduleFile {
        let path = dir.join("schedule.toml");
        std::fs::write(&path, SCHEDULE).unwrap();
        ScheduleFile::new(path)
    }

    #[tokio::test]
    async fn test_parse_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let store = write_schedule(dir.path());
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 20, 30, 0).unwrap();

        let planned = store.planned_broadcasts(now).await.unwrap();
        assert_eq!(planned.len(), 1);
        let show = &planned[0];
        assert_eq!(show.broadcast_id, BroadcastId::new(7));
        assert_eq!(show.privacy_status, PrivacyStatus::Unlisted);
        assert_eq!(
            show.input,
            BroadcastInput::File(PathBuf::from("/srv/video/show.mp4"))
        );
        // Unknown channel 9 is dropped.
        let channel_ids: Vec<u32> = show.output_channels.iter().map(|c| c.channel_id.get()).collect();
        assert_eq!(channel_ids, vec![1, 2]);

        let twitch = store.channel_by_id(ChannelId::new(2)).await.unwrap().unwrap();
        assert!(matches!(twitch.kind, ChannelKind::Twitch { .. }));

        let later = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        assert!(store.planned_broadcasts(later).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_events_file_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = write_schedule(dir.path());
        assert_eq!(store.events_path(), dir.path().join("schedule.events.json"));

        let b = BroadcastId::new(7);
        let c = ChannelId::new(1);
        assert!(store.find_event(b, c).await.unwrap().is_none());

        let event = StreamEvent::new(b, c, "yt-7".into()).with_ingest("stream-7");
        store.save_event(&event).await.unwrap();
        assert_eq!(store.find_event(b, c).await.unwrap(), Some(event.clone()));

        let after_end = Utc.with_ymd_and_hms(2024, 5, 1, 21, 0, 0).unwrap();
        assert_eq!(store.events_pending_end(after_end).await.unwrap(), vec![event]);

        store.remove_event(b, c).await.unwrap();
        assert!(store.find_event(b, c).await.unwrap().is_none());
        store.remove_event(b, c).await.unwrap();
    }

    #[tokio::test]
    async fn test_prune_and_orphaned_events() {
        let dir = tempfile::tempdir().unwrap();
        let store = write_schedule(dir.path());
        let before_start = Utc.with_ymd_and_hms(2024, 5, 1, 19, 0, 0).unwrap();

        let mut signalled = StreamEvent::new(BroadcastId::new(7), ChannelId::new(1), "yt-7".into());
        signalled.end_signal_sent = true;
        let orphan = StreamEvent::new(BroadcastId::new(99), ChannelId::new(1), "yt-99".into());
        store.save_event(&signalled).await.unwrap();
        store.save_event(&orphan).await.unwrap();

        // Broadcast 99 is not in the schedule, so its event is due now.
        assert_eq!(
            store.events_pending_end(before_start).await.unwrap(),
            vec![orphan.clone()]
        );

        assert_eq!(store.prune_signalled().await.unwrap(), 1);
        assert!(store
            .find_event(BroadcastId::new(7), ChannelId::new(1))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_event(BroadcastId::new(99), ChannelId::new(1))
            .await
            .unwrap()
            .is_some());
        assert_eq!(store.prune_signalled().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_schedule_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduleFile::new(dir.path().join("absent.toml"));
        let err = store.planned_broadcasts(Utc::now()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Io { .. }));
    }

    #[tokio::test]
    async fn test_malformed_schedule_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule.toml");
        std::fs::write(&path, "[[broadcasts]]\nbroadcast_id = \"seven\"\n").unwrap();
        let err = ScheduleFile::new(path)
            .planned_broadcasts(Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Parse { .. }));
    }
}
