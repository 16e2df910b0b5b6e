//! Integration tests for the file-backed schedule.
//!
//! These tests run the reconciler and the scheduler against a real
//! `schedule.toml` and its event file in a temporary directory, editing the
//! schedule between calls the way an operator would.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use livecast_core::{
    BroadcastId, ChannelId, ExternalEventId, FixedClock, OutputChannel, OutputError, PlannedBroadcast,
    Platform, SharedClock, StreamEvent,
};
use livecastd::api::{ChannelApiStack, ChannelEventApi};
use livecastd::repository::{BroadcastRepository, ScheduleFile, StreamEventRepository};
use livecastd::{ProcessBackend, ProcessSupervisor, Scheduler, SchedulerConfig, SupervisorError};

// ============================================================================
// Test Helpers
// ============================================================================

const CHANNELS: &str = r#"
[[channels]]
channel_id = 1
name = "main"
type = "youtube"
refresh_token = "token-1"

[[channels]]
channel_id = 2
name = "second"
type = "youtube"
refresh_token = "token-2"

[[channels]]
channel_id = 3
name = "third"
type = "youtube"
refresh_token = "token-3"

[[channels]]
channel_id = 4
name = "twitch"
type = "twitch"
server = "live-ams.twitch.tv"
stream_key = "live_123"
"#;

/// Writes the channel list plus one broadcast targeting `channels`.
fn write_schedule(path: &Path, channels: &[u32]) {
    let ids: Vec<String> = channels.iter().map(u32::to_string).collect();
    let broadcast = format!(
        r#"
[[broadcasts]]
broadcast_id = 7
name = "Evening show"
start = "2024-05-01T20:00:00Z"
end = "2024-05-01T21:00:00Z"
privacy_status = "unlisted"
channels = [{}]
input = {{ type = "file", source = "/srv/video/show.mp4" }}
"#,
        ids.join(", ")
    );
    std::fs::write(path, format!("{CHANNELS}{broadcast}")).unwrap();
}

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, hour, minute, 0).unwrap()
}

/// Live-event API that records calls and stores events through the
/// repository, as a platform client does.
struct RecordingApi {
    events: Arc<ScheduleFile>,
    calls: Mutex<Vec<String>>,
}

impl RecordingApi {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ChannelEventApi for RecordingApi {
    async fn create_live_event(
        &self,
        broadcast: &PlannedBroadcast,
        channel: &OutputChannel,
    ) -> Result<ExternalEventId, OutputError> {
        self.record(format!("create {}", channel.channel_id));
        let external = ExternalEventId::new(format!("yt-{}-{}", broadcast.broadcast_id, channel.channel_id));
        let event = StreamEvent::new(broadcast.broadcast_id, channel.channel_id, external.clone())
            .with_ingest(format!("ingest-{}", channel.channel_id));
        self.events
            .save_event(&event)
            .await
            .map_err(|e| OutputError::new(e.to_string()))?;
        Ok(external)
    }

    async fn update_live_event(&self, _: &PlannedBroadcast, channel: &OutputChannel) -> Result<(), OutputError> {
        self.record(format!("update {}", channel.channel_id));
        Ok(())
    }

    async fn remove_live_event(&self, broadcast: &PlannedBroadcast, channel: &OutputChannel) -> Result<(), OutputError> {
        self.record(format!("remove {}", channel.channel_id));
        self.events
            .remove_event(broadcast.broadcast_id, channel.channel_id)
            .await
            .map_err(|e| OutputError::new(e.to_string()))
    }

    async fn send_end_signal(&self, _: &OutputChannel, external_id: &ExternalEventId) -> Result<(), OutputError> {
        self.record(format!("end {external_id}"));
        Ok(())
    }

    async fn stream_url(&self, _: &OutputChannel, event: &StreamEvent) -> Result<String, OutputError> {
        let ingest = event.external_ingest_id.as_deref().unwrap_or_default();
        Ok(format!("rtmp://a.rtmp.youtube.com/live2/{ingest}"))
    }
}

/// Backend that only records launches; the process table stays empty.
#[derive(Default)]
struct LaunchRecorder {
    launched: Mutex<Vec<String>>,
}

#[async_trait]
impl ProcessBackend for LaunchRecorder {
    async fn launch(&self, command_line: &str) -> Result<(), SupervisorError> {
        self.launched.lock().unwrap().push(command_line.to_string());
        Ok(())
    }

    async fn terminate(&self, _pid: u32) -> Result<(), SupervisorError> {
        Ok(())
    }

    async fn list(&self, _executable: &str) -> Result<Vec<String>, SupervisorError> {
        Ok(Vec::new())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    schedule_path: std::path::PathBuf,
    store: Arc<ScheduleFile>,
    api: Arc<RecordingApi>,
    backend: Arc<LaunchRecorder>,
}

impl Harness {
    fn new(channels: &[u32]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let schedule_path = dir.path().join("schedule.toml");
        write_schedule(&schedule_path, channels);
        let store = Arc::new(ScheduleFile::new(&schedule_path));
        let api = Arc::new(RecordingApi {
            events: store.clone(),
            calls: Mutex::new(Vec::new()),
        });
        Self {
            _dir: dir,
            schedule_path,
            store,
            api,
            backend: Arc::new(LaunchRecorder::default()),
        }
    }

    fn scheduler(&self, now: DateTime<Utc>) -> Scheduler {
        let clock: SharedClock = Arc::new(FixedClock(now));
        let supervisor =
            ProcessSupervisor::new(&SchedulerConfig::new("prod"), self.backend.clone(), clock.clone()).unwrap();
        let apis = ChannelApiStack::new().with(Platform::YouTube, self.api.clone());
        Scheduler::new(supervisor, self.store.clone(), self.store.clone(), apis, clock)
    }

    async fn broadcast(&self) -> PlannedBroadcast {
        self.store
            .broadcast_by_id(BroadcastId::new(7))
            .await
            .unwrap()
            .unwrap()
    }
}

// ============================================================================
// Reconciliation Tests
// ============================================================================

#[tokio::test]
async fn test_insert_creates_events_for_planned_channels_only() {
    let h = Harness::new(&[1, 2, 4]);
    let scheduler = h.scheduler(at(19, 0));

    let report = scheduler.reconciler().on_insert(&h.broadcast().await).await;

    assert_eq!(report.created, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(h.api.calls(), vec!["create 1".to_string(), "create 2".to_string()]);

    // The event file sits beside the schedule and survives a fresh store.
    assert!(h.store.events_path().starts_with(h.schedule_path.parent().unwrap()));
    let reopened = ScheduleFile::new(&h.schedule_path);
    let event = reopened
        .find_event(BroadcastId::new(7), ChannelId::new(2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.external_stream_id.as_str(), "yt-7-2");
}

#[tokio::test]
async fn test_update_follows_schedule_edit() {
    let h = Harness::new(&[1, 2]);
    let scheduler = h.scheduler(at(19, 0));
    scheduler.reconciler().on_insert(&h.broadcast().await).await;

    // The operator swaps channel 1 for channel 3. The update is reconciled
    // against the stored version before the edit is saved.
    let mut edited = h.broadcast().await;
    edited.output_channels.retain(|c| c.channel_id != ChannelId::new(1));
    let third = h.store.channel_by_id(ChannelId::new(3)).await.unwrap().unwrap();
    edited.output_channels.push(third);

    let report = scheduler.reconciler().on_update(&edited).await.unwrap();
    write_schedule(&h.schedule_path, &[2, 3]);

    assert_eq!((report.created, report.updated, report.removed), (1, 1, 1));
    assert_eq!(
        h.api.calls()[2..],
        ["create 3".to_string(), "update 2".to_string(), "remove 1".to_string()]
    );
    assert!(h
        .store
        .find_event(BroadcastId::new(7), ChannelId::new(1))
        .await
        .unwrap()
        .is_none());
}

// ============================================================================
// Scheduling Tests
// ============================================================================

#[tokio::test]
async fn test_tick_streams_to_event_and_plain_ingests() {
    let h = Harness::new(&[1, 4]);
    h.scheduler(at(19, 0))
        .reconciler()
        .on_insert(&h.broadcast().await)
        .await;

    let mut scheduler = h.scheduler(at(20, 15));
    let report = scheduler.tick().await.unwrap();

    assert_eq!(report.started, 2);
    let launched = h.backend.launched.lock().unwrap().clone();
    assert!(launched[0].starts_with(
        "ffmpeg -re -i /srv/video/show.mp4 -vcodec copy -acodec copy -f flv rtmp://a.rtmp.youtube.com/live2/ingest-1 \
         -metadata broadcast_id=7 -metadata channel_id=1 -metadata env=prod"
    ));
    assert!(launched[1].contains("-f flv rtmp://live-ams.twitch.tv/app/live_123 -metadata broadcast_id=7 -metadata channel_id=4"));
}

#[tokio::test]
async fn test_end_signal_is_persisted_in_event_file() {
    let h = Harness::new(&[1]);
    h.scheduler(at(19, 0))
        .reconciler()
        .on_insert(&h.broadcast().await)
        .await;

    let mut after_end = h.scheduler(at(21, 0));
    let report = after_end.tick().await.unwrap();
    assert_eq!(report.end_signals, 1);

    // The signalled event is pruned from the file, so a restarted process
    // has nothing left to signal.
    assert!(h
        .store
        .find_event(BroadcastId::new(7), ChannelId::new(1))
        .await
        .unwrap()
        .is_none());
    let mut restarted = h.scheduler(at(21, 5));
    assert_eq!(restarted.tick().await.unwrap().end_signals, 0);
    assert_eq!(h.api.calls(), vec!["create 1".to_string(), "end yt-7-1".to_string()]);
}

#[tokio::test]
async fn test_missing_schedule_aborts_tick() {
    let h = Harness::new(&[1]);
    std::fs::remove_file(&h.schedule_path).unwrap();

    let result = h.scheduler(at(20, 15)).tick().await;

    assert!(result.is_err());
    assert!(h.backend.launched.lock().unwrap().is_empty());
}
