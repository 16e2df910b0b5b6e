//! The periodic scheduling pass.
//!
//! Each tick compares the schedule with the transcoders found in the
//! process table and closes the gap:
//!
//! ```text
//!  process table ──list──▶ snapshot ──actionable(env)──┐
//!                                                      ▼
//!  schedule ──planned(now)──────────────────────▶ stop phase  (SIGTERM)
//!                                                 start phase (sh -c ffmpeg ... &)
//!  stream events ──pending_end(now)─────────────▶ end-signal phase (then prune)
//! ```
//!
//! Only the listing and the schedule read can fail a tick. Everything else
//! is per process or per channel: logged, counted in [`TickReport`], and
//! skipped.
//!
//! # Schedule edits
//!
//! A tick does not watch the schedule for edits and never creates, updates
//! or removes platform live events. Whoever mutates broadcasts calls the
//! [`EventReconciler`] (see [`Scheduler::reconciler`]):
//! `on_insert` after a broadcast is added, `on_update` with the new version
//! before it replaces the stored one, and `on_delete` before removal. The
//! tick only reads the stream events that reconciliation left behind, and
//! sends end signals for them.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Per-item failures are reported, never propagated past the item

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use livecast_core::{
    flv_output_args, BroadcastId, BroadcastResult, ChannelId, LiveBroadcastError, OutputChannel,
    PlannedBroadcast, RunningBroadcast, SharedClock,
};
use livecast_protocol::Tags;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::ChannelApiStack;
use crate::reconciler::EventReconciler;
use crate::registry;
use crate::repository::{BroadcastRepository, RepositoryError, StreamEventRepository};
use crate::supervisor::{ProcessSupervisor, SupervisorError};

// ============================================================================
// Reports and Errors
// ============================================================================

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub started: usize,
    pub stopped: usize,
    pub end_signals: usize,
    pub failures: usize,
}

impl TickReport {
    /// Returns true if the tick changed nothing and hit no errors.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

/// Why a single stream could not be started.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("no live-event API registered for {0}")]
    NoApi(String),

    #[error("no live event registered for broadcast {broadcast_id} on channel {channel_id}")]
    NoLiveEvent {
        broadcast_id: BroadcastId,
        channel_id: ChannelId,
    },

    #[error(transparent)]
    Broadcast(#[from] LiveBroadcastError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

// ============================================================================
// Scheduler
// ============================================================================

/// Applies the broadcast schedule to the process table.
pub struct Scheduler {
    supervisor: ProcessSupervisor,
    broadcasts: Arc<dyn BroadcastRepository>,
    events: Arc<dyn StreamEventRepository>,
    reconciler: EventReconciler,
    clock: SharedClock,
}

impl Scheduler {
    pub fn new(
        supervisor: ProcessSupervisor,
        broadcasts: Arc<dyn BroadcastRepository>,
        events: Arc<dyn StreamEventRepository>,
        apis: ChannelApiStack,
        clock: SharedClock,
    ) -> Self {
        let reconciler = EventReconciler::new(apis, Arc::clone(&broadcasts), Arc::clone(&events));
        Self {
            supervisor,
            broadcasts,
            events,
            reconciler,
            clock,
        }
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn reconciler(&self) -> &EventReconciler {
        &self.reconciler
    }

    /// Runs one scheduling pass.
    ///
    /// Takes `&mut self` so two passes over the same scheduler can never
    /// overlap.
    ///
    /// # Errors
    ///
    /// `ScheduleFatal` if the process table or the schedule cannot be read.
    pub async fn tick(&mut self) -> BroadcastResult<TickReport> {
        let now = self.clock.now();

        let lines = self
            .supervisor
            .list_running()
            .await
            .map_err(|e| LiveBroadcastError::fatal(format!("cannot list running transcoders: {e}")))?;
        let entries = registry::snapshot(&lines);
        let running: Vec<&RunningBroadcast> =
            registry::actionable(&entries, self.supervisor.environment()).collect();

        let planned = self
            .broadcasts
            .planned_broadcasts(now)
            .await
            .map_err(|e| LiveBroadcastError::fatal(format!("cannot load planned broadcasts: {e}")))?;

        let mut report = TickReport::default();
        self.stop_phase(&running, &planned, now, &mut report).await;
        self.start_phase(&running, &planned, now, &mut report).await;
        self.end_signal_phase(now, &mut report).await;

        if report.is_idle() {
            debug!(running = running.len(), planned = planned.len(), "Tick complete, nothing to do");
        } else {
            info!(
                started = report.started,
                stopped = report.stopped,
                end_signals = report.end_signals,
                failures = report.failures,
                "Tick complete"
            );
        }
        Ok(report)
    }

    /// Ticks every `interval` until `cancel` fires.
    ///
    /// Cancellation is only observed between ticks. Ticks that would have
    /// fired while one was running are skipped, not queued.
    pub async fn run(&mut self, interval: Duration, cancel: CancellationToken) {
        // tokio rejects a zero period.
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval_secs = interval.as_secs(), "Scheduler loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Tick failed");
                    }
                }
            }
        }
        info!("Scheduler loop stopped");
    }

    async fn stop_phase(
        &self,
        running: &[&RunningBroadcast],
        planned: &[PlannedBroadcast],
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        for entry in running {
            let Some(reason) = stop_reason(entry, planned, now) else {
                continue;
            };
            match self.supervisor.stop(entry.process_id).await {
                Ok(()) => {
                    info!(
                        pid = entry.process_id,
                        broadcast_id = %entry.broadcast_id,
                        channel_id = %entry.channel_id,
                        reason,
                        "Stopped broadcast"
                    );
                    report.stopped += 1;
                }
                Err(e) => {
                    warn!(pid = entry.process_id, error = %e, "Failed to stop broadcast");
                    report.failures += 1;
                }
            }
        }
    }

    async fn start_phase(
        &self,
        running: &[&RunningBroadcast],
        planned: &[PlannedBroadcast],
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        for broadcast in planned.iter().filter(|b| b.is_live_at(now)) {
            for channel in &broadcast.output_channels {
                if registry::is_broadcasting(running.iter().copied(), broadcast, channel) {
                    continue;
                }
                match self.start_stream(broadcast, channel).await {
                    Ok(_) => {
                        info!(
                            broadcast_id = %broadcast.broadcast_id,
                            channel = %channel,
                            "Started broadcast"
                        );
                        report.started += 1;
                    }
                    Err(e) => {
                        warn!(
                            broadcast_id = %broadcast.broadcast_id,
                            channel = %channel,
                            error = %e,
                            "Failed to start broadcast"
                        );
                        report.failures += 1;
                    }
                }
            }
        }
    }

    async fn end_signal_phase(&self, now: DateTime<Utc>, report: &mut TickReport) {
        let pending = match self.events.events_pending_end(now).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "Cannot load events awaiting an end signal");
                report.failures += 1;
                return;
            }
        };

        for event in &pending {
            match self.reconciler.send_end_signal(event).await {
                Ok(true) => report.end_signals += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        broadcast_id = %event.broadcast_id,
                        channel_id = %event.channel_id,
                        error = %e,
                        "Failed to send end signal"
                    );
                    report.failures += 1;
                }
            }
        }

        if pending.is_empty() {
            return;
        }
        match self.events.prune_signalled().await {
            Ok(0) => {}
            Ok(pruned) => debug!(pruned, "Pruned signalled stream events"),
            Err(e) => warn!(error = %e, "Failed to prune signalled stream events"),
        }
    }

    /// Starts the transcoder for one (broadcast, channel) pair.
    ///
    /// Returns the launched command line.
    pub async fn start_stream(
        &self,
        broadcast: &PlannedBroadcast,
        channel: &OutputChannel,
    ) -> Result<String, StartError> {
        let url = self.output_url(broadcast, channel).await?;
        let tags = Tags::for_stream(broadcast.broadcast_id, channel.channel_id);
        let command_line = self
            .supervisor
            .start(&broadcast.input.to_input_args(), &flv_output_args(&url), &tags)
            .await?;
        Ok(command_line)
    }

    /// Ingest URL for a channel: its own for plain channels, the platform
    /// event's for planned ones.
    async fn output_url(&self, broadcast: &PlannedBroadcast, channel: &OutputChannel) -> Result<String, StartError> {
        if let Some(url) = channel.ingest_url() {
            return Ok(url);
        }

        let api = self
            .reconciler
            .apis()
            .api_for(channel)
            .ok_or_else(|| StartError::NoApi(channel.to_string()))?;
        let event = self
            .events
            .find_event(broadcast.broadcast_id, channel.channel_id)
            .await?
            .ok_or(StartError::NoLiveEvent {
                broadcast_id: broadcast.broadcast_id,
                channel_id: channel.channel_id,
            })?;

        api.stream_url(channel, &event)
            .await
            .map_err(|e| StartError::Broadcast(e.into()))
    }
}

/// Why an actionable process should be stopped, if it should.
fn stop_reason(entry: &RunningBroadcast, planned: &[PlannedBroadcast], now: DateTime<Utc>) -> Option<&'static str> {
    let Some(broadcast) = planned
        .iter()
        .find(|b| b.broadcast_id == entry.broadcast_id)
    else {
        return Some("broadcast no longer planned");
    };
    if !broadcast.is_live_at(now) {
        return Some("outside broadcast window");
    }
    if broadcast.channel(entry.channel_id).is_none() {
        return Some("channel removed from broadcast");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use livecast_core::{BroadcastInput, ChannelKind, PrivacyStatus};

    fn planned(id: u32, start: DateTime<Utc>, channels: &[u32]) -> PlannedBroadcast {
        PlannedBroadcast {
            broadcast_id: BroadcastId::new(id),
            name: format!("show {id}"),
            description: String::new(),
            start,
            end: start + ChronoDuration::hours(1),
            privacy_status: PrivacyStatus::Public,
            thumbnail: None,
            input: BroadcastInput::Url("rtmp://in".to_string()),
            output_channels: channels
                .iter()
                .map(|c| {
                    OutputChannel::new(
                        *c,
                        "rtmp",
                        ChannelKind::Rtmp {
                            url: "rtmp://out".to_string(),
                            stream_key: c.to_string(),
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn test_stop_reason() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let schedule = vec![
            planned(1, now - ChronoDuration::minutes(5), &[10]),
            planned(2, now + ChronoDuration::minutes(5), &[10]),
        ];
        let entry = |b: u32, c: u32| RunningBroadcast::new(BroadcastId::new(b), 100, ChannelId::new(c), "prod");

        assert_eq!(stop_reason(&entry(1, 10), &schedule, now), None);
        assert_eq!(
            stop_reason(&entry(1, 11), &schedule, now),
            Some("channel removed from broadcast")
        );
        assert_eq!(
            stop_reason(&entry(2, 10), &schedule, now),
            Some("outside broadcast window")
        );
        assert_eq!(
            stop_reason(&entry(3, 10), &schedule, now),
            Some("broadcast no longer planned")
        );
    }

    #[test]
    fn test_idle_report() {
        assert!(TickReport::default().is_idle());
        assert!(!TickReport {
            started: 1,
            ..Default::default()
        }
        .is_idle());
    }
}
