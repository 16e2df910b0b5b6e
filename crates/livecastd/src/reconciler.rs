//! Keeps platform live events in step with the broadcast schedule.
//!
//! Hooks for the three schedule changes:
//!
//! | change | action per planned channel |
//! |---|---|
//! | insert | create |
//! | update | create (added), update (unchanged), remove (removed) |
//! | delete | remove |
//!
//! Each channel call is independent: a failure is logged and counted and
//! the next channel is processed. Remove failures reported by the platform
//! are expected (the event may already be gone) and count as removed.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Remote failures are values, never panics

use std::sync::Arc;

use livecast_core::{
    BroadcastResult, LiveBroadcastError, OutputChannel, PlannedBroadcast, StreamEvent,
};
use tracing::{debug, info, warn};

use crate::api::ChannelApiStack;
use crate::diff::ChannelDiff;
use crate::repository::{BroadcastRepository, StreamEventRepository};

/// Outcome counts of one reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    pub failed: usize,
}

impl ReconcileReport {
    fn merge(&mut self, other: ReconcileReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.removed += other.removed;
        self.failed += other.failed;
    }
}

/// Drives [`ChannelApiStack`] calls from schedule changes.
pub struct EventReconciler {
    apis: ChannelApiStack,
    broadcasts: Arc<dyn BroadcastRepository>,
    events: Arc<dyn StreamEventRepository>,
}

impl EventReconciler {
    pub fn new(
        apis: ChannelApiStack,
        broadcasts: Arc<dyn BroadcastRepository>,
        events: Arc<dyn StreamEventRepository>,
    ) -> Self {
        Self {
            apis,
            broadcasts,
            events,
        }
    }

    pub fn apis(&self) -> &ChannelApiStack {
        &self.apis
    }

    /// A broadcast is about to be stored for the first time.
    pub async fn on_insert(&self, broadcast: &PlannedBroadcast) -> ReconcileReport {
        self.create_events(broadcast, broadcast.output_channels.iter())
            .await
    }

    /// A stored broadcast is about to be replaced by `broadcast`.
    ///
    /// The previous version is read from the broadcast repository, so this
    /// must run before the new version is saved.
    ///
    /// # Errors
    ///
    /// `Persistence` if the previous version cannot be read.
    pub async fn on_update(&self, broadcast: &PlannedBroadcast) -> BroadcastResult<ReconcileReport> {
        let previous = self
            .broadcasts
            .broadcast_by_id(broadcast.broadcast_id)
            .await?;
        Ok(self.reconcile(previous.as_ref(), broadcast).await)
    }

    /// A broadcast is about to be deleted.
    pub async fn on_delete(&self, broadcast: &PlannedBroadcast) -> ReconcileReport {
        self.remove_events(broadcast, broadcast.output_channels.iter())
            .await
    }

    /// Applies the channel changes between two versions of a broadcast.
    ///
    /// Without a previous version every channel is treated as added.
    /// Phases run create, then update, then remove.
    pub async fn reconcile(
        &self,
        previous: Option<&PlannedBroadcast>,
        next: &PlannedBroadcast,
    ) -> ReconcileReport {
        let Some(previous) = previous else {
            debug!(broadcast_id = %next.broadcast_id, "No previous version, creating all live events");
            return self.on_insert(next).await;
        };

        let diff = ChannelDiff::between(&previous.output_channels, &next.output_channels);
        let mut report = ReconcileReport::default();
        report.merge(self.create_events(next, diff.added.iter().copied()).await);
        report.merge(self.update_events(next, diff.unchanged.iter().copied()).await);
        report.merge(self.remove_events(next, diff.removed.iter().copied()).await);

        info!(
            broadcast_id = %next.broadcast_id,
            created = report.created,
            updated = report.updated,
            removed = report.removed,
            failed = report.failed,
            "Reconciled live events"
        );
        report
    }

    /// Marks `event` as ended, persists it, then tells the platform.
    ///
    /// Returns `Ok(false)` when the channel is unknown, not a planned
    /// channel, or has no registered API; nothing is written then.
    ///
    /// # Errors
    ///
    /// - `Persistence` if the channel lookup or the save fails; the platform
    ///   is not contacted in that case
    /// - `Output` if the platform call fails after the flag was saved
    pub async fn send_end_signal(&self, event: &StreamEvent) -> BroadcastResult<bool> {
        let Some(channel) = self.broadcasts.channel_by_id(event.channel_id).await? else {
            debug!(channel_id = %event.channel_id, "End signal for unknown channel");
            return Ok(false);
        };
        let Some(api) = self.apis.api_for(&channel) else {
            return Ok(false);
        };

        let mut ended = event.clone();
        ended.end_signal_sent = true;
        self.events.save_event(&ended).await.map_err(|e| {
            LiveBroadcastError::Persistence(format!("Couldn't save broadcast end: {e}"))
        })?;

        api.send_end_signal(&channel, &ended.external_stream_id)
            .await?;

        info!(
            broadcast_id = %event.broadcast_id,
            channel_id = %event.channel_id,
            external_id = %event.external_stream_id,
            "Sent end signal"
        );
        Ok(true)
    }

    async fn create_events<'a, I>(&self, broadcast: &PlannedBroadcast, channels: I) -> ReconcileReport
    where
        I: IntoIterator<Item = &'a OutputChannel>,
    {
        let mut report = ReconcileReport::default();
        for channel in channels {
            let Some(api) = self.apis.api_for(channel) else {
                continue;
            };
            match api.create_live_event(broadcast, channel).await {
                Ok(_) => report.created += 1,
                Err(e) => {
                    warn!(
                        broadcast_id = %broadcast.broadcast_id,
                        channel = %channel,
                        error = %e,
                        "Failed to create live event"
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }

    async fn update_events<'a, I>(&self, broadcast: &PlannedBroadcast, channels: I) -> ReconcileReport
    where
        I: IntoIterator<Item = &'a OutputChannel>,
    {
        let mut report = ReconcileReport::default();
        for channel in channels {
            let Some(api) = self.apis.api_for(channel) else {
                continue;
            };
            match api.update_live_event(broadcast, channel).await {
                Ok(()) => report.updated += 1,
                Err(e) => {
                    warn!(
                        broadcast_id = %broadcast.broadcast_id,
                        channel = %channel,
                        error = %e,
                        "Failed to update live event"
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }

    async fn remove_events<'a, I>(&self, broadcast: &PlannedBroadcast, channels: I) -> ReconcileReport
    where
        I: IntoIterator<Item = &'a OutputChannel>,
    {
        let mut report = ReconcileReport::default();
        for channel in channels {
            let Some(api) = self.apis.api_for(channel) else {
                continue;
            };
            if let Err(e) = api.remove_live_event(broadcast, channel).await {
                debug!(
                    broadcast_id = %broadcast.broadcast_id,
                    channel = %channel,
                    error = %e,
                    "Ignoring live event removal failure"
                );
            }
            report.removed += 1;
        }
        report
    }
}
