//! In-memory repository.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use livecast_core::{BroadcastId, ChannelId, OutputChannel, PlannedBroadcast, StreamEvent};

use super::{pending_end, still_planned, BroadcastRepository, RepositoryError, StreamEventRepository};

#[derive(Debug, Default)]
struct State {
    broadcasts: BTreeMap<BroadcastId, PlannedBroadcast>,
    channels: BTreeMap<ChannelId, OutputChannel>,
    events: Vec<StreamEvent>,
    reject_event_writes: bool,
}

/// Broadcasts, channels and stream events held in process memory.
///
/// Implements both repository traits, so one `Arc<MemoryStore>` can back
/// the scheduler and the channel APIs at once.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Lock poisoning only means another thread panicked mid-update; the maps
    // are still structurally valid.
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds or replaces a broadcast. Its channels become known channels.
    pub fn insert_broadcast(&self, broadcast: PlannedBroadcast) {
        let mut state = self.state();
        for channel in &broadcast.output_channels {
            state.channels.insert(channel.channel_id, channel.clone());
        }
        state.broadcasts.insert(broadcast.broadcast_id, broadcast);
    }

    pub fn remove_broadcast(&self, id: BroadcastId) -> Option<PlannedBroadcast> {
        self.state().broadcasts.remove(&id)
    }

    pub fn insert_channel(&self, channel: OutputChannel) {
        self.state().channels.insert(channel.channel_id, channel);
    }

    /// All stored events, in insertion order.
    pub fn events(&self) -> Vec<StreamEvent> {
        self.state().events.clone()
    }

    /// Makes subsequent event writes fail with [`RepositoryError::Rejected`].
    pub fn reject_event_writes(&self, reject: bool) {
        self.state().reject_event_writes = reject;
    }
}

#[async_trait]
impl BroadcastRepository for MemoryStore {
    async fn planned_broadcasts(&self, now: DateTime<Utc>) -> Result<Vec<PlannedBroadcast>, RepositoryError> {
        let broadcasts: Vec<PlannedBroadcast> = self.state().broadcasts.values().cloned().collect();
        Ok(still_planned(broadcasts, now))
    }

    async fn broadcast_by_id(&self, id: BroadcastId) -> Result<Option<PlannedBroadcast>, RepositoryError> {
        Ok(self.state().broadcasts.get(&id).cloned())
    }

    async fn channel_by_id(&self, id: ChannelId) -> Result<Option<OutputChannel>, RepositoryError> {
        Ok(self.state().channels.get(&id).cloned())
    }
}

#[async_trait]
impl StreamEventRepository for MemoryStore {
    async fn find_event(
        &self,
        broadcast_id: BroadcastId,
        channel_id: ChannelId,
    ) -> Result<Option<StreamEvent>, RepositoryError> {
        Ok(self
            .state()
            .events
            .iter()
            .find(|e| e.matches(broadcast_id, channel_id))
            .cloned())
    }

    async fn save_event(&self, event: &StreamEvent) -> Result<(), RepositoryError> {
        let mut state = self.state();
        if state.reject_event_writes {
            return Err(RepositoryError::Rejected("event writes disabled".to_string()));
        }
        match state
            .events
            .iter_mut()
            .find(|e| e.matches(event.broadcast_id, event.channel_id))
        {
            Some(existing) => *existing = event.clone(),
            None => state.events.push(event.clone()),
        }
        Ok(())
    }

    async fn remove_event(&self, broadcast_id: BroadcastId, channel_id: ChannelId) -> Result<(), RepositoryError> {
        let mut state = self.state();
        if state.reject_event_writes {
            return Err(RepositoryError::Rejected("event writes disabled".to_string()));
        }
        state.events.retain(|e| !e.matches(broadcast_id, channel_id));
        Ok(())
    }

    async fn events_pending_end(&self, now: DateTime<Utc>) -> Result<Vec<StreamEvent>, RepositoryError> {
        let state = self.state();
        Ok(pending_end(&state.events, now, |id| {
            state.broadcasts.get(&id).map(|b| b.end)
        }))
    }

    async fn prune_signalled(&self) -> Result<usize, RepositoryError> {
        let mut state = self.state();
        if state.reject_event_writes {
            return Err(RepositoryError::Rejected("event writes disabled".to_string()));
        }
        let before = state.events.len();
        state.events.retain(|e| !e.end_signal_sent);
        Ok(before - state.events.len())
    }
}
