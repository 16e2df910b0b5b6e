//! Running broadcasts as recovered from the OS process table.

use serde::Serialize;

use crate::broadcast::{BroadcastId, PlannedBroadcast};
use crate::channel::{ChannelId, OutputChannel};

/// A transcoding process identified by its command-line tags.
///
/// Built fresh on every scheduler tick and never persisted. Identity is the
/// `(broadcast_id, channel_id)` pair; `process_id` is only used to stop it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunningBroadcast {
    pub broadcast_id: BroadcastId,
    pub process_id: u32,
    pub channel_id: ChannelId,
    pub environment: String,
}

impl RunningBroadcast {
    pub fn new(
        broadcast_id: BroadcastId,
        process_id: u32,
        channel_id: ChannelId,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            broadcast_id,
            process_id,
            channel_id,
            environment: environment.into(),
        }
    }

    /// Returns true if this process streams `broadcast` to `channel`.
    #[must_use]
    pub fn is_broadcasting(&self, broadcast: &PlannedBroadcast, channel: &OutputChannel) -> bool {
        self.broadcast_id == broadcast.broadcast_id && self.channel_id == channel.channel_id
    }

    /// Returns true if this entry may be acted upon by a supervisor running
    /// in `environment`.
    ///
    /// Processes tagged with another environment belong to a different
    /// deployment sharing the host and must be left alone.
    #[must_use]
    pub fn is_valid(&self, environment: &str) -> bool {
        self.environment == environment
            && self.process_id != 0
            && !self.broadcast_id.is_unset()
            && !self.channel_id.is_unset()
    }
}
