//! Channel set difference between two versions of a broadcast.

use std::collections::HashSet;

use livecast_core::{ChannelId, OutputChannel};

/// Partition of channels across a broadcast update.
///
/// `added` and `unchanged` borrow from the new channel list, `removed` from
/// the old one. Membership is decided by `channel_id` only.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ChannelDiff<'a> {
    pub added: Vec<&'a OutputChannel>,
    pub unchanged: Vec<&'a OutputChannel>,
    pub removed: Vec<&'a OutputChannel>,
}

impl<'a> ChannelDiff<'a> {
    /// Compares channel lists, keeping each list's own order.
    pub fn between(previous: &'a [OutputChannel], next: &'a [OutputChannel]) -> Self {
        let before: HashSet<ChannelId> = previous.iter().map(|c| c.channel_id).collect();
        let after: HashSet<ChannelId> = next.iter().map(|c| c.channel_id).collect();

        let (unchanged, added) = next
            .iter()
            .partition(|channel| before.contains(&channel.channel_id));
        let removed = previous
            .iter()
            .filter(|channel| !after.contains(&channel.channel_id))
            .collect();

        Self {
            added,
            unchanged,
            removed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.unchanged.is_empty() && self.removed.is_empty()
    }
}

/// Shorthand for [`ChannelDiff::between`].
pub fn diff<'a>(previous: &'a [OutputChannel], next: &'a [OutputChannel]) -> ChannelDiff<'a> {
    ChannelDiff::between(previous, next)
}
