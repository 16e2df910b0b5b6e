//! Snapshot of running broadcasts, rebuilt from the process table.
//!
//! There is no stored mapping from broadcasts to processes. Each tick turns
//! the supervisor's listing lines into [`RunningBroadcast`] entries by
//! reading back the tags written at start time.
//!
//! # Panic-Free Guarantees
//!
//! Parsing is total: unreadable lines are skipped, never an error.

use livecast_core::{BroadcastId, ChannelId, OutputChannel, PlannedBroadcast, RunningBroadcast};
use livecast_protocol::{
    extract_int_tag, extract_leading_pid, extract_string_tag, TAG_BROADCAST_ID, TAG_CHANNEL_ID,
    TAG_ENVIRONMENT,
};
use tracing::{debug, trace};

/// Parses one listing line into a running broadcast.
///
/// Returns `None` when the pid is missing, either id tag is missing or zero,
/// or the line has no `env` tag. An empty `env=` is kept; it never matches a
/// real environment and is filtered out by [`actionable`].
pub fn parse_line(line: &str) -> Option<RunningBroadcast> {
    let pid = extract_leading_pid(line);
    if pid == 0 {
        return None;
    }

    let broadcast_id = extract_int_tag(line, TAG_BROADCAST_ID).filter(|id| *id != 0)?;
    let channel_id = extract_int_tag(line, TAG_CHANNEL_ID).filter(|id| *id != 0)?;
    let environment = extract_string_tag(line, TAG_ENVIRONMENT)?;

    Some(RunningBroadcast::new(
        BroadcastId::new(broadcast_id),
        pid,
        ChannelId::new(channel_id),
        environment,
    ))
}

/// Builds the raw snapshot from listing lines.
///
/// Entries from other environments are kept; use [`actionable`] before
/// acting on them.
pub fn snapshot<I, S>(lines: I) -> Vec<RunningBroadcast>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut entries = Vec::new();
    for line in lines {
        let line = line.as_ref();
        match parse_line(line) {
            Some(entry) => entries.push(entry),
            None => trace!(line, "Skipping untagged process"),
        }
    }
    debug!(count = entries.len(), "Built running broadcast snapshot");
    entries
}

/// Entries this environment may stop or count as already streaming.
pub fn actionable<'a>(
    entries: &'a [RunningBroadcast],
    environment: &'a str,
) -> impl Iterator<Item = &'a RunningBroadcast> + 'a {
    entries.iter().filter(move |entry| entry.is_valid(environment))
}

/// Returns true if any actionable entry streams `broadcast` to `channel`.
pub fn is_broadcasting<'a, I>(entries: I, broadcast: &PlannedBroadcast, channel: &OutputChannel) -> bool
where
    I: IntoIterator<Item = &'a RunningBroadcast>,
{
    entries
        .into_iter()
        .any(|entry| entry.is_broadcasting(broadcast, channel))
}
