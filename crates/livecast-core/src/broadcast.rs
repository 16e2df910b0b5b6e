//! Planned broadcast entities and value objects.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::{ChannelId, OutputChannel};
use crate::shell::shell_quote;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Identifier of a planned broadcast. `0` is never a valid broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BroadcastId(u32);

impl BroadcastId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Returns true for the `0` sentinel.
    #[must_use]
    pub fn is_unset(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for BroadcastId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for BroadcastId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

// ============================================================================
// Privacy
// ============================================================================

/// Visibility of the platform-side live event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyStatus {
    #[default]
    Public,
    Unlisted,
    Private,
}

impl PrivacyStatus {
    /// Wire name used by video platforms.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Unlisted => "unlisted",
            Self::Private => "private",
        }
    }
}

impl fmt::Display for PrivacyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Input
// ============================================================================

/// Media source fed to the transcoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "source", rename_all = "snake_case")]
pub enum BroadcastInput {
    /// Local video file, played at native frame rate.
    File(PathBuf),
    /// Remote stream URL.
    Url(String),
}

impl BroadcastInput {
    /// Input arguments for the transcoder command line.
    pub fn to_input_args(&self) -> String {
        match self {
            Self::File(path) => format!("-re -i {}", shell_quote(&path.to_string_lossy())),
            Self::Url(url) => format!("-re -i {}", shell_quote(url)),
        }
    }
}

/// Output arguments for streaming to an RTMP ingest URL.
pub fn flv_output_args(ingest_url: &str) -> String {
    format!("-vcodec copy -acodec copy -f flv {}", shell_quote(ingest_url))
}

// ============================================================================
// Planned Broadcast
// ============================================================================

/// A scheduled live stream with a time window and target channels.
///
/// Owned by the persistence layer; the scheduler only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedBroadcast {
    pub broadcast_id: BroadcastId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub privacy_status: PrivacyStatus,
    #[serde(default)]
    pub thumbnail: Option<PathBuf>,
    pub input: BroadcastInput,
    #[serde(default)]
    pub output_channels: Vec<OutputChannel>,
}

impl PlannedBroadcast {
    /// Returns true when `now` lies inside `[start, end)`.
    #[must_use]
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now < self.end
    }

    /// Returns true once the end of the window has been reached.
    #[must_use]
    pub fn has_ended_at(&self, now: DateTime<Utc>) -> bool {
        self.end <= now
    }

    /// Looks up one of this broadcast's channels.
    pub fn channel(&self, channel_id: ChannelId) -> Option<&OutputChannel> {
        self.output_channels
            .iter()
            .find(|c| c.channel_id == channel_id)
    }
}

impl PartialEq for PlannedBroadcast {
    fn eq(&self, other: &Self) -> bool {
        self.broadcast_id == other.broadcast_id
    }
}

impl Eq for PlannedBroadcast {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelKind;
    use chrono::{Duration, TimeZone};

    fn broadcast() -> PlannedBroadcast {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).unwrap();
        PlannedBroadcast {
            broadcast_id: BroadcastId::new(1),
            name: "Evening show".to_string(),
            description: String::new(),
            start,
            end: start + Duration::hours(1),
            privacy_status: PrivacyStatus::Unlisted,
            thumbnail: None,
            input: BroadcastInput::File(PathBuf::from("/path/to/video.mp4")),
            output_channels: vec![OutputChannel::new(
                3,
                "tw",
                ChannelKind::Twitch {
                    server: "s".to_string(),
                    stream_key: "k".to_string(),
                },
            )],
        }
    }

    #[test]
    fn test_window() {
        let b = broadcast();
        assert!(!b.is_live_at(b.start - Duration::seconds(1)));
        assert!(b.is_live_at(b.start));
        assert!(b.is_live_at(b.end - Duration::seconds(1)));
        assert!(!b.is_live_at(b.end));
        assert!(b.has_ended_at(b.end));
        assert!(!b.has_ended_at(b.start));
    }

    #[test]
    fn test_input_args() {
        let file = BroadcastInput::File(PathBuf::from("/path/to/video.mp4"));
        assert_eq!(file.to_input_args(), "-re -i /path/to/video.mp4");

        let spaced = BroadcastInput::File(PathBuf::from("/videos/my show.mp4"));
        assert_eq!(spaced.to_input_args(), "-re -i '/videos/my show.mp4'");

        assert_eq!(
            flv_output_args("rtmp://live-ams.twitch.tv/app/key"),
            "-vcodec copy -acodec copy -f flv rtmp://live-ams.twitch.tv/app/key"
        );
        assert_eq!(
            flv_output_args("rtmp://host/live?token=a&x=1"),
            "-vcodec copy -acodec copy -f flv 'rtmp://host/live?token=a&x=1'"
        );
    }

    #[test]
    fn test_channel_lookup() {
        let b = broadcast();
        assert!(b.channel(ChannelId::new(3)).is_some());
        assert!(b.channel(ChannelId::new(4)).is_none());
        assert_eq!(b.privacy_status.as_str(), "unlisted");
    }
}
