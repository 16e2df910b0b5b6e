//! Output channels: the destinations a broadcast is streamed to.
//!
//! Channels form a closed set of variants. Some of them (currently only
//! YouTube) support platform-side planned live events; the rest are plain
//! ingest endpoints. Use [`OutputChannel::as_planned`] as the capability
//! check rather than matching on variants throughout the codebase.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Identifier of an output channel. `0` is never a valid channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(u32);

impl ChannelId {
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

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ChannelId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

// ============================================================================
// Platforms
// ============================================================================

/// Platforms that expose a live-event API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    YouTube,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::YouTube => write!(f, "YouTube"),
        }
    }
}

// ============================================================================
// Channel Variants
// ============================================================================

/// Provider-specific payload of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelKind {
    /// YouTube account, reached through the live-streaming API.
    #[serde(rename = "youtube")]
    YouTube { refresh_token: String },

    /// Twitch ingest server.
    Twitch { server: String, stream_key: String },

    /// Any RTMP endpoint.
    Rtmp { url: String, stream_key: String },
}

/// Borrowed view of a channel that supports planned live events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedChannel<'a> {
    YouTube { refresh_token: &'a str },
}

impl PlannedChannel<'_> {
    /// Platform whose API manages this channel's events.
    pub fn platform(&self) -> Platform {
        match self {
            Self::YouTube { .. } => Platform::YouTube,
        }
    }
}

/// A destination for a broadcast.
///
/// Equality and hashing consider only `channel_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputChannel {
    pub channel_id: ChannelId,
    pub name: String,
    #[serde(flatten)]
    pub kind: ChannelKind,
}

impl OutputChannel {
    pub fn new(channel_id: impl Into<ChannelId>, name: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            channel_id: channel_id.into(),
            name: name.into(),
            kind,
        }
    }

    /// Capability check for planned live-event support.
    pub fn as_planned(&self) -> Option<PlannedChannel<'_>> {
        match &self.kind {
            ChannelKind::YouTube { refresh_token } => Some(PlannedChannel::YouTube {
                refresh_token: refresh_token.as_str(),
            }),
            ChannelKind::Twitch { .. } | ChannelKind::Rtmp { .. } => None,
        }
    }

    /// Returns true if this channel supports planned live events.
    #[must_use]
    pub fn is_planned(&self) -> bool {
        self.as_planned().is_some()
    }

    /// Static ingest URL for plain channels.
    ///
    /// Planned channels get their URL from the platform API instead, so this
    /// returns `None` for them.
    pub fn ingest_url(&self) -> Option<String> {
        match &self.kind {
            ChannelKind::Twitch { server, stream_key } => {
                Some(format!("rtmp://{server}/app/{stream_key}"))
            }
            ChannelKind::Rtmp { url, stream_key } => {
                Some(format!("{}/{}", url.trim_end_matches('/'), stream_key))
            }
            ChannelKind::YouTube { .. } => None,
        }
    }
}

impl PartialEq for OutputChannel {
    fn eq(&self, other: &Self) -> bool {
        self.channel_id == other.channel_id
    }
}

impl Eq for OutputChannel {}

impl Hash for OutputChannel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.channel_id.hash(state);
    }
}

impl fmt::Display for OutputChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.kind {
            ChannelKind::YouTube { .. } => "Youtube",
            ChannelKind::Twitch { .. } => "Twitch",
            ChannelKind::Rtmp { .. } => "Stream",
        };
        write!(f, "{}: {}", label, self.name)
    }
}
