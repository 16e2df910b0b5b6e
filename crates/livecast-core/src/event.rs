//! Platform-side live event registrations.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::broadcast::BroadcastId;
use crate::channel::ChannelId;

/// Identifier assigned by the platform to a live event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalEventId(String);

impl ExternalEventId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ExternalEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ExternalEventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One live event registered on a platform for a (broadcast, channel) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub broadcast_id: BroadcastId,
    pub channel_id: ChannelId,
    /// Platform id of the live event (the broadcast resource).
    pub external_stream_id: ExternalEventId,
    /// Platform id of the ingest stream bound to the event, when known.
    #[serde(default)]
    pub external_ingest_id: Option<String>,
    #[serde(default)]
    pub end_signal_sent: bool,
}

impl StreamEvent {
    pub fn new(
        broadcast_id: BroadcastId,
        channel_id: ChannelId,
        external_stream_id: ExternalEventId,
    ) -> Self {
        Self {
            broadcast_id,
            channel_id,
            external_stream_id,
            external_ingest_id: None,
            end_signal_sent: false,
        }
    }

    /// Attaches the ingest stream id.
    pub fn with_ingest(mut self, ingest_id: impl Into<String>) -> Self {
        self.external_ingest_id = Some(ingest_id.into());
        self
    }

    /// Returns true if this event belongs to the given pair.
    #[must_use]
    pub fn matches(&self, broadcast_id: BroadcastId, channel_id: ChannelId) -> bool {
        self.broadcast_id == broadcast_id && self.channel_id == channel_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_event_defaults() {
        let event = StreamEvent::new(BroadcastId::new(1), ChannelId::new(2), "yt-1".into())
            .with_ingest("ingest-1");
        assert!(!event.end_signal_sent);
        assert_eq!(event.external_ingest_id.as_deref(), Some("ingest-1"));
        assert!(event.matches(BroadcastId::new(1), ChannelId::new(2)));
        assert!(!event.matches(BroadcastId::new(2), ChannelId::new(2)));
    }

    #[test]
    fn test_stream_event_json_without_optional_fields() {
        let json = r#"{"broadcast_id": 3, "channel_id": 4, "external_stream_id": "abc"}"#;
        let event: StreamEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.external_stream_id.as_str(), "abc");
        assert!(event.external_ingest_id.is_none());
        assert!(!event.end_signal_sent);
    }
}
