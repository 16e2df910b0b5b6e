//! YouTube live-event adapter.
//!
//! [`YouTubeEventApi`] turns planned broadcasts into YouTube `liveBroadcast`
//! and `liveStream` resources and drives them through a [`YouTubeTransport`].
//! HTTP and OAuth plumbing stay behind the transport.
//!
//! Event creation runs these steps in order, stopping at the first failure:
//!
//! 1. exchange the channel's refresh token for an access token
//! 2. insert the broadcast (auto start on, monitor stream off)
//! 3. insert an RTMP stream titled after the broadcast
//! 4. bind the stream to the broadcast
//! 5. upload the thumbnail (failure is logged only)
//! 6. persist a [`StreamEvent`] linking the pair to both resources

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use livecast_core::{
    ExternalEventId, LiveBroadcastError, OutputChannel, OutputError, PlannedBroadcast,
    PlannedChannel, SharedClock, StreamEvent,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::thumbnail::{self, ChunkSink, ThumbnailChunk};
use super::ChannelEventApi;
use crate::repository::StreamEventRepository;

pub const BROADCAST_KIND: &str = "youtube#liveBroadcast";
pub const STREAM_KIND: &str = "youtube#liveStream";

/// Lifecycle status that ends a broadcast.
pub const STATUS_COMPLETE: &str = "complete";

// ============================================================================
// Resources
// ============================================================================

/// OAuth access token for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken(pub String);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveBroadcastResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<BroadcastSnippet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_details: Option<BroadcastContentDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BroadcastStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastSnippet {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// RFC 3339 with second precision.
    pub scheduled_start_time: String,
    pub scheduled_end_time: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastContentDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_stream_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_auto_start: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_stream: Option<MonitorStream>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStream {
    pub enable_monitor_stream: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_declared_made_for_kids: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub life_cycle_status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStreamResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<StreamSnippet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdn: Option<CdnSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSnippet {
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdnSettings {
    pub resolution: String,
    pub frame_rate: String,
    pub ingestion_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingestion_info: Option<IngestionInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionInfo {
    pub ingestion_address: String,
    pub stream_name: String,
}

impl IngestionInfo {
    /// Full RTMP URL for the transcoder.
    pub fn url(&self) -> String {
        format!("{}/{}", self.ingestion_address, self.stream_name)
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Calls against the YouTube Data API.
///
/// Implementations map remote failures to [`OutputError`], marking quota and
/// network errors retryable.
#[async_trait]
pub trait YouTubeTransport: Send + Sync {
    async fn authenticate(&self, refresh_token: &str) -> Result<AccessToken, OutputError>;

    async fn insert_broadcast(
        &self,
        token: &AccessToken,
        broadcast: &LiveBroadcastResource,
    ) -> Result<LiveBroadcastResource, OutputError>;

    async fn update_broadcast(
        &self,
        token: &AccessToken,
        broadcast: &LiveBroadcastResource,
    ) -> Result<LiveBroadcastResource, OutputError>;

    async fn delete_broadcast(&self, token: &AccessToken, broadcast_id: &str) -> Result<(), OutputError>;

    async fn transition_broadcast(
        &self,
        token: &AccessToken,
        broadcast_id: &str,
        status: &str,
    ) -> Result<(), OutputError>;

    /// Broadcasts with the given id (zero or one in practice).
    async fn list_broadcasts(
        &self,
        token: &AccessToken,
        broadcast_id: &str,
    ) -> Result<Vec<LiveBroadcastResource>, OutputError>;

    async fn insert_stream(
        &self,
        token: &AccessToken,
        stream: &LiveStreamResource,
    ) -> Result<LiveStreamResource, OutputError>;

    async fn list_streams(&self, token: &AccessToken, stream_id: &str) -> Result<Vec<LiveStreamResource>, OutputError>;

    async fn bind(
        &self,
        token: &AccessToken,
        broadcast_id: &str,
        stream_id: &str,
    ) -> Result<LiveBroadcastResource, OutputError>;

    /// Sends one thumbnail chunk for `video_id`; `true` once accepted whole.
    async fn upload_thumbnail_chunk(
        &self,
        token: &AccessToken,
        video_id: &str,
        chunk: ThumbnailChunk<'_>,
    ) -> Result<bool, OutputError>;
}

// ============================================================================
// Event API
// ============================================================================

/// [`ChannelEventApi`] for YouTube channels.
pub struct YouTubeEventApi<T> {
    transport: T,
    events: Arc<dyn StreamEventRepository>,
    clock: SharedClock,
}

impl<T: YouTubeTransport> YouTubeEventApi<T> {
    pub fn new(transport: T, events: Arc<dyn StreamEventRepository>, clock: SharedClock) -> Self {
        Self {
            transport,
            events,
            clock,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn connect(&self, channel: &OutputChannel) -> Result<AccessToken, OutputError> {
        let Some(PlannedChannel::YouTube { refresh_token }) = channel.as_planned() else {
            return Err(OutputError::new(format!(
                "{channel} does not support planned live events"
            )));
        };
        self.transport
            .authenticate(refresh_token)
            .await
            .map_err(|e| OutputError {
                message: format!("Cannot connect YouTube channel {}: {}", channel.name, e.message),
                retryable: e.retryable,
            })
    }

    /// Start time sent to YouTube: a start already in the past becomes one
    /// second from now.
    pub fn scheduled_start(&self, broadcast: &PlannedBroadcast) -> DateTime<Utc> {
        let now = self.clock.now();
        if now > broadcast.start {
            now + Duration::seconds(1)
        } else {
            broadcast.start
        }
    }

    fn snippet(&self, broadcast: &PlannedBroadcast) -> BroadcastSnippet {
        BroadcastSnippet {
            title: broadcast.name.clone(),
            description: broadcast.description.clone(),
            scheduled_start_time: atom(self.scheduled_start(broadcast)),
            scheduled_end_time: atom(broadcast.end),
        }
    }

    /// Payload for inserting a new broadcast.
    pub fn new_broadcast(&self, broadcast: &PlannedBroadcast) -> LiveBroadcastResource {
        LiveBroadcastResource {
            id: None,
            kind: BROADCAST_KIND.to_string(),
            snippet: Some(self.snippet(broadcast)),
            content_details: Some(BroadcastContentDetails {
                bound_stream_id: None,
                enable_auto_start: Some(true),
                monitor_stream: Some(MonitorStream {
                    enable_monitor_stream: false,
                }),
            }),
            status: Some(BroadcastStatus {
                privacy_status: Some(broadcast.privacy_status.as_str().to_string()),
                self_declared_made_for_kids: Some(false),
                life_cycle_status: None,
            }),
        }
    }

    fn new_stream(title: &str) -> LiveStreamResource {
        LiveStreamResource {
            id: None,
            kind: STREAM_KIND.to_string(),
            snippet: Some(StreamSnippet {
                title: title.to_string(),
            }),
            cdn: Some(CdnSettings {
                resolution: "variable".to_string(),
                frame_rate: "variable".to_string(),
                ingestion_type: "rtmp".to_string(),
                ingestion_info: None,
            }),
        }
    }

    /// Fetches a broadcast by its YouTube id.
    ///
    /// # Errors
    ///
    /// `InvalidExternalReference` when YouTube returns no broadcast.
    pub async fn broadcast_by_external_id(
        &self,
        token: &AccessToken,
        external_id: &str,
    ) -> Result<LiveBroadcastResource, LiveBroadcastError> {
        let found = self.transport.list_broadcasts(token, external_id).await?;
        found
            .into_iter()
            .next()
            .ok_or_else(|| LiveBroadcastError::InvalidExternalReference {
                kind: "YouTube broadcast".to_string(),
                id: external_id.to_string(),
            })
    }

    async fn add_thumbnail(&self, token: &AccessToken, video_id: &str, broadcast: &PlannedBroadcast) {
        let Some(path) = broadcast.thumbnail.as_deref() else {
            return;
        };
        let sink = ThumbnailTarget {
            transport: &self.transport,
            token,
            video_id,
        };
        match thumbnail::upload_file(path, &sink).await {
            Ok(true) => debug!(video_id, "Uploaded thumbnail"),
            Ok(false) => debug!(video_id, path = %path.display(), "Thumbnail not uploaded"),
            Err(e) => warn!(video_id, error = %e, "Thumbnail upload failed"),
        }
    }
}

#[async_trait]
impl<T: YouTubeTransport> ChannelEventApi for YouTubeEventApi<T> {
    async fn create_live_event(
        &self,
        broadcast: &PlannedBroadcast,
        channel: &OutputChannel,
    ) -> Result<ExternalEventId, OutputError> {
        let token = self.connect(channel).await?;

        let inserted = self
            .transport
            .insert_broadcast(&token, &self.new_broadcast(broadcast))
            .await?;
        let broadcast_ref = inserted
            .id
            .ok_or_else(|| OutputError::new("YouTube returned a broadcast without id"))?;

        let stream = self
            .transport
            .insert_stream(&token, &Self::new_stream(&broadcast.name))
            .await?;
        let stream_ref = stream
            .id
            .ok_or_else(|| OutputError::new("YouTube returned a stream without id"))?;

        self.transport
            .bind(&token, &broadcast_ref, &stream_ref)
            .await?;
        self.add_thumbnail(&token, &broadcast_ref, broadcast).await;

        let external_id = ExternalEventId::new(broadcast_ref);
        let event = StreamEvent::new(broadcast.broadcast_id, channel.channel_id, external_id.clone())
            .with_ingest(stream_ref);
        self.events
            .save_event(&event)
            .await
            .map_err(|e| OutputError::new(format!("Couldn't save stream event: {e}")))?;

        info!(
            broadcast_id = %broadcast.broadcast_id,
            channel_id = %channel.channel_id,
            external_id = %external_id,
            "Created YouTube live event"
        );
        Ok(external_id)
    }

    async fn update_live_event(&self, broadcast: &PlannedBroadcast, channel: &OutputChannel) -> Result<(), OutputError> {
        let existing = self
            .events
            .find_event(broadcast.broadcast_id, channel.channel_id)
            .await
            .map_err(|e| OutputError::new(e.to_string()))?;

        let Some(event) = existing.filter(|e| !e.external_stream_id.is_empty()) else {
            debug!(
                broadcast_id = %broadcast.broadcast_id,
                channel_id = %channel.channel_id,
                "No live event to update, creating one"
            );
            return self.create_live_event(broadcast, channel).await.map(|_| ());
        };

        let token = self.connect(channel).await?;
        let external_id = event.external_stream_id.as_str();
        let resource = LiveBroadcastResource {
            id: Some(external_id.to_string()),
            kind: BROADCAST_KIND.to_string(),
            snippet: Some(self.snippet(broadcast)),
            content_details: None,
            status: None,
        };

        self.add_thumbnail(&token, external_id, broadcast).await;
        self.transport.update_broadcast(&token, &resource).await?;

        info!(
            broadcast_id = %broadcast.broadcast_id,
            channel_id = %channel.channel_id,
            external_id,
            "Updated YouTube live event"
        );
        Ok(())
    }

    async fn remove_live_event(&self, broadcast: &PlannedBroadcast, channel: &OutputChannel) -> Result<(), OutputError> {
        let existing = self
            .events
            .find_event(broadcast.broadcast_id, channel.channel_id)
            .await
            .map_err(|e| OutputError::new(e.to_string()))?;
        let Some(event) = existing else {
            return Ok(());
        };

        let token = self.connect(channel).await?;
        self.transport
            .delete_broadcast(&token, event.external_stream_id.as_str())
            .await?;
        self.events
            .remove_event(broadcast.broadcast_id, channel.channel_id)
            .await
            .map_err(|e| OutputError::new(e.to_string()))?;

        info!(
            broadcast_id = %broadcast.broadcast_id,
            channel_id = %channel.channel_id,
            "Removed YouTube live event"
        );
        Ok(())
    }

    async fn send_end_signal(&self, channel: &OutputChannel, external_id: &ExternalEventId) -> Result<(), OutputError> {
        let token = self.connect(channel).await?;
        self.transport
            .transition_broadcast(&token, external_id.as_str(), STATUS_COMPLETE)
            .await
    }

    async fn stream_url(&self, channel: &OutputChannel, event: &StreamEvent) -> Result<String, OutputError> {
        let token = self.connect(channel).await?;

        let stream_id = match &event.external_ingest_id {
            Some(id) => id.clone(),
            None => self
                .broadcast_by_external_id(&token, event.external_stream_id.as_str())
                .await
                .map_err(|e| OutputError::new(e.to_string()))?
                .content_details
                .and_then(|details| details.bound_stream_id)
                .ok_or_else(|| {
                    OutputError::new(format!(
                        "YouTube broadcast {} has no bound stream",
                        event.external_stream_id
                    ))
                })?,
        };

        self.transport
            .list_streams(&token, &stream_id)
            .await?
            .into_iter()
            .next()
            .and_then(|stream| stream.cdn)
            .and_then(|cdn| cdn.ingestion_info)
            .map(|info| info.url())
            .ok_or_else(|| OutputError::new(format!("No ingestion info for YouTube stream {stream_id}")))
    }
}

/// Routes thumbnail chunks to one video.
struct ThumbnailTarget<'a, T> {
    transport: &'a T,
    token: &'a AccessToken,
    video_id: &'a str,
}

#[async_trait]
impl<'a, T: YouTubeTransport> ChunkSink for ThumbnailTarget<'a, T> {
    async fn send_chunk(&self, chunk: ThumbnailChunk<'_>) -> Result<bool, OutputError> {
        self.transport
            .upload_thumbnail_chunk(self.token, self.video_id, chunk)
            .await
    }
}

fn atom(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, false)
}
