//! Platform APIs for planned live events.
//!
//! Channels that support planned events (see
//! [`OutputChannel::as_planned`](livecast_core::OutputChannel::as_planned))
//! get a live event registered on the platform ahead of time. The ingest URL
//! for such a channel comes from that event rather than from the channel's
//! own settings.
//!
//! [`ChannelApiStack`] maps each [`Platform`] to its [`ChannelEventApi`].
//! A planned channel whose platform has no registered API is skipped.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use livecast_core::{ExternalEventId, OutputChannel, OutputError, PlannedBroadcast, Platform, StreamEvent};

pub mod thumbnail;
pub mod youtube;

pub use youtube::{AccessToken, YouTubeEventApi, YouTubeTransport};

/// Live-event operations for one platform.
///
/// Every call concerns a single channel. Failures are [`OutputError`]s and
/// never abort work on other channels.
#[async_trait]
pub trait ChannelEventApi: Send + Sync {
    /// Registers a live event for `broadcast` on `channel`.
    async fn create_live_event(
        &self,
        broadcast: &PlannedBroadcast,
        channel: &OutputChannel,
    ) -> Result<ExternalEventId, OutputError>;

    /// Pushes the broadcast's current details to its live event.
    async fn update_live_event(&self, broadcast: &PlannedBroadcast, channel: &OutputChannel) -> Result<(), OutputError>;

    /// Deletes the broadcast's live event on `channel`.
    async fn remove_live_event(&self, broadcast: &PlannedBroadcast, channel: &OutputChannel) -> Result<(), OutputError>;

    /// Tells the platform the stream is over.
    async fn send_end_signal(&self, channel: &OutputChannel, external_id: &ExternalEventId) -> Result<(), OutputError>;

    /// Ingest URL the transcoder should push to for `event`.
    async fn stream_url(&self, channel: &OutputChannel, event: &StreamEvent) -> Result<String, OutputError>;
}

/// Registry of channel APIs keyed by platform.
#[derive(Clone, Default)]
pub struct ChannelApiStack {
    apis: HashMap<Platform, Arc<dyn ChannelEventApi>>,
}

impl ChannelApiStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the API for a platform.
    pub fn register(&mut self, platform: Platform, api: Arc<dyn ChannelEventApi>) {
        self.apis.insert(platform, api);
    }

    /// Builder-style [`ChannelApiStack::register`].
    #[must_use]
    pub fn with(mut self, platform: Platform, api: Arc<dyn ChannelEventApi>) -> Self {
        self.register(platform, api);
        self
    }

    /// API responsible for `channel`, if it is a planned channel and its
    /// platform is registered.
    pub fn api_for(&self, channel: &OutputChannel) -> Option<&dyn ChannelEventApi> {
        let platform = channel.as_planned()?.platform();
        self.apis.get(&platform).map(|api| api.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.apis.is_empty()
    }
}

impl fmt::Debug for ChannelApiStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelApiStack")
            .field("platforms", &self.apis.keys().collect::<Vec<_>>())
            .finish()
    }
}
