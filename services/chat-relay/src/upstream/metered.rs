use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::ledger::{UsageLedger, UsageLogEntry};
use crate::quota::{EndpointCategory, QuotaError, QuotaGovernor};

use super::client::ChatUpstream;
use super::error::UpstreamError;
use super::types::{ChannelStats, ChatSession, MessagePage, VideoDetails};

/// Uploads scanned by the efficient lookup. A stream that started earlier than
/// the fifth most recent upload is not found.
pub const RECENT_UPLOADS_SCANNED: u32 = 5;

const CANCELLED_CALL_ERROR: &str = "cancelled before the upstream responded";

#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    Quota(#[from] QuotaError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl CallError {
    /// Refused for budget reasons, by the governor or by the upstream itself.
    pub fn is_quota_exceeded(&self) -> bool {
        match self {
            CallError::Quota(_) => true,
            CallError::Upstream(err) => err.is_quota_exhausted(),
        }
    }
}

/// An admitted call awaiting its upstream response.
///
/// Dropping it before `complete` means the caller went away mid-call. The
/// request may already have been billed, so the attempt is recorded at the
/// admitted cost.
struct InFlight<'a> {
    ledger: &'a UsageLedger,
    category: EndpointCategory,
    method: &'static str,
    cost: u64,
    request: Option<serde_json::Value>,
    started: Instant,
}

impl InFlight<'_> {
    fn complete(mut self, entry: UsageLogEntry) {
        let entry = match self.request.take() {
            Some(request) => entry.with_request(request),
            None => entry,
        };
        self.ledger.record(entry);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let Some(request) = self.request.take() else {
            return;
        };
        let latency = self.started.elapsed();
        warn!(
            category = %self.category,
            method = self.method,
            cost = self.cost,
            "metered call cancelled before the upstream responded"
        );
        self.ledger.record(
            UsageLogEntry::failure(
                self.category,
                self.method,
                self.cost,
                latency,
                CANCELLED_CALL_ERROR,
            )
            .with_request(request),
        );
    }
}

/// How an active chat session is discovered on a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionLookup {
    /// channels.list, playlistItems.list and videos.list: about 3 units.
    #[default]
    Efficient,
    /// search.list and videos.list: about 101 units.
    Naive,
}

impl fmt::Display for SessionLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionLookup::Efficient => f.write_str("efficient"),
            SessionLookup::Naive => f.write_str("naive"),
        }
    }
}

impl FromStr for SessionLookup {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "efficient" => Ok(SessionLookup::Efficient),
            "naive" => Ok(SessionLookup::Naive),
            other => Err(format!("unknown session lookup strategy '{other}'")),
        }
    }
}

/// Upstream access with admission control and usage accounting on every call.
pub struct MeteredClient {
    upstream: Arc<dyn ChatUpstream>,
    governor: Arc<QuotaGovernor>,
    ledger: Arc<UsageLedger>,
    uploads_cache: DashMap<String, String>,
}

impl MeteredClient {
    pub fn new(
        upstream: Arc<dyn ChatUpstream>,
        governor: Arc<QuotaGovernor>,
        ledger: Arc<UsageLedger>,
    ) -> Self {
        Self {
            upstream,
            governor,
            ledger,
            uploads_cache: DashMap::new(),
        }
    }

    pub fn governor(&self) -> &Arc<QuotaGovernor> {
        &self.governor
    }

    /// Admits, dispatches, times and records one upstream call.
    ///
    /// `call` is not polled unless admission succeeds. Calls that never reached
    /// the upstream are recorded with zero cost.
    async fn metered<T, F>(
        &self,
        category: EndpointCategory,
        method: &'static str,
        request: serde_json::Value,
        call: F,
    ) -> Result<T, CallError>
    where
        F: Future<Output = Result<T, UpstreamError>>,
    {
        let admission = self.governor.admit(category)?;

        let mut in_flight = InFlight {
            ledger: &self.ledger,
            category,
            method,
            cost: admission.cost,
            request: Some(request),
            started: Instant::now(),
        };
        let result = call.await;
        let latency = in_flight.started.elapsed();

        let entry = match &result {
            Ok(_) => {
                debug!(%category, method, latency_ms = latency.as_millis() as u64, "metered call succeeded");
                UsageLogEntry::success(category, method, admission.cost, latency)
            }
            Err(err) => {
                let cost = if err.was_delivered() { admission.cost } else { 0 };
                warn!(%category, method, cost, error = %err, "metered call failed");
                UsageLogEntry::failure(category, method, cost, latency, err.to_string())
            }
        };
        in_flight.complete(entry);

        result.map_err(CallError::from)
    }

    pub async fn find_session(
        &self,
        channel_id: &str,
        lookup: SessionLookup,
    ) -> Result<Option<ChatSession>, CallError> {
        match lookup {
            SessionLookup::Efficient => self.find_active_session(channel_id).await,
            SessionLookup::Naive => self.find_active_session_naive(channel_id).await,
        }
    }

    /// Scans the channel's most recent uploads for one with an active chat.
    #[instrument(skip(self))]
    pub async fn find_active_session(&self, channel_id: &str) -> Result<Option<ChatSession>, CallError> {
        let Some(playlist_id) = self.uploads_playlist(channel_id).await? else {
            debug!(channel_id, "channel has no uploads playlist");
            return Ok(None);
        };

        let video_ids = self.playlist_video_ids(&playlist_id, RECENT_UPLOADS_SCANNED).await?;
        if video_ids.is_empty() {
            return Ok(None);
        }

        let details = self.video_details(&video_ids).await?;
        Ok(details.iter().find_map(VideoDetails::as_session))
    }

    #[instrument(skip(self))]
    pub async fn find_active_session_naive(
        &self,
        channel_id: &str,
    ) -> Result<Option<ChatSession>, CallError> {
        let hit = self
            .metered(
                EndpointCategory::Search,
                "search_live_video",
                json!({ "channelId": channel_id, "eventType": "live" }),
                self.upstream.search_live_video(channel_id),
            )
            .await?;
        let Some(hit) = hit else {
            return Ok(None);
        };

        let details = self.video_details(std::slice::from_ref(&hit.video_id)).await?;
        Ok(details.iter().find_map(VideoDetails::as_session))
    }

    /// Messages come back tagged with the session's video and chat ids.
    pub async fn fetch_messages(
        &self,
        session: &ChatSession,
        cursor: Option<&str>,
    ) -> Result<MessagePage, CallError> {
        let mut page = self
            .metered(
                EndpointCategory::LiveChatMessages,
                "fetch_messages",
                json!({ "liveChatId": session.session_id, "pageToken": cursor }),
                self.upstream.chat_messages(&session.session_id, cursor),
            )
            .await?;

        for message in &mut page.messages {
            message
                .video_id
                .get_or_insert_with(|| session.content_id.clone());
            message
                .live_chat_id
                .get_or_insert_with(|| session.session_id.clone());
        }
        Ok(page)
    }

    /// Most recent uploads, newest first.
    pub async fn recent_videos(
        &self,
        channel_id: &str,
        max_results: u32,
    ) -> Result<Vec<VideoDetails>, CallError> {
        let Some(playlist_id) = self.uploads_playlist(channel_id).await? else {
            return Ok(Vec::new());
        };
        let video_ids = self.playlist_video_ids(&playlist_id, max_results).await?;
        if video_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut details = self.video_details(&video_ids).await?;
        details.sort_by_key(|video| {
            video_ids
                .iter()
                .position(|id| *id == video.video_id)
                .unwrap_or(usize::MAX)
        });
        Ok(details)
    }

    pub async fn channel_stats(&self, channel_id: &str) -> Result<Option<ChannelStats>, CallError> {
        self.metered(
            EndpointCategory::Channels,
            "channel_statistics",
            json!({ "channelId": channel_id, "part": "snippet,statistics" }),
            self.upstream.channel_statistics(channel_id),
        )
        .await
    }

    /// The uploads playlist id never changes for a channel, so it is fetched once.
    async fn uploads_playlist(&self, channel_id: &str) -> Result<Option<String>, CallError> {
        if let Some(cached) = self.uploads_cache.get(channel_id) {
            return Ok(Some(cached.value().clone()));
        }

        let playlist_id = self
            .metered(
                EndpointCategory::Channels,
                "uploads_playlist",
                json!({ "channelId": channel_id, "part": "contentDetails" }),
                self.upstream.uploads_playlist(channel_id),
            )
            .await?;

        if let Some(playlist_id) = playlist_id.as_ref() {
            self.uploads_cache
                .insert(channel_id.to_string(), playlist_id.clone());
        }
        Ok(playlist_id)
    }

    async fn playlist_video_ids(
        &self,
        playlist_id: &str,
        max_results: u32,
    ) -> Result<Vec<String>, CallError> {
        self.metered(
            EndpointCategory::PlaylistItems,
            "playlist_video_ids",
            json!({ "playlistId": playlist_id, "maxResults": max_results }),
            self.upstream.playlist_video_ids(playlist_id, max_results),
        )
        .await
    }

    async fn video_details(&self, video_ids: &[String]) -> Result<Vec<VideoDetails>, CallError> {
        self.metered(
            EndpointCategory::Videos,
            "video_details",
            json!({ "ids": video_ids, "part": "snippet,liveStreamingDetails" }),
            self.upstream.video_details(video_ids),
        )
        .await
    }
}
