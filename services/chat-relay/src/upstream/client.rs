use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::error::UpstreamError;
use super::types::{ChannelStats, ChatMessage, MessagePage, SearchHit, VideoDetails};

pub const DEFAULT_API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

/// Raw, unmetered upstream operations. Every call here costs quota, so callers
/// go through [`super::MeteredClient`] rather than using this directly.
#[async_trait]
pub trait ChatUpstream: Send + Sync {
    async fn uploads_playlist(&self, channel_id: &str) -> Result<Option<String>, UpstreamError>;

    async fn playlist_video_ids(
        &self,
        playlist_id: &str,
        max_results: u32,
    ) -> Result<Vec<String>, UpstreamError>;

    async fn video_details(&self, video_ids: &[String]) -> Result<Vec<VideoDetails>, UpstreamError>;

    async fn search_live_video(&self, channel_id: &str) -> Result<Option<SearchHit>, UpstreamError>;

    async fn chat_messages(
        &self,
        live_chat_id: &str,
        page_token: Option<&str>,
    ) -> Result<MessagePage, UpstreamError>;

    async fn channel_statistics(&self, channel_id: &str)
        -> Result<Option<ChannelStats>, UpstreamError>;
}

pub struct YouTubeClient {
    http_client: Client,
    base_url: String,
    api_key: String,
}

impl YouTubeClient {
    pub fn new(base_url: String, api_key: String, timeout_secs: u64) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .pool_max_idle_per_host(4)
            .user_agent(concat!("chat-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        resource: &str,
        query: &[(&str, &str)],
    ) -> Result<T, UpstreamError> {
        let url = format!("{}/{}", self.base_url, resource);
        debug!(%url, "calling upstream");

        let response = self
            .http_client
            .get(&url)
            .query(query)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|err| UpstreamError::InvalidResponse(err.to_string()));
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unable to read error body".to_string());
        let (reason, message) = match serde_json::from_str::<ApiErrorEnvelope>(&body) {
            Ok(envelope) => (
                envelope.error.errors.into_iter().next().map(|e| e.reason),
                envelope.error.message,
            ),
            Err(_) => (None, body),
        };

        Err(UpstreamError::Status {
            status: status.as_u16(),
            reason,
            message,
        })
    }
}

#[async_trait]
impl ChatUpstream for YouTubeClient {
    #[instrument(skip(self))]
    async fn uploads_playlist(&self, channel_id: &str) -> Result<Option<String>, UpstreamError> {
        let response: ListResponse<ChannelItem> = self
            .get_json("channels", &[("part", "contentDetails"), ("id", channel_id)])
            .await?;

        Ok(response
            .items
            .into_iter()
            .next()
            .and_then(|item| item.content_details)
            .and_then(|details| details.related_playlists.uploads))
    }

    #[instrument(skip(self))]
    async fn playlist_video_ids(
        &self,
        playlist_id: &str,
        max_results: u32,
    ) -> Result<Vec<String>, UpstreamError> {
        let max_results = max_results.clamp(1, 50).to_string();
        let response: ListResponse<PlaylistItem> = self
            .get_json(
                "playlistItems",
                &[
                    ("part", "contentDetails"),
                    ("playlistId", playlist_id),
                    ("maxResults", max_results.as_str()),
                ],
            )
            .await?;

        Ok(response
            .items
            .into_iter()
            .filter_map(|item| item.content_details.and_then(|d| d.video_id))
            .collect())
    }

    #[instrument(skip(self), fields(count = video_ids.len()))]
    async fn video_details(&self, video_ids: &[String]) -> Result<Vec<VideoDetails>, UpstreamError> {
        if video_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = video_ids.join(",");
        let response: ListResponse<VideoItem> = self
            .get_json(
                "videos",
                &[("part", "snippet,liveStreamingDetails"), ("id", ids.as_str())],
            )
            .await?;

        Ok(response.items.into_iter().map(VideoItem::into_details).collect())
    }

    #[instrument(skip(self))]
    async fn search_live_video(&self, channel_id: &str) -> Result<Option<SearchHit>, UpstreamError> {
        let response: ListResponse<SearchItem> = self
            .get_json(
                "search",
                &[
                    ("part", "snippet"),
                    ("channelId", channel_id),
                    ("type", "video"),
                    ("eventType", "live"),
                    ("maxResults", "10"),
                ],
            )
            .await?;

        Ok(response.items.into_iter().find_map(|item| {
            let video_id = item.id.video_id?;
            Some(SearchHit {
                video_id,
                title: item.snippet.map(|s| s.title).unwrap_or_default(),
            })
        }))
    }

    #[instrument(skip(self))]
    async fn chat_messages(
        &self,
        live_chat_id: &str,
        page_token: Option<&str>,
    ) -> Result<MessagePage, UpstreamError> {
        let mut query = vec![("liveChatId", live_chat_id), ("part", "id,snippet,authorDetails")];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        let response: ChatMessagesResponse = self.get_json("liveChat/messages", &query).await?;

        let messages = response
            .items
            .into_iter()
            .filter_map(|item| item.into_message(live_chat_id))
            .collect();

        Ok(MessagePage {
            messages,
            next_cursor: response.next_page_token,
            suggested_delay: response.polling_interval_millis.map(Duration::from_millis),
        })
    }

    #[instrument(skip(self))]
    async fn channel_statistics(
        &self,
        channel_id: &str,
    ) -> Result<Option<ChannelStats>, UpstreamError> {
        let response: ListResponse<ChannelItem> = self
            .get_json("channels", &[("part", "snippet,statistics"), ("id", channel_id)])
            .await?;

        Ok(response.items.into_iter().next().map(|item| {
            let snippet = item.snippet.unwrap_or_default();
            let statistics = item.statistics.unwrap_or_default();
            ChannelStats {
                title: snippet.title,
                description: snippet.description,
                subscriber_count: statistics.subscriber_count.unwrap_or_else(|| "0".into()),
                video_count: statistics.video_count.unwrap_or_else(|| "0".into()),
                view_count: statistics.view_count.unwrap_or_else(|| "0".into()),
            }
        }))
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    reason: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelItem {
    content_details: Option<ChannelContentDetails>,
    snippet: Option<Snippet>,
    statistics: Option<ChannelStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelContentDetails {
    related_playlists: RelatedPlaylists,
}

#[derive(Debug, Deserialize)]
struct RelatedPlaylists {
    uploads: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelStatistics {
    subscriber_count: Option<String>,
    video_count: Option<String>,
    view_count: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    published_at: Option<DateTime<Utc>>,
    live_broadcast_content: Option<String>,
    thumbnails: Option<Thumbnails>,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    medium: Option<Thumbnail>,
    default: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItem {
    content_details: Option<PlaylistItemDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemDetails {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    id: String,
    snippet: Option<Snippet>,
    live_streaming_details: Option<LiveStreamingDetails>,
}

impl VideoItem {
    fn into_details(self) -> VideoDetails {
        let snippet = self.snippet.unwrap_or_default();
        let thumbnail_url = snippet
            .thumbnails
            .and_then(|t| t.medium.or(t.default))
            .map(|t| t.url);
        VideoDetails {
            video_id: self.id,
            title: snippet.title,
            published_at: snippet.published_at,
            thumbnail_url,
            live_broadcast_content: snippet.live_broadcast_content,
            active_live_chat_id: self
                .live_streaming_details
                .and_then(|details| details.active_live_chat_id),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveStreamingDetails {
    active_live_chat_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
    snippet: Option<Snippet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatMessagesResponse {
    #[serde(default)]
    items: Vec<ChatItem>,
    next_page_token: Option<String>,
    polling_interval_millis: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatItem {
    id: Option<String>,
    snippet: Option<ChatSnippet>,
    author_details: Option<AuthorDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatSnippet {
    published_at: Option<DateTime<Utc>>,
    display_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorDetails {
    display_name: Option<String>,
}

impl ChatItem {
    fn into_message(self, live_chat_id: &str) -> Option<ChatMessage> {
        let message_id = self.id.filter(|id| !id.is_empty())?;
        let snippet = self.snippet;
        Some(ChatMessage {
            message_id,
            author_name: self
                .author_details
                .and_then(|a| a.display_name)
                .unwrap_or_else(|| "Unknown author".to_string()),
            text: snippet
                .as_ref()
                .and_then(|s| s.display_message.clone())
                .unwrap_or_default(),
            published_at: snippet
                .and_then(|s| s.published_at)
                .unwrap_or_else(Utc::now),
            video_id: None,
            live_chat_id: Some(live_chat_id.to_string()),
        })
    }
}
