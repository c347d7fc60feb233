use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::ActivityEvent;
use crate::overlay::OverlayMessage;
use crate::quota::{EndpointUsage, HourlyUsage, QuotaSnapshot};
use crate::relay::PollerStatus;
use crate::storage::StoredMessage;
use crate::upstream::VideoDetails;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaToday {
    /// Cost recorded in the ledger; matches `byEndpoint` and `hourly`.
    pub used: u64,
    /// Usage as admission sees it: the cached aggregate plus reservations
    /// made since the last refresh. Can differ from `used` for up to one
    /// cache TTL.
    pub admitted: u64,
    pub limit: u64,
    pub requests: u64,
    pub errors: u64,
    /// Percentage of today's requests that failed, rounded.
    pub error_rate: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaResponse {
    pub today: QuotaToday,
    pub by_endpoint: Vec<EndpointUsage>,
    pub hourly: Vec<HourlyUsage>,
}

impl QuotaResponse {
    pub fn new(snapshot: QuotaSnapshot, admitted: u64) -> Self {
        Self {
            today: QuotaToday {
                used: snapshot.used,
                admitted,
                limit: snapshot.limit,
                requests: snapshot.requests,
                errors: snapshot.errors,
                error_rate: snapshot.error_rate(),
            },
            by_endpoint: snapshot.by_endpoint,
            hourly: snapshot.by_hour,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityQuery {
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityResponse {
    pub entries: Vec<ActivityEvent>,
    pub session_total: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelQuery {
    pub channel_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub video_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesResponse {
    pub messages: Vec<StoredMessage>,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStatusResponse {
    pub monitoring_enabled: bool,
    pub channels: Vec<PollerStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideosQuery {
    pub channel_id: Option<String>,
    pub max_results: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideosResponse {
    pub videos: Vec<VideoDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayResponse {
    pub overlay: Option<OverlayMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub details: Option<serde_json::Value>,
}
