//! In-process fan-out of ledger and chat activity to live subscribers.
//!
//! Delivery is at-most-once: a subscriber only sees events published while it
//! is registered, and a slow subscriber loses the oldest events rather than
//! slowing publishers down.

use chrono::{DateTime, Utc};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use crate::ledger::{CallOutcome, UsageLogEntry};
use crate::quota::EndpointCategory;
use crate::relay::PollerStatus;
use crate::upstream::ChatMessage;

pub const DEFAULT_BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Ledger writes and quota warnings.
    Activity,
    /// Chat messages, relay errors and poller state changes.
    Chat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub endpoint_type: EndpointCategory,
    pub quota_cost: u64,
    pub status: CallOutcome,
}

impl From<&UsageLogEntry> for ActivityEvent {
    fn from(entry: &UsageLogEntry) -> Self {
        Self {
            id: entry.id,
            timestamp: entry.timestamp,
            endpoint_type: entry.category,
            quota_cost: entry.cost,
            status: entry.outcome,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaWarningEvent {
    pub used: u64,
    pub limit: u64,
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBatchEvent {
    pub channel_id: String,
    pub live_chat_id: String,
    pub video_id: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayErrorKind {
    QuotaExceeded,
    Upstream,
    NoActiveSession,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayErrorEvent {
    pub channel_id: String,
    pub kind: RelayErrorKind,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    Activity(ActivityEvent),
    QuotaWarning(QuotaWarningEvent),
    Messages(ChatBatchEvent),
    Error(RelayErrorEvent),
    Status(PollerStatus),
}

impl RelayEvent {
    /// Channel the event belongs to, for chat-topic filtering.
    pub fn channel_id(&self) -> Option<&str> {
        match self {
            RelayEvent::Messages(batch) => Some(&batch.channel_id),
            RelayEvent::Error(error) => Some(&error.channel_id),
            RelayEvent::Status(status) => Some(&status.channel_id),
            RelayEvent::Activity(_) | RelayEvent::QuotaWarning(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    activity: broadcast::Sender<RelayEvent>,
    chat: broadcast::Sender<RelayEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (activity, _) = broadcast::channel(capacity);
        let (chat, _) = broadcast::channel(capacity);
        Self { activity, chat }
    }

    fn sender(&self, topic: Topic) -> &broadcast::Sender<RelayEvent> {
        match topic {
            Topic::Activity => &self.activity,
            Topic::Chat => &self.chat,
        }
    }

    /// Returns the number of subscribers the event reached. Never blocks.
    pub fn publish(&self, topic: Topic, event: RelayEvent) -> usize {
        self.sender(topic).send(event).unwrap_or(0)
    }

    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<RelayEvent> {
        self.sender(topic).subscribe()
    }

    /// Unbounded stream of events for `topic`; ends only when the bus is dropped.
    pub fn stream(&self, topic: Topic) -> impl Stream<Item = RelayEvent> + Send + 'static {
        stream::unfold(self.subscribe(topic), move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(?topic, skipped, "event subscriber lagged; dropping events");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
    }
}
