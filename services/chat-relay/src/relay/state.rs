use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::upstream::ChatSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerState {
    Idle,
    Discovering,
    Streaming,
    Error,
    Stopped,
}

impl PollerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollerState::Idle => "idle",
            PollerState::Discovering => "discovering",
            PollerState::Streaming => "streaming",
            PollerState::Error => "error",
            PollerState::Stopped => "stopped",
        }
    }
}

/// Last observed state of one channel's poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollerStatus {
    pub channel_id: String,
    pub state: PollerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<ChatSession>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Delay before the next upstream call, when one is scheduled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_delay_ms: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

impl PollerStatus {
    pub fn idle(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            state: PollerState::Idle,
            session: None,
            last_error: None,
            next_delay_ms: None,
            updated_at: Utc::now(),
        }
    }
}
