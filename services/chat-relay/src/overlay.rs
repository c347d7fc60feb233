//! The single chat message currently pinned on the stream overlay.

use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayMessage {
    pub id: String,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_photo: Option<String>,
    pub message: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayRequest {
    pub id: Option<String>,
    pub author: Option<String>,
    pub author_photo: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OverlayError {
    #[error("author and message are required")]
    MissingField,
}

#[derive(Debug, Default)]
pub struct OverlaySlot {
    current: RwLock<Option<OverlayMessage>>,
}

impl OverlaySlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<OverlayMessage> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the pinned message. A missing id defaults to the current time in millis.
    pub fn set(&self, request: OverlayRequest) -> Result<OverlayMessage, OverlayError> {
        let author = non_empty(request.author).ok_or(OverlayError::MissingField)?;
        let message = non_empty(request.message).ok_or(OverlayError::MissingField)?;
        let now = Utc::now();

        let overlay = OverlayMessage {
            id: non_empty(request.id).unwrap_or_else(|| now.timestamp_millis().to_string()),
            author,
            author_photo: non_empty(request.author_photo),
            message,
            timestamp: now,
        };

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(overlay.clone());
        Ok(overlay)
    }

    pub fn clear(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
