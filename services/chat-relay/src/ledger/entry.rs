use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::quota::EndpointCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallOutcome {
    Success,
    Error,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Success => "success",
            CallOutcome::Error => "error",
        }
    }
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallOutcome {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "success" => Ok(CallOutcome::Success),
            "error" => Ok(CallOutcome::Error),
            other => Err(format!("unknown call outcome {other}")),
        }
    }
}

/// One metered call attempt. `id` is assigned by storage on insert.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageLogEntry {
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub category: EndpointCategory,
    pub method: String,
    pub request: Option<serde_json::Value>,
    pub outcome: CallOutcome,
    pub error: Option<String>,
    pub cost: u64,
    pub latency: Duration,
}

impl UsageLogEntry {
    pub fn success(
        category: EndpointCategory,
        method: impl Into<String>,
        cost: u64,
        latency: Duration,
    ) -> Self {
        Self {
            id: None,
            timestamp: Utc::now(),
            category,
            method: method.into(),
            request: None,
            outcome: CallOutcome::Success,
            error: None,
            cost,
            latency,
        }
    }

    pub fn failure(
        category: EndpointCategory,
        method: impl Into<String>,
        cost: u64,
        latency: Duration,
        error: impl Into<String>,
    ) -> Self {
        Self {
            outcome: CallOutcome::Error,
            error: Some(error.into()),
            ..Self::success(category, method, cost, latency)
        }
    }

    pub fn with_request(mut self, request: serde_json::Value) -> Self {
        self.request = Some(request);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}
