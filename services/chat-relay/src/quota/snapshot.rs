use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DAILY_QUOTA_LIMIT, QUOTA_BLOCK_THRESHOLD, QUOTA_WARNING_THRESHOLD};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaZone {
    Normal,
    Warning,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuotaPolicy {
    pub daily_limit: u64,
    pub warning_ratio: f64,
    pub block_ratio: f64,
    pub cache_ttl: Duration,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            daily_limit: DAILY_QUOTA_LIMIT,
            warning_ratio: QUOTA_WARNING_THRESHOLD,
            block_ratio: QUOTA_BLOCK_THRESHOLD,
            cache_ttl: Duration::from_secs(60),
        }
    }
}

impl QuotaPolicy {
    pub fn ratio(&self, used: u64) -> f64 {
        if self.daily_limit == 0 {
            return 1.0;
        }
        used as f64 / self.daily_limit as f64
    }

    pub fn zone(&self, used: u64) -> QuotaZone {
        let ratio = self.ratio(used);
        if ratio >= self.block_ratio {
            QuotaZone::Blocked
        } else if ratio >= self.warning_ratio {
            QuotaZone::Warning
        } else {
            QuotaZone::Normal
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointUsage {
    pub endpoint: String,
    pub count: u64,
    pub cost: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyUsage {
    pub hour: u32,
    pub cost: u64,
}

/// Aggregate usage for one quota day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaSnapshot {
    pub day_start: DateTime<Utc>,
    pub used: u64,
    pub limit: u64,
    pub requests: u64,
    pub errors: u64,
    pub by_endpoint: Vec<EndpointUsage>,
    pub by_hour: Vec<HourlyUsage>,
}

impl QuotaSnapshot {
    pub fn empty(day_start: DateTime<Utc>, limit: u64) -> Self {
        Self {
            day_start,
            used: 0,
            limit,
            requests: 0,
            errors: 0,
            by_endpoint: Vec::new(),
            by_hour: Vec::new(),
        }
    }

    /// Whole-number percentage of failed requests.
    pub fn error_rate(&self) -> u64 {
        if self.requests == 0 {
            return 0;
        }
        ((self.errors as f64 / self.requests as f64) * 100.0).round() as u64
    }
}
