use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream unreachable: {0}")]
    Unreachable(String),

    #[error("upstream request timed out")]
    Timeout,

    #[error("upstream returned {status}: {message}")]
    Status {
        status: u16,
        reason: Option<String>,
        message: String,
    },

    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout
        } else if err.is_connect() || err.is_builder() {
            UpstreamError::Unreachable(err.to_string())
        } else {
            UpstreamError::InvalidResponse(err.to_string())
        }
    }
}

impl UpstreamError {
    /// Whether the upstream saw the request and therefore billed it.
    pub fn was_delivered(&self) -> bool {
        !matches!(self, UpstreamError::Unreachable(_))
    }

    /// The upstream itself refused because its own daily quota is spent.
    pub fn is_quota_exhausted(&self) -> bool {
        matches!(
            self,
            UpstreamError::Status { status: 403, reason: Some(reason), .. }
                if reason == "quotaExceeded" || reason == "dailyLimitExceeded"
        )
    }
}
