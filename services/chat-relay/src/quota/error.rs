use thiserror::Error;

use super::EndpointCategory;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuotaError {
    #[error("API quota exceeded: {used}/{limit} units used ({}%)", percent(.used, .limit))]
    QuotaExceeded {
        category: EndpointCategory,
        used: u64,
        limit: u64,
    },
}

fn percent(used: &u64, limit: &u64) -> u64 {
    if *limit == 0 {
        return 100;
    }
    ((*used as f64 / *limit as f64) * 100.0).round() as u64
}
