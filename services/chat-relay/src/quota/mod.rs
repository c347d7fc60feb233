pub mod costs;
pub mod error;
pub mod governor;
pub mod snapshot;

pub use costs::{CostTable, EndpointCategory};
pub use error::QuotaError;
pub use governor::{Admission, QuotaGovernor};
pub use snapshot::{EndpointUsage, HourlyUsage, QuotaPolicy, QuotaSnapshot, QuotaZone};

pub const DAILY_QUOTA_LIMIT: u64 = 10_000;
pub const QUOTA_WARNING_THRESHOLD: f64 = 0.5;
pub const QUOTA_BLOCK_THRESHOLD: f64 = 0.8;
