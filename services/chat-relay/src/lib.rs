pub mod api;
pub mod config;
pub mod events;
pub mod ledger;
pub mod overlay;
pub mod quota;
pub mod relay;
pub mod storage;
pub mod upstream;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{create_router, ApiState, ErrorResponse};
pub use config::RelayConfig;
pub use events::{EventBus, RelayEvent, Topic};
pub use ledger::{QuotaDay, UsageLedger, UsageLogEntry};
pub use overlay::OverlaySlot;
pub use quota::{CostTable, EndpointCategory, QuotaError, QuotaGovernor, QuotaPolicy};
pub use relay::{PollerSettings, PollerState, PollerStatus, RelayLease, RelayManager};
pub use storage::{MessageStore, StorageError, UsageLogStore};
pub use upstream::{CallError, ChatUpstream, MeteredClient, SessionLookup, UpstreamError, YouTubeClient};
