use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub mod handlers;
pub mod router;
pub mod sse;
pub mod types;

pub use router::create_router;
pub use types::*;

use crate::events::EventBus;
use crate::ledger::UsageLedger;
use crate::overlay::OverlaySlot;
use crate::quota::QuotaGovernor;
use crate::relay::RelayManager;
use crate::storage::MessageStore;
use crate::upstream::MeteredClient;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub struct ApiState {
    pub ledger: Arc<UsageLedger>,
    pub governor: Arc<QuotaGovernor>,
    pub client: Arc<MeteredClient>,
    pub messages: Arc<MessageStore>,
    pub relay: RelayManager,
    pub bus: EventBus,
    pub overlay: OverlaySlot,
    pub heartbeat_interval: Duration,
    /// Ends open event streams so graceful shutdown can complete.
    pub shutdown: CancellationToken,
}

impl ApiState {
    pub fn new(
        ledger: Arc<UsageLedger>,
        client: Arc<MeteredClient>,
        messages: Arc<MessageStore>,
        relay: RelayManager,
        bus: EventBus,
    ) -> Self {
        Self {
            ledger,
            governor: Arc::clone(client.governor()),
            client,
            messages,
            relay,
            bus,
            overlay: OverlaySlot::new(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}
