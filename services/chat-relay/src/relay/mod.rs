pub mod backoff;
pub mod manager;
pub mod poller;
pub mod state;

pub use backoff::Backoff;
pub use manager::{RelayLease, RelayManager};
pub use poller::{ChatPoller, PollerSettings};
pub use state::{PollerState, PollerStatus};
