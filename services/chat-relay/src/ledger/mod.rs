pub mod day;
pub mod entry;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::events::{ActivityEvent, EventBus, RelayEvent, Topic};
use crate::quota::{EndpointUsage, HourlyUsage, QuotaSnapshot};
use crate::storage::{StorageError, UsageLogStore, UsageTotals};

pub use day::QuotaDay;
pub use entry::{CallOutcome, UsageLogEntry};

pub const MAX_ACTIVITY_ROWS: usize = 500;
pub const DEFAULT_ACTIVITY_ROWS: usize = 100;

enum LedgerCommand {
    Record(UsageLogEntry),
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Clone)]
pub struct ActivityPage {
    pub entries: Vec<UsageLogEntry>,
    pub session_total: u64,
}

/// Durable log of metered calls.
///
/// Writes go through a single background task so the metered call path never
/// waits on SQLite; reads hit the store directly.
pub struct UsageLedger {
    store: Arc<UsageLogStore>,
    day: QuotaDay,
    tx: mpsc::UnboundedSender<LedgerCommand>,
}

impl UsageLedger {
    /// Must be called inside a tokio runtime; spawns the writer task.
    pub fn start(store: Arc<UsageLogStore>, day: QuotaDay, bus: EventBus) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(run_writer(Arc::clone(&store), bus, rx));
        (Arc::new(Self { store, day, tx }), writer)
    }

    pub fn quota_day(&self) -> &QuotaDay {
        &self.day
    }

    /// Fire-and-forget append. Never fails to the caller.
    pub fn record(&self, entry: UsageLogEntry) {
        if self.tx.send(LedgerCommand::Record(entry)).is_err() {
            error!("usage ledger writer has stopped; dropping entry");
        }
    }

    /// Resolves once every entry recorded before this call has been written.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(LedgerCommand::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    pub fn aggregate_since(&self, since: &DateTime<Utc>) -> Result<UsageTotals, StorageError> {
        self.store.totals_since(since)
    }

    pub fn aggregate_today(&self) -> Result<UsageTotals, StorageError> {
        self.aggregate_since(&self.day.current_start())
    }

    pub fn breakdown_by_endpoint(
        &self,
        since: &DateTime<Utc>,
    ) -> Result<Vec<EndpointUsage>, StorageError> {
        Ok(self
            .store
            .endpoint_breakdown(since)?
            .into_iter()
            .map(|row| EndpointUsage {
                endpoint: row.endpoint,
                count: row.count,
                cost: row.cost,
                errors: row.errors,
            })
            .collect())
    }

    /// Hours are local to the quota timezone, so a day never has more than 24 buckets.
    pub fn breakdown_by_hour(&self, since: &DateTime<Utc>) -> Result<Vec<HourlyUsage>, StorageError> {
        let mut buckets: BTreeMap<u32, u64> = BTreeMap::new();
        for (timestamp, cost) in self.store.costs_since(since)? {
            *buckets.entry(self.day.hour_of(&timestamp)).or_default() += cost;
        }
        Ok(buckets
            .into_iter()
            .map(|(hour, cost)| HourlyUsage { hour, cost })
            .collect())
    }

    /// Recent activity, newest first. Without `since` the current quota day is used.
    pub fn activity(
        &self,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<ActivityPage, StorageError> {
        let limit = limit
            .unwrap_or(DEFAULT_ACTIVITY_ROWS)
            .clamp(1, MAX_ACTIVITY_ROWS);

        let (entries, session_total) = match since {
            Some(since) => (
                self.store.list_since(&since, false, limit)?,
                self.store.cost_after(&since)?,
            ),
            None => {
                let start = self.day.current_start();
                (
                    self.store.list_since(&start, true, limit)?,
                    self.store.totals_since(&start)?.cost,
                )
            }
        };

        Ok(ActivityPage {
            entries,
            session_total,
        })
    }

    pub fn snapshot(&self, limit: u64) -> Result<QuotaSnapshot, StorageError> {
        let day_start = self.day.current_start();
        let totals = self.aggregate_since(&day_start)?;
        Ok(QuotaSnapshot {
            day_start,
            used: totals.cost,
            limit,
            requests: totals.requests,
            errors: totals.errors,
            by_endpoint: self.breakdown_by_endpoint(&day_start)?,
            by_hour: self.breakdown_by_hour(&day_start)?,
        })
    }
}

async fn run_writer(
    store: Arc<UsageLogStore>,
    bus: EventBus,
    mut rx: mpsc::UnboundedReceiver<LedgerCommand>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            LedgerCommand::Record(mut entry) => {
                match store.insert(&entry) {
                    Ok(id) => {
                        entry.id = Some(id);
                        debug!(id, category = %entry.category, cost = entry.cost, "recorded metered call");
                    }
                    Err(err) => {
                        error!(
                            error = %err,
                            category = %entry.category,
                            method = %entry.method,
                            "failed to persist usage log entry"
                        );
                    }
                }
                bus.publish(
                    Topic::Activity,
                    RelayEvent::Activity(ActivityEvent::from(&entry)),
                );
            }
            LedgerCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("usage ledger writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::EndpointCategory;
    use std::time::Duration;

    fn ledger() -> Arc<UsageLedger> {
        let store = Arc::new(UsageLogStore::in_memory().unwrap());
        let (ledger, _writer) = UsageLedger::start(store, QuotaDay::default(), EventBus::new(16));
        ledger
    }

    #[tokio::test]
    async fn record_is_visible_after_flush() {
        let ledger = ledger();
        ledger.record(UsageLogEntry::success(
            EndpointCategory::LiveChatMessages,
            "fetch_messages",
            5,
            Duration::from_millis(30),
        ));
        ledger.flush().await;

        let totals = ledger.aggregate_today().unwrap();
        assert_eq!(totals.cost, 5);
        assert_eq!(totals.requests, 1);
    }

    #[tokio::test]
    async fn aggregate_is_monotonic_as_records_land() {
        let ledger = ledger();
        let mut previous = 0;
        for _ in 0..5 {
            ledger.record(UsageLogEntry::success(
                EndpointCategory::Videos,
                "video_details",
                1,
                Duration::from_millis(5),
            ));
            ledger.flush().await;
            let used = ledger.aggregate_today().unwrap().cost;
            assert!(used >= previous);
            previous = used;
        }
        assert_eq!(previous, 5);
    }

    #[tokio::test]
    async fn writer_publishes_activity_with_assigned_id() {
        let bus = EventBus::new(16);
        let store = Arc::new(UsageLogStore::in_memory().unwrap());
        let (ledger, _writer) = UsageLedger::start(store, QuotaDay::default(), bus.clone());
        let mut rx = bus.subscribe(Topic::Activity);

        ledger.record(UsageLogEntry::success(
            EndpointCategory::Channels,
            "uploads_playlist",
            1,
            Duration::from_millis(8),
        ));

        match rx.recv().await.unwrap() {
            RelayEvent::Activity(event) => {
                assert!(event.id.is_some());
                assert_eq!(event.endpoint_type, EndpointCategory::Channels);
                assert_eq!(event.quota_cost, 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn activity_clamps_limit_and_sums_session_total() {
        let ledger = ledger();
        for _ in 0..3 {
            ledger.record(UsageLogEntry::success(
                EndpointCategory::Search,
                "search_live_video",
                100,
                Duration::from_millis(50),
            ));
        }
        ledger.flush().await;

        let page = ledger.activity(None, Some(2)).unwrap();
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.session_total, 300);

        let replay = ledger
            .activity(Some(Utc::now() - chrono::Duration::minutes(5)), Some(10_000))
            .unwrap();
        assert_eq!(replay.entries.len(), 3);
    }

    #[tokio::test]
    async fn snapshot_includes_breakdowns() {
        let ledger = ledger();
        ledger.record(UsageLogEntry::success(
            EndpointCategory::LiveChatMessages,
            "fetch_messages",
            5,
            Duration::from_millis(10),
        ));
        ledger.record(UsageLogEntry::failure(
            EndpointCategory::Videos,
            "video_details",
            1,
            Duration::from_millis(10),
            "status 500",
        ));
        ledger.flush().await;

        let snapshot = ledger.snapshot(10_000).unwrap();
        assert_eq!(snapshot.used, 6);
        assert_eq!(snapshot.requests, 2);
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.by_endpoint[0].endpoint, "liveChatMessages.list");
        assert_eq!(snapshot.by_hour.iter().map(|h| h.cost).sum::<u64>(), 6);
    }
}
