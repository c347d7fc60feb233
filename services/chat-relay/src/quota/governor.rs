use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::events::{EventBus, QuotaWarningEvent, RelayEvent, Topic};
use crate::ledger::UsageLedger;

use super::costs::{CostTable, EndpointCategory};
use super::error::QuotaError;
use super::snapshot::{QuotaPolicy, QuotaSnapshot, QuotaZone};

/// Outcome of a successful admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub category: EndpointCategory,
    pub cost: u64,
    pub used_before: u64,
    pub zone: QuotaZone,
}

struct CachedUsage {
    snapshot: QuotaSnapshot,
    fetched_at: Instant,
}

/// Admission control over the shared daily quota.
///
/// Holds a read-through cache of the ledger's daily aggregate. Admitted calls
/// are reserved against the cache immediately, so concurrent callers see each
/// other's reservations before any of the calls complete. Reservations are not
/// refunded when a call later fails; the next refresh from the ledger replaces
/// them with what was actually recorded.
pub struct QuotaGovernor {
    ledger: Arc<UsageLedger>,
    costs: CostTable,
    policy: QuotaPolicy,
    bus: EventBus,
    cache: Mutex<Option<CachedUsage>>,
}

impl QuotaGovernor {
    pub fn new(ledger: Arc<UsageLedger>, costs: CostTable, policy: QuotaPolicy, bus: EventBus) -> Self {
        Self {
            ledger,
            costs,
            policy,
            bus,
            cache: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    pub fn costs(&self) -> &CostTable {
        &self.costs
    }

    pub fn admit(&self, category: EndpointCategory) -> Result<Admission, QuotaError> {
        let Some(cost) = self.costs.cost_of(category) else {
            warn!(%category, "no cost configured for endpoint category; admitting unmetered");
            return Ok(Admission {
                category,
                cost: 0,
                used_before: self.lock_cache().as_ref().map_or(0, |c| c.snapshot.used),
                zone: QuotaZone::Normal,
            });
        };

        let mut cache = self.lock_cache();
        let snapshot = self.refresh_locked(&mut cache);
        let used = snapshot.used;
        let limit = self.policy.daily_limit;
        let zone = self.policy.zone(used);

        match zone {
            QuotaZone::Blocked => {
                warn!(%category, used, limit, "quota blocked; refusing metered call");
                return Err(QuotaError::QuotaExceeded {
                    category,
                    used,
                    limit,
                });
            }
            QuotaZone::Warning => {
                let ratio = self.policy.ratio(used);
                warn!(%category, used, limit, ratio, "quota usage above warning threshold");
                self.bus.publish(
                    Topic::Activity,
                    RelayEvent::QuotaWarning(QuotaWarningEvent { used, limit, ratio }),
                );
            }
            QuotaZone::Normal => {}
        }

        snapshot.used = used.saturating_add(cost);

        Ok(Admission {
            category,
            cost,
            used_before: used,
            zone,
        })
    }

    /// Cached aggregate for the current quota day, including reservations.
    pub fn snapshot(&self) -> QuotaSnapshot {
        let mut cache = self.lock_cache();
        self.refresh_locked(&mut cache).clone()
    }

    pub fn invalidate(&self) {
        *self.lock_cache() = None;
    }

    fn lock_cache(&self) -> MutexGuard<'_, Option<CachedUsage>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh_locked<'a>(&self, cache: &'a mut Option<CachedUsage>) -> &'a mut QuotaSnapshot {
        let now = Instant::now();
        let day_start = self.ledger.quota_day().current_start();
        let limit = self.policy.daily_limit;

        let stale = match cache.as_ref() {
            None => true,
            Some(cached) => {
                now.duration_since(cached.fetched_at) >= self.policy.cache_ttl
                    || cached.snapshot.day_start != day_start
            }
        };

        if stale {
            let snapshot = match self.ledger.snapshot(limit) {
                Ok(fresh) => {
                    debug!(used = fresh.used, limit, "refreshed quota usage from ledger");
                    fresh
                }
                Err(err) => {
                    warn!(error = %err, "failed to refresh quota usage; keeping cached value");
                    cache
                        .take()
                        .map(|cached| cached.snapshot)
                        .filter(|previous| previous.day_start == day_start)
                        .unwrap_or_else(|| QuotaSnapshot::empty(day_start, limit))
                }
            };
            *cache = Some(CachedUsage {
                snapshot,
                fetched_at: now,
            });
        }

        let cached = cache.get_or_insert_with(|| CachedUsage {
            snapshot: QuotaSnapshot::empty(day_start, limit),
            fetched_at: now,
        });
        &mut cached.snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{QuotaDay, UsageLogEntry};
    use crate::storage::UsageLogStore;
    use std::time::Duration;

    fn setup(costs: CostTable, policy: QuotaPolicy) -> (Arc<UsageLedger>, QuotaGovernor, EventBus) {
        let bus = EventBus::new(64);
        let store = Arc::new(UsageLogStore::in_memory().unwrap());
        let (ledger, _writer) = UsageLedger::start(store, QuotaDay::default(), bus.clone());
        let governor = QuotaGovernor::new(Arc::clone(&ledger), costs, policy, bus.clone());
        (ledger, governor, bus)
    }

    async fn seed(ledger: &UsageLedger, cost: u64) {
        ledger.record(UsageLogEntry::success(
            EndpointCategory::Search,
            "seed",
            cost,
            Duration::from_millis(1),
        ));
        ledger.flush().await;
    }

    #[tokio::test]
    async fn denies_when_recorded_usage_is_past_block_threshold() {
        let costs = CostTable::default().with_cost(EndpointCategory::Search, 600);
        let (ledger, governor, _bus) = setup(costs, QuotaPolicy::default());
        seed(&ledger, 8_500).await;

        let err = governor.admit(EndpointCategory::Search).unwrap_err();
        assert_eq!(
            err,
            QuotaError::QuotaExceeded {
                category: EndpointCategory::Search,
                used: 8_500,
                limit: 10_000,
            }
        );
        assert_eq!(governor.snapshot().used, 8_500, "denied call must not reserve");
    }

    #[tokio::test]
    async fn admission_reserves_cost_before_the_call_completes() {
        let (_ledger, governor, _bus) = setup(CostTable::default(), QuotaPolicy::default());

        let first = governor.admit(EndpointCategory::LiveChatMessages).unwrap();
        let second = governor.admit(EndpointCategory::LiveChatMessages).unwrap();
        assert_eq!(first.used_before, 0);
        assert_eq!(second.used_before, 5);
        assert_eq!(governor.snapshot().used, 10);
    }

    #[tokio::test]
    async fn warning_zone_admits_and_publishes_warning() {
        let (ledger, governor, bus) = setup(CostTable::default(), QuotaPolicy::default());
        seed(&ledger, 6_000).await;
        let mut rx = bus.subscribe(Topic::Activity);

        let admission = governor.admit(EndpointCategory::Videos).unwrap();
        assert_eq!(admission.zone, QuotaZone::Warning);

        match rx.recv().await.unwrap() {
            RelayEvent::QuotaWarning(event) => {
                assert_eq!(event.used, 6_000);
                assert_eq!(event.limit, 10_000);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn burst_stops_at_block_threshold() {
        let policy = QuotaPolicy {
            daily_limit: 1_000,
            ..QuotaPolicy::default()
        };
        let (_ledger, governor, _bus) = setup(CostTable::default(), policy);

        let mut admitted = 0u64;
        for _ in 0..20 {
            match governor.admit(EndpointCategory::Search) {
                Ok(admission) => admitted += admission.cost,
                Err(QuotaError::QuotaExceeded { used, .. }) => {
                    assert!(used >= 800);
                    break;
                }
            }
        }
        assert_eq!(admitted, 800);
        assert!(governor.snapshot().used < 800 + 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_admissions_never_overshoot_by_more_than_one_call() {
        let policy = QuotaPolicy {
            daily_limit: 1_000,
            ..QuotaPolicy::default()
        };
        let (_ledger, governor, _bus) = setup(CostTable::default(), policy);
        let governor = Arc::new(governor);

        let mut handles = Vec::new();
        for _ in 0..64 {
            let governor = Arc::clone(&governor);
            handles.push(tokio::spawn(async move {
                governor
                    .admit(EndpointCategory::Search)
                    .map(|a| a.cost)
                    .unwrap_or(0)
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            admitted += handle.await.unwrap();
        }
        assert!(admitted <= 800 + 100, "admitted {admitted}");
        assert_eq!(admitted, 800);
    }

    #[tokio::test]
    async fn unknown_category_is_admitted_even_when_blocked() {
        let costs = CostTable::default().without(EndpointCategory::Search);
        let (ledger, governor, _bus) = setup(costs, QuotaPolicy::default());
        seed(&ledger, 9_500).await;

        let admission = governor.admit(EndpointCategory::Search).unwrap();
        assert_eq!(admission.cost, 0);
        assert!(governor.admit(EndpointCategory::Videos).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cache_under_reports_until_ttl_expires() {
        let (ledger, governor, _bus) = setup(CostTable::default(), QuotaPolicy::default());

        governor.admit(EndpointCategory::Videos).unwrap();
        seed(&ledger, 9_000).await;

        // Still served from the cached aggregate.
        governor.admit(EndpointCategory::Videos).unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        let err = governor.admit(EndpointCategory::Videos).unwrap_err();
        assert!(matches!(err, QuotaError::QuotaExceeded { used: 9_000, .. }));
    }

    #[tokio::test]
    async fn invalidate_forces_a_fresh_read() {
        let (ledger, governor, _bus) = setup(CostTable::default(), QuotaPolicy::default());
        governor.admit(EndpointCategory::Videos).unwrap();
        seed(&ledger, 9_000).await;

        governor.invalidate();
        assert_eq!(governor.snapshot().used, 9_000);
    }
}
