use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::events::EventBus;
use crate::storage::MessageStore;
use crate::upstream::MeteredClient;

use super::poller::{ChatPoller, PollerSettings};
use super::state::PollerStatus;

struct PollerHandle {
    cancel: CancellationToken,
    status: watch::Receiver<PollerStatus>,
    task: Option<JoinHandle<()>>,
    leases: usize,
    pinned: bool,
}

impl PollerHandle {
    fn stopped(channel_id: &str) -> Self {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (_, status) = watch::channel(PollerStatus::idle(channel_id));
        Self {
            cancel,
            status,
            task: None,
            leases: 0,
            pinned: false,
        }
    }

    fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

struct ManagerInner {
    client: Arc<MeteredClient>,
    messages: Arc<MessageStore>,
    bus: EventBus,
    settings: PollerSettings,
    channels: Vec<String>,
    enabled: bool,
    shutting_down: AtomicBool,
    pollers: DashMap<String, PollerHandle>,
}

impl ManagerInner {
    /// Starts a poller into `handle`. A previous poller for the channel is
    /// awaited first so two never call upstream for the same channel at once.
    fn spawn_into(&self, channel_id: &str, handle: &mut PollerHandle) {
        if !self.enabled || self.shutting_down.load(Ordering::SeqCst) {
            return;
        }

        let poller = ChatPoller::new(
            channel_id,
            Arc::clone(&self.client),
            Arc::clone(&self.messages),
            self.bus.clone(),
            self.settings.clone(),
        );
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let previous = handle.task.take();

        handle.status = poller.status();
        handle.cancel = cancel;
        handle.task = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            poller.run(token).await;
        }));
        info!(channel_id, "started chat poller");
    }

    fn release_if_unused(&self, channel_id: &str, handle: &mut PollerHandle) {
        if handle.leases == 0 && !handle.pinned && handle.is_running() {
            handle.cancel.cancel();
            info!(channel_id, "stopping chat poller; no subscribers left");
        }
    }
}

/// Owns at most one running poller per channel.
///
/// Pollers run while at least one [`RelayLease`] is held or the channel was
/// started explicitly with [`RelayManager::start`].
#[derive(Clone)]
pub struct RelayManager {
    inner: Arc<ManagerInner>,
}

impl RelayManager {
    pub fn new(
        client: Arc<MeteredClient>,
        messages: Arc<MessageStore>,
        bus: EventBus,
        settings: PollerSettings,
        channels: Vec<String>,
        enabled: bool,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                client,
                messages,
                bus,
                settings,
                channels,
                enabled,
                shutting_down: AtomicBool::new(false),
                pollers: DashMap::new(),
            }),
        }
    }

    pub fn channels(&self) -> &[String] {
        &self.inner.channels
    }

    pub fn settings(&self) -> &PollerSettings {
        &self.inner.settings
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    pub fn default_channel(&self) -> Option<&str> {
        self.inner.channels.first().map(String::as_str)
    }

    pub fn is_configured(&self, channel_id: &str) -> bool {
        self.inner.channels.iter().any(|c| c == channel_id)
    }

    /// Keeps the channel's poller running until the lease is dropped.
    pub fn acquire(&self, channel_id: &str) -> RelayLease {
        let mut handle = self
            .inner
            .pollers
            .entry(channel_id.to_string())
            .or_insert_with(|| PollerHandle::stopped(channel_id));
        if !handle.is_running() {
            self.inner.spawn_into(channel_id, &mut handle);
        }
        handle.leases += 1;
        debug!(channel_id, leases = handle.leases, "relay lease acquired");

        RelayLease {
            inner: Arc::clone(&self.inner),
            channel_id: channel_id.to_string(),
        }
    }

    /// Runs the channel's poller regardless of subscribers.
    pub fn start(&self, channel_id: &str) {
        let mut handle = self
            .inner
            .pollers
            .entry(channel_id.to_string())
            .or_insert_with(|| PollerHandle::stopped(channel_id));
        handle.pinned = true;
        if !handle.is_running() {
            self.inner.spawn_into(channel_id, &mut handle);
        }
    }

    /// Undoes [`start`](Self::start). Subscribers still holding leases keep the poller alive.
    pub fn stop(&self, channel_id: &str) {
        if let Some(mut handle) = self.inner.pollers.get_mut(channel_id) {
            handle.pinned = false;
            self.inner.release_if_unused(channel_id, &mut handle);
        }
    }

    pub fn status(&self, channel_id: &str) -> PollerStatus {
        self.inner
            .pollers
            .get(channel_id)
            .map(|handle| handle.status.borrow().clone())
            .unwrap_or_else(|| PollerStatus::idle(channel_id))
    }

    /// Configured channels first, then any other channel with a poller.
    pub fn statuses(&self) -> Vec<PollerStatus> {
        let mut statuses: Vec<PollerStatus> = self
            .inner
            .channels
            .iter()
            .map(|channel_id| self.status(channel_id))
            .collect();
        for entry in self.inner.pollers.iter() {
            if !self.is_configured(entry.key()) {
                statuses.push(entry.status.borrow().clone());
            }
        }
        statuses
    }

    pub fn is_running(&self, channel_id: &str) -> bool {
        self.inner
            .pollers
            .get(channel_id)
            .is_some_and(|handle| handle.is_running() && handle.task.is_some())
    }

    /// Cancels every poller and waits for in-flight calls to finish.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);

        let tasks: Vec<JoinHandle<()>> = self
            .inner
            .pollers
            .iter_mut()
            .filter_map(|mut handle| {
                handle.cancel.cancel();
                handle.task.take()
            })
            .collect();

        let count = tasks.len();
        for task in tasks {
            let _ = task.await;
        }
        info!(count, "chat pollers stopped");
    }
}

/// Subscriber's hold on a channel's poller.
pub struct RelayLease {
    inner: Arc<ManagerInner>,
    channel_id: String,
}

impl RelayLease {
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }
}

impl Drop for RelayLease {
    fn drop(&mut self) {
        if let Some(mut handle) = self.inner.pollers.get_mut(&self.channel_id) {
            handle.leases = handle.leases.saturating_sub(1);
            debug!(channel_id = %self.channel_id, leases = handle.leases, "relay lease released");
            self.inner.release_if_unused(&self.channel_id, &mut handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::PollerState;
    use crate::testing::{Harness, ScriptedUpstream};
    use std::time::Duration;
    use tokio::time::sleep;

    fn manager(h: &Harness, enabled: bool) -> RelayManager {
        RelayManager::new(
            Arc::clone(&h.client),
            Arc::clone(&h.messages),
            h.bus.clone(),
            PollerSettings::default(),
            vec!["UC1".to_string()],
            enabled,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_subscribers_share_one_poller() {
        let h = Harness::new(ScriptedUpstream::live());
        let manager = manager(&h, true);

        let first = manager.acquire("UC1");
        let second = manager.acquire("UC1");
        sleep(Duration::from_millis(100)).await;
        assert_eq!(h.upstream.discovery_calls(), 1);
        assert_eq!(h.upstream.chat_calls(), 1);

        drop(first);
        assert!(manager.is_running("UC1"));
        drop(second);
        assert!(!manager.is_running("UC1"));

        sleep(Duration::from_millis(100)).await;
        assert_eq!(manager.status("UC1").state, PollerState::Stopped);

        sleep(Duration::from_secs(60)).await;
        assert_eq!(h.upstream.chat_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribing_restarts_the_poller() {
        let h = Harness::new(ScriptedUpstream::live());
        let manager = manager(&h, true);

        drop(manager.acquire("UC1"));
        let _lease = manager.acquire("UC1");
        sleep(Duration::from_millis(100)).await;

        assert!(manager.is_running("UC1"));
        assert_eq!(manager.status("UC1").state, PollerState::Streaming);
    }

    #[tokio::test(start_paused = true)]
    async fn pinned_channel_outlives_its_subscribers() {
        let h = Harness::new(ScriptedUpstream::live());
        let manager = manager(&h, true);

        manager.start("UC1");
        drop(manager.acquire("UC1"));
        assert!(manager.is_running("UC1"));

        manager.stop("UC1");
        assert!(!manager.is_running("UC1"));
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_monitoring_never_polls() {
        let h = Harness::new(ScriptedUpstream::live());
        let manager = manager(&h, false);

        let _lease = manager.acquire("UC1");
        sleep(Duration::from_secs(30)).await;

        assert_eq!(h.upstream.discovery_calls(), 0);
        let statuses = manager.statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].state, PollerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_everything() {
        let h = Harness::new(ScriptedUpstream::live());
        let manager = manager(&h, true);
        manager.start("UC1");
        let _lease = manager.acquire("UC2");
        sleep(Duration::from_millis(100)).await;

        manager.shutdown().await;
        assert!(!manager.is_running("UC1"));
        assert!(!manager.is_running("UC2"));
        assert_eq!(manager.statuses().len(), 2);

        manager.start("UC1");
        assert!(!manager.is_running("UC1"));
    }
}
