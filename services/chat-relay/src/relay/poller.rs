use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{ChatBatchEvent, EventBus, RelayErrorEvent, RelayErrorKind, RelayEvent, Topic};
use crate::storage::MessageStore;
use crate::upstream::{CallError, ChatMessage, ChatSession, MeteredClient, SessionLookup};

use super::backoff::Backoff;
use super::state::{PollerState, PollerStatus};

pub const DEFAULT_POLL_FLOOR: Duration = Duration::from_millis(5_000);
pub const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_millis(5_000);
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_millis(30_000);

#[derive(Debug, Clone)]
pub struct PollerSettings {
    /// Lower bound on the delay between page fetches, whatever the upstream suggests.
    pub poll_floor: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub lookup: SessionLookup,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            poll_floor: DEFAULT_POLL_FLOOR,
            backoff_initial: DEFAULT_BACKOFF_INITIAL,
            backoff_max: DEFAULT_BACKOFF_MAX,
            lookup: SessionLookup::default(),
        }
    }
}

impl PollerSettings {
    pub fn next_poll_delay(&self, suggested: Option<Duration>) -> Duration {
        suggested.unwrap_or(self.poll_floor).max(self.poll_floor)
    }
}

/// Discovers the live chat of one channel and relays its messages until cancelled.
///
/// Each iteration schedules its own wake-up after the previous call returned,
/// so fetches for a session never overlap.
pub struct ChatPoller {
    channel_id: String,
    client: Arc<MeteredClient>,
    messages: Arc<MessageStore>,
    bus: EventBus,
    settings: PollerSettings,
    status: watch::Sender<PollerStatus>,
}

impl ChatPoller {
    pub fn new(
        channel_id: impl Into<String>,
        client: Arc<MeteredClient>,
        messages: Arc<MessageStore>,
        bus: EventBus,
        settings: PollerSettings,
    ) -> Self {
        let channel_id = channel_id.into();
        let (status, _) = watch::channel(PollerStatus::idle(channel_id.clone()));
        Self {
            channel_id,
            client,
            messages,
            bus,
            settings,
            status,
        }
    }

    pub fn status(&self) -> watch::Receiver<PollerStatus> {
        self.status.subscribe()
    }

    /// Runs until `cancel` fires. A metered call already in flight is allowed
    /// to finish so its cost is recorded; only waits are interrupted.
    pub async fn run(self, cancel: CancellationToken) {
        info!(channel_id = %self.channel_id, lookup = %self.settings.lookup, "chat poller started");
        let mut backoff = Backoff::new(self.settings.backoff_initial, self.settings.backoff_max);

        'discover: while !cancel.is_cancelled() {
            self.transition(PollerState::Discovering, None, None, None);

            let session = match self
                .client
                .find_session(&self.channel_id, self.settings.lookup)
                .await
            {
                Ok(Some(session)) => {
                    backoff.reset();
                    session
                }
                Ok(None) => {
                    let delay = backoff.next_delay();
                    debug!(channel_id = %self.channel_id, delay_ms = delay.as_millis() as u64, "no active chat session");
                    self.publish_error(
                        RelayErrorKind::NoActiveSession,
                        "no active live stream on channel".to_string(),
                    );
                    self.transition(PollerState::Discovering, None, None, Some(delay));
                    if !pause(delay, &cancel).await {
                        break;
                    }
                    continue;
                }
                Err(err) => {
                    let delay = backoff.next_delay();
                    warn!(channel_id = %self.channel_id, error = %err, delay_ms = delay.as_millis() as u64, "session discovery failed");
                    self.publish_error(error_kind(&err), err.to_string());
                    self.transition(PollerState::Discovering, None, Some(err.to_string()), Some(delay));
                    if !pause(delay, &cancel).await {
                        break;
                    }
                    continue;
                }
            };

            info!(
                channel_id = %self.channel_id,
                live_chat_id = %session.session_id,
                video_id = %session.content_id,
                "streaming live chat"
            );
            let mut cursor: Option<String> = None;

            while !cancel.is_cancelled() {
                match self.client.fetch_messages(&session, cursor.as_deref()).await {
                    Ok(page) => {
                        backoff.reset();
                        self.relay(&session, page.messages);
                        if let Some(next) = page.next_cursor {
                            cursor = Some(next);
                        }

                        let delay = self.settings.next_poll_delay(page.suggested_delay);
                        self.transition(PollerState::Streaming, Some(&session), None, Some(delay));
                        if !pause(delay, &cancel).await {
                            break 'discover;
                        }
                    }
                    Err(err) => {
                        let delay = backoff.next_delay();
                        warn!(
                            channel_id = %self.channel_id,
                            live_chat_id = %session.session_id,
                            error = %err,
                            delay_ms = delay.as_millis() as u64,
                            "chat fetch failed; rediscovering after backoff"
                        );
                        self.publish_error(error_kind(&err), err.to_string());
                        self.transition(PollerState::Error, None, Some(err.to_string()), Some(delay));
                        if !pause(delay, &cancel).await {
                            break 'discover;
                        }
                        continue 'discover;
                    }
                }
            }
        }

        self.transition(PollerState::Stopped, None, None, None);
        info!(channel_id = %self.channel_id, "chat poller stopped");
    }

    /// Persists the page and publishes what was not seen before. When storage
    /// is unavailable the whole page is published.
    fn relay(&self, session: &ChatSession, messages: Vec<ChatMessage>) {
        if messages.is_empty() {
            return;
        }

        let fresh = match self.messages.save_messages(&messages) {
            Ok(inserted) => inserted,
            Err(err) => {
                warn!(channel_id = %self.channel_id, error = %err, count = messages.len(), "failed to persist chat messages");
                messages
            }
        };
        if fresh.is_empty() {
            return;
        }

        debug!(channel_id = %self.channel_id, count = fresh.len(), "relaying chat messages");
        self.bus.publish(
            Topic::Chat,
            RelayEvent::Messages(ChatBatchEvent {
                channel_id: self.channel_id.clone(),
                live_chat_id: session.session_id.clone(),
                video_id: session.content_id.clone(),
                messages: fresh,
            }),
        );
    }

    fn publish_error(&self, kind: RelayErrorKind, error: String) {
        self.bus.publish(
            Topic::Chat,
            RelayEvent::Error(RelayErrorEvent {
                channel_id: self.channel_id.clone(),
                kind,
                error,
            }),
        );
    }

    fn transition(
        &self,
        state: PollerState,
        session: Option<&ChatSession>,
        last_error: Option<String>,
        next_delay: Option<Duration>,
    ) {
        let status = PollerStatus {
            channel_id: self.channel_id.clone(),
            state,
            session: session.cloned(),
            last_error,
            next_delay_ms: next_delay.map(|d| d.as_millis() as u64),
            updated_at: Utc::now(),
        };
        self.status.send_replace(status.clone());
        self.bus.publish(Topic::Chat, RelayEvent::Status(status));
    }
}

/// Budget refusals, local or upstream, are reported apart from other failures.
fn error_kind(err: &CallError) -> RelayErrorKind {
    if err.is_quota_exceeded() {
        RelayErrorKind::QuotaExceeded
    } else {
        RelayErrorKind::Upstream
    }
}

/// Returns false when cancelled before the delay elapsed.
async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
