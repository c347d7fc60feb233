//! Scripted upstream and wiring shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::events::EventBus;
use crate::ledger::{QuotaDay, UsageLedger, UsageLogEntry};
use crate::quota::{CostTable, EndpointCategory, QuotaGovernor, QuotaPolicy};
use crate::storage::{MessageStore, UsageLogStore};
use crate::upstream::{
    ChannelStats, ChatMessage, ChatUpstream, MessagePage, MeteredClient, SearchHit, UpstreamError,
    VideoDetails,
};

pub(crate) const LIVE_CHAT_ID: &str = "chat-1";
pub(crate) const VIDEO_ID: &str = "video-1";

/// Upstream whose chat pages are popped from a queue. An exhausted queue
/// yields empty pages.
pub(crate) struct ScriptedUpstream {
    pub live: Mutex<bool>,
    pub pages: Mutex<VecDeque<Result<MessagePage, UpstreamError>>>,
    pub discovery_calls: AtomicUsize,
    pub chat_calls: AtomicUsize,
}

impl ScriptedUpstream {
    pub fn live() -> Self {
        Self {
            live: Mutex::new(true),
            pages: Mutex::new(VecDeque::new()),
            discovery_calls: AtomicUsize::new(0),
            chat_calls: AtomicUsize::new(0),
        }
    }

    pub fn offline() -> Self {
        let upstream = Self::live();
        *upstream.live.lock().unwrap() = false;
        upstream
    }

    pub fn push_page(&self, page: Result<MessagePage, UpstreamError>) {
        self.pages.lock().unwrap().push_back(page);
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn discovery_calls(&self) -> usize {
        self.discovery_calls.load(Ordering::SeqCst)
    }
}

pub(crate) fn message(id: &str) -> ChatMessage {
    ChatMessage {
        message_id: id.to_string(),
        author_name: "viewer".to_string(),
        text: format!("message {id}"),
        published_at: Utc::now(),
        video_id: None,
        live_chat_id: None,
    }
}

pub(crate) fn page(ids: &[&str], suggested_ms: Option<u64>) -> MessagePage {
    MessagePage {
        messages: ids.iter().map(|id| message(id)).collect(),
        next_cursor: Some(format!("after-{}", ids.len())),
        suggested_delay: suggested_ms.map(Duration::from_millis),
    }
}

#[async_trait]
impl ChatUpstream for ScriptedUpstream {
    async fn uploads_playlist(&self, _channel_id: &str) -> Result<Option<String>, UpstreamError> {
        self.discovery_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some("uploads-1".to_string()))
    }

    async fn playlist_video_ids(
        &self,
        _playlist_id: &str,
        _max_results: u32,
    ) -> Result<Vec<String>, UpstreamError> {
        Ok(vec![VIDEO_ID.to_string()])
    }

    async fn video_details(&self, video_ids: &[String]) -> Result<Vec<VideoDetails>, UpstreamError> {
        let live = *self.live.lock().unwrap();
        Ok(video_ids
            .iter()
            .map(|id| VideoDetails {
                video_id: id.clone(),
                title: "live stream".to_string(),
                published_at: None,
                thumbnail_url: None,
                live_broadcast_content: Some(if live { "live" } else { "none" }.to_string()),
                active_live_chat_id: live.then(|| LIVE_CHAT_ID.to_string()),
            })
            .collect())
    }

    async fn search_live_video(&self, _channel_id: &str) -> Result<Option<SearchHit>, UpstreamError> {
        self.discovery_calls.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }

    async fn chat_messages(
        &self,
        _live_chat_id: &str,
        _page_token: Option<&str>,
    ) -> Result<MessagePage, UpstreamError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(MessagePage::default()))
    }

    async fn channel_statistics(&self, _channel_id: &str) -> Result<Option<ChannelStats>, UpstreamError> {
        Ok(None)
    }
}

pub(crate) struct Harness {
    pub bus: EventBus,
    pub upstream: Arc<ScriptedUpstream>,
    pub ledger: Arc<UsageLedger>,
    pub messages: Arc<MessageStore>,
    pub client: Arc<MeteredClient>,
}

impl Harness {
    pub fn new(upstream: ScriptedUpstream) -> Self {
        let bus = EventBus::new(64);
        let store = Arc::new(UsageLogStore::in_memory().unwrap());
        let (ledger, _writer) = UsageLedger::start(store, QuotaDay::default(), bus.clone());
        let governor = Arc::new(QuotaGovernor::new(
            Arc::clone(&ledger),
            CostTable::default(),
            QuotaPolicy::default(),
            bus.clone(),
        ));
        let upstream = Arc::new(upstream);
        let client = Arc::new(MeteredClient::new(
            upstream.clone(),
            governor,
            Arc::clone(&ledger),
        ));
        Self {
            bus,
            upstream,
            ledger,
            messages: Arc::new(MessageStore::in_memory().unwrap()),
            client,
        }
    }

    pub async fn spend(&self, cost: u64) {
        self.ledger.record(UsageLogEntry::success(
            EndpointCategory::Search,
            "seed",
            cost,
            Duration::from_millis(1),
        ));
        self.ledger.flush().await;
        self.client.governor().invalidate();
    }
}
