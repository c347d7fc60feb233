pub mod client;
pub mod error;
pub mod metered;
pub mod types;

pub use client::{ChatUpstream, YouTubeClient, DEFAULT_API_BASE_URL};
pub use error::UpstreamError;
pub use metered::{CallError, MeteredClient, SessionLookup, RECENT_UPLOADS_SCANNED};
pub use types::{ChannelStats, ChatMessage, ChatSession, MessagePage, SearchHit, VideoDetails};
