use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use super::{handlers, sse};
use super::ApiState;

/// Bounds the time to produce response headers. Event streams are unaffected
/// once their headers are sent.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn create_router(state: Arc<ApiState>) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/quota", get(handlers::get_quota))
        .route("/api/quota/activity", get(handlers::get_activity))
        .route("/api/quota/activity/stream", get(sse::activity_stream))
        .route("/api/live-chat-id", get(handlers::get_live_chat_id))
        .route("/api/messages/stream", get(sse::messages_stream))
        .route("/api/messages/db", get(handlers::get_stored_messages))
        .route("/api/relay/status", get(handlers::get_relay_status))
        .route("/api/videos", get(handlers::get_videos))
        .route("/api/channel-stats", get(handlers::get_channel_stats))
        .route(
            "/api/overlay",
            get(handlers::get_overlay)
                .post(handlers::set_overlay)
                .delete(handlers::clear_overlay),
        )
        .with_state(state)
        .layer(middleware)
}
