use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use tracing::{error, info, warn};

use crate::events::ActivityEvent;
use crate::overlay::OverlayRequest;
use crate::quota::QuotaError;
use crate::storage::MessageQuery;
use crate::upstream::{CallError, ChannelStats, ChatSession};

use super::types::{
    ActivityQuery, ActivityResponse, ChannelQuery, ErrorResponse, MessagesQuery, MessagesResponse,
    OverlayResponse, QuotaResponse, RelayStatusResponse, VideosQuery, VideosResponse,
};
use super::ApiState;

pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

const DEFAULT_VIDEO_RESULTS: u32 = 10;
const MAX_VIDEO_RESULTS: u32 = 50;

pub async fn health_check() -> ApiResult<serde_json::Value> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "chat-relay"
    })))
}

pub async fn get_quota(State(state): State<Arc<ApiState>>) -> ApiResult<QuotaResponse> {
    let limit = state.governor.policy().daily_limit;
    let recorded = state.ledger.snapshot(limit).map_err(internal_error)?;
    let admitted = state.governor.snapshot().used;
    Ok(Json(QuotaResponse::new(recorded, admitted)))
}

pub async fn get_activity(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ActivityQuery>,
) -> ApiResult<ActivityResponse> {
    let page = state
        .ledger
        .activity(query.since, query.limit)
        .map_err(internal_error)?;

    Ok(Json(ActivityResponse {
        entries: page.entries.iter().map(ActivityEvent::from).collect(),
        session_total: page.session_total,
    }))
}

pub async fn get_live_chat_id(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ChannelQuery>,
) -> ApiResult<ChatSession> {
    let channel_id = resolve_channel(&state, query.channel_id)?;
    let lookup = state.relay.settings().lookup;

    match state.client.find_session(&channel_id, lookup).await {
        Ok(Some(session)) => Ok(Json(session)),
        Ok(None) => Err(not_found("no_active_session", "no active live stream found")),
        Err(err) => Err(call_error(err)),
    }
}

pub async fn get_stored_messages(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<MessagesQuery>,
) -> ApiResult<MessagesResponse> {
    let messages = state
        .messages
        .list(&MessageQuery {
            limit: query.limit,
            offset: query.offset.unwrap_or(0),
            video_id: query.video_id,
            since: query.since,
        })
        .map_err(internal_error)?;
    let total = state.messages.count().map_err(internal_error)?;

    Ok(Json(MessagesResponse { messages, total }))
}

pub async fn get_relay_status(State(state): State<Arc<ApiState>>) -> ApiResult<RelayStatusResponse> {
    Ok(Json(RelayStatusResponse {
        monitoring_enabled: state.relay.is_enabled(),
        channels: state.relay.statuses(),
    }))
}

pub async fn get_videos(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<VideosQuery>,
) -> ApiResult<VideosResponse> {
    let channel_id = resolve_channel(&state, query.channel_id)?;
    let max_results = query.max_results.unwrap_or(DEFAULT_VIDEO_RESULTS);
    if max_results == 0 || max_results > MAX_VIDEO_RESULTS {
        return Err(bad_request(
            "invalid_max_results",
            "maxResults must be between 1 and 50",
        ));
    }

    let videos = state
        .client
        .recent_videos(&channel_id, max_results)
        .await
        .map_err(call_error)?;
    Ok(Json(VideosResponse { videos }))
}

pub async fn get_channel_stats(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ChannelQuery>,
) -> ApiResult<ChannelStats> {
    let channel_id = resolve_channel(&state, query.channel_id)?;

    match state.client.channel_stats(&channel_id).await {
        Ok(Some(stats)) => Ok(Json(stats)),
        Ok(None) => Err(not_found("channel_not_found", "channel not found")),
        Err(err) => Err(call_error(err)),
    }
}

pub async fn get_overlay(State(state): State<Arc<ApiState>>) -> ApiResult<OverlayResponse> {
    Ok(Json(OverlayResponse {
        overlay: state.overlay.get(),
    }))
}

pub async fn set_overlay(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<OverlayRequest>,
) -> ApiResult<OverlayResponse> {
    match state.overlay.set(request) {
        Ok(overlay) => {
            info!(id = %overlay.id, author = %overlay.author, "overlay message pinned");
            Ok(Json(OverlayResponse {
                overlay: Some(overlay),
            }))
        }
        Err(err) => Err(bad_request("invalid_overlay", &err.to_string())),
    }
}

pub async fn clear_overlay(State(state): State<Arc<ApiState>>) -> ApiResult<OverlayResponse> {
    state.overlay.clear();
    Ok(Json(OverlayResponse { overlay: None }))
}

/// Absent means the first configured channel. Unconfigured channels are
/// refused so callers cannot spend quota on arbitrary channels.
pub(crate) fn resolve_channel(state: &ApiState, requested: Option<String>) -> Result<String, ApiError> {
    match requested.filter(|id| !id.trim().is_empty()) {
        Some(channel_id) if state.relay.is_configured(&channel_id) => Ok(channel_id),
        Some(channel_id) => Err(bad_request(
            "unknown_channel",
            &format!("channel {channel_id} is not configured"),
        )),
        None => state
            .relay
            .default_channel()
            .map(str::to_string)
            .ok_or_else(|| bad_request("missing_channel", "channelId is required")),
    }
}

fn call_error(err: CallError) -> ApiError {
    match err {
        CallError::Quota(err) => {
            let QuotaError::QuotaExceeded {
                category,
                used,
                limit,
            } = err;
            warn!(%category, used, limit, "request refused by quota governor");
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ErrorResponse {
                    error: err.to_string(),
                    code: "quota_exceeded".to_string(),
                    details: Some(json!({
                        "endpoint": category,
                        "used": used,
                        "limit": limit,
                    })),
                }),
            )
        }
        CallError::Upstream(err) if err.is_quota_exhausted() => {
            warn!(error = %err, "upstream daily quota exhausted");
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ErrorResponse {
                    error: "upstream daily quota exhausted".to_string(),
                    code: "quota_exceeded".to_string(),
                    details: Some(json!({ "source": "upstream", "message": err.to_string() })),
                }),
            )
        }
        CallError::Upstream(err) => {
            warn!(error = %err, "upstream call failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: "upstream request failed".to_string(),
                    code: "upstream_error".to_string(),
                    details: Some(json!({ "message": err.to_string() })),
                }),
            )
        }
    }
}

fn bad_request(code: &str, message: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_string(),
            code: code.to_string(),
            details: None,
        }),
    )
}

fn not_found(code: &str, message: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: message.to_string(),
            code: code.to_string(),
            details: None,
        }),
    )
}

fn internal_error<E: std::fmt::Display>(err: E) -> ApiError {
    error!(error = %err, "relay API internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "internal server error".to_string(),
            code: "storage".to_string(),
            details: Some(json!({ "message": err.to_string() })),
        }),
    )
}
