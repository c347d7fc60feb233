//! Server-sent event streams over the event bus.
//!
//! Each stream opens with a `: connected` comment, then carries one JSON
//! `data:` frame per event, with `: heartbeat` comments while idle.

use std::convert::Infallible;
use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::{self, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::{RelayEvent, Topic};

use super::handlers::{resolve_channel, ApiError};
use super::types::ChannelQuery;
use super::ApiState;

pub async fn activity_stream(
    State(state): State<Arc<ApiState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let connection_id = Uuid::new_v4();
    debug!(%connection_id, "activity stream subscriber connected");

    let events = state.bus.stream(Topic::Activity);
    event_stream(events, state.heartbeat_interval, state.shutdown.clone())
}

/// Chat events for one channel. The subscription holds a relay lease, so the
/// channel is polled for as long as at least one client stays connected.
pub async fn messages_stream(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ChannelQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let channel_id = resolve_channel(&state, query.channel_id)?;
    let connection_id = Uuid::new_v4();
    debug!(%connection_id, %channel_id, "chat stream subscriber connected");

    let live = state.bus.stream(Topic::Chat);
    let lease = state.relay.acquire(&channel_id);
    let current = RelayEvent::Status(state.relay.status(&channel_id));

    let events = stream::once(ready(current)).chain(
        live.filter(move |event| ready(event.channel_id() == Some(lease.channel_id()))),
    );
    Ok(event_stream(
        events,
        state.heartbeat_interval,
        state.shutdown.clone(),
    ))
}

fn event_stream<S>(
    events: S,
    heartbeat: Duration,
    shutdown: CancellationToken,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = RelayEvent> + Send + 'static,
{
    let connected = stream::once(ready(Ok::<_, Infallible>(
        Event::default().comment("connected"),
    )));
    let frames = events.filter_map(|event| ready(to_frame(&event).map(Ok::<_, Infallible>)));
    let frames = connected
        .chain(frames)
        .take_until(async move { shutdown.cancelled().await });

    Sse::new(frames).keep_alive(
        KeepAlive::new()
            .interval(heartbeat)
            .text("heartbeat"),
    )
}

fn to_frame(event: &RelayEvent) -> Option<Event> {
    match Event::default().json_data(event) {
        Ok(frame) => Some(frame),
        Err(err) => {
            warn!(error = %err, "failed to encode event for stream");
            None
        }
    }
}
