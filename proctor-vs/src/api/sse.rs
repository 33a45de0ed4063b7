//! Server-Sent Events stream of pipeline events

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

use crate::AppState;

/// GET /events
///
/// Streams AlertAccepted, AlertVerified, HeartbeatReceived, SessionSealed,
/// SessionClosed and SessionCloseFailed.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    proctor_common::sse::create_event_sse_stream(state.pipeline.events(), "proctor-vs")
}
