//! Server-sent event stream of bus events.
//!
//! Each connection gets its own bus listener. The listener unsubscribes
//! itself when the response stream is dropped on disconnect.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event as SseEvent, Sse};
use futures::{Stream, StreamExt};
use tracing::{info, warn};

use crate::api::AppState;
use crate::events::{Event, Listener};

/// GET /api/events
pub async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let listener = state.bus.subscribe();
    info!(
        listener_id = listener.id(),
        listeners = state.bus.listener_count(),
        "Live-update client connected"
    );
    let closed = state.shutdown.clone().cancelled_owned();
    Sse::new(into_sse(listener).take_until(closed))
}

fn into_sse(listener: Listener) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    listener.filter_map(|event| async move { to_sse_event(&event).map(Ok) })
}

/// Render a bus event as an SSE frame named after its type. Events that
/// fail to serialize are dropped.
fn to_sse_event(event: &Event) -> Option<SseEvent> {
    match serde_json::to_string(event) {
        Ok(data) => Some(SseEvent::default().event(event.kind.as_str()).data(data)),
        Err(e) => {
            warn!(event_type = %event.kind.as_str(), error = %e, "Dropping unserializable event");
            None
        }
    }
}
