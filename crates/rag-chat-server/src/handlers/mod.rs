pub mod book;
pub mod chat;
pub mod content;
pub mod health;
pub mod search;

use axum::response::sse::Event;
use futures::stream::Stream;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tracing::warn;

use crate::models::chat::ChatStreamEvent;

// Helper: Create SSE event
pub(crate) fn create_sse_event<T: serde::Serialize>(event_type: &str, data: &T) -> Event {
    Event::default()
        .event(event_type)
        .data(serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string()))
}

/// SSE frames for an exchange in flight. A channel that closes before
/// `done` ends with a terminal error frame.
pub(crate) fn exchange_events(
    session_id: String,
    mut events: mpsc::Receiver<ChatStreamEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let mut finished = false;

        while let Some(event) = events.recv().await {
            finished = matches!(event, ChatStreamEvent::Done { .. });
            yield Ok(create_sse_event(event.name(), &event));
        }

        if !finished {
            warn!("Session {} stream closed before completion", session_id);
            let aborted = ChatStreamEvent::Error {
                code: "stream_aborted".to_string(),
                message: "The answer stream ended unexpectedly.".to_string(),
                terminal: true,
            };
            yield Ok(create_sse_event(aborted.name(), &aborted));
        }
    }
}
