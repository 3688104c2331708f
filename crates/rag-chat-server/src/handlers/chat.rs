use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use super::exchange_events;
use crate::models::chat::*;
use crate::services::conversation::{AnswerMode, ConversationManager};
use crate::state::AppState;
use crate::utils::error::ApiError;

pub async fn chat_handler(
    State(manager): State<Arc<ConversationManager>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let start_time = Instant::now();
    let message = request.message.unwrap_or_default();

    let result = manager
        .answer(request.session_id, &message, AnswerMode::Buffered)
        .await?;

    info!(
        "Chat completed: session={}, fallback={}, {}ms",
        result.session_id,
        result.fallback_used(),
        start_time.elapsed().as_millis()
    );

    Ok(Json(ChatResponse {
        sources: result.sources.iter().map(SourceInfo::from).collect(),
        fallback_used: result.fallback_used(),
        fallback_reason: result.fallback_reason.as_ref().map(ToString::to_string),
        answer: result.answer,
        session_id: result.session_id,
    }))
}

pub async fn chat_stream_handler(
    State(manager): State<Arc<ConversationManager>>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let message = request.message.unwrap_or_default();
    let stream = manager.answer_stream(request.session_id, &message)?;

    info!(
        "Chat stream started: session={}, message_len={}",
        stream.session_id,
        message.len()
    );

    Ok(Sse::new(exchange_events(stream.session_id, stream.events)).keep_alive(KeepAlive::default()))
}

pub async fn reset_handler(
    State(manager): State<Arc<ConversationManager>>,
    Json(request): Json<ResetRequest>,
) -> Json<ResetResponse> {
    manager.reset(&request.session_id).await;
    info!("Session {} reset", request.session_id);

    Json(ResetResponse {
        message: format!("Conversation {} has been reset", request.session_id),
    })
}

pub async fn history_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<HistoryResponse> {
    let turns = state.conversation_manager.history(&session_id);
    let started_at = state.session_cache.peek(&session_id).map(|s| s.created_at);

    Json(HistoryResponse {
        session_id,
        started_at,
        turns,
    })
}
