use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::Stream;
use serde::Serialize;
use std::convert::Infallible;
use tracing::info;

use super::{create_sse_event, exchange_events};
use crate::models::content::*;
use crate::services::conversation::Turn;
use crate::services::content::feedback_message;
use crate::state::AppState;
use crate::utils::error::ApiError;

#[derive(Serialize)]
struct QuestionEvent<'a> {
    index: usize,
    #[serde(flatten)]
    question: &'a QuizQuestion,
}

#[derive(Serialize)]
struct QuizDone {
    topic: String,
    total: usize,
}

fn session_history(state: &AppState, session_id: Option<&str>) -> Vec<Turn> {
    session_id
        .filter(|id| !id.trim().is_empty())
        .map(|id| state.conversation_manager.history(id))
        .unwrap_or_default()
}

pub async fn suggestions_handler(
    State(state): State<AppState>,
) -> Result<Json<SuggestionsResponse>, ApiError> {
    let suggested_questions = state.content_service.suggest_questions().await?;
    Ok(Json(SuggestionsResponse { suggested_questions }))
}

pub async fn follow_ups_handler(
    State(state): State<AppState>,
    Json(request): Json<FollowUpRequest>,
) -> Result<Json<FollowUpResponse>, ApiError> {
    let history = state.conversation_manager.history(&request.session_id);
    let questions = state.content_service.follow_up_questions(&history).await?;

    Ok(Json(FollowUpResponse {
        session_id: request.session_id,
        questions,
    }))
}

/// Generates the whole quiz, then streams one `question` event per item.
pub async fn quiz_start_handler(
    State(state): State<AppState>,
    Json(request): Json<QuizRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let history = session_history(&state, request.session_id.as_deref());
    let questions = state
        .content_service
        .generate_quiz(&request, &history)
        .await?;
    let topic = request.topic;

    let stream = async_stream::stream! {
        for (index, question) in questions.iter().enumerate() {
            yield Ok(create_sse_event("question", &QuestionEvent { index, question }));
        }
        yield Ok(create_sse_event("done", &QuizDone { topic, total: questions.len() }));
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Quiz feedback is an ordinary exchange on the learner's session.
pub async fn quiz_feedback_stream_handler(
    State(state): State<AppState>,
    Json(request): Json<QuizFeedbackRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let message = feedback_message(&request)
        .ok_or_else(|| ApiError::BadRequest("no incorrect answers or prompt given".to_string()))?;

    let stream = state
        .conversation_manager
        .clone()
        .answer_stream(request.session_id, &message)?;

    info!("Quiz feedback stream started: session={}", stream.session_id);
    Ok(Sse::new(exchange_events(stream.session_id, stream.events)).keep_alive(KeepAlive::default()))
}

pub async fn mind_map_handler(
    State(state): State<AppState>,
    Json(request): Json<TopicRequest>,
) -> Result<Json<MindMapResponse>, ApiError> {
    let history = session_history(&state, request.session_id.as_deref());
    let nodes = state
        .content_service
        .generate_mind_map(&request.topic, &history)
        .await?;

    Ok(Json(MindMapResponse {
        topic: request.topic,
        nodes,
    }))
}

pub async fn diagram_handler(
    State(state): State<AppState>,
    Json(request): Json<TopicRequest>,
) -> Result<Json<DiagramResponse>, ApiError> {
    let history = session_history(&state, request.session_id.as_deref());
    let mermaid = state
        .content_service
        .generate_diagram(&request.topic, &history)
        .await?;

    Ok(Json(DiagramResponse {
        topic: request.topic,
        mermaid,
    }))
}
