use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.settings.server.body_limit_bytes;
    let upload_limit = state.settings.book.max_upload_bytes;

    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check));

    let chat_routes = Router::new()
        .route("/api/chat", post(handlers::chat::chat_handler))
        .route("/api/chat/stream", post(handlers::chat::chat_stream_handler))
        .route("/api/chat/reset", post(handlers::chat::reset_handler))
        .route(
            "/api/chat/history/{session_id}",
            get(handlers::chat::history_handler),
        )
        .route("/api/search", post(handlers::search::search_handler));

    let content_routes = Router::new()
        .route("/api/suggestions", get(handlers::content::suggestions_handler))
        .route("/api/follow-ups", post(handlers::content::follow_ups_handler))
        .route("/api/quiz/start", post(handlers::content::quiz_start_handler))
        .route(
            "/api/quiz/feedback/stream",
            post(handlers::content::quiz_feedback_stream_handler),
        )
        .route("/api/mindmap", post(handlers::content::mind_map_handler))
        .route("/api/diagram", post(handlers::content::diagram_handler));

    let book_routes = Router::new()
        .route(
            "/api/books/upload",
            post(handlers::book::upload_handler).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/books/message", post(handlers::book::message_handler))
        .route("/api/books/reset", post(handlers::book::reset_handler));

    Router::new()
        .merge(public_routes)
        .merge(chat_routes)
        .merge(content_routes)
        .merge(book_routes)
        .with_state(state)
        .layer(CatchPanicLayer::new())
        // CORS
        .layer(CorsLayer::permissive())
        // Tracing
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(DefaultBodyLimit::max(body_limit))
}
