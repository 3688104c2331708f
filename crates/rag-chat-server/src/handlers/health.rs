use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::services::conversation::{CacheStats, ConversationCache, SessionStore};

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    status: String,
    accepting_new_sessions: bool,
    sessions: CacheStats,
}

pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// Reports 503 while the memory guard refuses new sessions.
pub async fn readiness_check(
    State(cache): State<Arc<ConversationCache>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let accepting = cache.can_create_new_session();
    let status = if accepting {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            status: if accepting { "ready" } else { "degraded" }.to_string(),
            accepting_new_sessions: accepting,
            sessions: cache.stats(),
        }),
    )
}
