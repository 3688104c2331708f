use axum::{extract::State, Json};
use tracing::info;

use crate::models::chat::{SearchRequest, SearchResponse};
use crate::state::AppState;
use crate::utils::error::ApiError;

const MAX_SEARCH_RESULTS: usize = 50;

/// Direct vector search over the training material, without a model call.
pub async fn search_handler(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let query = request.query.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }

    let k = request
        .k
        .unwrap_or(state.settings.rag.retrieval_top_k)
        .clamp(1, MAX_SEARCH_RESULTS);

    let mut results = state.document_index.search(query, k).await?;
    results.sort_by(|a, b| b.score.total_cmp(&a.score));

    info!("Search '{}' returned {} fragments", query, results.len());
    Ok(Json(SearchResponse { results }))
}
