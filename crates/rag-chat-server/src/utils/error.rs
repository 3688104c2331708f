use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failures of the Document Index. Recovered by the orchestrator as a fallback trigger.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetrievalError {
    #[error("document index unavailable: {0}")]
    Unavailable(String),

    #[error("document index timed out")]
    Timeout,

    #[error("document collection '{0}' is empty or missing")]
    EmptyCollection(String),

    #[error("no relevant fragments found")]
    NoResults,

    #[error("query embedding failed: {0}")]
    Embedding(String),
}

/// Failures of a language model call, before the first token or mid-stream.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Request(String),

    #[error("model returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model stream interrupted: {0}")]
    Stream(String),

    #[error("model response malformed: {0}")]
    Malformed(String),

    #[error("model returned no choices")]
    Empty,
}

/// Structured output that could not be parsed. Keeps the offending text.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    pub raw: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            raw: raw.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("LLM error: {0}")]
    LlmError(#[from] ModelError),

    #[error("Retrieval error: {0}")]
    RetrievalError(#[from] RetrievalError),

    #[error("Parse error: {0}")]
    ParseError(#[from] ParseError),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message, raw) = match self {
            ApiError::BadRequest(msg) => {
                tracing::warn!("Bad request: {}", msg);
                (StatusCode::BAD_REQUEST, "BadRequest", msg, None)
            }
            ApiError::NotFound(msg) => {
                tracing::warn!("Not found: {}", msg);
                (StatusCode::NOT_FOUND, "NotFound", msg, None)
            }
            ApiError::Unavailable(msg) => {
                tracing::warn!("Service unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "Unavailable", msg, None)
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalError", msg, None)
            }
            ApiError::LlmError(e) => {
                tracing::error!("LLM error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "LlmError", e.to_string(), None)
            }
            ApiError::RetrievalError(e) => {
                tracing::error!("Retrieval error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "RetrievalError", e.to_string(), None)
            }
            ApiError::ParseError(e) => {
                tracing::error!("Parse error: {} (raw: {} chars)", e.message, e.raw.len());
                (StatusCode::BAD_GATEWAY, "ParseError", e.message, Some(e.raw))
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
            raw,
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = vec![
            (ApiError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ApiError::from(ModelError::Empty), StatusCode::SERVICE_UNAVAILABLE),
            (ApiError::from(RetrievalError::Timeout), StatusCode::SERVICE_UNAVAILABLE),
            (
                ApiError::from(ParseError::new("bad json", "{oops")),
                StatusCode::BAD_GATEWAY,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
