use serde::{Deserialize, Serialize};

use super::chat::SessionId;

#[derive(Debug, Serialize)]
pub struct BookUploadResponse {
    pub session_id: SessionId,
    pub embedding_done: bool,
    pub message: String,
    pub title: String,
    pub pages: Option<usize>,
    pub chunks: usize,
    pub suggested_questions: Vec<String>,
}

/// A question about the session's uploaded book.
#[derive(Debug, Deserialize)]
pub struct BookMessageRequest {
    pub session_id: SessionId,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BookResetResponse {
    pub message: String,
    pub book_removed: bool,
}
