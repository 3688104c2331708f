use axum::{
    extract::{Multipart, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use super::exchange_events;
use crate::models::book::{BookMessageRequest, BookResetResponse, BookUploadResponse};
use crate::models::chat::ResetRequest;
use crate::services::book::BookService;
use crate::utils::error::ApiError;

/// Multipart upload with a `file` part and an optional `session_id` part.
pub async fn upload_handler(
    State(books): State<Arc<BookService>>,
    mut multipart: Multipart,
) -> Result<Json<BookUploadResponse>, ApiError> {
    let start_time = Instant::now();
    let mut session_id: Option<String> = None;
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read field: {}", e)))?
    {
        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "session_id" => {
                session_id = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::BadRequest(format!("Invalid session_id: {}", e)))?,
                );
            }
            "file" => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::BadRequest("file name required".to_string()))?;
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read file: {}", e)))?;
                file = Some((file_name, data.to_vec()));
            }
            _ => {}
        }
    }

    let (file_name, data) = file.ok_or_else(|| ApiError::BadRequest("file required".to_string()))?;
    info!("Book upload received: {} ({} bytes)", file_name, data.len());

    let upload = books.load(session_id, &file_name, &data).await?;

    info!(
        "Book ready: session={}, {} chunks, {}ms",
        upload.session_id,
        upload.chunks,
        start_time.elapsed().as_millis()
    );

    Ok(Json(BookUploadResponse {
        session_id: upload.session_id,
        embedding_done: true,
        message: "Embedding completed successfully.".to_string(),
        title: upload.title,
        pages: upload.pages,
        chunks: upload.chunks,
        suggested_questions: upload.suggested_questions,
    }))
}

pub async fn message_handler(
    State(books): State<Arc<BookService>>,
    Json(request): Json<BookMessageRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let manager = books.manager(&request.session_id)?;
    let message = request.message.unwrap_or_default();
    let stream = manager.answer_stream(Some(request.session_id), &message)?;

    info!("Book chat stream started: session={}", stream.session_id);

    Ok(Sse::new(exchange_events(stream.session_id, stream.events)).keep_alive(KeepAlive::default()))
}

pub async fn reset_handler(
    State(books): State<Arc<BookService>>,
    Json(request): Json<ResetRequest>,
) -> Json<BookResetResponse> {
    let book_removed = books.reset(&request.session_id).await;
    info!("Book session {} reset (book removed: {})", request.session_id, book_removed);

    Json(BookResetResponse {
        message: "Session reset.".to_string(),
        book_removed,
    })
}
