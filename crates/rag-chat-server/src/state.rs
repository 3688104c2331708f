use axum::extract::FromRef;
use std::sync::Arc;

use crate::config::Settings;
use crate::services::conversation::{ConversationCache, ConversationManager, DocumentIndex};
use crate::services::{BookService, ContentService};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub conversation_manager: Arc<ConversationManager>,
    pub content_service: Arc<ContentService>,
    pub document_index: Arc<dyn DocumentIndex>,
    pub session_cache: Arc<ConversationCache>,
    pub book_service: Arc<BookService>,
}

impl FromRef<AppState> for Arc<ConversationManager> {
    fn from_ref(state: &AppState) -> Self {
        state.conversation_manager.clone()
    }
}

impl FromRef<AppState> for Arc<ContentService> {
    fn from_ref(state: &AppState) -> Self {
        state.content_service.clone()
    }
}

impl FromRef<AppState> for Arc<dyn DocumentIndex> {
    fn from_ref(state: &AppState) -> Self {
        state.document_index.clone()
    }
}

impl FromRef<AppState> for Arc<ConversationCache> {
    fn from_ref(state: &AppState) -> Self {
        state.session_cache.clone()
    }
}

impl FromRef<AppState> for Arc<BookService> {
    fn from_ref(state: &AppState) -> Self {
        state.book_service.clone()
    }
}
