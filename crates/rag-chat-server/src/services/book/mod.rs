//! Chat with an uploaded book.
//!
//! Each session can load one document. It is chunked, embedded into an
//! in-memory index and answered through its own conversation pipeline, with
//! history kept apart from the main training chat.

mod index;

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::document::{DocumentParser, TextChunker};
use crate::models::chat::SessionId;
use crate::services::content::ContentService;
use crate::services::conversation::{
    AnswerComposer, ContextBuilder, ConversationCache, ConversationManager, DocumentIndex,
    EmbeddingProvider, FallbackPolicy, LlmProvider, QueryReformulator, SessionStore,
    WebSearchProvider,
};
use crate::utils::error::ApiError;

pub use index::SessionIndex;

struct LoadedBook {
    title: String,
    chunks: usize,
    manager: Arc<ConversationManager>,
    last_used: Mutex<Instant>,
}

/// Result of loading a book into a session.
#[derive(Debug, Clone)]
pub struct BookUpload {
    pub session_id: SessionId,
    pub title: String,
    pub pages: Option<usize>,
    pub chunks: usize,
    pub suggested_questions: Vec<String>,
}

pub struct BookService {
    llm: Arc<dyn LlmProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    web_search: Arc<dyn WebSearchProvider>,
    store: ConversationCache,
    settings: Arc<Settings>,
    books: DashMap<SessionId, Arc<LoadedBook>>,
}

impl BookService {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        web_search: Arc<dyn WebSearchProvider>,
        store: ConversationCache,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            llm,
            embedder,
            web_search,
            store,
            settings,
            books: DashMap::new(),
        }
    }

    /// Parses, chunks and embeds `data`, then makes it the session's book.
    /// Any earlier book and its conversation are replaced.
    pub async fn load(
        &self,
        session_id: Option<SessionId>,
        file_name: &str,
        data: &[u8],
    ) -> Result<BookUpload, ApiError> {
        let session_id = match session_id.map(|id| id.trim().to_string()) {
            Some(id) if !id.is_empty() => id,
            _ => uuid::Uuid::new_v4().to_string(),
        };
        if !self.books.contains_key(&session_id) && !self.store.can_create_new_session() {
            return Err(ApiError::Unavailable(
                "session capacity reached, try again later".to_string(),
            ));
        }

        let parsed = DocumentParser::parse(file_name, data)
            .map_err(|e| ApiError::BadRequest(format!("Could not read '{}': {}", file_name, e)))?;

        let config = &self.settings.book;
        let mut chunks =
            TextChunker::with_overlap_percentage(config.chunk_size, config.chunk_overlap_percentage)
                .chunk(&parsed.content);
        if chunks.len() > config.max_chunks {
            warn!(
                "Book '{}' has {} chunks, keeping the first {}",
                parsed.title,
                chunks.len(),
                config.max_chunks
            );
            chunks.truncate(config.max_chunks);
        }

        let index = SessionIndex::build(
            parsed.title.clone(),
            chunks,
            self.embedder.clone(),
            config.embed_concurrency,
        )
        .await
        .map_err(|e| {
            error!("Embedding book '{}' failed: {}", parsed.title, e);
            ApiError::InternalError(format!("Failed to embed document: {}", e))
        })?;
        let chunk_count = index.len();
        let index: Arc<dyn DocumentIndex> = Arc::new(index);

        let suggested_questions = match ContentService::new(
            self.llm.clone(),
            index.clone(),
            self.settings.rag.retrieval_top_k,
        )
        .suggest_questions()
        .await
        {
            Ok(questions) => questions,
            Err(e) => {
                warn!("No suggested questions for '{}': {}", parsed.title, e);
                Vec::new()
            }
        };

        let book = Arc::new(LoadedBook {
            title: parsed.title.clone(),
            chunks: chunk_count,
            manager: Arc::new(self.build_manager(index)),
            last_used: Mutex::new(Instant::now()),
        });

        {
            let _guard = self.store.lock(&session_id).await;
            SessionStore::reset(&self.store, &session_id);
            self.books.insert(session_id.clone(), book);
        }

        info!(
            "Session {} loaded book '{}' ({} chunks)",
            session_id, parsed.title, chunk_count
        );

        Ok(BookUpload {
            session_id,
            title: parsed.title,
            pages: parsed.pages,
            chunks: chunk_count,
            suggested_questions,
        })
    }

    fn build_manager(&self, index: Arc<dyn DocumentIndex>) -> ConversationManager {
        let settings = &self.settings;
        ConversationManager::new(
            Arc::new(self.store.clone()),
            QueryReformulator::new(
                self.llm.clone(),
                settings.prompts.reformulation_instruction.clone(),
            ),
            AnswerComposer::new(
                index,
                self.llm.clone(),
                ContextBuilder::new(
                    settings.book.system_prompt.clone(),
                    settings.rag.max_context_tokens,
                    settings.rag.max_history_turns,
                ),
                settings.rag.retrieval_top_k,
            ),
            FallbackPolicy::from_config(&settings.fallback),
            self.web_search.clone(),
        )
        .with_stream_capacity(settings.rag.stream_channel_capacity)
    }

    /// Pipeline answering against the session's book.
    pub fn manager(&self, session_id: &str) -> Result<Arc<ConversationManager>, ApiError> {
        let book = self
            .books
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                ApiError::BadRequest("No book loaded for this session, upload one first".to_string())
            })?;

        *book.last_used.lock() = Instant::now();
        Ok(book.manager.clone())
    }

    /// Title and chunk count of the session's book.
    pub fn loaded(&self, session_id: &str) -> Option<(String, usize)> {
        self.books
            .get(session_id)
            .map(|entry| (entry.title.clone(), entry.chunks))
    }

    /// Drops the book and its conversation once any exchange in flight has
    /// committed. Returns whether a book was loaded.
    pub async fn reset(&self, session_id: &str) -> bool {
        let _guard = self.store.lock(session_id).await;
        SessionStore::reset(&self.store, session_id);
        self.books.remove(session_id).is_some()
    }

    /// Drops books idle for longer than the session TTL.
    pub fn cleanup_expired(&self) -> usize {
        let ttl = Duration::from_secs(self.settings.session.ttl_seconds);
        let start_len = self.books.len();
        self.books
            .retain(|_, book| book.last_used.lock().elapsed() < ttl);
        self.store.cleanup_expired();

        let count = start_len.saturating_sub(self.books.len());
        if count > 0 {
            info!("Released {} idle books", count);
        }
        count
    }

    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                service.cleanup_expired();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::ChatStreamEvent;
    use crate::services::conversation::testing::{FakeLlm, FakeWebSearch, KeywordEmbedder};
    use crate::services::conversation::AnswerMode;

    const BOOK: &[u8] = b"Ovarian stimulation uses daily FSH injections for about ten days.\n\n\
ICSI injects one sperm into each mature egg under a microscope.\n\n\
Embryo grading looks at cell number, symmetry and fragmentation.";

    const REPLY: &str = "1. What is ICSI?\n2. How long does stimulation last?";

    fn book_service(llm: FakeLlm, embedder: KeywordEmbedder) -> (BookService, Arc<FakeLlm>) {
        let mut settings = Settings::defaults().unwrap();
        settings.book.chunk_size = 70;
        settings.book.chunk_overlap_percentage = 0.0;
        let llm = Arc::new(llm);
        let service = BookService::new(
            llm.clone(),
            Arc::new(embedder),
            Arc::new(FakeWebSearch::answering("web answer")),
            ConversationCache::new(Duration::from_secs(3600), 0.0),
            Arc::new(settings),
        );
        (service, llm)
    }

    fn embedder() -> KeywordEmbedder {
        KeywordEmbedder::new(&["stimulation", "icsi", "sperm", "embryo", "grading", "what"])
    }

    #[tokio::test]
    async fn test_load_indexes_book_and_suggests_questions() {
        let (service, llm) = book_service(FakeLlm::answering(REPLY), embedder());

        let upload = service
            .load(Some("s1".into()), "ivf-guide.txt", BOOK)
            .await
            .unwrap();

        assert_eq!(upload.session_id, "s1");
        assert_eq!(upload.title, "ivf-guide");
        assert_eq!(upload.chunks, 3);
        assert_eq!(
            upload.suggested_questions,
            vec!["What is ICSI?", "How long does stimulation last?"]
        );
        assert_eq!(service.loaded("s1"), Some(("ivf-guide".to_string(), 3)));
        assert!(llm.calls()[0][0].content.contains("ICSI injects one sperm"));
    }

    #[tokio::test]
    async fn test_upload_replaces_earlier_conversation() {
        let (service, _) = book_service(FakeLlm::answering(REPLY), embedder());
        service.store.append("s1", "earlier question", "earlier answer");

        service.load(Some("s1".into()), "ivf.txt", BOOK).await.unwrap();
        assert!(service.store.get("s1").is_empty());

        let manager = service.manager("s1").unwrap();
        let result = manager
            .answer(Some("s1".into()), "What does ICSI do?", AnswerMode::Buffered)
            .await
            .unwrap();
        assert!(result.sources[0].content.starts_with("ICSI injects"));
        assert_eq!(service.store.get("s1").len(), 2);
    }

    #[tokio::test]
    async fn test_message_without_book_is_bad_request() {
        let (service, _) = book_service(FakeLlm::answering(REPLY), embedder());
        assert!(matches!(service.manager("s1"), Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_unreadable_upload_leaves_session_untouched() {
        let (service, _) = book_service(FakeLlm::answering(REPLY), embedder());
        service.load(Some("s1".into()), "ivf.txt", BOOK).await.unwrap();

        let err = service.load(Some("s1".into()), "scan.png", b"\x89PNG").await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let (service2, _) = book_service(FakeLlm::answering(REPLY), KeywordEmbedder::failing());
        let err = service2.load(Some("s2".into()), "ivf.txt", BOOK).await.unwrap_err();
        assert!(matches!(err, ApiError::InternalError(_)));
        assert!(service2.loaded("s2").is_none());

        assert_eq!(service.loaded("s1").map(|(_, chunks)| chunks), Some(3));
    }

    #[tokio::test]
    async fn test_reset_drops_book_and_history() {
        let (service, _) = book_service(FakeLlm::answering(REPLY), embedder());
        let upload = service.load(None, "ivf.txt", BOOK).await.unwrap();
        assert!(uuid::Uuid::parse_str(&upload.session_id).is_ok());

        let stream = service
            .manager(&upload.session_id)
            .unwrap()
            .answer_stream(Some(upload.session_id.clone()), "What is ICSI?")
            .unwrap();
        let mut events = stream.events;
        while let Some(event) = events.recv().await {
            if matches!(event, ChatStreamEvent::Done { .. }) {
                break;
            }
        }
        stream.completion.await.unwrap();
        assert_eq!(service.store.get(&upload.session_id).len(), 2);

        assert!(service.reset(&upload.session_id).await);
        assert!(!service.reset(&upload.session_id).await);
        assert!(service.store.get(&upload.session_id).is_empty());
        assert!(service.manager(&upload.session_id).is_err());
    }

    #[tokio::test]
    async fn test_suggestion_failure_still_loads_book() {
        let (service, _) = book_service(
            FakeLlm::failing(crate::utils::error::ModelError::Empty),
            embedder(),
        );
        let upload = service.load(Some("s1".into()), "ivf.txt", BOOK).await.unwrap();
        assert!(upload.suggested_questions.is_empty());
        assert!(service.manager("s1").is_ok());
    }
}
