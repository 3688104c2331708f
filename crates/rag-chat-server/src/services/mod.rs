pub mod book;
pub mod content;
pub mod conversation;
pub mod embedding_service;
pub mod index_service;
pub mod llm_service;
pub mod sse;
pub mod web_search_service;

pub use book::BookService;
pub use content::ContentService;
pub use embedding_service::EmbeddingService;
pub use index_service::QdrantIndex;
pub use llm_service::LlmService;
pub use web_search_service::WebSearchService;
