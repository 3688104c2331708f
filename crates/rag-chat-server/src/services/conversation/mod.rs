//! Conversation orchestration module
//!
//! Provides session-scoped conversational answering with:
//! - Thread-safe session memory (DashMap) with per-session exchange locks
//! - History-aware query reformulation
//! - Grounded answer composition within a token budget
//! - Low-confidence detection and live web-search fallback

mod cache;
mod composer;
mod context_builder;
mod fallback;
pub mod manager;
pub mod providers;
mod reformulator;
mod relay;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CacheStats, ConversationCache, SessionGuard, SessionStore};
pub use composer::AnswerComposer;
pub use context_builder::{ContextBuilder, ContextMetrics};
pub use fallback::{format_citations, FallbackDecision, FallbackPolicy, FallbackReason, PrimaryOutcome};
pub use manager::{AnswerResult, AnswerStream, ConversationManager};
pub use providers::{
    DocumentIndex, EmbeddingProvider, LlmProvider, TokenStream, WebSearchEvent,
    WebSearchProvider, WebSearchStream,
};
pub use reformulator::QueryReformulator;
pub use relay::Relay;
pub use types::{AnswerMode, ConversationState, ExchangeStage, Turn};

pub use crate::models::chat::{ChatMessage, SessionId};
