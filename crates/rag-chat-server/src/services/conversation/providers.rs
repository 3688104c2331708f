use futures::stream::Stream;
use std::pin::Pin;

use crate::models::chat::{ChatMessage, Citation, RetrievedFragment};
use crate::utils::error::{ModelError, RetrievalError};

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ModelError>> + Send>>;

pub type WebSearchStream = Pin<Box<dyn Stream<Item = Result<WebSearchEvent, ModelError>> + Send>>;

/// Trait for the language model service
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, ModelError>;

    async fn generate_with(
        &self,
        messages: &[ChatMessage],
        max_tokens: usize,
        temperature: f32,
    ) -> Result<String, ModelError>;

    async fn generate_stream(&self, messages: &[ChatMessage]) -> Result<TokenStream, ModelError>;
}

/// Trait for the searchable document collection
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Top `k` fragments for `query`, most relevant first.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedFragment>, RetrievalError>;
}

/// Trait for the embedding service
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebSearchEvent {
    Token(String),
    Citations(Vec<Citation>),
    Done,
}

/// Trait for the live web-search answer model
#[async_trait::async_trait]
pub trait WebSearchProvider: Send + Sync {
    async fn search_and_answer(&self, query: &str) -> Result<WebSearchStream, ModelError>;
}
