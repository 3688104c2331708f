//! Scripted providers for orchestration tests.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

use super::providers::{
    EmbeddingProvider, LlmProvider, TokenStream, WebSearchEvent, WebSearchProvider,
    WebSearchStream,
};
use crate::models::chat::{ChatMessage, Citation, RetrievedFragment};
use crate::utils::error::ModelError;

/// Language model that replies with a fixed text, streamed word by word.
pub struct FakeLlm {
    reply: Result<String, ModelError>,
    chunks: Vec<String>,
    stream_error_after: Option<usize>,
    gate: Option<Arc<Notify>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl FakeLlm {
    pub fn answering(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            chunks: text.split_inclusive(' ').map(str::to_string).collect(),
            stream_error_after: None,
            gate: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: ModelError) -> Self {
        Self {
            reply: Err(error),
            chunks: Vec::new(),
            stream_error_after: None,
            gate: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Stream yields `n` chunks, then an error.
    pub fn with_stream_error_after(mut self, n: usize) -> Self {
        self.stream_error_after = Some(n);
        self
    }

    /// Stream pauses after its first chunk until `gate` is notified.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn record(&self, messages: &[ChatMessage]) {
        self.calls.lock().push(messages.to_vec());
    }
}

#[async_trait::async_trait]
impl LlmProvider for FakeLlm {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        self.record(messages);
        self.reply.clone()
    }

    async fn generate_with(
        &self,
        messages: &[ChatMessage],
        _max_tokens: usize,
        _temperature: f32,
    ) -> Result<String, ModelError> {
        self.record(messages);
        self.reply.clone()
    }

    async fn generate_stream(&self, messages: &[ChatMessage]) -> Result<TokenStream, ModelError> {
        self.record(messages);
        if let Err(e) = &self.reply {
            return Err(e.clone());
        }

        let chunks = self.chunks.clone();
        let error_after = self.stream_error_after;
        let gate = self.gate.clone();

        let stream = async_stream::stream! {
            for (i, chunk) in chunks.into_iter().enumerate() {
                if error_after == Some(i) {
                    yield Err(ModelError::Stream("connection reset".to_string()));
                    return;
                }
                if i == 1 {
                    if let Some(gate) = &gate {
                        gate.notified().await;
                    }
                }
                yield Ok(chunk);
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Web search model with a scripted answer.
pub struct FakeWebSearch {
    tokens: Vec<String>,
    citations: Vec<Citation>,
    failure: Option<ModelError>,
    fail_mid_stream: bool,
    queries: Mutex<Vec<String>>,
}

impl FakeWebSearch {
    pub fn answering(text: &str) -> Self {
        Self {
            tokens: text.split_inclusive(' ').map(str::to_string).collect(),
            citations: Vec::new(),
            failure: None,
            fail_mid_stream: false,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: ModelError) -> Self {
        Self {
            failure: Some(error),
            ..Self::answering("")
        }
    }

    pub fn with_citations(mut self, citations: Vec<Citation>) -> Self {
        self.citations = citations;
        self
    }

    /// First token is delivered, then the stream fails.
    pub fn failing_mid_stream(mut self) -> Self {
        self.fail_mid_stream = true;
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait::async_trait]
impl WebSearchProvider for FakeWebSearch {
    async fn search_and_answer(&self, query: &str) -> Result<WebSearchStream, ModelError> {
        self.queries.lock().push(query.to_string());
        if let Some(e) = &self.failure {
            return Err(e.clone());
        }

        let tokens = self.tokens.clone();
        let citations = self.citations.clone();
        let fail_mid_stream = self.fail_mid_stream;

        let stream = async_stream::stream! {
            for (i, token) in tokens.into_iter().enumerate() {
                if fail_mid_stream && i == 1 {
                    yield Err(ModelError::Stream("search aborted".to_string()));
                    return;
                }
                yield Ok(WebSearchEvent::Token(token));
            }
            if !citations.is_empty() {
                yield Ok(WebSearchEvent::Citations(citations));
            }
            yield Ok(WebSearchEvent::Done);
        };

        Ok(Box::pin(stream))
    }
}

pub fn fragment(content: &str, source: &str, score: f32) -> RetrievedFragment {
    let mut fragment = RetrievedFragment::new(content, score);
    fragment
        .metadata
        .insert("source".to_string(), serde_json::json!(source));
    fragment
}

/// Embeds text as counts of a fixed vocabulary, so related texts score high.
pub struct KeywordEmbedder {
    vocabulary: Vec<String>,
    fail: bool,
}

impl KeywordEmbedder {
    pub fn new(vocabulary: &[&str]) -> Self {
        Self {
            vocabulary: vocabulary.iter().map(|w| w.to_lowercase()).collect(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            vocabulary: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        if self.fail {
            anyhow::bail!("embedding server down");
        }
        let text = text.to_lowercase();
        Ok(self
            .vocabulary
            .iter()
            .map(|word| text.matches(word.as_str()).count() as f32)
            .collect())
    }
}
