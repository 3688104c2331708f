use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info};

use super::context_builder::{ContextBuilder, ContextMetrics};
use super::providers::{DocumentIndex, LlmProvider};
use super::relay::Relay;
use super::types::{AnswerMode, Turn};
use crate::models::chat::{ChatMessage, RetrievedFragment};
use crate::utils::error::{ModelError, RetrievalError};

/// Produces a grounded answer: retrieve, assemble the prompt, invoke the model.
pub struct AnswerComposer {
    index: Arc<dyn DocumentIndex>,
    llm: Arc<dyn LlmProvider>,
    context_builder: ContextBuilder,
    top_k: usize,
}

impl AnswerComposer {
    pub fn new(
        index: Arc<dyn DocumentIndex>,
        llm: Arc<dyn LlmProvider>,
        context_builder: ContextBuilder,
        top_k: usize,
    ) -> Self {
        Self {
            index,
            llm,
            context_builder,
            top_k,
        }
    }

    /// Ranked fragments for `query`. An empty result counts as a retrieval failure.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedFragment>, RetrievalError> {
        let mut fragments = self.index.search(query, self.top_k).await?;
        if fragments.is_empty() {
            return Err(RetrievalError::NoResults);
        }

        fragments.sort_by(|a, b| b.score.total_cmp(&a.score));
        fragments.truncate(self.top_k);

        info!("Retrieved {} fragments for '{}'", fragments.len(), query);
        Ok(fragments)
    }

    pub fn build_messages(
        &self,
        fragments: &[RetrievedFragment],
        history: &[Turn],
        message: &str,
    ) -> (Vec<ChatMessage>, ContextMetrics) {
        self.context_builder.build_messages(fragments, history, message)
    }

    /// Runs the model and relays its output. Tokens relayed before a
    /// mid-stream failure stay in the relay.
    pub async fn compose(
        &self,
        messages: &[ChatMessage],
        mode: AnswerMode,
        relay: &mut Relay,
    ) -> Result<(), ModelError> {
        match mode {
            AnswerMode::Buffered => {
                let answer = self.llm.generate(messages).await?;
                if !answer.is_empty() {
                    relay.token(answer).await;
                }
            }
            AnswerMode::Streaming => {
                let mut stream = self.llm.generate_stream(messages).await?;
                let mut chunks = 0usize;
                while let Some(item) = stream.next().await {
                    let delta = item?;
                    if delta.is_empty() {
                        continue;
                    }
                    chunks += 1;
                    relay.token(delta).await;
                }
                debug!("Model stream finished after {} chunks", chunks);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::conversation::providers::MockDocumentIndex;
    use crate::services::conversation::testing::{fragment, FakeLlm};

    fn composer(index: MockDocumentIndex, llm: FakeLlm) -> AnswerComposer {
        AnswerComposer::new(
            Arc::new(index),
            Arc::new(llm),
            ContextBuilder::new("{context}".to_string(), 1000, 4),
            3,
        )
    }

    #[tokio::test]
    async fn test_retrieve_ranks_by_score() {
        let mut index = MockDocumentIndex::new();
        index
            .expect_search()
            .withf(|query, k| query.to_string() == "ICSI" && *k == 3)
            .returning(|_, _| {
                Ok(vec![
                    fragment("low", "a", 0.2),
                    fragment("high", "b", 0.9),
                    fragment("mid", "c", 0.5),
                ])
            });

        let fragments = composer(index, FakeLlm::answering("x"))
            .retrieve("ICSI")
            .await
            .unwrap();

        let contents: Vec<&str> = fragments.iter().map(|f| f.content.as_str()).collect();
        assert_eq!(contents, vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn test_empty_result_is_retrieval_error() {
        let mut index = MockDocumentIndex::new();
        index.expect_search().returning(|_, _| Ok(vec![]));

        let result = composer(index, FakeLlm::answering("x")).retrieve("q").await;
        assert_eq!(result, Err(RetrievalError::NoResults));
    }

    #[tokio::test]
    async fn test_streaming_and_buffered_relay_same_text() {
        let text = "ICSI is intracytoplasmic sperm injection.";

        let buffered = composer(MockDocumentIndex::new(), FakeLlm::answering(text));
        let mut relay = Relay::buffered();
        buffered
            .compose(&[], AnswerMode::Buffered, &mut relay)
            .await
            .unwrap();
        assert_eq!(relay.text(), text);

        let streaming = composer(MockDocumentIndex::new(), FakeLlm::answering(text));
        let mut relay = Relay::buffered();
        streaming
            .compose(&[], AnswerMode::Streaming, &mut relay)
            .await
            .unwrap();
        assert_eq!(relay.text(), text);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_keeps_partial_text() {
        let llm = FakeLlm::answering("one two three").with_stream_error_after(2);
        let composer = composer(MockDocumentIndex::new(), llm);
        let mut relay = Relay::buffered();

        let result = composer
            .compose(&[], AnswerMode::Streaming, &mut relay)
            .await;

        assert!(matches!(result, Err(ModelError::Stream(_))));
        assert_eq!(relay.text(), "one two ");
    }
}
