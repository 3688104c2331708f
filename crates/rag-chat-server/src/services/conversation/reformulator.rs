use std::sync::Arc;
use tracing::{debug, warn};

use super::providers::LlmProvider;
use super::types::Turn;
use crate::models::chat::ChatMessage;

const REFORMULATION_MAX_TOKENS: usize = 128;

/// Rewrites a follow-up message into a self-contained retrieval query.
pub struct QueryReformulator {
    llm: Arc<dyn LlmProvider>,
    instruction: String,
}

impl QueryReformulator {
    pub fn new(llm: Arc<dyn LlmProvider>, instruction: impl Into<String>) -> Self {
        Self {
            llm,
            instruction: instruction.into(),
        }
    }

    /// Never fails: without history, or when the model misbehaves, the raw message is the query.
    pub async fn reformulate(&self, history: &[Turn], message: &str) -> String {
        if history.is_empty() {
            return message.to_string();
        }

        let mut messages: Vec<ChatMessage> = history.iter().map(Turn::to_message).collect();
        messages.push(ChatMessage::user(message));
        messages.push(ChatMessage::user(self.instruction.as_str()));

        match self
            .llm
            .generate_with(&messages, REFORMULATION_MAX_TOKENS, 0.0)
            .await
        {
            Ok(query) => {
                let query = query.trim();
                if query.is_empty() {
                    warn!("Reformulation returned empty query, using raw message");
                    return message.to_string();
                }
                debug!("Reformulated '{}' -> '{}'", message, query);
                query.to_string()
            }
            Err(e) => {
                warn!("Reformulation failed, using raw message: {}", e);
                message.to_string()
            }
        }
    }
}
