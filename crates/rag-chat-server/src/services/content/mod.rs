//! Structured study content generated from the training material:
//! suggested questions, quizzes, mind maps and diagrams.

mod diagram;
mod followup;
mod mindmap;
pub mod parser;
mod quiz;

pub use diagram::parse_mermaid;
pub use mindmap::parse_mind_map;
pub use quiz::{feedback_message, parse_quiz};

use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::chat::ChatMessage;
use crate::services::conversation::{DocumentIndex, LlmProvider, Turn};
use crate::utils::error::ApiError;

const CONTENT_MAX_TOKENS: usize = 2048;
const CONTENT_TEMPERATURE: f32 = 0.3;
const HISTORY_EXCERPT_TURNS: usize = 6;

pub struct ContentService {
    llm: Arc<dyn LlmProvider>,
    index: Arc<dyn DocumentIndex>,
    top_k: usize,
}

impl ContentService {
    pub fn new(llm: Arc<dyn LlmProvider>, index: Arc<dyn DocumentIndex>, top_k: usize) -> Self {
        Self { llm, index, top_k }
    }

    /// Training material about `topic`. Retrieval failures degrade to no grounding.
    async fn ground(&self, topic: &str) -> String {
        match self.index.search(topic, self.top_k).await {
            Ok(fragments) if !fragments.is_empty() => {
                debug!("Grounding '{}' with {} fragments", topic, fragments.len());
                fragments
                    .iter()
                    .map(|f| f.content.trim())
                    .collect::<Vec<_>>()
                    .join("\n\n---\n\n")
            }
            Ok(_) => String::new(),
            Err(e) => {
                warn!("Grounding retrieval for '{}' failed: {}", topic, e);
                String::new()
            }
        }
    }

    async fn generate(&self, instruction: &str, context: &str, request: String) -> Result<String, ApiError> {
        let system = if context.is_empty() {
            instruction.to_string()
        } else {
            format!("{}\n\nTraining material:\n{}", instruction, context)
        };

        let messages = [ChatMessage::system(system), ChatMessage::user(request)];
        let output = self
            .llm
            .generate_with(&messages, CONTENT_MAX_TOKENS, CONTENT_TEMPERATURE)
            .await?;
        Ok(output)
    }
}

/// Last few turns rendered as a transcript.
fn history_excerpt(history: &[Turn]) -> String {
    let start = history.len().saturating_sub(HISTORY_EXCERPT_TURNS);
    history[start..]
        .iter()
        .map(|turn| {
            let speaker = match turn.role {
                crate::models::chat::Role::User => "Learner",
                _ => "Assistant",
            };
            format!("{}: {}", speaker, turn.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_excerpt_keeps_latest_turns() {
        let history: Vec<Turn> = (0..5)
            .flat_map(|i| [Turn::user(format!("q{}", i)), Turn::assistant(format!("a{}", i))])
            .collect();

        let excerpt = history_excerpt(&history);
        assert!(excerpt.starts_with("Learner: q2"));
        assert!(excerpt.ends_with("Assistant: a4"));
        assert_eq!(excerpt.lines().count(), 6);
    }
}
