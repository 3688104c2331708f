use tracing::debug;

use super::types::Turn;
use crate::config::{PromptsConfig, RagConfig};
use crate::models::chat::{ChatMessage, RetrievedFragment};
use crate::utils::token_estimator;

const CONTEXT_PLACEHOLDER: &str = "{context}";
const NO_CONTEXT: &str = "No relevant training material was found.";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextMetrics {
    pub fragments_included: usize,
    pub total_tokens: usize,
    pub truncated: bool,
}

/// Assembles the answer prompt: system instruction with retrieved context,
/// a bounded slice of history, then the current message.
pub struct ContextBuilder {
    system_prompt: String,
    max_context_tokens: usize,
    max_history_turns: usize,
}

impl ContextBuilder {
    pub fn new(system_prompt: String, max_context_tokens: usize, max_history_turns: usize) -> Self {
        Self {
            system_prompt,
            max_context_tokens,
            max_history_turns,
        }
    }

    pub fn from_config(prompts: &PromptsConfig, rag: &RagConfig) -> Self {
        Self::new(
            prompts.system_prompt.clone(),
            rag.max_context_tokens,
            rag.max_history_turns,
        )
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Fragments in rank order until the token budget is spent.
    pub fn build_context(&self, fragments: &[RetrievedFragment]) -> (String, ContextMetrics) {
        let mut metrics = ContextMetrics::default();
        if fragments.is_empty() {
            return (NO_CONTEXT.to_string(), metrics);
        }

        let mut context = String::new();
        let mut current_tokens = 0usize;

        for fragment in fragments {
            let header = match fragment.source_label() {
                Some(source) => format!("[Source: {} | relevance {:.3}]", source, fragment.score),
                None => format!("[relevance {:.3}]", fragment.score),
            };
            let block = format!("{}\n{}\n\n", header, fragment.content.trim());
            if token_estimator::would_exceed_limit(current_tokens, &block, self.max_context_tokens) {
                metrics.truncated = true;
                // An oversized top fragment is cut down rather than dropped
                if context.is_empty() {
                    let room = self
                        .max_context_tokens
                        .saturating_sub(token_estimator::estimate_tokens(&header));
                    let partial = token_estimator::truncate_to_tokens(fragment.content.trim(), room);
                    if !partial.is_empty() {
                        let block = format!("{}\n{}\n\n", header, partial);
                        current_tokens += token_estimator::estimate_tokens(&block);
                        context.push_str(&block);
                        metrics.fragments_included += 1;
                    }
                }
                break;
            }

            current_tokens += token_estimator::estimate_tokens(&block);
            context.push_str(&block);
            metrics.fragments_included += 1;
        }

        metrics.total_tokens = current_tokens;
        if context.is_empty() {
            return (NO_CONTEXT.to_string(), metrics);
        }
        (context.trim_end().to_string(), metrics)
    }

    /// Substitutes the context placeholder, or appends the context when the prompt has none.
    pub fn build_system_message(&self, context: &str) -> String {
        if self.system_prompt.contains(CONTEXT_PLACEHOLDER) {
            self.system_prompt.replace(CONTEXT_PLACEHOLDER, context)
        } else {
            format!("{}\n\n{}", self.system_prompt, context)
        }
    }

    /// Most recent turns, never starting on an assistant turn.
    pub fn history_window<'a>(&self, history: &'a [Turn]) -> &'a [Turn] {
        let mut start = history.len().saturating_sub(self.max_history_turns);
        if start % 2 == 1 {
            start += 1;
        }
        &history[start.min(history.len())..]
    }

    pub fn build_messages(
        &self,
        fragments: &[RetrievedFragment],
        history: &[Turn],
        message: &str,
    ) -> (Vec<ChatMessage>, ContextMetrics) {
        let (context, metrics) = self.build_context(fragments);
        let window = self.history_window(history);

        let mut messages = Vec::with_capacity(window.len() + 2);
        messages.push(ChatMessage::system(self.build_system_message(&context)));
        messages.extend(window.iter().map(Turn::to_message));
        messages.push(ChatMessage::user(message));

        debug!(
            "Prompt built: {} fragments, {} context tokens, {} history turns{}",
            metrics.fragments_included,
            metrics.total_tokens,
            window.len(),
            if metrics.truncated { " (context truncated)" } else { "" }
        );

        (messages, metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::Role;
    use crate::services::conversation::testing::fragment;

    fn builder() -> ContextBuilder {
        ContextBuilder::new("Answer from:\n{context}".to_string(), 1000, 4)
    }

    #[test]
    fn test_placeholder_substitution() {
        let (messages, metrics) = builder().build_messages(
            &[fragment("ICSI injects a single sperm.", "ivf.pdf", 0.91)],
            &[],
            "What is ICSI?",
        );

        assert_eq!(metrics.fragments_included, 1);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.starts_with("Answer from:\n[Source: ivf.pdf"));
        assert!(messages[0].content.contains("ICSI injects a single sperm."));
        assert!(!messages[0].content.contains("{context}"));
        assert_eq!(messages[1], ChatMessage::user("What is ICSI?"));
    }

    #[test]
    fn test_prompt_without_placeholder_appends_context() {
        let builder = ContextBuilder::new("Be precise.".to_string(), 1000, 4);
        let system = builder.build_system_message("CTX");
        assert_eq!(system, "Be precise.\n\nCTX");
    }

    #[test]
    fn test_context_respects_token_budget() {
        let builder = ContextBuilder::new("{context}".to_string(), 40, 4);
        let long = "word ".repeat(15);
        let fragments = vec![
            fragment(&long, "a", 0.9),
            fragment(&long, "b", 0.8),
            fragment(&long, "c", 0.7),
        ];

        let (_, metrics) = builder.build_context(&fragments);
        assert_eq!(metrics.fragments_included, 1);
        assert!(metrics.truncated);
    }

    #[test]
    fn test_oversized_first_fragment_is_cut_to_budget() {
        let builder = ContextBuilder::new("{context}".to_string(), 40, 4);
        let fragments = vec![fragment(&"word ".repeat(60), "big.pdf", 0.9)];

        let (context, metrics) = builder.build_context(&fragments);
        assert!(context.starts_with("[Source: big.pdf"));
        assert!(context.contains("word"));
        assert!(context.split_whitespace().filter(|w| *w == "word").count() < 60);
        assert_eq!(metrics.fragments_included, 1);
        assert!(metrics.truncated);
        assert!(metrics.total_tokens <= 40);
    }

    #[test]
    fn test_budget_below_header_yields_no_context() {
        let builder = ContextBuilder::new("{context}".to_string(), 3, 4);
        let fragments = vec![fragment("ICSI injects a single sperm.", "ivf.pdf", 0.9)];

        let (context, metrics) = builder.build_context(&fragments);
        assert_eq!(context, NO_CONTEXT);
        assert_eq!(metrics.fragments_included, 0);
        assert!(metrics.truncated);
    }

    #[test]
    fn test_history_window_keeps_whole_pairs() {
        let history = vec![
            Turn::user("q1"),
            Turn::assistant("a1"),
            Turn::user("q2"),
            Turn::assistant("a2"),
            Turn::user("q3"),
            Turn::assistant("a3"),
        ];

        let builder = ContextBuilder::new("{context}".to_string(), 1000, 3);
        let window = builder.history_window(&history);
        assert_eq!(window, &history[4..]);

        let builder = ContextBuilder::new("{context}".to_string(), 1000, 4);
        assert_eq!(builder.history_window(&history), &history[2..]);

        let builder = ContextBuilder::new("{context}".to_string(), 1000, 0);
        assert!(builder.history_window(&history).is_empty());
    }

    #[test]
    fn test_history_precedes_current_message() {
        let history = vec![Turn::user("What is ICSI?"), Turn::assistant("A technique.")];
        let (messages, _) = builder().build_messages(&[], &history, "Risks?");

        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        assert!(messages[0].content.contains(NO_CONTEXT));
    }
}
