/// fallback.rs - decides when a grounded answer is replaced by live web search
use std::fmt;
use tracing::info;

use crate::config::FallbackConfig;
use crate::models::chat::Citation;
use crate::utils::error::{ModelError, RetrievalError};

#[derive(Debug, Clone, PartialEq)]
pub enum FallbackReason {
    /// The answer contains a configured low-confidence phrase
    LowConfidence(String),

    RetrievalFailed(String),

    ModelFailed(String),

    /// Trimmed answer length in characters
    TooShort(usize),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LowConfidence(phrase) => write!(f, "low_confidence: \"{}\"", phrase),
            Self::RetrievalFailed(e) => write!(f, "retrieval_failed: {}", e),
            Self::ModelFailed(e) => write!(f, "model_failed: {}", e),
            Self::TooShort(len) => write!(f, "answer_too_short: {} chars", len),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FallbackDecision {
    Keep,
    Trigger(FallbackReason),
}

/// What the primary path produced.
#[derive(Debug, Default)]
pub struct PrimaryOutcome<'a> {
    pub answer: &'a str,
    pub retrieval_error: Option<&'a RetrievalError>,
    pub model_error: Option<&'a ModelError>,
}

pub struct FallbackPolicy {
    /// Lowercase, matched as substrings
    phrases: Vec<String>,
    min_answer_chars: usize,
    marker: String,
}

impl FallbackPolicy {
    pub fn new(phrases: Vec<String>, min_answer_chars: usize, marker: impl Into<String>) -> Self {
        Self {
            phrases: phrases
                .into_iter()
                .map(|p| normalize(p.trim()))
                .filter(|p| !p.is_empty())
                .collect(),
            min_answer_chars,
            marker: marker.into(),
        }
    }

    pub fn from_config(config: &FallbackConfig) -> Self {
        Self::new(
            config.phrases.clone(),
            config.min_answer_chars,
            config.marker.clone(),
        )
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Failures first, then answer content.
    pub fn evaluate(&self, outcome: &PrimaryOutcome<'_>) -> FallbackDecision {
        let decision = self.decide(outcome);
        if let FallbackDecision::Trigger(reason) = &decision {
            info!("Fallback triggered: {}", reason);
        }
        decision
    }

    fn decide(&self, outcome: &PrimaryOutcome<'_>) -> FallbackDecision {
        if let Some(e) = outcome.retrieval_error {
            return FallbackDecision::Trigger(FallbackReason::RetrievalFailed(e.to_string()));
        }
        if let Some(e) = outcome.model_error {
            return FallbackDecision::Trigger(FallbackReason::ModelFailed(e.to_string()));
        }

        let answer = normalize(outcome.answer);
        if let Some(phrase) = self.phrases.iter().find(|p| answer.contains(p.as_str())) {
            return FallbackDecision::Trigger(FallbackReason::LowConfidence(phrase.clone()));
        }

        let len = outcome.answer.trim().chars().count();
        if len < self.min_answer_chars {
            return FallbackDecision::Trigger(FallbackReason::TooShort(len));
        }

        FallbackDecision::Keep
    }
}

/// Lowercase with typographic apostrophes folded to ASCII.
fn normalize(text: &str) -> String {
    text.to_lowercase().replace(|c: char| c == '\u{2019}' || c == '\u{2018}', "'")
}

/// Trailing "Sources" lines appended after a web-sourced answer.
pub fn format_citations(citations: &[Citation]) -> String {
    let mut out = String::from("\n\nSources:");
    for (i, citation) in citations.iter().enumerate() {
        let title = if citation.title.trim().is_empty() {
            citation.url.as_str()
        } else {
            citation.title.trim()
        };
        out.push_str(&format!("\n{}. [{}]({})", i + 1, title, citation.url));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::{default_fallback_phrases, DEFAULT_FALLBACK_MARKER};

    fn policy() -> FallbackPolicy {
        FallbackPolicy::new(default_fallback_phrases(), 10, DEFAULT_FALLBACK_MARKER)
    }

    fn answer(text: &str) -> PrimaryOutcome<'_> {
        PrimaryOutcome {
            answer: text,
            ..Default::default()
        }
    }

    #[test]
    fn test_confident_answer_is_kept() {
        let decision = policy().evaluate(&answer(
            "ICSI is intracytoplasmic sperm injection, used for male-factor infertility.",
        ));
        assert_eq!(decision, FallbackDecision::Keep);
    }

    #[test]
    fn test_low_confidence_phrase_is_case_insensitive() {
        let decision = policy().evaluate(&answer("Honestly, I Don\u{2019}t Know the answer to that."));
        assert_eq!(
            decision,
            FallbackDecision::Trigger(FallbackReason::LowConfidence("i don't know".into()))
        );
    }

    #[test]
    fn test_short_answer_triggers() {
        let decision = policy().evaluate(&answer("  Yes.  "));
        assert_eq!(decision, FallbackDecision::Trigger(FallbackReason::TooShort(4)));

        let decision = policy().evaluate(&answer(""));
        assert_eq!(decision, FallbackDecision::Trigger(FallbackReason::TooShort(0)));
    }

    #[test]
    fn test_exactly_minimum_length_is_kept() {
        assert_eq!(policy().evaluate(&answer("0123456789")), FallbackDecision::Keep);
    }

    #[test]
    fn test_failures_take_precedence_over_text() {
        let err = RetrievalError::Timeout;
        let outcome = PrimaryOutcome {
            answer: "A long and confident looking answer.",
            retrieval_error: Some(&err),
            model_error: None,
        };
        assert!(matches!(
            policy().evaluate(&outcome),
            FallbackDecision::Trigger(FallbackReason::RetrievalFailed(_))
        ));

        let err = ModelError::Stream("reset".into());
        let outcome = PrimaryOutcome {
            answer: "A long and confident looking answer.",
            retrieval_error: None,
            model_error: Some(&err),
        };
        assert!(matches!(
            policy().evaluate(&outcome),
            FallbackDecision::Trigger(FallbackReason::ModelFailed(_))
        ));
    }

    #[test]
    fn test_configured_phrases_are_normalized() {
        let policy = FallbackPolicy::new(vec!["  NOT IN THE HANDBOOK ".into(), "".into()], 0, "");
        assert_eq!(
            policy.evaluate(&answer("That is not in the handbook.")),
            FallbackDecision::Trigger(FallbackReason::LowConfidence("not in the handbook".into()))
        );
        assert_eq!(policy.evaluate(&answer("")), FallbackDecision::Keep);
    }

    #[test]
    fn test_format_citations() {
        let lines = format_citations(&[
            Citation {
                title: "ESHRE guideline".into(),
                url: "https://eshre.eu/g".into(),
            },
            Citation {
                title: " ".into(),
                url: "https://example.org".into(),
            },
        ]);
        assert_eq!(
            lines,
            "\n\nSources:\n1. [ESHRE guideline](https://eshre.eu/g)\n2. [https://example.org](https://example.org)"
        );
    }
}
