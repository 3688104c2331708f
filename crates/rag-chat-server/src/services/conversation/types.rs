use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

use crate::models::chat::{ChatMessage, Role, SessionId};

/// One committed utterance in a session transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn to_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// Complete conversation state stored in the session store
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub session_id: SessionId,

    /// Alternating user/assistant turns, oldest first
    pub turns: Vec<Turn>,

    /// Wall-clock creation time, reported to callers
    pub created_at: DateTime<Utc>,

    /// Idle expiry is measured from here
    pub last_activity: Instant,

    pub metadata: ConversationMetadata,
}

impl ConversationState {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            turns: Vec::with_capacity(10),
            created_at: Utc::now(),
            last_activity: Instant::now(),
            metadata: ConversationMetadata::default(),
        }
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.last_activity.elapsed() > ttl
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Number of completed exchanges (user + assistant = 1 pair)
    pub fn exchange_count(&self) -> usize {
        self.turns.len() / 2
    }
}

/// Conversation metadata for monitoring
#[derive(Debug, Clone, Default)]
pub struct ConversationMetadata {
    pub total_exchanges: usize,
    pub fallback_exchanges: usize,
}

/// How the answer is produced: fully generated, or token by token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerMode {
    Buffered,
    Streaming,
}

/// Orchestration states of a single exchange, in the order they can occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeStage {
    Start,
    Retrieving,
    Composing,
    FallbackTriggered,
    WebSearching,
    Done,
}

impl fmt::Display for ExchangeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Retrieving => "retrieving",
            Self::Composing => "composing",
            Self::FallbackTriggered => "fallback_triggered",
            Self::WebSearching => "web_searching",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_expiry_uses_idle_time() {
        let mut state = ConversationState::new("s1".to_string());
        assert!(!state.is_expired(Duration::from_secs(60)));

        state.last_activity = Instant::now() - Duration::from_secs(120);
        assert!(state.is_expired(Duration::from_secs(60)));

        state.touch();
        assert!(!state.is_expired(Duration::from_secs(60)));
    }

    #[test]
    fn test_turn_to_message_keeps_role() {
        let turn = Turn::assistant("ICSI is a lab technique.");
        let msg = turn.to_message();
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.content, "ICSI is a lab technique.");
    }
}
