use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type SessionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Role-tagged prompt unit sent to the language model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

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
}

/// A retrieved piece of source text plus its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedFragment {
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub score: f32,
}

impl RetrievedFragment {
    pub fn new(content: impl Into<String>, score: f32) -> Self {
        Self {
            content: content.into(),
            metadata: HashMap::new(),
            score,
        }
    }

    /// Best-effort human label for the fragment's source document.
    pub fn source_label(&self) -> Option<String> {
        ["source", "title", "file_name"]
            .iter()
            .find_map(|key| self.metadata.get(*key))
            .and_then(|v| v.as_str().map(str::to_string))
    }
}

/// Web citation attached to a live-search answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub url: String,
}

// ===== REQUEST MODELS =====

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub k: Option<usize>,
}

// ===== RESPONSE MODELS =====

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub session_id: String,
    pub fallback_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub sources: Vec<SourceInfo>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceInfo {
    pub source: Option<String>,
    pub score: f32,
    pub preview: String, // first 150 chars
}

impl From<&RetrievedFragment> for SourceInfo {
    fn from(fragment: &RetrievedFragment) -> Self {
        Self {
            source: fragment.source_label(),
            score: fragment.score,
            preview: fragment.content.chars().take(150).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub turns: Vec<crate::services::conversation::Turn>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<RetrievedFragment>,
}

/// Events relayed to a streaming caller, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatStreamEvent {
    Session {
        session_id: String,
    },
    Token {
        delta: String,
    },
    /// Sentinel marking the switch from grounded to web-sourced content.
    Fallback {
        reason: String,
        marker: String,
    },
    Citations {
        citations: Vec<Citation>,
    },
    /// Inline diagnostic; `terminal` means no further content follows.
    Error {
        code: String,
        message: String,
        terminal: bool,
    },
    Done {
        session_id: String,
        fallback_used: bool,
    },
}

impl ChatStreamEvent {
    /// SSE event name used by the transport.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Session { .. } => "session",
            Self::Token { .. } => "token",
            Self::Fallback { .. } => "fallback",
            Self::Citations { .. } => "citations",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }

    /// Text this event contributes to the visible answer.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Token { delta } => Some(delta),
            Self::Fallback { marker, .. } => Some(marker),
            Self::Error { message, .. } => Some(message),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_event_serialization() {
        let ev = ChatStreamEvent::Token {
            delta: "ICSI".to_string(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["kind"], "token");
        assert_eq!(json["delta"], "ICSI");
        assert_eq!(ev.name(), "token");
    }

    #[test]
    fn test_source_label_prefers_source_key() {
        let mut fragment = RetrievedFragment::new("text", 0.9);
        fragment
            .metadata
            .insert("title".into(), serde_json::json!("Handbook"));
        fragment
            .metadata
            .insert("source".into(), serde_json::json!("ivf.pdf"));
        assert_eq!(fragment.source_label().as_deref(), Some("ivf.pdf"));
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let msg = ChatMessage::assistant("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
    }
}
