use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub web_search: WebSearchConfig,
    pub rag: RagConfig,
    pub fallback: FallbackConfig,
    pub session: SessionConfig,
    pub prompts: PromptsConfig,
    pub book: BookConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub body_limit_bytes: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_seconds: u64,
    pub max_tokens: usize,
    pub temperature: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub dimension: usize,
}

/// Qdrant REST endpoint holding the domain document collection.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexConfig {
    pub base_url: String,
    pub api_key: String,
    pub collection: String,
    pub timeout_seconds: u64,
    /// Payload key carrying the fragment text; every other key becomes metadata.
    pub content_field: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebSearchConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RagConfig {
    pub retrieval_top_k: usize,
    pub max_context_tokens: usize,
    pub max_history_turns: usize,
    pub stream_channel_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FallbackConfig {
    pub phrases: Vec<String>,
    pub min_answer_chars: usize,
    pub marker: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    pub ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
    /// New sessions are refused above this host memory usage. 0 disables the guard.
    pub max_memory_percent: f64,
}

/// Per-session uploaded documents ("chat with your book").
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BookConfig {
    pub chunk_size: usize,
    pub chunk_overlap_percentage: f32,
    pub max_upload_bytes: usize,
    pub max_chunks: usize,
    pub embed_concurrency: usize,
    pub system_prompt: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PromptsConfig {
    pub system_prompt: String,
    pub reformulation_instruction: String,
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a virtual training assistant for clinicians. \
Answer precisely and only from the training material below. \
If the material does not cover the question, say that you don't know.\n\n\
Context:\n{context}";

pub const DEFAULT_BOOK_SYSTEM_PROMPT: &str = "You are a study assistant for a book the learner uploaded. \
Answer the question from the excerpts below. \
If they do not cover it, say that you don't know.\n\n\
Excerpts:\n{context}";

pub const DEFAULT_REFORMULATION_INSTRUCTION: &str = "Given the above conversation, generate a search query \
to look up in order to get information relevant to the conversation";

pub const DEFAULT_FALLBACK_MARKER: &str = "\n\n---\n🌐 Searching the web for a better answer…\n\n";

pub fn default_fallback_phrases() -> Vec<String> {
    [
        "i don't know",
        "i do not know",
        "cannot find",
        "can't find",
        "couldn't find",
        "not enough information",
        "no information",
        "not mentioned in the context",
        "i'm sorry",
        "i am sorry",
        "sorry, i",
        "i apologize",
        "unable to answer",
        "i cannot answer",
        "i can't answer",
        "beyond the scope",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::builder_with_defaults()?
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("fallback.phrases"),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }

    /// Settings made only of the built-in defaults (no file, no environment).
    pub fn defaults() -> Result<Self> {
        let settings: Settings = Self::builder_with_defaults()?.build()?.try_deserialize()?;
        Ok(settings)
    }

    fn builder_with_defaults(
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.body_limit_bytes", 1024 * 1024)?
            .set_default("llm.base_url", "https://api.openai.com")?
            .set_default("llm.api_key", "")?
            .set_default("llm.model", "gpt-4o-mini")?
            .set_default("llm.timeout_seconds", 120)?
            .set_default("llm.max_tokens", 1024)?
            .set_default("llm.temperature", 0.7)?
            .set_default("embedding.base_url", "https://api.openai.com")?
            .set_default("embedding.api_key", "")?
            .set_default("embedding.model", "text-embedding-ada-002")?
            .set_default("embedding.dimension", 1536)?
            .set_default("index.base_url", "http://localhost:6333")?
            .set_default("index.api_key", "")?
            .set_default("index.collection", "training-documents")?
            .set_default("index.timeout_seconds", 15)?
            .set_default("index.content_field", "page_content")?
            .set_default("web_search.base_url", "https://api.openai.com")?
            .set_default("web_search.api_key", "")?
            .set_default("web_search.model", "gpt-4o-mini-search-preview")?
            .set_default("web_search.timeout_seconds", 120)?
            .set_default("rag.retrieval_top_k", 4)?
            .set_default("rag.max_context_tokens", 6000)?
            .set_default("rag.max_history_turns", 10)?
            .set_default("rag.stream_channel_capacity", 64)?
            .set_default("fallback.phrases", default_fallback_phrases())?
            .set_default("fallback.min_answer_chars", 10)?
            .set_default("fallback.marker", DEFAULT_FALLBACK_MARKER)?
            .set_default("session.ttl_seconds", 6 * 60 * 60)?
            .set_default("session.sweep_interval_seconds", 300)?
            .set_default("session.max_memory_percent", 90.0)?
            .set_default("book.chunk_size", 1000)?
            .set_default("book.chunk_overlap_percentage", 0.2)?
            .set_default("book.max_upload_bytes", 20 * 1024 * 1024)?
            .set_default("book.max_chunks", 2000)?
            .set_default("book.embed_concurrency", 4)?
            .set_default("book.system_prompt", DEFAULT_BOOK_SYSTEM_PROMPT)?
            .set_default("prompts.system_prompt", DEFAULT_SYSTEM_PROMPT)?
            .set_default(
                "prompts.reformulation_instruction",
                DEFAULT_REFORMULATION_INSTRUCTION,
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_complete() {
        let settings = Settings::defaults().expect("defaults must deserialize");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.fallback.min_answer_chars, 10);
        assert!(settings
            .fallback
            .phrases
            .iter()
            .any(|p| p == "i don't know"));
        assert!(settings.prompts.system_prompt.contains("{context}"));
        assert_eq!(settings.session.ttl_seconds, 21_600);
        assert_eq!(settings.web_search.timeout_seconds, 120);
        assert_eq!(settings.book.chunk_size, 1000);
        assert!(settings.book.system_prompt.contains("{context}"));
    }

    #[test]
    fn test_default_phrases_are_lowercase() {
        for phrase in default_fallback_phrases() {
            assert_eq!(phrase, phrase.to_lowercase());
        }
    }
}
