pub mod settings;

pub use settings::{
    BookConfig, EmbeddingConfig, FallbackConfig, IndexConfig, LlmConfig, PromptsConfig, RagConfig,
    ServerConfig, SessionConfig, Settings, WebSearchConfig,
};
