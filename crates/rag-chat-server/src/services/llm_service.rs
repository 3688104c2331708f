use crate::config::LlmConfig;
use crate::utils::error::ModelError;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::chat::ChatMessage;
use crate::services::conversation::providers::{LlmProvider, TokenStream};
use crate::services::sse;

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub max_tokens: usize,
    pub temperature: f32,
    pub stream: bool,
}

// Streaming chunk
#[derive(Debug, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChoiceChunk>,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceChunk {
    #[serde(default)]
    pub delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
pub struct Delta {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `/v1/chat/completions` client.
#[derive(Clone)]
pub struct LlmService {
    client: Client,
    config: LlmConfig,
}

impl LlmService {
    pub fn new(config: LlmConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    async fn send(&self, request: &ChatCompletionRequest<'_>) -> Result<reqwest::Response, ModelError> {
        let mut builder = self.client.post(self.endpoint()).json(request);
        if !self.config.api_key.is_empty() {
            builder = builder.bearer_auth(&self.config.api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ModelError::Request(format!("Failed to call LLM API: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status { status, body });
        }

        Ok(response)
    }

    /// Generate completion with streaming
    pub async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<TokenStream, ModelError> {
        debug!("Starting chat stream with {} messages", messages.len());

        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: true,
        };

        let response = self.send(&request).await?;

        let tokens = sse::data_payloads(response.bytes_stream()).filter_map(|payload| async move {
            match payload {
                Ok(json) => match serde_json::from_str::<ChatCompletionChunk>(&json) {
                    Ok(chunk) => chunk
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.delta.content)
                        .filter(|s| !s.is_empty())
                        .map(Ok),
                    Err(e) => {
                        warn!("Skipping malformed stream chunk: {}", e);
                        None
                    }
                },
                Err(e) => Some(Err(e)),
            }
        });

        Ok(Box::pin(tokens))
    }

    /// Generate completion without streaming (wait for full response)
    pub async fn generate_chat(
        &self,
        messages: &[ChatMessage],
        max_tokens: usize,
        temperature: f32,
    ) -> Result<String, ModelError> {
        debug!("Starting chat generation with {} messages", messages.len());

        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            max_tokens,
            temperature,
            stream: false,
        };

        let response = self.send(&request).await?;

        let chat_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Malformed(format!("Failed to parse LLM response: {}", e)))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or(ModelError::Empty)
    }
}

#[async_trait::async_trait]
impl LlmProvider for LlmService {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        self.generate_chat(messages, self.config.max_tokens, self.config.temperature)
            .await
    }

    async fn generate_with(
        &self,
        messages: &[ChatMessage],
        max_tokens: usize,
        temperature: f32,
    ) -> Result<String, ModelError> {
        self.generate_chat(messages, max_tokens, temperature).await
    }

    async fn generate_stream(&self, messages: &[ChatMessage]) -> Result<TokenStream, ModelError> {
        self.chat_stream(messages).await
    }
}
