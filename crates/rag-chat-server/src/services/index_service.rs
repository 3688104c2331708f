use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::IndexConfig;
use crate::models::chat::RetrievedFragment;
use crate::services::conversation::providers::{DocumentIndex, EmbeddingProvider};
use crate::utils::error::RetrievalError;

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    score: f32,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

/// Document collection stored in Qdrant, searched by query embedding.
pub struct QdrantIndex {
    client: Client,
    config: IndexConfig,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl QdrantIndex {
    pub fn new(config: IndexConfig, embedder: Arc<dyn EmbeddingProvider>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            config,
            embedder,
        })
    }

    fn search_url(&self) -> String {
        format!(
            "{}/collections/{}/points/search",
            self.config.base_url.trim_end_matches('/'),
            self.config.collection
        )
    }

    /// Payload text goes to `content`; nested `metadata` objects are flattened
    /// alongside the remaining payload keys.
    fn to_fragment(&self, point: ScoredPoint) -> Option<RetrievedFragment> {
        let mut payload = point.payload.unwrap_or_default();
        let content = match payload.remove(&self.config.content_field) {
            Some(Value::String(text)) if !text.trim().is_empty() => text,
            _ => return None,
        };

        let mut metadata: HashMap<String, Value> = HashMap::new();
        if let Some(Value::Object(nested)) = payload.remove("metadata") {
            metadata.extend(nested);
        }
        metadata.extend(payload);

        Some(RetrievedFragment {
            content,
            metadata,
            score: point.score,
        })
    }
}

#[async_trait::async_trait]
impl DocumentIndex for QdrantIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedFragment>, RetrievalError> {
        let vector = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        let mut builder = self.client.post(self.search_url()).json(&SearchRequest {
            vector: &vector,
            limit: k,
            with_payload: true,
        });
        if !self.config.api_key.is_empty() {
            builder = builder.header("api-key", &self.config.api_key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                RetrievalError::Timeout
            } else {
                RetrievalError::Unavailable(e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RetrievalError::EmptyCollection(self.config.collection.clone()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Unavailable(format!("status {}: {}", status, body)));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Unavailable(format!("malformed search response: {}", e)))?;

        let total = parsed.result.len();
        let fragments: Vec<RetrievedFragment> = parsed
            .result
            .into_iter()
            .filter_map(|point| self.to_fragment(point))
            .collect();

        if fragments.len() < total {
            warn!(
                "Dropped {} points without '{}' payload",
                total - fragments.len(),
                self.config.content_field
            );
        }
        debug!("Index returned {} fragments", fragments.len());

        Ok(fragments)
    }
}
