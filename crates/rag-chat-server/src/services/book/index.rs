use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::debug;

use crate::document::Chunk;
use crate::models::chat::RetrievedFragment;
use crate::services::conversation::{DocumentIndex, EmbeddingProvider};
use crate::utils::error::RetrievalError;
use crate::utils::similarity::cosine_similarity;

struct IndexedChunk {
    chunk: Chunk,
    embedding: Vec<f32>,
}

/// In-memory vector index over one uploaded document.
pub struct SessionIndex {
    title: String,
    embedder: Arc<dyn EmbeddingProvider>,
    entries: Vec<IndexedChunk>,
}

impl SessionIndex {
    /// Embeds every chunk, at most `concurrency` requests at a time. Chunk
    /// order is preserved; the first embedding failure aborts the build.
    pub async fn build(
        title: impl Into<String>,
        chunks: Vec<Chunk>,
        embedder: Arc<dyn EmbeddingProvider>,
        concurrency: usize,
    ) -> anyhow::Result<Self> {
        let entries = stream::iter(chunks)
            .map(|chunk| {
                let embedder = embedder.clone();
                async move {
                    let embedding = embedder.embed(&chunk.content).await?;
                    Ok::<_, anyhow::Error>(IndexedChunk { chunk, embedding })
                }
            })
            .buffered(concurrency.max(1))
            .try_collect::<Vec<_>>()
            .await?;

        Ok(Self {
            title: title.into(),
            embedder,
            entries,
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait::async_trait]
impl DocumentIndex for SessionIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedFragment>, RetrievalError> {
        if self.entries.is_empty() {
            return Err(RetrievalError::EmptyCollection(self.title.clone()));
        }

        let query_embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| {
                cosine_similarity(&query_embedding, &entry.embedding).map(|score| (i, score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        debug!("Book '{}' matched {} chunks", self.title, scored.len());

        Ok(scored
            .into_iter()
            .map(|(i, score)| {
                let chunk = &self.entries[i].chunk;
                let mut fragment = RetrievedFragment::new(chunk.content.clone(), score);
                fragment
                    .metadata
                    .insert("source".to_string(), serde_json::json!(self.title));
                fragment
                    .metadata
                    .insert("chunk_index".to_string(), serde_json::json!(i));
                fragment
                    .metadata
                    .insert("start_pos".to_string(), serde_json::json!(chunk.start_pos));
                fragment
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::conversation::testing::KeywordEmbedder;

    fn chunks() -> Vec<Chunk> {
        [
            "Ovarian stimulation uses FSH injections.",
            "ICSI injects one sperm into each egg.",
            "Embryo grading looks at cell number and fragmentation.",
        ]
        .iter()
        .scan(0, |pos, text| {
            let start = *pos;
            *pos += text.chars().count() + 2;
            Some(Chunk {
                content: text.to_string(),
                start_pos: start,
                end_pos: start + text.chars().count(),
            })
        })
        .collect()
    }

    fn embedder() -> Arc<dyn EmbeddingProvider> {
        Arc::new(KeywordEmbedder::new(&["stimulation", "icsi", "sperm", "embryo", "grading"]))
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity() {
        let index = SessionIndex::build("ivf-book", chunks(), embedder(), 2)
            .await
            .unwrap();
        assert_eq!(index.len(), 3);

        let results = index.search("How does ICSI place the sperm?", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].content.starts_with("ICSI injects"));
        assert!(results[0].score > results[1].score);
        assert_eq!(results[0].source_label().as_deref(), Some("ivf-book"));
        assert_eq!(results[0].metadata["chunk_index"], 1);
    }

    #[tokio::test]
    async fn test_embedding_failure() {
        let err = SessionIndex::build("b", chunks(), Arc::new(KeywordEmbedder::failing()), 4).await;
        assert!(err.is_err());

        let index = SessionIndex {
            title: "b".into(),
            embedder: Arc::new(KeywordEmbedder::failing()),
            entries: vec![IndexedChunk {
                chunk: Chunk {
                    content: "x".into(),
                    start_pos: 0,
                    end_pos: 1,
                },
                embedding: vec![1.0],
            }],
        };
        assert!(matches!(
            index.search("q", 3).await,
            Err(RetrievalError::Embedding(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_index_reports_empty_collection() {
        let index = SessionIndex::build("blank", Vec::new(), embedder(), 4).await.unwrap();
        assert!(index.is_empty());
        assert!(matches!(
            index.search("anything", 3).await,
            Err(RetrievalError::EmptyCollection(title)) if title == "blank"
        ));
    }
}
