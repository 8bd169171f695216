//! Knowledge store: chunking, embedding and vector retrieval.
//!
//! Documents are split by [`chunk_text`], embedded through an injected
//! [`Embedder`] and kept in a [`VectorIndex`]. [`KnowledgeStore::retrieve_context`]
//! renders the best hits as numbered `[Document i]` blocks for prompt
//! augmentation.

mod chunker;
mod embedding;
mod index;

pub use chunker::{chunk_text, reassemble, KnowledgeChunk};
pub use embedding::{cosine_similarity, Embedder, HashingEmbedder, HttpEmbedder};
pub use index::{SearchHit, VectorIndex};

#[cfg(test)]
pub use embedding::MockEmbedder;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::KnowledgeConfig;
use crate::error::{KnowledgeError, KnowledgeResult};

/// Free-form metadata attached to chunks and used for search filters.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Separator placed between documents by [`KnowledgeStore::retrieve_context`].
pub const DEFAULT_CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Shared document store used for retrieval-augmented answers.
pub struct KnowledgeStore {
    embedder: Arc<dyn Embedder>,
    index: VectorIndex,
    config: KnowledgeConfig,
}

impl KnowledgeStore {
    /// Create an empty store using `embedder` for every vector
    pub fn new(embedder: Arc<dyn Embedder>, config: KnowledgeConfig) -> Self {
        Self {
            embedder,
            index: VectorIndex::new(),
            config,
        }
    }

    /// Split `text` with the store's configured chunk size and overlap.
    pub fn chunk(&self, text: &str, metadata: &Metadata, source_id: Option<&str>) -> Vec<KnowledgeChunk> {
        chunk_text(
            text,
            metadata,
            self.config.chunk_size,
            self.config.chunk_overlap,
            source_id,
        )
    }

    async fn embed(&self, text: &str) -> KnowledgeResult<Vec<f32>> {
        let timeout_ms = self.config.timeout_ms;
        let vector = tokio::time::timeout(Duration::from_millis(timeout_ms), self.embedder.embed(text))
            .await
            .map_err(|_| KnowledgeError::Timeout { timeout_ms })??;

        if vector.len() != self.embedder.dimension() {
            return Err(KnowledgeError::DimensionMismatch {
                expected: self.embedder.dimension(),
                actual: vector.len(),
            });
        }
        Ok(vector)
    }

    /// Embed and index chunks. Returns the ids that were stored.
    ///
    /// Embedding happens before the index is touched, so a failure leaves the
    /// index unchanged.
    pub async fn add(&self, chunks: Vec<KnowledgeChunk>) -> KnowledgeResult<Vec<String>> {
        let start = Instant::now();
        let mut items = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let vector = self.embed(&chunk.content).await?;
            items.push((chunk, vector));
        }

        let ids: Vec<String> = items.iter().map(|(c, _)| c.id.clone()).collect();
        self.index.insert(items);

        info!(
            chunks = ids.len(),
            total = self.index.len(),
            latency_ms = start.elapsed().as_millis(),
            "Indexed knowledge chunks"
        );
        Ok(ids)
    }

    /// Chunk a whole document and index it.
    pub async fn add_document(
        &self,
        text: &str,
        metadata: &Metadata,
        source_id: Option<&str>,
    ) -> KnowledgeResult<Vec<String>> {
        let chunks = self.chunk(text, metadata, source_id);
        self.add(chunks).await
    }

    /// Nearest chunks to `query`, best first. An empty store yields an empty result.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&Metadata>,
    ) -> KnowledgeResult<Vec<SearchHit>> {
        if self.index.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embed(query).await?;
        let hits = self.index.search(&vector, top_k, filter);
        debug!(top_k, hits = hits.len(), "Knowledge search complete");
        Ok(hits)
    }

    /// Render the best hits as `[Document i]` blocks joined by `separator`.
    ///
    /// Returns an empty string when nothing matches.
    pub async fn retrieve_context(
        &self,
        query: &str,
        top_k: usize,
        separator: &str,
    ) -> KnowledgeResult<String> {
        let hits = self.search(query, top_k, None).await?;
        Ok(format_context(&hits, separator))
    }

    /// Remove chunks by id; returns how many were removed.
    pub fn delete(&self, ids: &[String]) -> usize {
        self.index.delete(ids)
    }

    /// Remove every chunk.
    pub fn clear(&self) {
        self.index.clear();
    }

    /// Number of indexed chunks
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the store holds no chunks
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Format hits as numbered document blocks.
pub fn format_context(hits: &[SearchHit], separator: &str) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| format!("[Document {}]\n{}", i + 1, hit.chunk.content))
        .collect::<Vec<_>>()
        .join(separator)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> KnowledgeStore {
        KnowledgeStore::new(Arc::new(HashingEmbedder::new(128)), KnowledgeConfig::default())
    }

    #[tokio::test]
    async fn test_retrieve_context_contains_document() {
        let store = store();
        store
            .add_document("Python is a high-level language", &Metadata::new(), Some("py"))
            .await
            .unwrap();

        let context = store
            .retrieve_context("What is Python?", 5, DEFAULT_CONTEXT_SEPARATOR)
            .await
            .unwrap();
        assert!(context.starts_with("[Document 1]\n"));
        assert!(context.contains("Python is a high-level language"));
    }

    #[tokio::test]
    async fn test_empty_store_gives_empty_context() {
        let store = store();
        let context = store
            .retrieve_context("anything", 5, DEFAULT_CONTEXT_SEPARATOR)
            .await
            .unwrap();
        assert_eq!(context, "");
        assert!(store.search("anything", 3, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_is_idempotent() {
        let store = store();
        for text in ["Rust has ownership", "Go has goroutines", "Python has generators"] {
            store.add_document(text, &Metadata::new(), None).await.unwrap();
        }
        let first = store.search("ownership in Rust", 2, None).await.unwrap();
        let second = store.search("ownership in Rust", 2, None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].chunk.content, "Rust has ownership");
    }

    struct SlowEmbedder;

    #[async_trait::async_trait]
    impl Embedder for SlowEmbedder {
        async fn embed(&self, _text: &str) -> KnowledgeResult<Vec<f32>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![1.0])
        }

        fn dimension(&self) -> usize {
            1
        }
    }

    #[tokio::test]
    async fn test_search_timeout_is_reported() {
        let config = KnowledgeConfig {
            timeout_ms: 20,
            ..KnowledgeConfig::default()
        };
        let store = KnowledgeStore::new(Arc::new(SlowEmbedder), config);
        store
            .index
            .insert(vec![(KnowledgeChunk::new("seed"), vec![1.0])]);

        let err = store.search("q", 1, None).await.unwrap_err();
        assert!(matches!(err, KnowledgeError::Timeout { timeout_ms: 20 }));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let mut embedder = MockEmbedder::new();
        embedder.expect_dimension().return_const(3usize);
        embedder.expect_embed().returning(|_| Ok(vec![1.0]));

        let store = KnowledgeStore::new(Arc::new(embedder), KnowledgeConfig::default());
        let err = store.add(vec![KnowledgeChunk::new("x")]).await.unwrap_err();
        assert!(matches!(
            err,
            KnowledgeError::DimensionMismatch {
                expected: 3,
                actual: 1
            }
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let store = store();
        let ids = store
            .add_document("First.\n\nSecond.", &Metadata::new(), None)
            .await
            .unwrap();
        assert_eq!(store.len(), ids.len());
        assert_eq!(store.delete(&ids[..1]), 1);
        store.clear();
        assert!(store.is_empty());
    }
}
