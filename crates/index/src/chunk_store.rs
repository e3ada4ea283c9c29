use anyhow::{Context, Result};
use async_trait::async_trait;
use ingest::Chunk;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::embeddings::Embedder;

const UPSERT_BATCH: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// `nearest(query, k) -> ranked chunks` over stored vectors
#[async_trait]
pub trait ChunkIndex: Send + Sync {
    fn name(&self) -> &'static str;

    /// Insert or replace by `chunk_id`
    async fn upsert(&self, entries: Vec<IndexedChunk>) -> Result<()>;

    /// Best matches first
    async fn nearest(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>>;

    async fn len(&self) -> Result<usize>;

    async fn reset(&self) -> Result<()>;
}

/// Embeds chunks on the way in and questions on the way out.
pub struct ChunkStore {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn ChunkIndex>,
}

impl ChunkStore {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn ChunkIndex>) -> Self {
        Self { embedder, index }
    }

    /// Embed and index chunks. A chunk whose embedding fails is logged and
    /// left out; the number actually indexed is returned.
    pub async fn add_chunks(&self, chunks: &[Chunk]) -> Result<usize> {
        let mut batch = Vec::with_capacity(UPSERT_BATCH);
        let mut indexed = 0;

        for chunk in chunks.iter().filter(|c| !c.text.trim().is_empty()) {
            match self.embedder.embed(&chunk.text).await {
                Ok(vector) => batch.push(IndexedChunk {
                    chunk: chunk.clone(),
                    vector,
                }),
                Err(e) => {
                    warn!(
                        chunk_id = %chunk.chunk_id,
                        error = %e,
                        "failed to embed chunk, skipping"
                    );
                    continue;
                }
            }

            if batch.len() == UPSERT_BATCH {
                indexed += batch.len();
                self.index.upsert(std::mem::take(&mut batch)).await?;
            }
        }

        if !batch.is_empty() {
            indexed += batch.len();
            self.index.upsert(batch).await?;
        }

        info!(index = self.index.name(), chunks = indexed, "indexed chunks");
        Ok(indexed)
    }

    /// Top-k nearest chunks for a question
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let vector = self
            .embedder
            .embed(query)
            .await
            .context("Failed to embed query")?;
        self.index.nearest(&vector, k).await
    }

    /// Top-k with empty and exact-duplicate texts removed, rank preserved
    pub async fn search_unique(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        let results = self.search(query, k).await?;
        let before = results.len();
        let unique = dedupe_by_text(results);
        debug!(retrieved = before, unique = unique.len(), "chunk search");
        Ok(unique)
    }

    pub async fn len(&self) -> Result<usize> {
        self.index.len().await
    }

    pub async fn reset(&self) -> Result<()> {
        self.index.reset().await?;
        info!(index = self.index.name(), "chunk store reset");
        Ok(())
    }

    pub fn index_name(&self) -> &'static str {
        self.index.name()
    }
}

pub fn dedupe_by_text(results: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| {
            let text = r.chunk.text.trim();
            !text.is_empty() && seen.insert(text.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_index::LocalIndex;

    /// Bag-of-letters vectors: texts sharing letters land close together
    struct LetterEmbedder;

    #[async_trait]
    impl Embedder for LetterEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let mut vector = vec![0.0; 26];
            for c in text.to_ascii_lowercase().chars().filter(|c| c.is_ascii_lowercase()) {
                vector[(c as u8 - b'a') as usize] += 1.0;
            }
            Ok(vector)
        }

        fn model_name(&self) -> &str {
            "letters"
        }
    }

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk::new(id.to_string(), text.to_string(), format!("{id}.txt"), (0, text.len()))
    }

    #[tokio::test]
    async fn test_search_unique_drops_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(LocalIndex::open(dir.path()).await.unwrap());
        let store = ChunkStore::new(Arc::new(LetterEmbedder), index);

        let added = store
            .add_chunks(&[
                chunk("a", "Apple strategy focuses on services."),
                chunk("b", "Apple strategy focuses on services."),
                chunk("c", "  "),
                chunk("d", "Zebras are striped."),
            ])
            .await
            .unwrap();
        assert_eq!(added, 3);

        let results = store.search_unique("Apple services strategy", 5).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.text, "Apple strategy focuses on services.");
    }

    #[tokio::test]
    async fn test_empty_store_returns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(LocalIndex::open(dir.path()).await.unwrap());
        let store = ChunkStore::new(Arc::new(LetterEmbedder), index);

        assert!(store.search_unique("anything", 5).await.unwrap().is_empty());
        assert_eq!(store.len().await.unwrap(), 0);
    }
}
