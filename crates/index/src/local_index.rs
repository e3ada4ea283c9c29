use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::info;

use crate::chunk_store::{ChunkIndex, IndexedChunk, ScoredChunk};
use crate::embeddings::cosine_similarity;

const INDEX_FILE: &str = "chunks.json";

/// Exact cosine search over vectors persisted in a directory
pub struct LocalIndex {
    dir: PathBuf,
    entries: RwLock<Vec<IndexedChunk>>,
}

impl LocalIndex {
    /// Open the index in `dir`, loading whatever was saved there before
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .context(format!("Failed to create index directory: {:?}", dir))?;

        let path = dir.join(INDEX_FILE);
        let entries: Vec<IndexedChunk> = if fs::try_exists(&path).await? {
            let content = fs::read_to_string(&path)
                .await
                .context(format!("Failed to read index file: {:?}", path))?;
            serde_json::from_str(&content).context(format!("Corrupt index file: {:?}", path))?
        } else {
            Vec::new()
        };

        info!(dir = %dir.display(), chunks = entries.len(), "opened local chunk index");
        Ok(Self {
            dir,
            entries: RwLock::new(entries),
        })
    }

    async fn persist(&self, entries: &[IndexedChunk]) -> Result<()> {
        let path = self.dir.join(INDEX_FILE);
        let tmp = self.dir.join(format!("{INDEX_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_vec(entries)?)
            .await
            .context("Failed to write chunk index")?;
        fs::rename(&tmp, &path)
            .await
            .context("Failed to replace chunk index")?;
        Ok(())
    }
}

#[async_trait]
impl ChunkIndex for LocalIndex {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn upsert(&self, new_entries: Vec<IndexedChunk>) -> Result<()> {
        let mut entries = self.entries.write().await;
        let mut next = entries.clone();

        for entry in new_entries {
            match next.iter_mut().find(|e| e.chunk.chunk_id == entry.chunk.chunk_id) {
                Some(existing) => *existing = entry,
                None => next.push(entry),
            }
        }

        self.persist(&next).await?;
        *entries = next;
        Ok(())
    }

    async fn nearest(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let entries = self.entries.read().await;
        let mut scored: Vec<ScoredChunk> = entries
            .iter()
            .map(|e| ScoredChunk {
                chunk: e.chunk.clone(),
                score: cosine_similarity(vector, &e.vector),
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }

    async fn reset(&self) -> Result<()> {
        let mut entries = self.entries.write().await;
        self.persist(&[]).await?;
        entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest::Chunk;

    fn entry(id: &str, vector: Vec<f32>) -> IndexedChunk {
        IndexedChunk {
            chunk: Chunk::new(id.into(), format!("text {id}"), "s.txt".into(), (0, 1)),
            vector,
        }
    }

    #[tokio::test]
    async fn test_nearest_ranks_by_cosine() {
        let dir = tempfile::tempdir().unwrap();
        let index = LocalIndex::open(dir.path()).await.unwrap();
        index
            .upsert(vec![
                entry("x", vec![1.0, 0.0]),
                entry("y", vec![0.0, 1.0]),
                entry("xy", vec![1.0, 1.0]),
            ])
            .await
            .unwrap();

        let results = index.nearest(&[1.0, 0.1], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.doc_id, "x");
        assert_eq!(results[1].chunk.doc_id, "xy");
    }

    #[tokio::test]
    async fn test_reloads_without_reingestion() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = LocalIndex::open(dir.path()).await.unwrap();
            index.upsert(vec![entry("a", vec![1.0])]).await.unwrap();
            // same chunk again replaces instead of duplicating
            index.upsert(vec![entry("a", vec![1.0])]).await.unwrap();
        }

        let reopened = LocalIndex::open(dir.path()).await.unwrap();
        assert_eq!(reopened.len().await.unwrap(), 1);

        reopened.reset().await.unwrap();
        let again = LocalIndex::open(dir.path()).await.unwrap();
        assert_eq!(again.len().await.unwrap(), 0);
    }
}
