use anyhow::{Context, Result};
use async_trait::async_trait;
use ingest::Chunk;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::chunk_store::{ChunkIndex, IndexedChunk, ScoredChunk};

/// Chunk index backed by a Qdrant collection over its REST API
pub struct QdrantIndex {
    base_url: String,
    client: reqwest::Client,
    collection_name: String,
    ready: Mutex<bool>,
}

#[derive(Serialize)]
struct CreateCollection {
    vectors: VectorParams,
}

#[derive(Serialize)]
struct VectorParams {
    size: usize,
    distance: String,
}

#[derive(Serialize)]
struct UpsertPoints {
    points: Vec<Point>,
}

#[derive(Serialize)]
struct Point {
    id: String,
    vector: Vec<f32>,
    payload: Chunk,
}

#[derive(Deserialize)]
struct CollectionList {
    result: CollectionListResult,
}

#[derive(Deserialize)]
struct CollectionListResult {
    collections: Vec<CollectionName>,
}

#[derive(Deserialize)]
struct CollectionName {
    name: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    score: f32,
    payload: Chunk,
}

impl QdrantIndex {
    pub fn new(base_url: String, collection_name: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            collection_name,
            ready: Mutex::new(false),
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection_name)
    }

    async fn collection_exists(&self) -> Result<bool> {
        let url = format!("{}/collections", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to reach Qdrant")?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to list collections: {}", response.status());
        }

        let info: CollectionList = response.json().await?;
        Ok(info.result.collections.iter().any(|c| c.name == self.collection_name))
    }

    /// Create the collection on first write, sized to the vectors we store
    async fn ensure_collection(&self, dimension: usize) -> Result<()> {
        let mut ready = self.ready.lock().await;
        if *ready {
            return Ok(());
        }

        if !self.collection_exists().await? {
            let create_req = CreateCollection {
                vectors: VectorParams {
                    size: dimension,
                    distance: "Cosine".to_string(),
                },
            };

            let response = self
                .client
                .put(self.collection_url())
                .json(&create_req)
                .send()
                .await?;

            if !response.status().is_success() {
                let error_text = response.text().await?;
                anyhow::bail!("Failed to create collection: {}", error_text);
            }
            info!(collection = %self.collection_name, dimension, "created Qdrant collection");
        }

        *ready = true;
        Ok(())
    }
}

/// Qdrant ids must be integers or UUIDs; chunk ids are 32 hex chars
fn point_id(chunk_id: &str) -> String {
    match Uuid::try_parse(chunk_id) {
        Ok(uuid) => uuid.to_string(),
        Err(_) => Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes()).to_string(),
    }
}

#[async_trait]
impl ChunkIndex for QdrantIndex {
    fn name(&self) -> &'static str {
        "qdrant"
    }

    async fn upsert(&self, entries: Vec<IndexedChunk>) -> Result<()> {
        let Some(first) = entries.first() else {
            return Ok(());
        };
        self.ensure_collection(first.vector.len()).await?;

        let points = entries
            .into_iter()
            .map(|e| Point {
                id: point_id(&e.chunk.chunk_id),
                vector: e.vector,
                payload: e.chunk,
            })
            .collect();

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&UpsertPoints { points })
            .send()
            .await
            .context("Failed to send upsert request to Qdrant")?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            anyhow::bail!("Failed to upsert points: {}", error_text);
        }
        Ok(())
    }

    async fn nearest(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let body = json!({
            "vector": vector,
            "limit": k,
            "with_payload": true
        });

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&body)
            .send()
            .await
            .context("Failed to send search request to Qdrant")?;

        // a collection that was never written to has nothing to find
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            anyhow::bail!("Qdrant search failed: {}", error_text);
        }

        let result: SearchResponse = response
            .json()
            .await
            .context("Failed to parse Qdrant response")?;

        Ok(result
            .result
            .into_iter()
            .map(|hit| ScoredChunk {
                chunk: hit.payload,
                score: hit.score,
            })
            .collect())
    }

    async fn len(&self) -> Result<usize> {
        let response = self.client.get(self.collection_url()).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(0);
        }
        if !response.status().is_success() {
            anyhow::bail!("Failed to get collection info: {}", response.status());
        }

        let info: serde_json::Value = response.json().await?;
        Ok(info["result"]["points_count"].as_u64().unwrap_or(0) as usize)
    }

    async fn reset(&self) -> Result<()> {
        let mut ready = self.ready.lock().await;
        let response = self.client.delete(self.collection_url()).send().await?;
        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            anyhow::bail!("Failed to delete collection: {}", response.status());
        }
        *ready = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_id_from_chunk_id() {
        let chunk = Chunk::new("d".into(), "t".into(), "s".into(), (0, 1));
        let id = point_id(&chunk.chunk_id);
        assert_eq!(id.replace('-', ""), chunk.chunk_id);
        assert_eq!(point_id("not-hex"), point_id("not-hex"));
    }
}
