use anyhow::{Context, Result};
use extract::Extractor;
use ingest::ChunkerConfig;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::chunk_store::ChunkStore;
use crate::graph_store::FactGraph;

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestStats {
    pub documents: usize,
    pub chunks: usize,
    pub total_chars: usize,
    pub indexed_chunks: usize,
    pub companies: usize,
    pub persons: usize,
    pub financial_figures: usize,
    pub projects: usize,
    pub deadlines: usize,
    pub relationships: usize,
    pub skipped_relationships: usize,
    pub empty_extractions: usize,
    pub failed_upserts: usize,
    pub elapsed_ms: u64,
}

/// documents -> chunks -> {chunk store, extractor -> fact graph}
pub struct IngestPipeline {
    graph: Arc<FactGraph>,
    chunks: Arc<ChunkStore>,
    extractor: Mutex<Extractor>,
    chunker: ChunkerConfig,
}

impl IngestPipeline {
    pub fn new(
        graph: Arc<FactGraph>,
        chunks: Arc<ChunkStore>,
        extractor: Extractor,
        chunker: ChunkerConfig,
    ) -> Self {
        Self {
            graph,
            chunks,
            extractor: Mutex::new(extractor),
            chunker,
        }
    }

    /// Ingest every supported document under `dir`.
    ///
    /// With `fresh`, both stores are emptied first. Runs are serialized; a
    /// chunk whose extraction or upsert fails is counted and skipped.
    pub async fn run(&self, dir: &Path, fresh: bool) -> Result<IngestStats> {
        let started = Instant::now();
        let mut extractor = self.extractor.lock().await;
        extractor.reset_aliases();

        if fresh {
            self.chunks.reset().await.context("Failed to reset chunk store")?;
            self.graph.reset().await.context("Failed to reset graph store")?;
        }
        self.graph.ensure_schema().await?;

        let corpus = ingest::ingest_directory(dir, &self.chunker).await?;
        let mut stats = IngestStats {
            documents: corpus.documents.len(),
            chunks: corpus.chunks.len(),
            total_chars: corpus.total_chars(),
            ..Default::default()
        };

        stats.indexed_chunks = match self.chunks.add_chunks(&corpus.chunks).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "chunk indexing failed, continuing with graph extraction");
                0
            }
        };

        for (i, chunk) in corpus.chunks.iter().enumerate() {
            let result = extractor.extract(&chunk.text).await;
            if result.is_empty() {
                stats.empty_extractions += 1;
                continue;
            }

            stats.companies += result.companies.len();
            stats.persons += result.persons.len();
            stats.financial_figures += result.financial_figures.len();
            stats.projects += result.projects.len();
            stats.deadlines += result.deadlines.len();
            stats.relationships += result.relationships.len();

            match self.graph.upsert(&result).await {
                Ok(report) => stats.skipped_relationships += report.skipped.len(),
                Err(e) => {
                    stats.failed_upserts += 1;
                    warn!(chunk_id = %chunk.chunk_id, error = %e, "graph upsert failed");
                }
            }

            if (i + 1) % 10 == 0 {
                info!(processed = i + 1, total = corpus.chunks.len(), "extraction progress");
            }
        }

        self.graph.flush().await.context("Failed to persist graph store")?;

        stats.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            documents = stats.documents,
            chunks = stats.chunks,
            relationships = stats.relationships,
            skipped = stats.skipped_relationships,
            elapsed_ms = stats.elapsed_ms,
            "ingestion complete"
        );
        Ok(stats)
    }
}
