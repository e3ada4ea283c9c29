use anyhow::{Context, Result};
use extract::{Extractor, LanguageModel, OllamaClient};
use index::{
    CachedEmbedder, ChunkIndex, ChunkStore, Embedder, EmbeddingClient, FactGraph, IngestPipeline,
    LocalIndex, MemoryBackend, QdrantIndex, RelationWhitelist,
};
use query::{Router, TelemetryFanout, TracingTelemetry};
use std::sync::Arc;
use tracing::info;

use crate::config::{AppConfig, GraphBackendKind, VectorBackendKind};
use crate::metrics::Metrics;

/// Everything the binary serves, wired from one configuration
pub struct App {
    pub config: AppConfig,
    pub graph: Arc<FactGraph>,
    pub chunks: Arc<ChunkStore>,
    pub pipeline: Arc<IngestPipeline>,
    pub router: Arc<Router>,
    pub metrics: Arc<Metrics>,
    pub query_embedder: Arc<CachedEmbedder>,
}

impl App {
    /// Connect to the configured backends. A graph that cannot be reached is fatal.
    pub async fn build(config: AppConfig) -> Result<Self> {
        let relations = RelationWhitelist::with_extra(&config.graph.extra_relations)
            .context("Invalid GRAPH_EXTRA_RELATIONS")?;

        let graph = match config.graph.backend {
            GraphBackendKind::Neo4j => FactGraph::connect_neo4j(&config.neo4j(), relations)
                .await
                .context("Failed to connect to Neo4j")?,
            GraphBackendKind::Memory => match &config.graph.snapshot_path {
                Some(path) => {
                    let backend = MemoryBackend::persistent(path).await?;
                    FactGraph::new(Arc::new(backend), relations)
                }
                None => FactGraph::in_memory(relations),
            },
        };

        let index: Arc<dyn ChunkIndex> = match config.vector.backend {
            VectorBackendKind::Local => Arc::new(LocalIndex::open(&config.vector.path).await?),
            VectorBackendKind::Qdrant => Arc::new(QdrantIndex::new(
                config.vector.qdrant_url.clone(),
                config.vector.collection.clone(),
            )),
        };

        let model = Arc::new(
            OllamaClient::new(config.llm.base_url.clone(), config.llm.model.clone())
                .with_api_key(config.llm.api_key.clone())
                .with_temperature(config.llm.temperature),
        );
        let embedder = Arc::new(EmbeddingClient::new(
            config.embedding.base_url.clone(),
            config.embedding.model.clone(),
        ));

        info!(
            graph = graph.backend_name(),
            index = index.name(),
            model = %config.llm.model,
            embedding_model = %config.embedding.model,
            "backends ready"
        );
        Ok(Self::assemble(config, Arc::new(graph), index, model, embedder))
    }

    /// Wire already-constructed collaborators
    pub fn assemble(
        config: AppConfig,
        graph: Arc<FactGraph>,
        index: Arc<dyn ChunkIndex>,
        model: Arc<dyn LanguageModel>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        // ingestion embeds each chunk once; questions repeat, so only they go through the cache
        let ingest_chunks = Arc::new(ChunkStore::new(embedder.clone(), index.clone()));
        let query_embedder =
            Arc::new(CachedEmbedder::new(embedder, config.embedding.cache_entries));
        let query_chunks = Arc::new(ChunkStore::new(query_embedder.clone(), index));

        let extractor = Extractor::new(model.clone())
            .with_timeout(config.llm_timeout())
            .with_retry(config.retry_policy());
        let pipeline = Arc::new(IngestPipeline::new(
            graph.clone(),
            ingest_chunks.clone(),
            extractor,
            config.chunker(),
        ));

        let metrics = Metrics::new();
        let telemetry = TelemetryFanout::new()
            .with(Arc::new(TracingTelemetry))
            .with(metrics.clone());
        let router = Arc::new(
            Router::new(graph.clone(), query_chunks, model)
                .with_telemetry(Arc::new(telemetry))
                .with_config(config.router_config()),
        );

        Self {
            config,
            graph,
            chunks: ingest_chunks,
            pipeline,
            router,
            metrics,
            query_embedder,
        }
    }
}
