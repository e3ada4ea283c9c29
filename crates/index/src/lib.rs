pub mod cache;
pub mod chunk_store;
pub mod cypher_lite;
pub mod embeddings;
pub mod error;
pub mod graph_store;
pub mod local_index;
pub mod memory_backend;
pub mod neo4j_backend;
pub mod pipeline;
pub mod qdrant_index;
pub mod relations;
pub mod write_plan;

pub use cache::{CacheStats, CachedEmbedder, EmbeddingCache};
pub use chunk_store::{ChunkIndex, ChunkStore, IndexedChunk, ScoredChunk};
pub use embeddings::{Embedder, EmbeddingClient};
pub use error::GraphError;
pub use graph_store::{FactGraph, GraphBackend, GraphStats, Record, UpsertReport};
pub use local_index::LocalIndex;
pub use memory_backend::MemoryBackend;
pub use neo4j_backend::{Neo4jBackend, Neo4jConfig};
pub use pipeline::{IngestPipeline, IngestStats};
pub use qdrant_index::QdrantIndex;
pub use relations::{RelationShape, RelationWhitelist};
pub use write_plan::{SkipReason, SkippedRelation};
