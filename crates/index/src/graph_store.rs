use async_trait::async_trait;
use extract::{EntityKind, ExtractionResult};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cypher_lite;
use crate::error::GraphError;
use crate::memory_backend::MemoryBackend;
use crate::neo4j_backend::{Neo4jBackend, Neo4jConfig};
use crate::relations::RelationWhitelist;
use crate::write_plan::{NodeRef, SkippedRelation, WriteOp, WritePlan};

/// One result row, column name to value
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Storage engine behind the fact graph.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Declare natural-key uniqueness; must be idempotent
    async fn ensure_constraints(&self) -> Result<(), GraphError>;

    async fn contains(&self, node: &NodeRef) -> Result<bool, GraphError>;

    /// Apply every op or none of them
    async fn apply(&self, ops: &[WriteOp]) -> Result<(), GraphError>;

    async fn read(&self, query: &str) -> Result<Vec<Record>, GraphError>;

    async fn clear(&self) -> Result<(), GraphError>;

    /// Make applied batches durable; backends that commit per batch have nothing to do
    async fn flush(&self) -> Result<(), GraphError> {
        Ok(())
    }
}

/// What one upsert wrote and what it declined to write
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpsertReport {
    pub nodes: usize,
    pub edges: usize,
    pub skipped: Vec<SkippedRelation>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphStats {
    pub nodes: BTreeMap<String, u64>,
    pub relationships: u64,
}

impl GraphStats {
    pub fn total_nodes(&self) -> u64 {
        self.nodes.values().sum()
    }
}

/// Schema-constrained property graph of extracted facts
pub struct FactGraph {
    backend: Arc<dyn GraphBackend>,
    relations: RelationWhitelist,
}

impl FactGraph {
    pub fn new(backend: Arc<dyn GraphBackend>, relations: RelationWhitelist) -> Self {
        Self { backend, relations }
    }

    /// Connect to Neo4j; failure here is fatal for the caller
    pub async fn connect_neo4j(
        config: &Neo4jConfig,
        relations: RelationWhitelist,
    ) -> Result<Self, GraphError> {
        let backend = Neo4jBackend::connect(config).await?;
        Ok(Self::new(Arc::new(backend), relations))
    }

    pub fn in_memory(relations: RelationWhitelist) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), relations)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn relations(&self) -> &RelationWhitelist {
        &self.relations
    }

    /// Safe to call on every startup
    pub async fn ensure_schema(&self) -> Result<(), GraphError> {
        self.backend.ensure_constraints().await?;
        info!(backend = self.backend.name(), "graph schema ensured");
        Ok(())
    }

    /// Merge one extraction batch atomically.
    ///
    /// Unsupported or unresolvable relationships are skipped, logged and
    /// listed in the report; they never fail the batch.
    pub async fn upsert(&self, result: &ExtractionResult) -> Result<UpsertReport, GraphError> {
        let mut plan = WritePlan::compile(result, &self.relations);

        let mut missing = HashSet::new();
        for node in plan.external_endpoints() {
            if !self.backend.contains(&node).await? {
                missing.insert(node);
            }
        }
        plan.drop_dangling(&missing);

        let nodes = plan.node_count();
        let edges = plan.edge_count();
        let (ops, skipped) = plan.into_parts();

        for skip in &skipped {
            warn!(
                source = %skip.source,
                relationship = %skip.relationship_type,
                target = %skip.target,
                reason = %skip.reason,
                "skipping relationship"
            );
        }

        if !ops.is_empty() {
            self.backend.apply(&ops).await?;
        }
        debug!(nodes, edges, skipped = skipped.len(), "upserted extraction batch");

        Ok(UpsertReport { nodes, edges, skipped })
    }

    /// Run a read-only query
    pub async fn query(&self, text: &str) -> Result<Vec<Record>, GraphError> {
        cypher_lite::ensure_read_only(text).map_err(|message| GraphError::query(text, message))?;
        self.backend.read(text).await
    }

    /// Delete every node and relationship
    pub async fn reset(&self) -> Result<(), GraphError> {
        self.backend.clear().await?;
        info!(backend = self.backend.name(), "graph store reset");
        Ok(())
    }

    /// Persist everything upserted so far
    pub async fn flush(&self) -> Result<(), GraphError> {
        self.backend.flush().await
    }

    pub async fn stats(&self) -> Result<GraphStats, GraphError> {
        let mut stats = GraphStats::default();
        for kind in EntityKind::ALL {
            let query = format!("MATCH (n:{}) RETURN count(n) AS count", kind.label());
            stats.nodes.insert(kind.label().to_string(), self.count(&query).await?);
        }
        stats.relationships = self.count("MATCH ()-[r]->() RETURN count(r) AS count").await?;
        Ok(stats)
    }

    async fn count(&self, query: &str) -> Result<u64, GraphError> {
        let rows = self.backend.read(query).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(|value| value.as_u64())
            .unwrap_or(0))
    }

    /// Labels, properties and relationship shapes, for query generation
    pub fn schema_description(&self) -> String {
        let mut description = String::from("Node labels (all property values are strings):\n");
        for kind in EntityKind::ALL {
            let key = kind.key_properties().join(", ");
            let attributes = kind.attribute_properties().join(", ");
            description.push_str(&format!(
                "- {} {{key: {}; attributes: {}}}\n",
                kind.label(),
                key,
                attributes
            ));
        }

        description.push_str("Relationships:\n");
        for shape in self.relations.shapes() {
            description.push_str(&format!("- {shape} {{context}}\n"));
        }
        description.push_str(&format!(
            "Unknown values are stored as the string '{}'.\n",
            extract::NOT_AVAILABLE
        ));
        description
    }
}
