use anyhow::Result;
use async_trait::async_trait;
use extract::{Extractor, LanguageModel, RetryPolicy};
use index::{ChunkStore, Embedder, FactGraph, IngestPipeline, LocalIndex, RelationWhitelist};
use ingest::ChunkerConfig;
use std::sync::Arc;

/// Answers extraction prompts from a fixed table keyed by text in the chunk
struct CannedExtractor;

#[async_trait]
impl LanguageModel for CannedExtractor {
    async fn generate(&self, prompt: &str) -> Result<String> {
        if prompt.contains("383.29 billion in 2023") {
            return Ok(r#"{
                "companies": [{"name": "Apple Inc.", "ticker": "AAPL", "industry": "Technology"}],
                "persons": [{"name": "Tim Cook", "title": "CEO"}],
                "financial_figures": [{"metric": "Revenue", "value": 383.29, "unit": "USD billions", "year": 2023}],
                "relationships": [
                    {"source_entity_name": "Apple Inc.", "source_entity_type": "Company",
                     "relationship_type": "HAS_CEO",
                     "target_entity_name": "Tim Cook", "target_entity_type": "Person",
                     "context": "Tim Cook is the CEO of Apple."},
                    {"source_entity_name": "Apple", "source_entity_type": "Company",
                     "relationship_type": "reports revenue",
                     "target_entity_name": "$383.29 billion", "target_entity_type": "FinancialFigure",
                     "context": "2023"},
                    {"source_entity_name": "Tim Cook", "source_entity_type": "Person",
                     "relationship_type": "LIVES_IN",
                     "target_entity_name": "Palo Alto", "target_entity_type": "City",
                     "context": "N/A"}
                ]
            }"#
            .to_string());
        }
        Ok("{}".to_string())
    }

    fn model_name(&self) -> &str {
        "canned"
    }
}

struct LengthEmbedder;

#[async_trait]
impl Embedder for LengthEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(vec![text.len() as f32, 1.0])
    }

    fn model_name(&self) -> &str {
        "length"
    }
}

async fn pipeline(
    index_dir: &std::path::Path,
) -> (Arc<FactGraph>, Arc<ChunkStore>, IngestPipeline) {
    let graph = Arc::new(FactGraph::in_memory(RelationWhitelist::baseline()));
    let index = Arc::new(LocalIndex::open(index_dir).await.unwrap());
    let chunks = Arc::new(ChunkStore::new(Arc::new(LengthEmbedder), index));
    let extractor = Extractor::new(Arc::new(CannedExtractor)).with_retry(RetryPolicy::none());
    let pipeline =
        IngestPipeline::new(graph.clone(), chunks.clone(), extractor, ChunkerConfig::default());
    (graph, chunks, pipeline)
}

fn write_docs(dir: &std::path::Path) {
    let apple = "Tim Cook is the CEO of Apple. Revenue was $383.29 billion in 2023.";
    std::fs::write(dir.join("apple.txt"), apple).unwrap();
    std::fs::write(dir.join("weather.md"), "# Weather\n\nIt rained all week.").unwrap();
}

#[tokio::test]
async fn ingest_builds_graph_and_chunk_index() {
    let docs = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    write_docs(docs.path());

    let (graph, chunks, pipeline) = pipeline(store.path()).await;
    let stats = pipeline.run(docs.path(), false).await.unwrap();

    assert_eq!(stats.documents, 2);
    assert_eq!(stats.chunks, 2);
    assert_eq!(stats.indexed_chunks, 2);
    assert_eq!(stats.empty_extractions, 1);
    assert_eq!(stats.skipped_relationships, 1);
    assert_eq!(stats.failed_upserts, 0);
    assert_eq!(chunks.len().await.unwrap(), 2);

    let rows = graph
        .query("MATCH (c:Company {name: 'Apple Inc'})-[:HAS_CEO]->(p:Person) RETURN p.name AS ceo")
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["ceo"], "Tim Cook");

    // the figure was linked to its company and the alias resolved to the first spelling
    let rows = graph
        .query(
            "MATCH (c:Company)-[:REPORTS_REVENUE]->(f:FinancialFigure) \
             RETURN c.name AS company, f.value AS value, f.company_name AS owner",
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["company"], "Apple Inc");
    assert_eq!(rows[0]["value"], "383.29");
    assert_eq!(rows[0]["owner"], "Apple Inc");
}

#[tokio::test]
async fn ingesting_twice_does_not_duplicate() {
    let docs = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    write_docs(docs.path());

    let (graph, chunks, pipeline) = pipeline(store.path()).await;
    pipeline.run(docs.path(), false).await.unwrap();
    pipeline.run(docs.path(), false).await.unwrap();

    let stats = graph.stats().await.unwrap();
    assert_eq!(stats.nodes["Company"], 1);
    assert_eq!(stats.nodes["Person"], 1);
    assert_eq!(stats.nodes["FinancialFigure"], 1);
    assert_eq!(stats.relationships, 2);
    assert_eq!(chunks.len().await.unwrap(), 2);
}

#[tokio::test]
async fn fresh_run_starts_from_empty_stores() {
    let docs = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    write_docs(docs.path());

    let (graph, chunks, pipeline) = pipeline(store.path()).await;
    pipeline.run(docs.path(), false).await.unwrap();

    std::fs::remove_file(docs.path().join("apple.txt")).unwrap();
    let stats = pipeline.run(docs.path(), true).await.unwrap();

    assert_eq!(stats.documents, 1);
    assert_eq!(graph.stats().await.unwrap().total_nodes(), 0);
    assert_eq!(chunks.len().await.unwrap(), 1);
}
