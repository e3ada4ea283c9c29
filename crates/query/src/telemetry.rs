use anyhow::Result;
use index::{Record, ScoredChunk};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::decision::{DecisionSource, Route};

/// Where the final answer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSource {
    Graph,
    Chunks,
    GraphAndChunks,
    Generation,
    Sentinel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackKind {
    /// graph had nothing, chunk store consulted
    Escalation,
    /// no store had evidence, model answers from the question alone
    Generation,
}

/// A retrieved passage as it was handed to answer synthesis
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkHit {
    pub chunk_id: String,
    pub filename: String,
    pub score: f32,
    pub text: String,
}

impl From<&ScoredChunk> for ChunkHit {
    fn from(hit: &ScoredChunk) -> Self {
        Self {
            chunk_id: hit.chunk.chunk_id.clone(),
            filename: hit.chunk.filename().to_string(),
            score: hit.score,
            text: hit.chunk.text.clone(),
        }
    }
}

/// One step of answering a question. Events of the same question share a `trace_id`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    Question {
        trace_id: Uuid,
        question: String,
    },
    Decision {
        trace_id: Uuid,
        route: Route,
        source: DecisionSource,
        cypher: Option<String>,
    },
    GraphQuery {
        trace_id: Uuid,
        cypher: String,
        rows: usize,
        /// rows kept as evidence, after dropping empty ones and truncation
        records: Vec<Record>,
        error: Option<String>,
        elapsed_ms: u64,
    },
    ChunkQuery {
        trace_id: Uuid,
        query: String,
        results: usize,
        hits: Vec<ChunkHit>,
        error: Option<String>,
        elapsed_ms: u64,
    },
    Fallback {
        trace_id: Uuid,
        kind: FallbackKind,
    },
    Answer {
        trace_id: Uuid,
        source: AnswerSource,
        answer: String,
        elapsed_ms: u64,
    },
}

/// Sink for router events. Errors are logged by the caller and otherwise ignored.
pub trait Telemetry: Send + Sync {
    fn record(&self, event: &TelemetryEvent) -> Result<()>;
}

/// Emits every event as a structured tracing event
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn record(&self, event: &TelemetryEvent) -> Result<()> {
        match event {
            TelemetryEvent::Question { trace_id, question } => {
                info!(%trace_id, question = %question, "question received")
            }
            TelemetryEvent::Decision { trace_id, route, source, cypher } => {
                let cypher = cypher.as_deref().unwrap_or("");
                info!(%trace_id, %route, ?source, cypher, "route chosen")
            }
            TelemetryEvent::GraphQuery {
                trace_id,
                cypher,
                rows,
                records,
                error: None,
                elapsed_ms,
            } => {
                let records = serde_json::to_string(records)?;
                info!(%trace_id, %cypher, rows, elapsed_ms, %records, "graph query")
            }
            TelemetryEvent::GraphQuery { trace_id, cypher, error: Some(error), .. } => {
                warn!(%trace_id, cypher = %cypher, error = %error, "graph query failed")
            }
            TelemetryEvent::ChunkQuery {
                trace_id,
                query,
                results,
                hits,
                error: None,
                elapsed_ms,
            } => {
                let hits = serde_json::to_string(hits)?;
                info!(%trace_id, %query, results, elapsed_ms, %hits, "chunk query")
            }
            TelemetryEvent::ChunkQuery { trace_id, error: Some(error), .. } => {
                warn!(%trace_id, error = %error, "chunk query failed")
            }
            TelemetryEvent::Fallback { trace_id, kind } => info!(%trace_id, ?kind, "fallback"),
            TelemetryEvent::Answer { trace_id, source, answer, elapsed_ms } => {
                info!(%trace_id, ?source, chars = answer.len(), elapsed_ms, "answered")
            }
        }
        Ok(())
    }
}

/// Forwards each event to every sink; one failing sink does not stop the rest
#[derive(Default, Clone)]
pub struct TelemetryFanout {
    sinks: Vec<Arc<dyn Telemetry>>,
}

impl TelemetryFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn Telemetry>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl Telemetry for TelemetryFanout {
    fn record(&self, event: &TelemetryEvent) -> Result<()> {
        let failures: Vec<String> = self
            .sinks
            .iter()
            .filter_map(|sink| sink.record(event).err())
            .map(|e| e.to_string())
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("{} telemetry sink(s) failed: {}", failures.len(), failures.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl Telemetry for Counting {
        fn record(&self, _event: &TelemetryEvent) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Broken;

    impl Telemetry for Broken {
        fn record(&self, _event: &TelemetryEvent) -> Result<()> {
            anyhow::bail!("collector unreachable")
        }
    }

    #[test]
    fn test_fanout_reaches_all_sinks_despite_failure() {
        let counting = Arc::new(Counting::default());
        let fanout = TelemetryFanout::new()
            .with(Arc::new(Broken))
            .with(counting.clone());

        let event = TelemetryEvent::Fallback {
            trace_id: Uuid::new_v4(),
            kind: FallbackKind::Generation,
        };
        assert!(fanout.record(&event).is_err());
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tool_results_are_serialized_raw() {
        let mut record = Record::new();
        record.insert("ceo".into(), serde_json::json!("Tim Cook"));
        let event = TelemetryEvent::GraphQuery {
            trace_id: Uuid::nil(),
            cypher: "MATCH (p:Person) RETURN p.name AS ceo".into(),
            rows: 1,
            records: vec![record],
            error: None,
            elapsed_ms: 3,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "graph_query");
        assert_eq!(value["records"][0]["ceo"], "Tim Cook");
        assert!(TracingTelemetry.record(&event).is_ok());

        let event = TelemetryEvent::ChunkQuery {
            trace_id: Uuid::nil(),
            query: "strategy".into(),
            results: 1,
            hits: vec![ChunkHit {
                chunk_id: "c1".into(),
                filename: "apple.txt".into(),
                score: 0.5,
                text: "Apple grows services.".into(),
            }],
            error: None,
            elapsed_ms: 1,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["hits"][0]["text"], "Apple grows services.");
        assert_eq!(value["hits"][0]["filename"], "apple.txt");
    }

    #[test]
    fn test_events_serialize_with_tag() {
        let event = TelemetryEvent::Fallback {
            trace_id: Uuid::nil(),
            kind: FallbackKind::Escalation,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "fallback");
        assert_eq!(value["kind"], "escalation");
    }
}
