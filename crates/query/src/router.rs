use extract::LanguageModel;
use index::{ChunkStore, FactGraph, ScoredChunk};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::decision::{Decision, DecisionMaker, KeywordDecisionMaker, LlmDecisionMaker, Route};
use crate::evidence::{Evidence, GraphEvidence, usable_records};
use crate::prompt::{UNKNOWN_MARKER, build_answer_prompt, build_generation_prompt};
use crate::telemetry::{
    AnswerSource, ChunkHit, FallbackKind, Telemetry, TelemetryEvent, TracingTelemetry,
};

/// Returned when no store and no model could answer
pub const SENTINEL: &str = "Sorry, that info isn't available right now.";

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Chunks retrieved per question
    pub top_k: usize,
    pub llm_timeout: Duration,
    pub store_timeout: Duration,
    /// Consult the chunk store when a graph question finds nothing
    pub escalate_to_chunks: bool,
    pub max_graph_rows: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            llm_timeout: Duration::from_secs(60),
            store_timeout: Duration::from_secs(15),
            escalate_to_chunks: true,
            max_graph_rows: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub trace_id: Uuid,
    pub text: String,
    pub route: Route,
    pub source: AnswerSource,
}

/// Answers questions from the fact graph, the chunk store or the model.
pub struct Router {
    graph: Arc<FactGraph>,
    chunks: Arc<ChunkStore>,
    model: Arc<dyn LanguageModel>,
    decider: Arc<dyn DecisionMaker>,
    telemetry: Arc<dyn Telemetry>,
    config: RouterConfig,
}

impl Router {
    pub fn new(
        graph: Arc<FactGraph>,
        chunks: Arc<ChunkStore>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            graph,
            chunks,
            decider: Arc::new(LlmDecisionMaker::new(model.clone())),
            model,
            telemetry: Arc::new(TracingTelemetry),
            config: RouterConfig::default(),
        }
    }

    pub fn with_decision_maker(mut self, decider: Arc<dyn DecisionMaker>) -> Self {
        self.decider = decider;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Answer text only; never fails
    pub async fn ask(&self, question: &str) -> String {
        self.answer(question).await.text
    }

    pub async fn answer(&self, question: &str) -> Answer {
        let started = Instant::now();
        let trace_id = Uuid::new_v4();
        let question = question.trim();
        self.emit(TelemetryEvent::Question {
            trace_id,
            question: question.to_string(),
        });

        if question.is_empty() {
            return self.finish(
                trace_id,
                started,
                Route::Generate,
                AnswerSource::Sentinel,
                SENTINEL.to_string(),
            );
        }

        let decision = self.decide(question).await;
        self.emit(TelemetryEvent::Decision {
            trace_id,
            route: decision.route,
            source: decision.source,
            cypher: decision.cypher.clone(),
        });

        let evidence = self.gather(trace_id, question, &decision).await;

        if evidence.is_empty() {
            self.emit(TelemetryEvent::Fallback {
                trace_id,
                kind: FallbackKind::Generation,
            });
            let (source, text) = match self.generate_directly(question).await {
                Some(text) => (AnswerSource::Generation, text),
                None => (AnswerSource::Sentinel, SENTINEL.to_string()),
            };
            return self.finish(trace_id, started, decision.route, source, text);
        }

        let source = match (evidence.graph.is_some(), evidence.chunks.is_empty()) {
            (true, true) => AnswerSource::Graph,
            (true, false) => AnswerSource::GraphAndChunks,
            _ => AnswerSource::Chunks,
        };
        let text = self.synthesize(question, &evidence).await;
        self.finish(trace_id, started, decision.route, source, text)
    }

    async fn decide(&self, question: &str) -> Decision {
        let schema = self.graph.schema_description();
        match timeout(self.config.llm_timeout, self.decider.decide(question, &schema)).await {
            Ok(decision) => decision.settle(),
            Err(_) => {
                warn!(
                    timeout = ?self.config.llm_timeout,
                    "routing decision timed out, using keyword routing"
                );
                KeywordDecisionMaker.classify(question)
            }
        }
    }

    async fn gather(&self, trace_id: Uuid, question: &str, decision: &Decision) -> Evidence {
        let search = decision.search.as_deref().unwrap_or(question);
        let cypher = decision.cypher.as_deref();

        let mut evidence = match decision.route {
            Route::Graph => Evidence {
                graph: self.graph_evidence(trace_id, cypher).await,
                chunks: Vec::new(),
            },
            Route::Vector => Evidence {
                graph: None,
                chunks: self.chunk_evidence(trace_id, search).await,
            },
            Route::Both => {
                let (graph, chunks) = tokio::join!(
                    self.graph_evidence(trace_id, cypher),
                    self.chunk_evidence(trace_id, search)
                );
                Evidence { graph, chunks }
            }
            Route::Generate => Evidence::default(),
        };

        if evidence.is_empty() && decision.route == Route::Graph && self.config.escalate_to_chunks {
            debug!("graph had no evidence, escalating to chunk store");
            self.emit(TelemetryEvent::Fallback {
                trace_id,
                kind: FallbackKind::Escalation,
            });
            evidence.chunks = self.chunk_evidence(trace_id, search).await;
        }

        evidence
    }

    /// Store errors become diagnostics here and count as no evidence
    async fn graph_evidence(&self, trace_id: Uuid, cypher: Option<&str>) -> Option<GraphEvidence> {
        let cypher = cypher?;
        let started = Instant::now();

        let outcome = match timeout(self.config.store_timeout, self.graph.query(cypher)).await {
            Ok(Ok(records)) => Ok(records),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("graph query timed out after {:?}", self.config.store_timeout)),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(records) => {
                let mut records = usable_records(records);
                records.truncate(self.config.max_graph_rows);
                self.emit(TelemetryEvent::GraphQuery {
                    trace_id,
                    cypher: cypher.to_string(),
                    rows: records.len(),
                    records: records.clone(),
                    error: None,
                    elapsed_ms,
                });
                (!records.is_empty()).then(|| GraphEvidence {
                    cypher: cypher.to_string(),
                    records,
                })
            }
            Err(diagnostic) => {
                warn!(cypher = %cypher, error = %diagnostic, "graph query failed");
                self.emit(TelemetryEvent::GraphQuery {
                    trace_id,
                    cypher: cypher.to_string(),
                    rows: 0,
                    records: Vec::new(),
                    error: Some(diagnostic),
                    elapsed_ms,
                });
                None
            }
        }
    }

    async fn chunk_evidence(&self, trace_id: Uuid, query: &str) -> Vec<ScoredChunk> {
        let started = Instant::now();

        let search = self.chunks.search_unique(query, self.config.top_k);
        let outcome = match timeout(self.config.store_timeout, search).await {
            Ok(Ok(results)) => Ok(results),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(_) => Err(format!("chunk search timed out after {:?}", self.config.store_timeout)),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let (results, error) = match outcome {
            Ok(results) => (results, None),
            Err(diagnostic) => {
                warn!(error = %diagnostic, "chunk search failed");
                (Vec::new(), Some(diagnostic))
            }
        };

        self.emit(TelemetryEvent::ChunkQuery {
            trace_id,
            query: query.to_string(),
            results: results.len(),
            hits: results.iter().map(ChunkHit::from).collect(),
            error,
            elapsed_ms,
        });
        results
    }

    /// Answer from evidence, or the evidence itself when the model can't
    async fn synthesize(&self, question: &str, evidence: &Evidence) -> String {
        let prompt = build_answer_prompt(question, &evidence.render());
        match timeout(self.config.llm_timeout, self.model.generate(&prompt)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(Ok(_)) => {
                warn!("model returned an empty answer, answering with the evidence");
                evidence.plain_answer()
            }
            Ok(Err(e)) => {
                warn!(error = %e, "answer synthesis failed, answering with the evidence");
                evidence.plain_answer()
            }
            Err(_) => {
                warn!(
                    timeout = ?self.config.llm_timeout,
                    "answer synthesis timed out, answering with the evidence"
                );
                evidence.plain_answer()
            }
        }
    }

    /// The single generation attempt made when no store had evidence
    async fn generate_directly(&self, question: &str) -> Option<String> {
        let prompt = build_generation_prompt(question);
        match timeout(self.config.llm_timeout, self.model.generate(&prompt)).await {
            Ok(Ok(text)) => {
                let text = text.trim();
                (!text.is_empty() && !text.starts_with(UNKNOWN_MARKER)).then(|| text.to_string())
            }
            Ok(Err(e)) => {
                warn!(error = %e, "generation fallback failed");
                None
            }
            Err(_) => {
                warn!(timeout = ?self.config.llm_timeout, "generation fallback timed out");
                None
            }
        }
    }

    fn finish(
        &self,
        trace_id: Uuid,
        started: Instant,
        route: Route,
        source: AnswerSource,
        text: String,
    ) -> Answer {
        self.emit(TelemetryEvent::Answer {
            trace_id,
            source,
            answer: text.clone(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        });
        Answer {
            trace_id,
            text,
            route,
            source,
        }
    }

    fn emit(&self, event: TelemetryEvent) {
        if let Err(e) = self.telemetry.record(&event) {
            warn!(error = %e, "telemetry sink failed");
        }
    }
}
