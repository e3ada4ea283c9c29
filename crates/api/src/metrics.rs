use query::{AnswerSource, FallbackKind, Route, Telemetry, TelemetryEvent};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Router counters, fed by telemetry events
pub struct Metrics {
    questions: AtomicUsize,
    graph_routes: AtomicUsize,
    vector_routes: AtomicUsize,
    both_routes: AtomicUsize,
    generate_routes: AtomicUsize,
    graph_queries: AtomicUsize,
    graph_errors: AtomicUsize,
    chunk_queries: AtomicUsize,
    chunk_errors: AtomicUsize,
    escalations: AtomicUsize,
    generation_fallbacks: AtomicUsize,
    sentinel_answers: AtomicUsize,
    answers: AtomicUsize,
    ingest_runs: AtomicUsize,

    // Timing (in microseconds)
    total_graph_time_us: AtomicU64,
    total_chunk_time_us: AtomicU64,
    total_answer_time_us: AtomicU64,
    total_ingest_time_us: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            questions: AtomicUsize::new(0),
            graph_routes: AtomicUsize::new(0),
            vector_routes: AtomicUsize::new(0),
            both_routes: AtomicUsize::new(0),
            generate_routes: AtomicUsize::new(0),
            graph_queries: AtomicUsize::new(0),
            graph_errors: AtomicUsize::new(0),
            chunk_queries: AtomicUsize::new(0),
            chunk_errors: AtomicUsize::new(0),
            escalations: AtomicUsize::new(0),
            generation_fallbacks: AtomicUsize::new(0),
            sentinel_answers: AtomicUsize::new(0),
            answers: AtomicUsize::new(0),
            ingest_runs: AtomicUsize::new(0),
            total_graph_time_us: AtomicU64::new(0),
            total_chunk_time_us: AtomicU64::new(0),
            total_answer_time_us: AtomicU64::new(0),
            total_ingest_time_us: AtomicU64::new(0),
        })
    }

    pub fn record_ingest(&self, duration: Duration) {
        self.ingest_runs.fetch_add(1, Ordering::Relaxed);
        self.total_ingest_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            questions: self.questions.load(Ordering::Relaxed),
            graph_routes: self.graph_routes.load(Ordering::Relaxed),
            vector_routes: self.vector_routes.load(Ordering::Relaxed),
            both_routes: self.both_routes.load(Ordering::Relaxed),
            generate_routes: self.generate_routes.load(Ordering::Relaxed),
            graph_queries: self.graph_queries.load(Ordering::Relaxed),
            graph_errors: self.graph_errors.load(Ordering::Relaxed),
            chunk_queries: self.chunk_queries.load(Ordering::Relaxed),
            chunk_errors: self.chunk_errors.load(Ordering::Relaxed),
            escalations: self.escalations.load(Ordering::Relaxed),
            generation_fallbacks: self.generation_fallbacks.load(Ordering::Relaxed),
            sentinel_answers: self.sentinel_answers.load(Ordering::Relaxed),
            ingest_runs: self.ingest_runs.load(Ordering::Relaxed),
            avg_graph_query_ms: avg_time_ms(&self.total_graph_time_us, &self.graph_queries),
            avg_chunk_query_ms: avg_time_ms(&self.total_chunk_time_us, &self.chunk_queries),
            avg_answer_ms: avg_time_ms(&self.total_answer_time_us, &self.answers),
            avg_ingest_ms: avg_time_ms(&self.total_ingest_time_us, &self.ingest_runs),
        }
    }
}

fn avg_time_ms(total_us: &AtomicU64, count: &AtomicUsize) -> f64 {
    let total = total_us.load(Ordering::Relaxed) as f64;
    let cnt = count.load(Ordering::Relaxed) as f64;
    if cnt > 0.0 {
        total / cnt / 1000.0 // Convert to ms
    } else {
        0.0
    }
}

fn add_ms(slot: &AtomicU64, elapsed_ms: u64) {
    slot.fetch_add(elapsed_ms.saturating_mul(1000), Ordering::Relaxed);
}

impl Telemetry for Metrics {
    fn record(&self, event: &TelemetryEvent) -> anyhow::Result<()> {
        match event {
            TelemetryEvent::Question { .. } => {
                self.questions.fetch_add(1, Ordering::Relaxed);
            }
            TelemetryEvent::Decision { route, .. } => {
                let counter = match route {
                    Route::Graph => &self.graph_routes,
                    Route::Vector => &self.vector_routes,
                    Route::Both => &self.both_routes,
                    Route::Generate => &self.generate_routes,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
            TelemetryEvent::GraphQuery { error, elapsed_ms, .. } => {
                self.graph_queries.fetch_add(1, Ordering::Relaxed);
                if error.is_some() {
                    self.graph_errors.fetch_add(1, Ordering::Relaxed);
                }
                add_ms(&self.total_graph_time_us, *elapsed_ms);
            }
            TelemetryEvent::ChunkQuery { error, elapsed_ms, .. } => {
                self.chunk_queries.fetch_add(1, Ordering::Relaxed);
                if error.is_some() {
                    self.chunk_errors.fetch_add(1, Ordering::Relaxed);
                }
                add_ms(&self.total_chunk_time_us, *elapsed_ms);
            }
            TelemetryEvent::Fallback { kind, .. } => {
                let counter = match kind {
                    FallbackKind::Escalation => &self.escalations,
                    FallbackKind::Generation => &self.generation_fallbacks,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
            TelemetryEvent::Answer { source, elapsed_ms, .. } => {
                self.answers.fetch_add(1, Ordering::Relaxed);
                if *source == AnswerSource::Sentinel {
                    self.sentinel_answers.fetch_add(1, Ordering::Relaxed);
                }
                add_ms(&self.total_answer_time_us, *elapsed_ms);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub questions: usize,
    pub graph_routes: usize,
    pub vector_routes: usize,
    pub both_routes: usize,
    pub generate_routes: usize,
    pub graph_queries: usize,
    pub graph_errors: usize,
    pub chunk_queries: usize,
    pub chunk_errors: usize,
    pub escalations: usize,
    pub generation_fallbacks: usize,
    pub sentinel_answers: usize,
    pub ingest_runs: usize,
    pub avg_graph_query_ms: f64,
    pub avg_chunk_query_ms: f64,
    pub avg_answer_ms: f64,
    pub avg_ingest_ms: f64,
}
