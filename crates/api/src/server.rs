use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use index::{CacheStats, GraphStats, IngestStats};
use query::{AnswerSource, Route};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::app::App;
use crate::metrics::MetricsSnapshot;

/// Error body returned by every handler
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn internal(err: impl std::fmt::Display) -> Self {
        error!(error = %err, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    graph_backend: &'static str,
    graph: String,
    chunk_index: &'static str,
    chunks: String,
}

#[derive(Deserialize)]
struct IngestRequest {
    /// Defaults to the configured document directory
    path: Option<String>,
    #[serde(default)]
    fresh: bool,
}

#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
    route: Route,
    source: AnswerSource,
    trace_id: Uuid,
}

#[derive(Serialize)]
struct StatsResponse {
    graph: GraphStats,
    chunks: usize,
    router: MetricsSnapshot,
    embedding_cache: CacheStats,
}

pub fn build_router(app: Arc<App>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ingest", post(ingest_documents))
        .route("/ask", post(ask_question))
        .route("/stats", get(get_stats))
        .with_state(app)
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(app: Arc<App>, addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;

    info!("Server listening on http://{}", addr);
    axum::serve(listener, build_router(app)).await?;
    Ok(())
}

async fn health_check(State(app): State<Arc<App>>) -> Json<HealthResponse> {
    let graph = match app.graph.stats().await {
        Ok(_) => "ok".to_string(),
        Err(e) => format!("error: {}", e),
    };
    let chunks = match app.chunks.len().await {
        Ok(_) => "ok".to_string(),
        Err(e) => format!("error: {}", e),
    };
    let status = if graph == "ok" && chunks == "ok" { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        graph_backend: app.graph.backend_name(),
        graph,
        chunk_index: app.chunks.index_name(),
        chunks,
    })
}

async fn ingest_documents(
    State(app): State<Arc<App>>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestStats>, ApiError> {
    let dir = req
        .path
        .map(PathBuf::from)
        .unwrap_or_else(|| app.config.documents.dir.clone());

    if !dir.is_dir() {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("directory not found: {}", dir.display()),
        ));
    }

    let started = Instant::now();
    let stats = app
        .pipeline
        .run(&dir, req.fresh)
        .await
        .map_err(|e| ApiError::internal(format!("{e:#}")))?;
    app.metrics.record_ingest(started.elapsed());

    Ok(Json(stats))
}

async fn ask_question(
    State(app): State<Arc<App>>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    if req.question.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "question must not be empty"));
    }

    let answer = app.router.answer(&req.question).await;
    Ok(Json(AskResponse {
        answer: answer.text,
        route: answer.route,
        source: answer.source,
        trace_id: answer.trace_id,
    }))
}

async fn get_stats(State(app): State<Arc<App>>) -> Result<Json<StatsResponse>, ApiError> {
    let graph = app.graph.stats().await.map_err(ApiError::internal)?;
    let chunks = app.chunks.len().await.map_err(ApiError::internal)?;

    Ok(Json(StatsResponse {
        graph,
        chunks,
        router: app.metrics.snapshot(),
        embedding_cache: app.query_embedder.cache_stats(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use extract::LanguageModel;
    use index::{Embedder, FactGraph, LocalIndex, RelationWhitelist};
    use tower::ServiceExt;

    struct EchoModel;

    #[async_trait]
    impl LanguageModel for EchoModel {
        async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
            if prompt.contains("EVIDENCE:") {
                Ok("from the documents".to_string())
            } else {
                Ok("{}".to_string())
            }
        }

        fn model_name(&self) -> &str {
            "echo"
        }
    }

    struct UnitEmbedder;

    #[async_trait]
    impl Embedder for UnitEmbedder {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(vec![1.0, 0.5])
        }

        fn model_name(&self) -> &str {
            "unit"
        }
    }

    async fn test_app(dir: &std::path::Path) -> Arc<App> {
        let graph = Arc::new(FactGraph::in_memory(RelationWhitelist::baseline()));
        let index = Arc::new(LocalIndex::open(dir.join("index")).await.unwrap());
        let mut config = AppConfig::default();
        config.documents.dir = dir.join("docs");
        Arc::new(App::assemble(config, graph, index, Arc::new(EchoModel), Arc::new(UnitEmbedder)))
    }

    async fn call(app: Arc<App>, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = build_router(app).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_backends() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path()).await;
        let (status, body) = call(app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["graph_backend"], "memory");
        assert_eq!(body["chunk_index"], "local");
    }

    #[tokio::test]
    async fn test_ingest_then_ask() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        let notes = dir.path().join("docs/notes.txt");
        std::fs::write(notes, "Apple strategy centres on services.").unwrap();
        let app = test_app(dir.path()).await;

        let (status, body) =
            call(app.clone(), post_json("/ingest", json!({ "fresh": true }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["documents"], 1);
        assert_eq!(body["indexed_chunks"], 1);

        let question = json!({ "question": "Summarize Apple's strategy" });
        let (status, body) = call(app.clone(), post_json("/ask", question)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["answer"], "from the documents");
        assert_eq!(body["source"], "chunks");

        let (status, body) = call(app, Request::get("/stats").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["chunks"], 1);
        assert_eq!(body["router"]["questions"], 1);
        assert_eq!(body["router"]["ingest_runs"], 1);
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path()).await;

        let missing = json!({ "path": "/no/such/dir" });
        let (status, body) = call(app.clone(), post_json("/ingest", missing)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("/no/such/dir"));

        let (status, _) = call(app, post_json("/ask", json!({ "question": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
