use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "factgraph.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub graph: GraphConfig,
    pub vector: VectorConfig,
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkingConfig,
    pub documents: DocumentsConfig,
    pub router: RouterSettings,
    pub retry: RetryConfig,
    pub server: ServerConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphBackendKind {
    Neo4j,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub backend: GraphBackendKind,
    pub uri: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub database: String,
    /// Additional `Source:TYPE:Target` shapes on top of the baseline
    pub extra_relations: Vec<String>,
    /// Snapshot file for the memory backend; unset keeps it in memory only
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackendKind {
    Local,
    Qdrant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub backend: VectorBackendKind,
    pub path: PathBuf,
    pub qdrant_url: String,
    pub collection: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub cache_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentsConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    pub top_k: usize,
    pub escalate_to_chunks: bool,
    pub store_timeout_secs: u64,
    pub max_graph_rows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.1:8b".to_string(),
            api_key: None,
            temperature: 0.2,
            timeout_secs: 60,
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            backend: GraphBackendKind::Neo4j,
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: String::new(),
            database: "neo4j".to_string(),
            extra_relations: Vec::new(),
            snapshot_path: None,
        }
    }
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackendKind::Local,
            path: PathBuf::from("data/vector_db"),
            qdrant_url: "http://localhost:6333".to_string(),
            collection: "factgraph_chunks".to_string(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            cache_entries: 10000,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
        }
    }
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/documents"),
        }
    }
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            escalate_to_chunks: true,
            store_timeout_secs: 15,
            max_graph_rows: 50,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10000,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Defaults, then the TOML file, then `.env`, then the process environment.
    ///
    /// The file is `explicit`, else `$FACTGRAPH_CONFIG`, else `factgraph.toml`
    /// when it exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let explicit = explicit
            .map(Path::to_path_buf)
            .or_else(|| env::var("FACTGRAPH_CONFIG").ok().map(PathBuf::from));
        let toml_text = match explicit {
            Some(path) => Some(read_config_file(&path)?),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Some(read_config_file(default_path)?)
                } else {
                    None
                }
            }
        };

        // a missing .env is fine
        let _ = dotenvy::dotenv();

        Self::from_sources(toml_text.as_deref(), |key| env::var(key).ok())
    }

    /// Build from optional TOML text and an environment lookup.
    /// Tests pass a closure instead of touching the process environment.
    pub fn from_sources(
        toml_text: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut config: AppConfig = match toml_text {
            Some(text) => toml::from_str(text).context("Invalid configuration file")?,
            None => AppConfig::default(),
        };
        config.apply_env(&env)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) -> Result<()> {
        let text = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = text("LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = text("LLM_MODEL_NAME") {
            self.llm.model = v;
        }
        if let Some(v) = text("LLM_API_KEY") {
            self.llm.api_key = Some(v);
        }
        override_number(&text, "LLM_TIMEOUT_SECS", &mut self.llm.timeout_secs)?;

        if let Some(v) = text("NEO4J_URI") {
            self.graph.uri = v;
        }
        if let Some(v) = text("NEO4J_USERNAME") {
            self.graph.user = v;
        }
        if let Some(v) = text("NEO4J_PASSWORD") {
            self.graph.password = v;
        }
        if let Some(v) = text("NEO4J_DATABASE") {
            self.graph.database = v;
        }
        if let Some(v) = text("GRAPH_BACKEND") {
            self.graph.backend = match v.to_lowercase().as_str() {
                "neo4j" => GraphBackendKind::Neo4j,
                "memory" => GraphBackendKind::Memory,
                other => {
                    anyhow::bail!("GRAPH_BACKEND must be 'neo4j' or 'memory', got {:?}", other)
                }
            };
        }
        if let Some(v) = text("GRAPH_EXTRA_RELATIONS") {
            self.graph.extra_relations = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(v) = text("VECTOR_BACKEND") {
            self.vector.backend = match v.to_lowercase().as_str() {
                "local" => VectorBackendKind::Local,
                "qdrant" => VectorBackendKind::Qdrant,
                other => {
                    anyhow::bail!("VECTOR_BACKEND must be 'local' or 'qdrant', got {:?}", other)
                }
            };
        }
        if let Some(v) = text("VECTOR_DB_PATH") {
            self.vector.path = PathBuf::from(v);
        }
        if let Some(v) = text("QDRANT_URL") {
            self.vector.qdrant_url = v;
        }
        if let Some(v) = text("QDRANT_COLLECTION") {
            self.vector.collection = v;
        }

        if let Some(v) = text("EMBEDDING_BASE_URL") {
            self.embedding.base_url = v;
        }
        if let Some(v) = text("EMBEDDING_MODEL_NAME") {
            self.embedding.model = v;
        }

        override_number(&text, "CHUNK_SIZE", &mut self.chunking.chunk_size)?;
        override_number(&text, "CHUNK_OVERLAP", &mut self.chunking.chunk_overlap)?;
        if let Some(v) = text("DOCUMENT_DIR") {
            self.documents.dir = PathBuf::from(v);
        }
        override_number(&text, "ROUTER_TOP_K", &mut self.router.top_k)?;
        if let Some(v) = text("SERVER_ADDR") {
            self.server.addr = v;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            anyhow::bail!("chunk_size must be positive");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            anyhow::bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }
        if self.router.top_k == 0 {
            anyhow::bail!("router top_k must be positive");
        }
        if self.llm.timeout_secs == 0 {
            anyhow::bail!("llm timeout_secs must be positive");
        }
        Ok(())
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.timeout_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.router.store_timeout_secs)
    }

    pub fn chunker(&self) -> ingest::ChunkerConfig {
        ingest::ChunkerConfig {
            chunk_size: self.chunking.chunk_size,
            chunk_overlap: self.chunking.chunk_overlap,
        }
    }

    pub fn retry_policy(&self) -> extract::RetryPolicy {
        extract::RetryPolicy::new(
            self.retry.max_retries,
            self.retry.initial_backoff_ms,
            self.retry.max_backoff_ms,
        )
    }

    pub fn router_config(&self) -> query::RouterConfig {
        query::RouterConfig {
            top_k: self.router.top_k,
            llm_timeout: self.llm_timeout(),
            store_timeout: self.store_timeout(),
            escalate_to_chunks: self.router.escalate_to_chunks,
            max_graph_rows: self.router.max_graph_rows,
        }
    }

    pub fn neo4j(&self) -> index::Neo4jConfig {
        index::Neo4jConfig {
            uri: self.graph.uri.clone(),
            user: self.graph.user.clone(),
            password: self.graph.password.clone(),
            database: self.graph.database.clone(),
        }
    }
}

fn read_config_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).context(format!("Failed to read config file: {:?}", path))
}

fn override_number<T>(text: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = text(key) {
        *slot = raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} must be a number, got {:?}: {}", raw, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_sources(None, env_of(&[])).unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 100);
        assert_eq!(config.router.top_k, 5);
        assert_eq!(config.graph.backend, GraphBackendKind::Neo4j);
        assert_eq!(config.vector.backend, VectorBackendKind::Local);
        assert!(config.graph.password.is_empty());
        assert!(config.llm.api_key.is_none());
    }

    #[test]
    fn test_toml_then_env() {
        let toml = r#"
            [graph]
            backend = "memory"
            extra_relations = ["Person:WORKS_ON:Project"]

            [chunking]
            chunk_size = 500

            [router]
            top_k = 3
        "#;
        let config = AppConfig::from_sources(
            Some(toml),
            env_of(&[
                ("ROUTER_TOP_K", "8"),
                ("NEO4J_PASSWORD", "secret"),
                ("VECTOR_BACKEND", "Qdrant"),
            ]),
        )
        .unwrap();

        assert_eq!(config.graph.backend, GraphBackendKind::Memory);
        assert_eq!(config.graph.extra_relations, vec!["Person:WORKS_ON:Project"]);
        assert_eq!(config.chunking.chunk_size, 500);
        // untouched section keeps its default
        assert_eq!(config.chunking.chunk_overlap, 100);
        assert_eq!(config.router.top_k, 8);
        assert_eq!(config.graph.password, "secret");
        assert_eq!(config.vector.backend, VectorBackendKind::Qdrant);
    }

    #[test]
    fn test_invalid_numbers_are_errors() {
        let err = AppConfig::from_sources(None, env_of(&[("CHUNK_SIZE", "big")])).unwrap_err();
        assert!(err.to_string().contains("CHUNK_SIZE"));

        assert!(AppConfig::from_sources(None, env_of(&[("CHUNK_OVERLAP", "1000")])).is_err());
        assert!(AppConfig::from_sources(None, env_of(&[("GRAPH_BACKEND", "sqlite")])).is_err());
        let bad_toml = "[chunking]\nchunk_size = \"x\"";
        assert!(AppConfig::from_sources(Some(bad_toml), env_of(&[])).is_err());
    }

    #[test]
    fn test_extra_relations_from_env() {
        let config = AppConfig::from_sources(
            None,
            env_of(&[("GRAPH_EXTRA_RELATIONS", "Person:WORKS_ON:Project, ,Company:OWNS:Project")]),
        )
        .unwrap();
        assert_eq!(config.graph.extra_relations.len(), 2);
    }

    #[test]
    fn test_secrets_are_not_serialized() {
        let env = env_of(&[("NEO4J_PASSWORD", "secret"), ("LLM_API_KEY", "k")]);
        let config = AppConfig::from_sources(None, env).unwrap();
        let rendered = serde_json::to_string(&config).unwrap();
        assert!(!rendered.contains("secret"));
        assert!(!rendered.contains("api_key"));
    }
}
