pub mod error;
pub mod llm;
pub mod normalizer;
pub mod prompt;
pub mod retry;
pub mod schema;

pub use error::ExtractionError;
pub use llm::{LanguageModel, OllamaClient};
pub use normalizer::EntityNormalizer;
pub use retry::RetryPolicy;
pub use schema::{
    Company, Deadline, EntityKind, ExtractionResult, FinancialFigure, GraphEntity, NOT_AVAILABLE,
    Person, Project, Relationship,
};

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Turns one chunk of text into a normalized [`ExtractionResult`].
pub struct Extractor {
    model: Arc<dyn LanguageModel>,
    normalizer: EntityNormalizer,
    timeout: Duration,
    retry: RetryPolicy,
}

impl Extractor {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            normalizer: EntityNormalizer::new(),
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = limit;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Extract facts from a chunk. Never fails: a model or parse failure is
    /// logged and the chunk yields an empty result.
    pub async fn extract(&mut self, text: &str) -> ExtractionResult {
        match self.try_extract(text).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "extraction failed, treating chunk as having no facts");
                ExtractionResult::default()
            }
        }
    }

    /// Extract facts from a chunk, surfacing why nothing came back
    pub async fn try_extract(&mut self, text: &str) -> Result<ExtractionResult, ExtractionError> {
        let prompt = prompt::build_extraction_prompt(text);
        let raw = self.call_model(&prompt).await?;

        match self.normalizer.normalize_output(&raw) {
            Ok(result) => Ok(result),
            Err(ExtractionError::Parse(reason)) => {
                debug!(%reason, "asking the model to repair its output");
                let repaired = self.call_model(&prompt::build_retry_prompt(&raw)).await?;
                self.normalizer.normalize_output(&repaired)
            }
            Err(e) => Err(e),
        }
    }

    async fn call_model(&self, prompt: &str) -> Result<String, ExtractionError> {
        let model = &self.model;
        let limit = self.timeout;

        self.retry
            .retry("extraction", move || async move {
                match timeout(limit, model.generate_json(prompt)).await {
                    Ok(Ok(text)) => Ok(text),
                    Ok(Err(e)) => Err(ExtractionError::Model(format!("{e:#}"))),
                    Err(_) => Err(ExtractionError::Timeout(limit.as_secs())),
                }
            })
            .await
    }

    pub fn normalizer(&self) -> &EntityNormalizer {
        &self.normalizer
    }

    /// Forget spellings seen so far; called at the start of an ingestion run
    pub fn reset_aliases(&mut self) {
        self.normalizer = EntityNormalizer::new();
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses; an `Err` entry simulates a failed call
    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String, String>>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<&str, &str>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|r| r.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            match self.replies.lock().unwrap().pop_front() {
                Some(Ok(text)) => Ok(text),
                Some(Err(e)) => Err(anyhow::anyhow!(e)),
                None => Err(anyhow::anyhow!("script exhausted")),
            }
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    const APPLE: &str = r#"{
        "companies": [{"name": "Apple", "ticker": "AAPL", "industry": "Technology"}],
        "persons": [{"name": "Tim Cook", "title": "CEO"}],
        "relationships": [{
            "source_entity_name": "Apple", "source_entity_type": "Company",
            "relationship_type": "HAS_CEO",
            "target_entity_name": "Tim Cook", "target_entity_type": "Person",
            "context": "Tim Cook is the CEO of Apple."
        }]
    }"#;

    #[tokio::test]
    async fn test_extracts_and_normalizes() {
        let model = ScriptedModel::new(vec![Ok(APPLE)]);
        let mut extractor = Extractor::new(model).with_retry(RetryPolicy::none());

        let result = extractor.extract("Tim Cook is the CEO of Apple.").await;
        assert_eq!(result.companies.len(), 1);
        assert_eq!(result.persons[0].name, "Tim Cook");
        assert_eq!(result.relationships[0].relationship_type, "HAS_CEO");
        assert!(result.deadlines.is_empty());
    }

    #[tokio::test]
    async fn test_model_failure_yields_empty_result() {
        let model = ScriptedModel::new(vec![Err("connection refused")]);
        let mut extractor = Extractor::new(model).with_retry(RetryPolicy::none());

        let result = extractor.extract("anything").await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_output_is_repaired_once() {
        let model = ScriptedModel::new(vec![Ok("sure! here you go"), Ok(APPLE)]);
        let mut extractor = Extractor::new(model).with_retry(RetryPolicy::none());

        let result = extractor.try_extract("Tim Cook is the CEO of Apple.").await.unwrap();
        assert_eq!(result.companies[0].ticker, "AAPL");
    }

    #[tokio::test]
    async fn test_unrepairable_output_yields_empty_result() {
        let model = ScriptedModel::new(vec![Ok("nope"), Ok("still nope")]);
        let mut extractor = Extractor::new(model).with_retry(RetryPolicy::none());

        assert!(extractor.extract("text").await.is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let model = ScriptedModel::new(vec![Err("503"), Ok(APPLE)]);
        let mut extractor = Extractor::new(model).with_retry(RetryPolicy::new(2, 1, 1));

        let result = extractor.extract("text").await;
        assert_eq!(result.persons.len(), 1);
    }

    #[tokio::test]
    async fn test_aliases_persist_across_chunks() {
        let second = APPLE.replace("\"name\": \"Apple\"", "\"name\": \"Apple Inc.\"");
        let model = ScriptedModel::new(vec![Ok(APPLE), Ok(second.as_str())]);
        let mut extractor = Extractor::new(model).with_retry(RetryPolicy::none());

        extractor.extract("first").await;
        let result = extractor.extract("second").await;
        assert_eq!(result.companies[0].name, "Apple");
    }
}
