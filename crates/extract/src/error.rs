use thiserror::Error;

/// Why a chunk produced no facts. Never escapes [`crate::Extractor::extract`];
/// it is logged and the chunk degrades to an empty result.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("model call failed: {0}")]
    Model(String),

    #[error("model call timed out after {0}s")]
    Timeout(u64),

    #[error("model output is not a valid extraction: {0}")]
    Parse(String),
}
