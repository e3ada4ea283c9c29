pub mod chunk;
pub mod chunker;
pub mod reader;

pub use chunk::Chunk;
pub use chunker::{Chunker, ChunkerConfig};
pub use reader::{Document, FileReader};

use anyhow::Result;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;

/// Generate a stable document ID from file path
pub fn generate_doc_id(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

/// Documents read from a directory together with their chunks
#[derive(Debug, Default)]
pub struct Corpus {
    pub documents: Vec<Document>,
    pub chunks: Vec<Chunk>,
}

impl Corpus {
    pub fn total_chars(&self) -> usize {
        self.documents.iter().map(|d| d.content.chars().count()).sum()
    }
}

/// Read and chunk a single file
pub async fn ingest_file(file_path: &Path, config: &ChunkerConfig) -> Result<Vec<Chunk>> {
    let content = FileReader::read_file(file_path).await?;
    let path_str = file_path.to_string_lossy().to_string();
    let doc_id = generate_doc_id(&path_str);

    let chunker = Chunker::new(config.clone());
    Ok(chunker.chunk_text(&doc_id, &content, &path_str))
}

/// Read and chunk every supported document under a directory
pub async fn ingest_directory(dir_path: &Path, config: &ChunkerConfig) -> Result<Corpus> {
    let documents = FileReader::read_directory(dir_path).await?;
    let chunker = Chunker::new(config.clone());

    let mut chunks = Vec::new();
    for doc in &documents {
        let doc_id = generate_doc_id(&doc.path);
        chunks.extend(chunker.chunk_text(&doc_id, &doc.content, &doc.path));
    }

    info!(
        dir = %dir_path.display(),
        documents = documents.len(),
        chunks = chunks.len(),
        "loaded documents"
    );

    Ok(Corpus { documents, chunks })
}
