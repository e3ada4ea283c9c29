use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Extensions the reader knows how to turn into text
pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md", "pdf"];

/// One source document, fully read into memory
#[derive(Debug, Clone)]
pub struct Document {
    pub path: String,
    pub content: String,
}

pub struct FileReader;

impl FileReader {
    pub async fn read_file(path: &Path) -> Result<String> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "txt" | "md" => {
                let content = fs::read_to_string(path)
                    .await
                    .context(format!("Failed to read file: {:?}", path))?;
                Ok(content)
            }
            "pdf" => Self::read_pdf(path).await,
            _ => anyhow::bail!("Unsupported file format: {}", extension),
        }
    }

    async fn read_pdf(path: &Path) -> Result<String> {
        let bytes = fs::read(path)
            .await
            .context(format!("Failed to read file: {:?}", path))?;

        tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .context("PDF extraction task panicked")?
            .context(format!("Failed to extract text from PDF: {:?}", path))
    }

    /// Supported files under `dir`, recursively, in a stable order
    pub fn discover(dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            anyhow::bail!("Document directory does not exist: {:?}", dir);
        }

        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable directory entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| is_supported(path))
            .collect();

        files.sort();
        Ok(files)
    }

    /// Read every supported document under `dir`. A file that fails to read
    /// is logged and skipped; an empty document is skipped silently.
    pub async fn read_directory(dir: &Path) -> Result<Vec<Document>> {
        let mut documents = Vec::new();

        for path in Self::discover(dir)? {
            match Self::read_file(&path).await {
                Ok(content) if content.trim().is_empty() => {
                    debug!(path = %path.display(), "skipping empty document");
                }
                Ok(content) => documents.push(Document {
                    path: path.to_string_lossy().to_string(),
                    content,
                }),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable document"),
            }
        }

        Ok(documents)
    }
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}
