//! # Ingestion
//!
//! Loads text files into a [`PersistentCollection`]. Each file becomes one document
//! whose id is the BLAKE3 digest of its text, so ingesting the same content twice
//! leaves the collection unchanged.

use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::Result;
use crate::vector_store::PersistentCollection;

/// File extensions picked up when a directory is given.
const TEXT_EXTENSIONS: &[&str] = &["txt", "md"];

/// A document read from disk, ready to upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub id: String,
    pub path: PathBuf,
    pub text: String,
}

/// Content-derived document id.
pub fn document_id(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// Read every file in `paths`. Directories contribute their `.txt`/`.md` files
/// (non-recursive). Blank files and files that are not UTF-8 text are skipped with
/// a warning.
pub fn load_documents(paths: &[PathBuf]) -> Result<Vec<SourceDocument>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = fs::read_dir(path)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && has_text_extension(p))
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(path.clone());
        }
    }

    let contents = files
        .par_iter()
        .progress_count(files.len() as u64)
        .map(fs::read)
        .collect::<std::io::Result<Vec<_>>>()?;

    Ok(files
        .into_iter()
        .zip(contents)
        .filter_map(|(path, bytes)| {
            let Ok(text) = String::from_utf8(bytes) else {
                warn!("Skipping non UTF-8 file {}", path.display());
                return None;
            };
            if text.trim().is_empty() {
                warn!("Skipping empty file {}", path.display());
                return None;
            }
            Some(SourceDocument {
                id: document_id(&text),
                path,
                text,
            })
        })
        .collect())
}

fn has_text_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| TEXT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Upsert `documents` in batches of `batch_size`, drawing a progress bar.
///
/// Returns the number of documents written.
pub async fn ingest(
    collection: &PersistentCollection,
    documents: Vec<SourceDocument>,
    batch_size: usize,
) -> Result<usize> {
    let total = documents.len();
    let progress = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}") {
        progress.set_style(style);
    }

    for batch in documents.chunks(batch_size.max(1)) {
        let ids = batch.iter().map(|d| d.id.clone()).collect();
        let texts = batch.iter().map(|d| d.text.clone()).collect();
        collection.upsert(ids, texts).await?;
        progress.inc(batch.len() as u64);
    }

    progress.finish_with_message("ingested");
    info!("Ingested {} documents", total);
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::test_support::KeywordEmbedding;
    use crate::vector_store::{Collection, PersistentClient};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_document_id_is_content_hash() {
        assert_eq!(document_id("same"), document_id("same"));
        assert_ne!(document_id("same"), document_id("different"));
        assert_eq!(document_id("x").len(), 64);
    }

    #[test]
    fn test_load_documents_expands_directories() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.txt", "Rust is fast.");
        write(dir.path(), "b.md", "# Tokio\nAsync runtime.");
        write(dir.path(), "c.bin", "ignored");
        write(dir.path(), "empty.txt", "   \n");
        fs::write(dir.path().join("latin1.txt"), [0x63, 0x61, 0x66, 0xe9]).unwrap();

        let documents = load_documents(&[dir.path().to_path_buf()]).unwrap();

        let names: Vec<_> = documents
            .iter()
            .map(|d| d.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.md"]);
        assert_eq!(documents[0].id, document_id("Rust is fast."));
    }

    #[test]
    fn test_load_documents_missing_file_fails() {
        let result = load_documents(&[PathBuf::from("does/not/exist.txt")]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_ingest_twice_is_idempotent() {
        let files = TempDir::new().unwrap();
        let one = write(files.path(), "one.txt", "Borrow checker rules.");
        let two = write(files.path(), "two.txt", "Lifetimes and references.");

        let store = TempDir::new().unwrap();
        let client = PersistentClient::open(store.path()).unwrap();
        let collection = client
            .get_or_create_collection("rag_documents", Arc::new(KeywordEmbedding::new()))
            .unwrap();

        let documents = load_documents(&[one, two]).unwrap();
        assert_eq!(ingest(&collection, documents.clone(), 1).await.unwrap(), 2);
        ingest(&collection, documents, 8).await.unwrap();

        assert_eq!(collection.count().await.unwrap(), 2);
    }
}
