//! # Vector store
//!
//! Persistent, named document collections with nearest-neighbour search.
//!
//! A [`PersistentClient`] owns a storage directory. Each collection lives in its own
//! subdirectory and is searched through an in-memory
//! [HNSW](https://arxiv.org/abs/1603.09320) index (`hora` crate) rebuilt from the
//! stored vectors whenever the collection is opened or changed.
//!
//! ## On-disk layout
//! ```text
//! <storage_path>/
//!   <collection>/
//!     collection.yaml   # manifest: name, embedding function, dimension, created_at
//!     records.bin       # bincode: [{ id, document, embedding }]
//! ```
//! Both files are replaced atomically (write to a temp file, then rename).
//!
//! ## Quick Example
//! ```no_run
//! use std::sync::Arc;
//! use ragpipe::config::RagPipelineConfig;
//! use ragpipe::vector_store::{Collection, PersistentClient};
//!
//! # async fn run() -> ragpipe::error::Result<()> {
//! let config = RagPipelineConfig::default();
//! let embedding_function = ragpipe::embedding::from_config(&config).await?;
//! let client = PersistentClient::open("/tmp/chroma_db")?;
//! let collection = client.get_or_create_collection("rag_documents", embedding_function)?;
//! collection
//!     .upsert(vec!["a".into()], vec!["Rust is great!".into()])
//!     .await?;
//! let result = collection.query(&["I love Rust!".to_string()], 1).await?;
//! println!("{:?}", result.documents);
//! # Ok(()) }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hora::core::ann_index::ANNIndex;
use hora::core::metrics::Metric;
use hora::index::hnsw_idx::HNSWIndex;
use hora::index::hnsw_params::HNSWParams;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::embedding::EmbeddingFunction;
use crate::error::{PipelineError, Result};

const MANIFEST_FILE: &str = "collection.yaml";
const RECORDS_FILE: &str = "records.bin";

static COLLECTION_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{1,61}[A-Za-z0-9]$").expect("valid regex")
});

/// Ranked matches for each query text, nearest first.
///
/// `ids[i]`, `documents[i]` and `distances[i]` all describe the results for the
/// `i`-th query text and have equal lengths.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub ids: Vec<Vec<String>>,
    pub documents: Vec<Vec<String>>,
    pub distances: Vec<Vec<f32>>,
}

/// Read side of a collection, as seen by the responder.
#[async_trait]
pub trait Collection: Send + Sync {
    fn name(&self) -> &str;

    /// Return up to `n_results` nearest documents for every text in `query_texts`.
    async fn query(&self, query_texts: &[String], n_results: usize) -> Result<QueryResult>;

    /// Number of documents stored.
    async fn count(&self) -> Result<usize>;
}

/// Collection metadata kept next to the records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionManifest {
    pub name: String,
    pub embedding_function: String,
    /// Unknown until the first document is stored.
    pub dimension: Option<usize>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Record {
    id: String,
    document: String,
    embedding: Vec<f32>,
}

struct CollectionState {
    manifest: CollectionManifest,
    records: Vec<Record>,
    /// HNSW over `records`, keyed by position. `None` while the collection is empty.
    index: Option<HNSWIndex<f32, usize>>,
}

/// Handle to a storage directory holding any number of collections.
#[derive(Debug, Clone)]
pub struct PersistentClient {
    path: PathBuf,
}

impl PersistentClient {
    /// Open (creating if needed) the storage directory at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;
        debug!("Opened vector storage at {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the collection called `name`, creating it if it does not exist yet.
    ///
    /// # Errors
    /// - [`PipelineError::InvalidCollectionName`] for names that fail validation.
    /// - [`PipelineError::EmbeddingFunctionConflict`] if the stored collection was built
    ///   with a different embedding function.
    /// - I/O and decode errors from reading the stored files.
    pub fn get_or_create_collection(
        &self,
        name: &str,
        embedding_function: Arc<dyn EmbeddingFunction>,
    ) -> Result<PersistentCollection> {
        validate_collection_name(name)?;
        let dir = self.path.join(name);
        let manifest_path = dir.join(MANIFEST_FILE);

        if manifest_path.is_file() {
            let mut manifest: CollectionManifest =
                serde_yaml::from_str(&fs::read_to_string(&manifest_path)?)?;
            if manifest.embedding_function != embedding_function.name() {
                return Err(PipelineError::EmbeddingFunctionConflict {
                    collection: name.to_string(),
                    expected: manifest.embedding_function,
                    actual: embedding_function.name().to_string(),
                });
            }

            let records = read_records(&dir.join(RECORDS_FILE))?;
            if manifest.dimension.is_none() {
                manifest.dimension = records.first().map(|r| r.embedding.len());
            }
            let index = match manifest.dimension {
                Some(dimension) => build_index(&records, dimension)?,
                None => None,
            };
            info!(
                "Loaded collection `{}` with {} documents",
                name,
                records.len()
            );

            return Ok(PersistentCollection::new(
                name,
                dir,
                embedding_function,
                CollectionState {
                    manifest,
                    records,
                    index,
                },
            ));
        }

        fs::create_dir_all(&dir)?;
        let manifest = CollectionManifest {
            name: name.to_string(),
            embedding_function: embedding_function.name().to_string(),
            dimension: None,
            created_at: Utc::now(),
        };
        write_atomic(&manifest_path, serde_yaml::to_string(&manifest)?.as_bytes())?;
        write_records(&dir.join(RECORDS_FILE), &[])?;
        info!("Created collection `{}`", name);

        Ok(PersistentCollection::new(
            name,
            dir,
            embedding_function,
            CollectionState {
                manifest,
                records: Vec::new(),
                index: None,
            },
        ))
    }

    /// Names of every collection under the storage directory, sorted.
    pub fn list_collections(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.path().join(MANIFEST_FILE).is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove a collection and everything stored for it.
    pub fn delete_collection(&self, name: &str) -> Result<()> {
        validate_collection_name(name)?;
        let dir = self.path.join(name);
        fs::remove_dir_all(&dir)?;
        info!("Deleted collection `{}`", name);
        Ok(())
    }
}

/// A collection backed by files under its [`PersistentClient`]'s directory.
///
/// Queries share a read lock; [`upsert`](Self::upsert) takes the write lock only
/// after embeddings have been computed.
pub struct PersistentCollection {
    name: String,
    dir: PathBuf,
    embedding_function: Arc<dyn EmbeddingFunction>,
    state: RwLock<CollectionState>,
}

impl PersistentCollection {
    fn new(
        name: &str,
        dir: PathBuf,
        embedding_function: Arc<dyn EmbeddingFunction>,
        state: CollectionState,
    ) -> Self {
        Self {
            name: name.to_string(),
            dir,
            embedding_function,
            state: RwLock::new(state),
        }
    }

    pub async fn manifest(&self) -> CollectionManifest {
        self.state.read().await.manifest.clone()
    }

    /// Insert documents, replacing any stored under the same id.
    ///
    /// The documents are embedded, written to disk, and the index is rebuilt before
    /// this returns.
    ///
    /// # Errors
    /// - [`PipelineError::LengthMismatch`] if `ids` and `documents` differ in length.
    /// - [`PipelineError::DimensionMismatch`] if an embedding's length differs from
    ///   the collection's.
    pub async fn upsert(&self, ids: Vec<String>, documents: Vec<String>) -> Result<()> {
        if ids.len() != documents.len() {
            return Err(PipelineError::LengthMismatch {
                ids: ids.len(),
                documents: documents.len(),
            });
        }
        if ids.is_empty() {
            return Ok(());
        }

        let embeddings = self.embedding_function.embed(&documents).await?;
        if embeddings.len() != documents.len() {
            return Err(PipelineError::Embedding(format!(
                "embedded {} of {} documents",
                embeddings.len(),
                documents.len()
            )));
        }

        let mut state = self.state.write().await;
        let dimension = state.manifest.dimension.unwrap_or(embeddings[0].len());
        if let Some(bad) = embeddings.iter().find(|e| e.len() != dimension) {
            return Err(PipelineError::DimensionMismatch {
                expected: dimension,
                actual: bad.len(),
            });
        }

        let mut records = state.records.clone();
        let mut positions: HashMap<String, usize> = records
            .iter()
            .enumerate()
            .map(|(pos, r)| (r.id.clone(), pos))
            .collect();
        for ((id, document), embedding) in ids.into_iter().zip(documents).zip(embeddings) {
            let record = Record {
                id: id.clone(),
                document,
                embedding,
            };
            match positions.get(&id) {
                Some(&pos) => records[pos] = record,
                None => {
                    positions.insert(id, records.len());
                    records.push(record);
                }
            }
        }

        let index = build_index(&records, dimension)?;
        let mut manifest = state.manifest.clone();
        manifest.dimension = Some(dimension);

        // Manifest first: a recorded dimension next to older records still opens cleanly.
        write_atomic(
            &self.dir.join(MANIFEST_FILE),
            serde_yaml::to_string(&manifest)?.as_bytes(),
        )?;
        write_records(&self.dir.join(RECORDS_FILE), &records)?;

        debug!(
            "Collection `{}` now holds {} documents",
            self.name,
            records.len()
        );
        *state = CollectionState {
            manifest,
            records,
            index,
        };
        Ok(())
    }

    /// Look up a stored document by id.
    pub async fn get(&self, id: &str) -> Option<String> {
        let state = self.state.read().await;
        state
            .records
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.document.clone())
    }
}

#[async_trait]
impl Collection for PersistentCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, query_texts: &[String], n_results: usize) -> Result<QueryResult> {
        let mut result = QueryResult::default();
        if query_texts.is_empty() {
            return Ok(result);
        }

        let empty = {
            let state = self.state.read().await;
            state.index.is_none()
        };
        if n_results == 0 || empty {
            for _ in query_texts {
                result.ids.push(Vec::new());
                result.documents.push(Vec::new());
                result.distances.push(Vec::new());
            }
            return Ok(result);
        }

        let embeddings = self.embedding_function.embed(query_texts).await?;

        let state = self.state.read().await;
        let (Some(index), Some(dimension)) = (state.index.as_ref(), state.manifest.dimension)
        else {
            return Err(PipelineError::Index("collection index missing".to_string()));
        };

        for embedding in embeddings {
            if embedding.len() != dimension {
                return Err(PipelineError::DimensionMismatch {
                    expected: dimension,
                    actual: embedding.len(),
                });
            }

            // HNSW candidates are approximate; order them by exact distance.
            let mut hits: Vec<(usize, f32)> = index
                .search(&embedding, n_results)
                .into_iter()
                .filter_map(|pos| {
                    state
                        .records
                        .get(pos)
                        .map(|r| (pos, euclidean_distance(&embedding, &r.embedding)))
                })
                .collect();
            hits.sort_by(|a, b| a.1.total_cmp(&b.1));
            hits.truncate(n_results);

            result
                .ids
                .push(hits.iter().map(|(p, _)| state.records[*p].id.clone()).collect());
            result.documents.push(
                hits.iter()
                    .map(|(p, _)| state.records[*p].document.clone())
                    .collect(),
            );
            result
                .distances
                .push(hits.iter().map(|(_, d)| *d).collect());
        }

        Ok(result)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.state.read().await.records.len())
    }
}

/// Reject names the store cannot use as a directory: 3-63 chars of `[A-Za-z0-9._-]`,
/// alphanumeric at both ends.
pub fn validate_collection_name(name: &str) -> Result<()> {
    if COLLECTION_NAME.is_match(name) && !name.contains("..") {
        Ok(())
    } else {
        Err(PipelineError::InvalidCollectionName(name.to_string()))
    }
}

/// Euclidean distance between two equal-length vectors.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

fn build_index(records: &[Record], dimension: usize) -> Result<Option<HNSWIndex<f32, usize>>> {
    if records.is_empty() {
        return Ok(None);
    }
    let mut index = HNSWIndex::new(dimension, &HNSWParams::<f32>::default());
    for (pos, record) in records.iter().enumerate() {
        index
            .add(&record.embedding, pos)
            .map_err(|e| PipelineError::Index(e.to_string()))?;
    }
    index
        .build(Metric::Euclidean)
        .map_err(|e| PipelineError::Index(e.to_string()))?;
    Ok(Some(index))
}

fn read_records(path: &Path) -> Result<Vec<Record>> {
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let bytes = fs::read(path)?;
    let (records, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
    Ok(records)
}

fn write_records(path: &Path, records: &[Record]) -> Result<()> {
    let bytes = bincode::serde::encode_to_vec(records, bincode::config::standard())?;
    write_atomic(path, &bytes)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
