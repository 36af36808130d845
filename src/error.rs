//! # Errors
//!
//! Every fallible operation in the crate returns [`Result`], whose error side is
//! [`PipelineError`]. Upstream failures (OpenAI compatible APIs, the Hugging Face
//! hub, Candle, the filesystem) are wrapped transparently so callers see the
//! original message.

use async_openai::error::OpenAIError;
use thiserror::Error;

/// Errors raised while initializing, querying, or ingesting into the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A retrieval or generation call was made before `initialize`.
    #[error("collection not initialized")]
    NotInitialized,

    /// Collection names must be 3-63 chars of `[A-Za-z0-9._-]`, alphanumeric at both ends.
    #[error("invalid collection name `{0}`")]
    InvalidCollectionName(String),

    /// The collection on disk was built with a different embedding function.
    #[error(
        "collection `{collection}` was created with embedding function `{expected}`, not `{actual}`"
    )]
    EmbeddingFunctionConflict {
        collection: String,
        expected: String,
        actual: String,
    },

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("got {ids} ids for {documents} documents")]
    LengthMismatch { ids: usize, documents: usize },

    /// The HNSW index rejected an insert or failed to build.
    #[error("index error: {0}")]
    Index(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("no API key: set `api_key` in the config or export OPENAI_API_KEY")]
    MissingCredential,

    #[error("chat completion returned no content")]
    EmptyCompletion,

    #[error(transparent)]
    OpenAI(#[from] OpenAIError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Encode(#[from] bincode::error::EncodeError),

    #[error(transparent)]
    Decode(#[from] bincode::error::DecodeError),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    HfHub(#[from] hf_hub::api::sync::ApiError),

    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PipelineError>;
