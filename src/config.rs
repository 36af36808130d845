//! This module provides functionality for loading and handling the pipeline's configuration.
//!
//! It defines the `RagPipelineConfig` struct, which holds the configuration parameters,
//! and a `load_config` function to load the configuration from a YAML file. Every field
//! has a default, so a config file only needs to name what it overrides.
//!
//! # Examples
//!
//! Loading the configuration from a file:
//!
//! ```no_run
//! use ragpipe::config::{RagPipelineConfig, load_config};
//!
//! let config_file_path = "/path/to/config.yaml";
//! let config: RagPipelineConfig = load_config(config_file_path).unwrap();
//! println!("{:?}", config);
//! ```
//!
//! A complete file:
//!
//! ```yaml
//! api_key: "sk-..."
//! api_base: "https://api.openai.com/v1"
//! model: "gpt-4"
//! system_prompt: "You are an AI assistant."
//! storage_path: "/chroma_db"
//! collection_name: "rag_documents"
//! top_k: 5
//! response_mode: generate        # or `documents`
//! embedding:
//!   provider: local              # or `open_ai`
//!   model_id: "sentence-transformers/all-MiniLM-L6-v2"
//!   revision: "main"
//! request_timeout_secs: 60
//! ```

use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf};

use tracing::*;

use crate::error::{PipelineError, Result};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an AI assistant.";
pub const DEFAULT_STORAGE_PATH: &str = "/chroma_db";
pub const DEFAULT_COLLECTION_NAME: &str = "rag_documents";
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_OPENAI_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
pub const DEFAULT_LOCAL_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Environment variable consulted when `api_key` is absent from the config.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Represents the pipeline's configuration.
///
/// Holds the endpoint and model used for generation, where the vector collection lives
/// on disk, which embedding function it was built with, and how a query is answered.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct RagPipelineConfig {
    /// The API key used to authenticate requests. Falls back to `OPENAI_API_KEY`.
    pub api_key: Option<String>,

    /// The base URL of the OpenAI compatible API.
    pub api_base: String,

    /// The chat model used by `generate` mode.
    pub model: String,

    /// System instruction sent ahead of every prompt.
    pub system_prompt: String,

    /// Directory holding the persistent collections.
    pub storage_path: PathBuf,

    pub collection_name: String,

    /// How many nearest documents to retrieve per query.
    pub top_k: usize,

    pub response_mode: ResponseMode,

    pub embedding: EmbeddingConfig,

    /// Per-request HTTP timeout in seconds. Unset means wait indefinitely.
    pub request_timeout_secs: Option<u64>,
}

impl Default for RagPipelineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            storage_path: PathBuf::from(DEFAULT_STORAGE_PATH),
            collection_name: DEFAULT_COLLECTION_NAME.to_string(),
            top_k: DEFAULT_TOP_K,
            response_mode: ResponseMode::default(),
            embedding: EmbeddingConfig::default(),
            request_timeout_secs: None,
        }
    }
}

impl RagPipelineConfig {
    /// Resolve the API key from the config, then from `OPENAI_API_KEY`.
    ///
    /// # Errors
    /// [`PipelineError::MissingCredential`] if neither is set.
    pub fn resolve_api_key(&self) -> Result<String> {
        self.api_key_or(env::var(API_KEY_ENV).ok())
    }

    /// The configured key if non-empty, else `fallback` if non-empty.
    fn api_key_or(&self, fallback: Option<String>) -> Result<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or(fallback.filter(|k| !k.is_empty()))
            .ok_or(PipelineError::MissingCredential)
    }
}

/// What `respond` hands back for a query.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// Pass retrieved documents to the chat model and return its answer.
    #[default]
    Generate,
    /// Return the retrieved documents and the collection size without calling a model.
    Documents,
}

/// Which embedding function a collection is built and queried with.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum EmbeddingConfig {
    /// Hosted embeddings from the OpenAI compatible `/embeddings` endpoint.
    OpenAi { model: String },
    /// A BERT sentence model pulled from the Hugging Face hub and run locally.
    Local { model_id: String, revision: String },
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig::OpenAi {
            model: DEFAULT_OPENAI_EMBEDDING_MODEL.to_string(),
        }
    }
}

/// Loads the pipeline's configuration from a YAML file.
///
/// # Parameters
///
/// - `file`: The path to the YAML configuration file.
///
/// # Returns
///
/// - `Ok(RagPipelineConfig)`: The loaded configuration.
/// - `Err(PipelineError)`: The file could not be read or is not valid YAML.
///
/// # Examples
///
/// ```no_run
/// use ragpipe::config::load_config;
///
/// match load_config("/path/to/config.yaml") {
///     Ok(config) => println!("{:?}", config),
///     Err(err) => eprintln!("Error loading config: {}", err),
/// }
/// ```
pub fn load_config(file: &str) -> Result<RagPipelineConfig> {
    debug!("Loading config from {}", file);
    let content = fs::read_to_string(file)?;
    let config: RagPipelineConfig = serde_yaml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_valid_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
api_key: "example_api_key"
api_base: "http://example.com/v1"
model: "example_model"
storage_path: "/tmp/vectors"
collection_name: "notes"
top_k: 3
response_mode: documents
embedding:
  provider: local
  model_id: "sentence-transformers/all-MiniLM-L6-v2"
  revision: "main"
request_timeout_secs: 30
"#
        )
        .unwrap();

        let config = load_config(temp_file.path().to_str().unwrap());

        assert!(config.is_ok());
        let config = config.unwrap();
        assert_eq!(config.api_key.as_deref(), Some("example_api_key"));
        assert_eq!(config.api_base, "http://example.com/v1");
        assert_eq!(config.model, "example_model");
        assert_eq!(config.storage_path, PathBuf::from("/tmp/vectors"));
        assert_eq!(config.collection_name, "notes");
        assert_eq!(config.top_k, 3);
        assert_eq!(config.response_mode, ResponseMode::Documents);
        assert_eq!(
            config.embedding,
            EmbeddingConfig::Local {
                model_id: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
                revision: "main".to_string(),
            }
        );
        assert_eq!(config.request_timeout_secs, Some(30));
        // Not in the file, so the default applies.
        assert_eq!(config.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn test_load_config_partial_file_uses_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "model: \"gpt-4o\"").unwrap();

        let config = load_config(temp_file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.storage_path, PathBuf::from(DEFAULT_STORAGE_PATH));
        assert_eq!(config.collection_name, DEFAULT_COLLECTION_NAME);
        assert_eq!(config.top_k, DEFAULT_TOP_K);
        assert_eq!(config.response_mode, ResponseMode::Generate);
        assert_eq!(config.embedding, EmbeddingConfig::default());
        assert!(config.request_timeout_secs.is_none());
    }

    #[test]
    fn test_load_config_invalid_file() {
        let config = load_config("non/existent/path");
        assert!(matches!(config, Err(PipelineError::Io(_))));
    }

    #[test]
    fn test_load_config_invalid_format() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, r#"invalid: config: format"#).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap());

        assert!(matches!(config, Err(PipelineError::Yaml(_))));
    }

    #[test]
    fn test_config_round_trips_through_yaml() {
        let config = RagPipelineConfig {
            embedding: EmbeddingConfig::Local {
                model_id: DEFAULT_LOCAL_EMBEDDING_MODEL.to_string(),
                revision: "main".to_string(),
            },
            ..RagPipelineConfig::default()
        };
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("provider: local"));
        let back: RagPipelineConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_resolve_api_key_prefers_config() {
        let config = RagPipelineConfig {
            api_key: Some("from-config".to_string()),
            ..RagPipelineConfig::default()
        };
        assert_eq!(config.resolve_api_key().unwrap(), "from-config");
    }

    #[test]
    fn test_api_key_falls_back_to_environment_value() {
        let config = RagPipelineConfig {
            api_key: Some(String::new()),
            ..RagPipelineConfig::default()
        };
        assert_eq!(
            config.api_key_or(Some("from-env".to_string())).unwrap(),
            "from-env"
        );
    }

    #[test]
    fn test_missing_api_key_is_a_credential_error() {
        let config = RagPipelineConfig {
            api_key: Some(String::new()),
            ..RagPipelineConfig::default()
        };
        assert!(matches!(
            config.api_key_or(None),
            Err(PipelineError::MissingCredential)
        ));
        assert!(matches!(
            config.api_key_or(Some(String::new())),
            Err(PipelineError::MissingCredential)
        ));
    }
}
