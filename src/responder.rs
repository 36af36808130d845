//! # Responder
//!
//! [`RetrievalAugmentedResponder`] is the pipeline's single entry point. A host
//! constructs it from configuration, calls [`initialize`](RetrievalAugmentedResponder::initialize)
//! once at startup, then serves queries through [`respond`](RetrievalAugmentedResponder::respond)
//! (or the host-compatible [`pipe`](RetrievalAugmentedResponder::pipe)):
//!
//! ```text
//! initialize ─▶ respond(query) ─▶ retrieve_documents ─▶ [generate_response] ─▶ text
//! ```
//!
//! Before initialization `respond` and `pipe` answer with [`COLLECTION_NOT_INITIALIZED`]
//! instead of failing.
//!
//! ```no_run
//! use ragpipe::config::RagPipelineConfig;
//! use ragpipe::responder::RetrievalAugmentedResponder;
//!
//! # async fn run() -> ragpipe::error::Result<()> {
//! let mut responder = RetrievalAugmentedResponder::new(RagPipelineConfig::default());
//! responder.initialize().await?;
//! println!("{}", responder.respond("What is a borrow checker?").await?);
//! responder.shutdown().await?;
//! # Ok(()) }
//! ```

use async_openai::types::ChatCompletionRequestMessage;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, info};

use crate::api::{ChatCompletion, OpenAIChatClient, build_messages, build_prompt};
use crate::config::{RagPipelineConfig, ResponseMode};
use crate::embedding::{self, EmbeddingFunction};
use crate::error::{PipelineError, Result};
use crate::vector_store::{Collection, PersistentClient};

/// Returned by [`RetrievalAugmentedResponder::respond`] when no collection is open.
pub const COLLECTION_NOT_INITIALIZED: &str = "Error: ChromaDB collection not initialized.";

/// Retrieve-then-generate over one persistent collection.
pub struct RetrievalAugmentedResponder {
    config: RagPipelineConfig,
    client: Option<PersistentClient>,
    collection: Option<Arc<dyn Collection>>,
    generator: Option<Arc<dyn ChatCompletion>>,
}

impl RetrievalAugmentedResponder {
    pub fn new(config: RagPipelineConfig) -> Self {
        Self {
            config,
            client: None,
            collection: None,
            generator: None,
        }
    }

    /// Serve queries from an already-open collection instead of the configured store.
    pub fn with_collection(mut self, collection: Arc<dyn Collection>) -> Self {
        self.collection = Some(collection);
        self
    }

    /// Use `generator` for completions instead of building an OpenAI client at startup.
    pub fn with_generator(mut self, generator: Arc<dyn ChatCompletion>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn config(&self) -> &RagPipelineConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.collection.is_some()
    }

    /// The storage client opened by the last successful initialization.
    pub fn client(&self) -> Option<&PersistentClient> {
        self.client.as_ref()
    }

    /// Startup hook: open the configured storage and collection.
    ///
    /// Builds the configured embedding function, then delegates to
    /// [`initialize_with`](Self::initialize_with). Errors propagate unchanged.
    pub async fn initialize(&mut self) -> Result<()> {
        let embedding_function = embedding::from_config(&self.config).await?;
        self.initialize_with(embedding_function).await
    }

    /// Startup hook with an explicit embedding function.
    ///
    /// Opens or creates the storage directory and the named collection. An existing
    /// collection is reused, never duplicated. In `generate` mode a chat client is
    /// built from the configuration unless one was supplied.
    pub async fn initialize_with(
        &mut self,
        embedding_function: Arc<dyn EmbeddingFunction>,
    ) -> Result<()> {
        let client = PersistentClient::open(&self.config.storage_path)?;
        let collection =
            client.get_or_create_collection(&self.config.collection_name, embedding_function)?;

        if self.generator.is_none() && self.config.response_mode == ResponseMode::Generate {
            self.generator = Some(Arc::new(OpenAIChatClient::from_config(&self.config)?));
        }

        info!(
            "Collection `{}` ready at {}",
            self.config.collection_name,
            client.path().display()
        );
        self.client = Some(client);
        self.collection = Some(Arc::new(collection));
        Ok(())
    }

    /// Shutdown hook. Holds nothing that needs releasing.
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Responder shutting down");
        Ok(())
    }

    /// Fetch up to `top_k` documents nearest to `query`, nearest first.
    ///
    /// # Errors
    /// [`PipelineError::NotInitialized`] before initialization; otherwise whatever the
    /// collection's query raises.
    pub async fn retrieve_documents(&self, query: &str, top_k: usize) -> Result<Vec<String>> {
        let collection = self
            .collection
            .as_ref()
            .ok_or(PipelineError::NotInitialized)?;
        let result = collection.query(&[query.to_string()], top_k).await?;
        let documents = result.documents.into_iter().next().unwrap_or_default();
        debug!("Retrieved {} documents", documents.len());
        Ok(documents)
    }

    /// Ask the chat model to answer `query` from `context`; returns the trimmed answer.
    pub async fn generate_response(&self, query: &str, context: &[String]) -> Result<String> {
        let generator = self
            .generator
            .as_ref()
            .ok_or(PipelineError::NotInitialized)?;
        let messages = build_messages(&self.config.system_prompt, build_prompt(query, context));
        let answer = generator.complete(&self.config.model, messages).await?;
        Ok(answer.trim().to_string())
    }

    /// Number of documents in the open collection.
    pub async fn document_count(&self) -> Result<usize> {
        self.collection
            .as_ref()
            .ok_or(PipelineError::NotInitialized)?
            .count()
            .await
    }

    /// Answer one query according to the configured [`ResponseMode`].
    pub async fn respond(&self, query: &str) -> Result<String> {
        let Some(collection) = self.collection.as_ref() else {
            return Ok(COLLECTION_NOT_INITIALIZED.to_string());
        };

        let documents = self.retrieve_documents(query, self.config.top_k).await?;
        match self.config.response_mode {
            ResponseMode::Documents => {
                let count = collection.count().await?;
                Ok(format_documents(&documents, count))
            }
            ResponseMode::Generate => self.generate_response(query, &documents).await,
        }
    }

    /// Host-compatible entry point.
    ///
    /// Only `user_message` is used; `model_id`, `messages` and `body` exist so hosts
    /// with a fixed call signature can invoke the pipeline, and are ignored.
    pub async fn pipe(
        &self,
        user_message: &str,
        _model_id: &str,
        _messages: &[ChatCompletionRequestMessage],
        _body: &JsonValue,
    ) -> Result<String> {
        self.respond(user_message).await
    }
}

/// The `documents` mode reply: the retrieved texts followed by the collection size.
pub fn format_documents(documents: &[String], total: usize) -> String {
    format!(
        "Retrieved documents:\n{}\n\nTotal documents in collection: {}",
        documents.join("\n\n"),
        total
    )
}
