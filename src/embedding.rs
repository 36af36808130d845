//! # Embedding functions
//!
//! A collection turns text into vectors through an [`EmbeddingFunction`]. Two are
//! provided, chosen once from [`EmbeddingConfig`] when the pipeline starts:
//!
//! - [`OpenAIEmbeddingFunction`] calls the hosted `/embeddings` endpoint of any OpenAI
//!   compatible API.
//! - [`SentenceEmbeddingFunction`] runs a BERT sentence model (all-MiniLM-L6-v2 by
//!   default) locally with Candle. Weights come from the Hugging Face hub cache.
//!
//! The function's [`name`](EmbeddingFunction::name) is recorded in the collection
//! manifest so a collection is never queried in a different vector space than the one
//! it was built in.

use async_openai::{Client, config::OpenAIConfig, types::CreateEmbeddingRequestArgs};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use std::sync::Arc;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::api::create_client;
use crate::config::{EmbeddingConfig, RagPipelineConfig};
use crate::error::{PipelineError, Result};

/// Maps text to fixed-length vectors.
#[async_trait]
pub trait EmbeddingFunction: Send + Sync {
    /// Stable identifier persisted alongside the vectors it produced.
    fn name(&self) -> &str;

    /// Embed each text, preserving input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Build the embedding function named by the configuration.
///
/// The local model is downloaded (or read from the hub cache) before this returns.
pub async fn from_config(config: &RagPipelineConfig) -> Result<Arc<dyn EmbeddingFunction>> {
    match &config.embedding {
        EmbeddingConfig::OpenAi { model } => {
            let client = create_client(config)?;
            Ok(Arc::new(OpenAIEmbeddingFunction::new(client, model.clone())))
        }
        EmbeddingConfig::Local { model_id, revision } => Ok(Arc::new(
            SentenceEmbeddingFunction::load(model_id.clone(), revision.clone()).await?,
        )),
    }
}

/// Hosted embeddings through an OpenAI compatible API.
pub struct OpenAIEmbeddingFunction {
    client: Client<OpenAIConfig>,
    model: String,
    name: String,
}

impl OpenAIEmbeddingFunction {
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        let name = format!("openai:{model}");
        Self {
            client,
            model,
            name,
        }
    }
}

#[async_trait]
impl EmbeddingFunction for OpenAIEmbeddingFunction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = CreateEmbeddingRequestArgs::default()
            .model(self.model.clone())
            .input(texts.to_vec())
            .build()?;

        debug!("Requesting {} embeddings from {}", texts.len(), self.model);
        let response = self.client.embeddings().create(request).await?;

        // The API tags each vector with its input position; don't trust arrival order.
        let mut data = response.data;
        data.sort_by_key(|e| e.index);
        if data.len() != texts.len() {
            return Err(PipelineError::Embedding(format!(
                "requested {} embeddings, received {}",
                texts.len(),
                data.len()
            )));
        }

        Ok(data.into_iter().map(|e| e.embedding).collect())
    }
}

/// Sentence embeddings model using Candle (pure Rust)
pub struct SentenceEmbeddingsModel {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl SentenceEmbeddingsModel {
    /// Load the model from Hugging Face Hub. Blocks on network and disk I/O.
    pub fn load(model_id: &str, revision: &str) -> Result<Self> {
        let device = Device::Cpu;

        let repo = Repo::with_revision(model_id.to_string(), RepoType::Model, revision.to_string());
        let api = Api::new()?;
        let api_repo = api.repo(repo);

        let config_filename = api_repo.get("config.json")?;
        let tokenizer_filename = api_repo.get("tokenizer.json")?;
        let weights_filename = api_repo.get("model.safetensors")?;

        let config = std::fs::read_to_string(config_filename)?;
        let config: Config = serde_json::from_str(&config)?;

        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| PipelineError::Embedding(format!("Failed to load tokenizer: {e}")))?;

        // SAFETY: the hub cache file is not modified while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_filename], DTYPE, &device)? };
        let model = BertModel::load(vb, &config)?;

        Ok(Self {
            model,
            tokenizer,
            device,
        })
    }

    /// Encode text into an L2-normalized embedding.
    pub fn encode(&self, text: &str) -> Result<Vec<f32>> {
        // Tokenize with automatic truncation at 512 tokens
        let tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| PipelineError::Embedding(format!("Tokenization error: {e}")))?;

        let token_ids = Tensor::new(tokens.get_ids(), &self.device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::new(tokens.get_type_ids(), &self.device)?.unsqueeze(0)?;

        let output = self.model.forward(&token_ids, &token_type_ids, None)?;
        let embedding = self.mean_pooling(&output, tokens.get_attention_mask())?;
        let embedding = self.normalize(&embedding)?;

        Ok(embedding.to_vec1::<f32>()?)
    }

    /// Mean pooling over token embeddings, considering attention mask
    fn mean_pooling(&self, embeddings: &Tensor, attention_mask: &[u32]) -> Result<Tensor> {
        // embeddings: [1, seq_len, hidden]; mask reshaped to [1, seq_len, 1] to broadcast
        let mask = Tensor::new(attention_mask, &self.device)?
            .to_dtype(DType::F32)?
            .unsqueeze(0)?
            .unsqueeze(2)?;

        let sum = embeddings.broadcast_mul(&mask)?.sum(1)?;
        let count = mask.sum(1)?.clamp(1f32, f32::INFINITY)?;

        Ok(sum.broadcast_div(&count)?.squeeze(0)?)
    }

    fn normalize(&self, tensor: &Tensor) -> Result<Tensor> {
        let norm = tensor.sqr()?.sum_all()?.sqrt()?;
        Ok(tensor.broadcast_div(&norm)?)
    }
}

/// Local sentence embeddings. Inference runs on Tokio's blocking pool.
pub struct SentenceEmbeddingFunction {
    model: Arc<SentenceEmbeddingsModel>,
    name: String,
}

impl SentenceEmbeddingFunction {
    pub async fn load(model_id: String, revision: String) -> Result<Self> {
        info!("Loading sentence embedding model {}@{}", model_id, revision);
        let name = format!("local:{model_id}");
        let model =
            tokio::task::spawn_blocking(move || SentenceEmbeddingsModel::load(&model_id, &revision))
                .await??;
        Ok(Self {
            model: Arc::new(model),
            name,
        })
    }
}

#[async_trait]
impl EmbeddingFunction for SentenceEmbeddingFunction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || {
            texts
                .iter()
                .map(|t| model.encode(t))
                .collect::<Result<Vec<_>>>()
        })
        .await?
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::KeywordEmbedding;
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn mock_config(api_base: String) -> RagPipelineConfig {
        RagPipelineConfig {
            api_key: Some("mock_api_key".to_string()),
            api_base,
            ..RagPipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_openai_embeddings_follow_input_order() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({
                        "object": "list",
                        "model": "text-embedding-ada-002",
                        "data": [
                            {"object": "embedding", "index": 1, "embedding": [0.0, 1.0]},
                            {"object": "embedding", "index": 0, "embedding": [1.0, 0.0]}
                        ],
                        "usage": {"prompt_tokens": 4, "total_tokens": 4}
                    }));
            })
            .await;

        let config = mock_config(server.url("/v1"));
        let function = OpenAIEmbeddingFunction::new(
            create_client(&config).unwrap(),
            "text-embedding-ada-002".to_string(),
        );

        let vectors = function
            .embed(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(function.name(), "openai:text-embedding-ada-002");
    }

    #[tokio::test]
    async fn test_openai_embeddings_skip_request_for_no_input() {
        // Nothing listens here, so any request would fail.
        let config = mock_config("http://127.0.0.1:9/v1".to_string());
        let function =
            OpenAIEmbeddingFunction::new(create_client(&config).unwrap(), "m".to_string());

        assert!(function.embed(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_from_config_builds_hosted_function() {
        let config = mock_config("http://localhost:1/v1".to_string());
        let function = from_config(&config).await.unwrap();
        assert_eq!(function.name(), "openai:text-embedding-ada-002");
    }

    #[tokio::test]
    async fn test_keyword_embedding_is_deterministic_and_normalized() {
        let function = KeywordEmbedding::new();
        let vectors = function
            .embed(&["Rust is cool.".to_string(), "rust IS cool".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors[0], vectors[1]);
        let norm = vectors[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
