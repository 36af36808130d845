//! # API Module
//!
//! This module handles the chat-completion side of the pipeline: building the
//! OpenAI client from configuration, assembling the grounded prompt, and fetching
//! a single non-streamed completion.
//!
//! The [`ChatCompletion`] trait is the seam between the responder and the network;
//! [`OpenAIChatClient`] is the production implementation.
//!
//! # Example
//!
//! ```no_run
//! use ragpipe::api::{ChatCompletion, OpenAIChatClient, build_messages, build_prompt};
//! use ragpipe::config::RagPipelineConfig;
//!
//! # async fn run() -> ragpipe::error::Result<()> {
//! let config = RagPipelineConfig::default();
//! let client = OpenAIChatClient::from_config(&config)?;
//! let prompt = build_prompt("What is Rust?", &["Rust is a language.".to_string()]);
//! let answer = client
//!     .complete(&config.model, build_messages(&config.system_prompt, prompt))
//!     .await?;
//! println!("{answer}");
//! # Ok(()) }
//! ```
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use std::time::Duration;

use tracing::debug;

use crate::config::RagPipelineConfig;
use crate::error::{PipelineError, Result};

/// Creates a new OpenAI API client from configuration.
///
/// # Parameters
/// - `config: &RagPipelineConfig`: Configuration containing API base, key and timeout.
///
/// # Returns
/// - `Result<Client<OpenAIConfig>>`: Created client, or [`PipelineError::MissingCredential`]
///   when no key is configured.
pub fn create_client(config: &RagPipelineConfig) -> Result<Client<OpenAIConfig>> {
    let openai_config = OpenAIConfig::new()
        .with_api_key(config.resolve_api_key()?)
        .with_api_base(config.api_base.clone());
    debug!("Client created for {}", config.api_base);

    let client = Client::with_config(openai_config);
    match config.request_timeout_secs {
        Some(secs) => {
            let http_client = reqwest::Client::builder()
                .timeout(Duration::from_secs(secs))
                .build()?;
            Ok(client.with_http_client(http_client))
        }
        None => Ok(client),
    }
}

/// Builds the user prompt that grounds the question in retrieved context.
///
/// Documents are joined with a blank line between them:
///
/// ```
/// let prompt = ragpipe::api::build_prompt("Why?", &["a".to_string(), "b".to_string()]);
/// assert_eq!(prompt, "Context:\na\n\nb\n\nQuestion: Why?\nAnswer:");
/// ```
pub fn build_prompt(query: &str, context: &[String]) -> String {
    format!(
        "Context:\n{}\n\nQuestion: {}\nAnswer:",
        context.join("\n\n"),
        query
    )
}

/// The two-message conversation sent for every query: system instruction, then prompt.
pub fn build_messages(system_prompt: &str, prompt: String) -> Vec<ChatCompletionRequestMessage> {
    vec![
        ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
            content: ChatCompletionRequestSystemMessageContent::Text(system_prompt.to_string()),
            name: None,
        }),
        ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
            content: ChatCompletionRequestUserMessageContent::Text(prompt),
            name: None,
        }),
    ]
}

/// A chat-completion backend.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Returns the content of the first choice, untrimmed.
    async fn complete(
        &self,
        model: &str,
        messages: Vec<ChatCompletionRequestMessage>,
    ) -> Result<String>;
}

/// [`ChatCompletion`] over an OpenAI compatible `/chat/completions` endpoint.
///
/// No retries and no streaming: one request, one answer.
pub struct OpenAIChatClient {
    client: Client<OpenAIConfig>,
}

impl OpenAIChatClient {
    pub fn new(client: Client<OpenAIConfig>) -> Self {
        Self { client }
    }

    pub fn from_config(config: &RagPipelineConfig) -> Result<Self> {
        Ok(Self::new(create_client(config)?))
    }
}

#[async_trait]
impl ChatCompletion for OpenAIChatClient {
    async fn complete(
        &self,
        model: &str,
        messages: Vec<ChatCompletionRequestMessage>,
    ) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(messages)
            .build()?;

        debug!("Sending request: {:?}", request);

        let response = self.client.chat().create(request).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(PipelineError::EmptyCompletion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn setup() {
        let _ = tracing_subscriber::fmt::try_init();
    }

    fn mock_config(api_base: String) -> RagPipelineConfig {
        RagPipelineConfig {
            api_key: Some("mock_api_key".to_string()),
            api_base,
            ..RagPipelineConfig::default()
        }
    }

    fn completion_body(content: serde_json::Value) -> serde_json::Value {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "gpt-4",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop",
                "logprobs": null
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        })
    }

    #[test]
    fn test_build_prompt_two_documents() {
        let context = vec!["doc one".to_string(), "doc two".to_string()];
        assert_eq!(
            build_prompt("what?", &context),
            "Context:\ndoc one\n\ndoc two\n\nQuestion: what?\nAnswer:"
        );
    }

    #[test]
    fn test_build_prompt_without_context() {
        assert_eq!(build_prompt("q", &[]), "Context:\n\n\nQuestion: q\nAnswer:");
    }

    #[test]
    fn test_build_messages_order() {
        let messages = build_messages("You are an AI assistant.", "prompt".to_string());
        assert_eq!(messages.len(), 2);
        match &messages[0] {
            ChatCompletionRequestMessage::System(m) => assert!(matches!(
                &m.content,
                ChatCompletionRequestSystemMessageContent::Text(t) if t == "You are an AI assistant."
            )),
            other => panic!("expected system message, got {other:?}"),
        }
        match &messages[1] {
            ChatCompletionRequestMessage::User(m) => assert!(matches!(
                &m.content,
                ChatCompletionRequestUserMessageContent::Text(t) if t == "prompt"
            )),
            other => panic!("expected user message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_client() {
        setup();
        let config = mock_config("http://mock.api.base/v1".to_string());
        assert!(create_client(&config).is_ok(), "Failed to create client");
    }

    #[tokio::test]
    async fn test_create_client_with_timeout() {
        let config = RagPipelineConfig {
            request_timeout_secs: Some(5),
            ..mock_config("http://mock.api.base/v1".to_string())
        };
        assert!(create_client(&config).is_ok());
    }

    #[tokio::test]
    async fn test_complete_returns_first_choice() {
        setup();
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(completion_body(json!("  Paris.\n")));
            })
            .await;

        let client = OpenAIChatClient::from_config(&mock_config(server.url("/v1"))).unwrap();
        let answer = client
            .complete("gpt-4", build_messages("sys", "prompt".to_string()))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(answer, "  Paris.\n");
    }

    #[tokio::test]
    async fn test_complete_without_content_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(completion_body(serde_json::Value::Null));
            })
            .await;

        let client = OpenAIChatClient::from_config(&mock_config(server.url("/v1"))).unwrap();
        let result = client
            .complete("gpt-4", build_messages("sys", "prompt".to_string()))
            .await;

        assert!(matches!(result, Err(PipelineError::EmptyCompletion)));
    }

    #[tokio::test]
    async fn test_complete_propagates_auth_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(401)
                    .header("content-type", "application/json")
                    .json_body(json!({
                        "error": {
                            "message": "Incorrect API key provided",
                            "type": "invalid_request_error",
                            "param": null,
                            "code": "invalid_api_key"
                        }
                    }));
            })
            .await;

        let client = OpenAIChatClient::from_config(&mock_config(server.url("/v1"))).unwrap();
        let result = client
            .complete("gpt-4", build_messages("sys", "prompt".to_string()))
            .await;

        assert!(matches!(result, Err(PipelineError::OpenAI(_))));
    }
}
