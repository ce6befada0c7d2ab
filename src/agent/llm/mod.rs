//! Language model gateway.
//!
//! This module provides:
//! - [`LlmClient`] trait for swappable model backends
//! - [`GatewayRegistry`] for creating a backend from configuration
//! - Concrete implementations: Azure OpenAI / OpenAI-compatible, Gemini
//!
//! A gateway is stateless with respect to the session. It receives the whole
//! transcript on every call and classifies the model's reply as either a final
//! message or a set of tool calls.
//!
//! # Adding a New Backend
//!
//! 1. Create a new file (e.g., `anthropic.rs`)
//! 2. Implement `LlmClient` trait
//! 3. Add a variant to `ModelProvider` in `config.rs`
//! 4. Add to `GatewayRegistry::create()`

mod types;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::{ModelConfig, ModelProvider};
use crate::error::Error;
use crate::tools::ToolDefinition;
use crate::Result;

pub use types::*;

pub mod gemini;
pub mod openai;

pub use gemini::GeminiClient;
pub use openai::OpenAiClient;

use super::message::{ToolCallRequest, Turn};

const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// What the model wants to happen next.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// A final, user-visible answer
    Message(String),
    /// Tools to run before answering
    ToolCalls(Vec<ToolCallRequest>),
}

/// Response from a model backend.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub reply: Reply,

    /// Free text that arrived alongside tool calls. It is not shown while the
    /// calls are pending.
    pub withheld_content: Option<String>,

    /// Reason the response finished.
    pub finish_reason: String,

    /// Token usage statistics.
    pub usage: Usage,
}

impl LlmResponse {
    /// Create a simple text response.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            reply: Reply::Message(content.into()),
            withheld_content: None,
            finish_reason: "stop".to_string(),
            usage: Usage::default(),
        }
    }

    /// Classify raw reply parts. Tool calls win over text; a reply with
    /// neither is malformed.
    pub fn from_parts(
        content: Option<String>,
        tool_calls: Vec<ToolCallRequest>,
        finish_reason: impl Into<String>,
        usage: Usage,
    ) -> Result<Self> {
        let content = content.filter(|c| !c.trim().is_empty());

        let (reply, withheld_content) = match (tool_calls.is_empty(), content) {
            (false, content) => (Reply::ToolCalls(tool_calls), content),
            (true, Some(text)) => (Reply::Message(text), None),
            (true, None) => {
                return Err(Error::Gateway(
                    "model reply had neither content nor tool calls".to_string(),
                ))
            }
        };

        Ok(Self {
            reply,
            withheld_content,
            finish_reason: finish_reason.into(),
            usage,
        })
    }
}

/// Token usage information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Per-request settings shared by every backend.
#[derive(Debug, Clone, Default)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
}

/// LLM client trait - swappable backend abstraction.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send the transcript and available tools, get the classified reply.
    ///
    /// An empty `tools` slice means the model must answer in text.
    async fn send(&self, turns: &[Turn], tools: &[ToolDefinition]) -> Result<LlmResponse>;

    /// Model or deployment this client talks to.
    fn model(&self) -> &str;
}

#[async_trait]
impl<T: LlmClient + ?Sized> LlmClient for Box<T> {
    async fn send(&self, turns: &[Turn], tools: &[ToolDefinition]) -> Result<LlmResponse> {
        (**self).send(turns, tools).await
    }

    fn model(&self) -> &str {
        (**self).model()
    }
}

/// Gateway registry - creates model clients from configuration.
///
/// # Example
///
/// ```ignore
/// let client = GatewayRegistry::create(&config.model, config.system_prompt.clone(), timeout)?;
/// let response = client.send(transcript.turns(), &registry.definitions()).await?;
/// ```
pub struct GatewayRegistry;

impl GatewayRegistry {
    /// Create a model client. Missing credentials are a configuration error.
    pub fn create(
        config: &ModelConfig,
        system_prompt: Option<String>,
        timeout: Duration,
    ) -> Result<Box<dyn LlmClient>> {
        let api_key = config.api_key()?;
        let settings = GenerationSettings {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            system_prompt,
        };

        match config.provider {
            ModelProvider::AzureOpenai => {
                let endpoint = config.endpoint()?.ok_or_else(|| {
                    Error::Config("azure-openai needs an endpoint".to_string())
                })?;
                let client = OpenAiClient::azure(
                    &endpoint,
                    &config.deployment,
                    &config.api_version,
                    &api_key,
                    settings,
                    timeout,
                )?;
                Ok(Box::new(client))
            }
            ModelProvider::Openai => {
                let base = config
                    .endpoint()?
                    .unwrap_or_else(|| OPENAI_API_URL.to_string());
                let client =
                    OpenAiClient::openai(&base, &config.deployment, &api_key, settings, timeout)?;
                Ok(Box::new(client))
            }
            ModelProvider::Gemini => {
                let client = GeminiClient::new(&api_key, &config.deployment, settings, timeout)?;
                Ok(Box::new(client))
            }
        }
    }
}

/// Id for a tool call the model did not name.
pub(crate) fn synthesize_call_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

/// Decode a tool call's argument string. Blank means no arguments.
pub(crate) fn parse_arguments(tool: &str, raw: &str) -> Result<Value> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw).map_err(|e| {
        Error::Gateway(format!("malformed arguments for tool call '{tool}': {e}"))
    })
}

#[cfg(test)]
pub(crate) use fake::{FakeLlmClient, Scripted};

/// Fake LLM client for testing.
#[cfg(test)]
pub(crate) mod fake {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;

    /// One scripted model behaviour
    #[derive(Debug, Clone)]
    pub enum Scripted {
        Text(String),
        Calls(Vec<ToolCallRequest>),
        TextAndCalls(String, Vec<ToolCallRequest>),
        Fail(String),
        /// Never answers, for cancellation tests
        Hang,
    }

    /// What the client was asked
    #[derive(Debug, Clone)]
    pub struct FakeRequest {
        pub turns: Vec<Turn>,
        pub tool_names: Vec<String>,
    }

    pub struct FakeLlmClient {
        script: Mutex<VecDeque<Scripted>>,
        requests: Arc<Mutex<Vec<FakeRequest>>>,
    }

    impl FakeLlmClient {
        /// Create with predefined text responses.
        pub fn new(responses: Vec<&str>) -> Self {
            Self::scripted(responses.into_iter().map(|s| Scripted::Text(s.to_string())).collect())
        }

        /// Create with a single tool call followed by a text response.
        pub fn with_tool_call(name: &str, args: Value, final_response: &str) -> Self {
            Self::scripted(vec![
                Scripted::Calls(vec![call("tc_1", name, args)]),
                Scripted::Text(final_response.to_string()),
            ])
        }

        pub fn scripted(script: Vec<Scripted>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Shared log of every request, readable after the client is moved.
        pub fn requests(&self) -> Arc<Mutex<Vec<FakeRequest>>> {
            self.requests.clone()
        }
    }

    pub fn call(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    #[async_trait]
    impl LlmClient for FakeLlmClient {
        async fn send(&self, turns: &[Turn], tools: &[ToolDefinition]) -> Result<LlmResponse> {
            self.requests.lock().unwrap().push(FakeRequest {
                turns: turns.to_vec(),
                tool_names: tools.iter().map(|t| t.name.clone()).collect(),
            });

            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Scripted::Text(text)) => Ok(LlmResponse::text(text)),
                Some(Scripted::Calls(calls)) => {
                    LlmResponse::from_parts(None, calls, "tool_calls", Usage::default())
                }
                Some(Scripted::TextAndCalls(text, calls)) => {
                    LlmResponse::from_parts(Some(text), calls, "tool_calls", Usage::default())
                }
                Some(Scripted::Fail(message)) => Err(Error::Gateway(message)),
                Some(Scripted::Hang) => std::future::pending().await,
                None => Err(Error::Gateway("No more fake responses".to_string())),
            }
        }

        fn model(&self) -> &str {
            "fake-model"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fake_llm_client() {
        let client = FakeLlmClient::new(vec!["Hello!", "World!"]);

        let resp1 = client.send(&[], &[]).await.unwrap();
        assert_eq!(resp1.reply, Reply::Message("Hello!".to_string()));

        let resp2 = client.send(&[], &[]).await.unwrap();
        assert_eq!(resp2.reply, Reply::Message("World!".to_string()));

        assert_eq!(client.requests().lock().unwrap().len(), 2);
    }

    #[test]
    fn test_tool_calls_take_priority() {
        let calls = vec![fake::call("c1", "get_item", json!({"id": 5}))];
        let response =
            LlmResponse::from_parts(Some("Let me check.".into()), calls.clone(), "tool_calls", Usage::default())
                .unwrap();
        assert_eq!(response.reply, Reply::ToolCalls(calls));
        assert_eq!(response.withheld_content.as_deref(), Some("Let me check."));
    }

    #[test]
    fn test_empty_reply_is_malformed() {
        let err = LlmResponse::from_parts(Some("  ".into()), vec![], "stop", Usage::default())
            .unwrap_err();
        assert!(matches!(err, Error::Gateway(_)));
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments("t", "").unwrap(), json!({}));
        assert_eq!(parse_arguments("t", r#"{"id":5}"#).unwrap(), json!({"id": 5}));
        assert!(matches!(parse_arguments("t", "{id:"), Err(Error::Gateway(_))));
    }

    #[test]
    fn test_synthesized_ids_are_unique() {
        let a = synthesize_call_id();
        assert!(a.starts_with("call_"));
        assert_ne!(a, synthesize_call_id());
    }

    #[test]
    fn test_create_requires_key() {
        let config: ModelConfig = serde_json::from_value(json!({
            "provider": "openai",
            "model": "gpt-4o",
            "api_key_env": "SWITCHBOARD_TEST_UNSET_KEY"
        }))
        .unwrap();
        let err = GatewayRegistry::create(&config, None, Duration::from_secs(5)).err().unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_create_openai_with_inline_key() {
        let config: ModelConfig = serde_json::from_value(json!({
            "provider": "openai",
            "model": "gpt-4o-mini",
            "api_key": "sk-test"
        }))
        .unwrap();
        let client = GatewayRegistry::create(&config, None, Duration::from_secs(5)).unwrap();
        assert_eq!(client.model(), "gpt-4o-mini");
    }
}
