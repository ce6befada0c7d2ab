//! Chat-completions client for Azure OpenAI and OpenAI-compatible endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::error::Error;
use crate::tools::ToolDefinition;
use crate::Result;

use super::super::message::{Role, ToolCallRequest, Turn};
use super::{
    parse_arguments, synthesize_call_id, ApiErrorBody, ChatMessage, ChatRequest, ChatResponse,
    ChatTool, FunctionSpec, GenerationSettings, LlmClient, LlmResponse, Usage, WireFunction,
    WireToolCall,
};

/// How the endpoint authenticates and addresses the model
#[derive(Debug, Clone, PartialEq, Eq)]
enum Flavor {
    /// Deployment in the URL, `api-key` header
    Azure,
    /// Model in the body, bearer token
    OpenAi,
}

/// Chat-completions client.
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    url: String,
    model: String,
    api_key: String,
    flavor: Flavor,
    settings: GenerationSettings,
}

impl OpenAiClient {
    /// Client for an Azure OpenAI deployment.
    pub fn azure(
        endpoint: &str,
        deployment: &str,
        api_version: &str,
        api_key: &str,
        settings: GenerationSettings,
        timeout: Duration,
    ) -> Result<Self> {
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            endpoint.trim_end_matches('/'),
            deployment,
            api_version
        );
        Self::build(url, deployment, api_key, Flavor::Azure, settings, timeout)
    }

    /// Client for OpenAI or any endpoint speaking the same protocol.
    pub fn openai(
        base_url: &str,
        model: &str,
        api_key: &str,
        settings: GenerationSettings,
        timeout: Duration,
    ) -> Result<Self> {
        let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        Self::build(url, model, api_key, Flavor::OpenAi, settings, timeout)
    }

    fn build(
        url: String,
        model: &str,
        api_key: &str,
        flavor: Flavor,
        settings: GenerationSettings,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            url,
            model: model.to_string(),
            api_key: api_key.to_string(),
            flavor,
            settings,
        })
    }

    fn convert_turns(&self, turns: &[Turn]) -> Vec<ChatMessage> {
        let system = self.settings.system_prompt.iter().map(|prompt| ChatMessage {
            role: "system".to_string(),
            content: Some(prompt.clone()),
            tool_calls: None,
            tool_call_id: None,
        });

        let conversation = turns.iter().map(|turn| match turn.role {
            Role::User => ChatMessage {
                role: "user".to_string(),
                content: Some(turn.content.clone()),
                tool_calls: None,
                tool_call_id: None,
            },
            Role::Assistant => {
                let calls = turn.requested_calls();
                ChatMessage {
                    role: "assistant".to_string(),
                    content: (!turn.content.is_empty() || calls.is_empty())
                        .then(|| turn.content.clone()),
                    tool_calls: (!calls.is_empty())
                        .then(|| calls.iter().map(to_wire_call).collect()),
                    tool_call_id: None,
                }
            }
            Role::Tool => ChatMessage {
                role: "tool".to_string(),
                content: Some(turn.content.clone()),
                tool_calls: None,
                tool_call_id: turn.tool_call_id.clone(),
            },
        });

        system.chain(conversation).collect()
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Vec<ChatTool> {
        tools
            .iter()
            .map(|t| ChatTool {
                kind: "function",
                function: FunctionSpec {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn build_request(&self, turns: &[Turn], tools: &[ToolDefinition]) -> ChatRequest {
        ChatRequest {
            model: (self.flavor == Flavor::OpenAi).then(|| self.model.clone()),
            messages: self.convert_turns(turns),
            tools: Self::convert_tools(tools),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        }
    }

    fn parse_response(response: ChatResponse) -> Result<LlmResponse> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Gateway("No choices in response".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| {
                Ok(ToolCallRequest {
                    id: call
                        .id
                        .filter(|id| !id.is_empty())
                        .unwrap_or_else(synthesize_call_id),
                    arguments: parse_arguments(&call.function.name, &call.function.arguments)?,
                    name: call.function.name,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let usage = response
            .usage
            .map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        LlmResponse::from_parts(
            choice.message.content,
            tool_calls,
            choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            usage,
        )
    }
}

fn to_wire_call(call: &ToolCallRequest) -> WireToolCall {
    WireToolCall {
        id: Some(call.id.clone()),
        kind: "function".to_string(),
        function: WireFunction {
            name: call.name.clone(),
            arguments: call.arguments.to_string(),
        },
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn send(&self, turns: &[Turn], tools: &[ToolDefinition]) -> Result<LlmResponse> {
        let request = self.build_request(turns, tools);

        let builder = self.client.post(&self.url).json(&request);
        let builder = match self.flavor {
            Flavor::Azure => builder.header("api-key", &self.api_key),
            Flavor::OpenAi => builder.bearer_auth(&self.api_key),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Gateway(format!("model service unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);
            return Err(Error::Gateway(format!("{} returned {}: {}", self.model, status, message)));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Gateway(format!("unparseable model reply: {e}")))?;

        let parsed = Self::parse_response(body)?;
        debug!(
            "{} usage: {} prompt + {} completion tokens",
            self.model, parsed.usage.prompt_tokens, parsed.usage.completion_tokens
        );
        Ok(parsed)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
