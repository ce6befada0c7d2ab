//! Gemini LLM client implementation (API key authentication).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::Error;
use crate::tools::ToolDefinition;
use crate::Result;

use super::super::message::{Role, ToolCallRequest, Turn};
use super::{
    synthesize_call_id, GeminiResponse, GenerationSettings, LlmClient, LlmResponse, Usage,
};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Gemini API client using API key authentication.
#[derive(Clone)]
pub struct GeminiClient {
    api_key: String,
    model: String,
    client: Client,
    settings: GenerationSettings,
}

impl GeminiClient {
    /// Create a new Gemini client with API key.
    pub fn new(
        api_key: &str,
        model: &str,
        settings: GenerationSettings,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            client: Client::builder().timeout(timeout).build()?,
            settings,
        })
    }

    fn build_url(&self) -> String {
        format!("{}/{}:generateContent", GEMINI_API_URL, self.model)
    }

    /// Map turns to Gemini contents. Consecutive tool turns are answered
    /// together in one `user` content, one `functionResponse` part each.
    fn convert_turns(turns: &[Turn]) -> Vec<Value> {
        let mut contents: Vec<Value> = Vec::new();
        let mut responses: Vec<Value> = Vec::new();

        for turn in turns {
            if turn.role == Role::Tool {
                let payload = if turn.is_error {
                    json!({"error": turn.content})
                } else {
                    json!({"result": turn.content})
                };
                responses.push(json!({
                    "functionResponse": {
                        "name": turn.tool_name.as_deref().unwrap_or("unknown"),
                        "response": payload
                    }
                }));
                continue;
            }

            if !responses.is_empty() {
                contents.push(json!({"role": "user", "parts": std::mem::take(&mut responses)}));
            }

            let calls = turn.requested_calls();
            if turn.role == Role::Assistant && !calls.is_empty() {
                let mut parts: Vec<Value> = Vec::new();
                if !turn.content.is_empty() {
                    parts.push(json!({"text": turn.content}));
                }
                parts.extend(calls.iter().map(|tc| {
                    json!({
                        "functionCall": {
                            "name": tc.name,
                            "args": tc.arguments
                        }
                    })
                }));
                contents.push(json!({"role": "model", "parts": parts}));
            } else {
                let role = if turn.role == Role::Assistant { "model" } else { "user" };
                contents.push(json!({"role": role, "parts": [{"text": turn.content}]}));
            }
        }

        if !responses.is_empty() {
            contents.push(json!({"role": "user", "parts": responses}));
        }

        contents
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Option<Value> {
        if tools.is_empty() {
            return None;
        }

        let function_declarations: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters
                })
            })
            .collect();

        Some(json!([{
            "functionDeclarations": function_declarations
        }]))
    }

    fn build_request(&self, turns: &[Turn], tools: &[ToolDefinition]) -> Value {
        let mut generation_config = json!({"temperature": self.settings.temperature});
        if let Some(max) = self.settings.max_tokens {
            generation_config["maxOutputTokens"] = json!(max);
        }

        let mut request = json!({
            "contents": Self::convert_turns(turns),
            "generationConfig": generation_config
        });

        if let Some(system) = &self.settings.system_prompt {
            request["systemInstruction"] = json!({
                "parts": [{"text": system}]
            });
        }

        if let Some(tool_config) = Self::convert_tools(tools) {
            request["tools"] = tool_config;
        }

        request
    }

    fn parse_response(response: GeminiResponse) -> Result<LlmResponse> {
        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| Error::Gateway("No candidates in response".to_string()))?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(t) = part.text {
                text.push_str(&t);
            }

            if let Some(fc) = part.function_call {
                let arguments = match fc.args {
                    Value::Null => json!({}),
                    Value::Object(map) => Value::Object(map),
                    other => {
                        return Err(Error::Gateway(format!(
                            "malformed arguments for tool call '{}': {}",
                            fc.name, other
                        )))
                    }
                };
                tool_calls.push(ToolCallRequest {
                    id: fc.id.filter(|id| !id.is_empty()).unwrap_or_else(synthesize_call_id),
                    name: fc.name,
                    arguments,
                });
            }
        }

        let usage = response
            .usage_metadata
            .as_ref()
            .map(|u| Usage {
                prompt_tokens: u.prompt_token_count.unwrap_or(0),
                completion_tokens: u.candidates_token_count.unwrap_or(0),
                total_tokens: u.total_token_count.unwrap_or(0),
            })
            .unwrap_or_default();

        LlmResponse::from_parts(
            Some(text),
            tool_calls,
            candidate
                .finish_reason
                .unwrap_or_else(|| "STOP".to_string()),
            usage,
        )
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn send(&self, turns: &[Turn], tools: &[ToolDefinition]) -> Result<LlmResponse> {
        let request = self.build_request(turns, tools);

        let response = self
            .client
            .post(self.build_url())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Gateway(format!("model service unreachable: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Gateway(format!("Gemini API error {status}: {error_text}")));
        }

        let gemini_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| Error::Gateway(format!("unparseable model reply: {e}")))?;

        let parsed = Self::parse_response(gemini_response)?;
        debug!("{} usage: {} total tokens", self.model, parsed.usage.total_tokens);
        Ok(parsed)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
