//! OpenAI-compatible reasoning client.
//!
//! Posts to `{base_url}/chat/completions` with an
//! `Authorization: Bearer {api_key}` header and native `tools` definitions,
//! then parses the assistant content and any tool calls the model requested
//! into the uniform [`ReasoningResponse`] shape. Compatible with OpenAI and
//! with the OpenAI-compatible endpoints of other vendors.
//!
//! Transport-level failures are retried once with a short backoff; the chat
//! request is an idempotent context, so a retry cannot double-apply
//! anything. HTTP error statuses from the provider are surfaced as
//! reasoning errors without retry beyond that single attempt.

use async_trait::async_trait;
use std::time::Duration;

use crate::accord::clients::http_pool::get_shared_http_client;
use crate::accord::errors::AccordError;
use crate::accord::reasoning::{
    Message, ReasoningClient, ReasoningResponse, Role, ToolCallRequest, ToolDefinition,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// [`ReasoningClient`] for OpenAI-compatible chat-completion endpoints.
pub struct OpenAIReasoningClient {
    api_key: String,
    base_url: String,
    model: String,
    http_client: reqwest::Client,
}

impl OpenAIReasoningClient {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self::new_with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    pub fn new_with_base_url(api_key: &str, model: &str, base_url: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            http_client: get_shared_http_client().clone(),
        }
    }

    fn wire_messages(
        messages: &[Message],
        system_prompt: Option<&str>,
    ) -> Vec<serde_json::Value> {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = system_prompt {
            wire.push(serde_json::json!({"role": "system", "content": system}));
        }
        for msg in messages {
            wire.push(serde_json::json!({
                "role": match msg.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                "content": msg.content.as_ref(),
            }));
        }
        wire
    }

    fn wire_tools(tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters_schema,
                    }
                })
            })
            .collect()
    }

    fn parse_response(parsed: serde_json::Value) -> Result<ReasoningResponse, AccordError> {
        let choice = parsed
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| AccordError::reasoning("no choices in provider response"))?;

        let stop_reason = choice
            .get("finish_reason")
            .and_then(|r| r.as_str())
            .unwrap_or("end_turn")
            .to_string();

        let message = choice
            .get("message")
            .ok_or_else(|| AccordError::reasoning("no message in provider response"))?;

        let content = message
            .get("content")
            .and_then(|c| c.as_str())
            .map(|s| s.to_string());

        let tool_calls: Vec<ToolCallRequest> = message
            .get("tool_calls")
            .and_then(|tc| tc.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|tc| {
                        let id = tc.get("id")?.as_str()?.to_string();
                        let func = tc.get("function")?;
                        let name = func.get("name")?.as_str()?.to_string();
                        let args_str = func.get("arguments")?.as_str().unwrap_or("{}");
                        let arguments: serde_json::Value = serde_json::from_str(args_str)
                            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));
                        Some(ToolCallRequest {
                            id,
                            name,
                            arguments,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(ReasoningResponse {
            content,
            tool_calls,
            stop_reason,
        })
    }

    async fn send_once(&self, body: &serde_json::Value) -> Result<ReasoningResponse, AccordError> {
        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                AccordError::reasoning(format!("request to {} failed", url)).with_cause(Box::new(e))
            })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| {
            AccordError::reasoning("failed to read provider response body").with_cause(Box::new(e))
        })?;

        if !status.is_success() {
            log::error!("reasoning client: HTTP {} from {}: {}", status, url, text);
            return Err(AccordError::reasoning(format!(
                "HTTP {} from provider: {}",
                status, text
            )));
        }

        let parsed: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
            AccordError::reasoning("provider returned non-JSON body").with_cause(Box::new(e))
        })?;
        Self::parse_response(parsed)
    }
}

#[async_trait]
impl ReasoningClient for OpenAIReasoningClient {
    async fn chat(
        &self,
        messages: &[Message],
        system_prompt: Option<&str>,
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ReasoningResponse, AccordError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": Self::wire_messages(messages, system_prompt),
        });
        if let Some(tools) = tools {
            if !tools.is_empty() {
                body["tools"] = serde_json::Value::Array(Self::wire_tools(tools));
            }
        }

        match self.send_once(&body).await {
            Ok(response) => Ok(response),
            Err(first) => {
                log::warn!(
                    "reasoning client: first attempt failed ({}), retrying once",
                    first
                );
                tokio::time::sleep(RETRY_BACKOFF).await;
                self.send_once(&body).await.map_err(|second| {
                    second.with_cause(Box::new(first))
                })
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_messages_prepends_system() {
        let messages = vec![Message::user("hi")];
        let wire = OpenAIReasoningClient::wire_messages(&messages, Some("be terse"));
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[0]["content"], "be terse");
        assert_eq!(wire[1]["role"], "user");
    }

    #[test]
    fn test_parse_response_with_tool_calls() {
        let parsed = serde_json::json!({
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "output_plan",
                            "arguments": "{\"plan_text\": \"done\"}"
                        }
                    }]
                }
            }]
        });
        let response = OpenAIReasoningClient::parse_response(parsed).unwrap();
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "output_plan");
        assert_eq!(response.tool_calls[0].arguments["plan_text"], "done");
        assert!(response.content.is_none());
    }

    #[test]
    fn test_parse_response_text_only() {
        let parsed = serde_json::json!({
            "choices": [{
                "finish_reason": "stop",
                "message": {"content": "plain answer"}
            }]
        });
        let response = OpenAIReasoningClient::parse_response(parsed).unwrap();
        assert_eq!(response.content.as_deref(), Some("plain answer"));
        assert!(response.tool_calls.is_empty());
        assert_eq!(response.stop_reason, "stop");
    }

    #[test]
    fn test_parse_response_without_choices_errors() {
        let parsed = serde_json::json!({"error": {"message": "bad"}});
        assert!(OpenAIReasoningClient::parse_response(parsed).is_err());
    }
}
