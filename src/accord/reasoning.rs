//! Shared primitives for the platform-side reasoning service.
//!
//! The engine talks to its reasoning LLM through the [`ReasoningClient`]
//! trait and the lightweight data types in this module. The trait abstracts
//! over concrete vendor implementations while the supporting structs describe
//! chat messages, tool schemas, and tool-call responses.
//!
//! # Basic request/response
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use accord::reasoning::{Message, ReasoningClient, Role};
//! use accord::clients::openai::OpenAIReasoningClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let key = std::env::var("ACCORD_API_KEY")?;
//!     let client = OpenAIReasoningClient::new(&key, "gpt-4o-mini");
//!
//!     let response = client
//!         .chat(
//!             &[Message {
//!                 role: Role::User,
//!                 content: Arc::from("Summarize these offers."),
//!             }],
//!             None,
//!             None,
//!         )
//!         .await?;
//!
//!     println!("{}", response.content.unwrap_or_default());
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use std::sync::Arc;

use crate::accord::errors::AccordError;

/// Roles of a chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// A system message priming or constraining the model.
    System,
    /// A user authored message.
    User,
    /// A model authored message.
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A generic chat message.
///
/// Bodies are `Arc<str>` so histories can be cheaply cloned when the
/// coordinator rebuilds its prompt each round.
#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: Arc<str>,
}

impl Message {
    pub fn system(content: impl AsRef<str>) -> Self {
        Self {
            role: Role::System,
            content: Arc::from(content.as_ref()),
        }
    }

    pub fn user(content: impl AsRef<str>) -> Self {
        Self {
            role: Role::User,
            content: Arc::from(content.as_ref()),
        }
    }

    pub fn assistant(content: impl AsRef<str>) -> Self {
        Self {
            role: Role::Assistant,
            content: Arc::from(content.as_ref()),
        }
    }
}

/// Provider-agnostic tool schema passed to the reasoning service.
///
/// Serialized as an OpenAI-compatible `tools` array entry before
/// transmission.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    /// Tool name as it appears in the API `tools` array.
    pub name: String,
    /// Description surfaced to the model to aid tool selection.
    pub description: String,
    /// JSON Schema object describing the accepted parameters.
    pub parameters_schema: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters_schema,
        }
    }
}

/// A single tool call returned by the reasoning service.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    /// Provider-assigned call id, e.g. `"call_abc123"`.
    pub id: String,
    /// Tool name matching one of the sent [`ToolDefinition`]s.
    pub name: String,
    /// Parsed JSON arguments supplied by the model.
    pub arguments: serde_json::Value,
}

/// Uniform response shape of a reasoning call.
///
/// `tool_calls` is the authoritative signal; `content` is advisory text the
/// model produced alongside (or instead of) tool calls.
#[derive(Debug, Clone)]
pub struct ReasoningResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub stop_reason: String,
}

impl ReasoningResponse {
    /// Plain-text response without tool calls.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            stop_reason: "end_turn".to_string(),
        }
    }

    /// Response consisting of the given tool calls.
    pub fn tools(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: None,
            tool_calls,
            stop_reason: "tool_use".to_string(),
        }
    }
}

/// Trait-driven abstraction over the platform-side reasoning service.
///
/// Implementations **must** be thread-safe (`Send + Sync`) so a single
/// client can serve many concurrent negotiations. The engine treats the
/// client as a stateless network handle and makes no assumption about its
/// internal locking.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// Send a chat request, optionally carrying a system prompt and native
    /// tool schemas, and return the uniform [`ReasoningResponse`].
    async fn chat(
        &self,
        messages: &[Message],
        system_prompt: Option<&str>,
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ReasoningResponse, AccordError>;

    /// Identifier used to select the upstream model (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let msg = Message::user("hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content.as_ref(), "hello");
        assert_eq!(Role::System.as_str(), "system");
    }

    #[test]
    fn test_response_shapes() {
        let text = ReasoningResponse::text("a plan");
        assert_eq!(text.stop_reason, "end_turn");
        assert!(text.tool_calls.is_empty());

        let tools = ReasoningResponse::tools(vec![ToolCallRequest {
            id: "call_1".to_string(),
            name: "output_plan".to_string(),
            arguments: serde_json::json!({"plan_text": "x"}),
        }]);
        assert_eq!(tools.stop_reason, "tool_use");
        assert!(tools.content.is_none());
    }
}
