//! Client-side profile access.
//!
//! A [`ProfileSource`] serves an agent's opaque profile document and runs
//! chat completions *as* that agent (the user's own model, a twin service,
//! or a scripted stand-in). The engine never parses profile contents beyond
//! projecting them to text for encoding and forwarding them to skills.
//!
//! [`JsonProfileSource`] is the file-backed implementation used by demo
//! scenes and tests: profiles load from a JSON document, and chat is served
//! either by an injected [`ReasoningClient`] role-playing the agent or by a
//! canned profile summary when no client is configured.

use async_trait::async_trait;
use futures_util::stream::Stream;
use std::collections::HashMap;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use crate::accord::errors::AccordError;
use crate::accord::reasoning::{Message, ReasoningClient};

/// Boxed stream of text chunks for streaming chat.
pub type TextChunkStream = Pin<Box<dyn Stream<Item = Result<String, AccordError>> + Send>>;

/// Per-agent profile lookup and per-agent chat.
///
/// Implementations must be thread-safe network clients; the engine makes no
/// assumption about their internal locking.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    /// Fetch the agent's profile document. Opaque to the engine.
    async fn get_profile(&self, agent_id: &str) -> Result<serde_json::Value, AccordError>;

    /// Single-turn chat as the given agent.
    async fn chat(
        &self,
        agent_id: &str,
        messages: &[Message],
        system_prompt: Option<&str>,
    ) -> Result<String, AccordError>;

    /// Streaming chat. The default implementation resolves the full
    /// [`chat`](ProfileSource::chat) reply and yields it as one chunk.
    async fn chat_stream(
        &self,
        agent_id: &str,
        messages: &[Message],
        system_prompt: Option<&str>,
    ) -> Result<TextChunkStream, AccordError> {
        let full = self.chat(agent_id, messages, system_prompt).await?;
        Ok(Box::pin(futures_util::stream::iter(vec![Ok(full)])))
    }
}

/// Deterministic projection of a profile document to encoder input.
///
/// Collects self-introduction, bio, and role text, the skills list, and any
/// shade descriptions. Falls back to the agent id when the profile yields no
/// text at all.
pub fn profile_to_text(agent_id: &str, profile: &serde_json::Value) -> String {
    let mut parts: Vec<String> = Vec::new();
    for field in &["self_introduction", "bio", "role"] {
        if let Some(text) = profile.get(*field).and_then(|v| v.as_str()) {
            if !text.is_empty() {
                parts.push(text.to_string());
            }
        }
    }
    if let Some(skills) = profile.get("skills").and_then(|v| v.as_array()) {
        let joined: Vec<String> = skills
            .iter()
            .filter_map(|s| s.as_str().map(|s| s.to_string()))
            .collect();
        if !joined.is_empty() {
            parts.push(joined.join(", "));
        }
    }
    if let Some(shades) = profile.get("shades").and_then(|v| v.as_array()) {
        for shade in shades {
            let desc = shade
                .get("description")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .or_else(|| shade.get("name").and_then(|v| v.as_str()));
            if let Some(desc) = desc {
                parts.push(desc.to_string());
            }
        }
    }
    let text = parts.join(" ");
    if text.trim().is_empty() {
        agent_id.to_string()
    } else {
        text
    }
}

/// File-backed [`ProfileSource`].
///
/// Accepts either a map (`{"agent_id": {profile...}}`) or a list
/// (`[{"agent_id": "...", ...}]`) JSON document.
pub struct JsonProfileSource {
    profiles: HashMap<String, serde_json::Value>,
    llm_client: Option<Arc<dyn ReasoningClient>>,
}

impl JsonProfileSource {
    pub fn load(path: &Path) -> Result<Self, AccordError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AccordError::config(format!("cannot read profile file {}", path.display()))
                .with_cause(Box::new(e))
        })?;
        let data: serde_json::Value = serde_json::from_str(&raw).map_err(|e| {
            AccordError::config(format!("malformed profile file {}", path.display()))
                .with_cause(Box::new(e))
        })?;
        Ok(Self::from_value(data))
    }

    pub fn from_value(data: serde_json::Value) -> Self {
        let mut profiles = HashMap::new();
        match data {
            serde_json::Value::Object(map) => {
                for (agent_id, profile) in map {
                    profiles.insert(agent_id, profile);
                }
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    let aid = item
                        .get("agent_id")
                        .or_else(|| item.get("id"))
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string());
                    if let Some(aid) = aid {
                        profiles.insert(aid, item);
                    }
                }
            }
            _ => {}
        }
        log::info!("loaded {} agent profile(s)", profiles.len());
        Self {
            profiles,
            llm_client: None,
        }
    }

    /// Route chat through the given reasoning client, role-playing agents
    /// from their profiles.
    pub fn with_llm_client(mut self, client: Arc<dyn ReasoningClient>) -> Self {
        self.llm_client = Some(client);
        self
    }

    pub fn agent_ids(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    pub fn display_names(&self) -> HashMap<String, String> {
        self.profiles
            .iter()
            .map(|(aid, profile)| {
                let name = profile
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or(aid)
                    .to_string();
                (aid.clone(), name)
            })
            .collect()
    }

    /// Build the role-play system prompt from the agent's profile.
    fn build_system_prompt(&self, agent_id: &str) -> String {
        let empty = serde_json::json!({});
        let profile = self.profiles.get(agent_id).unwrap_or(&empty);
        let name = profile
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or(agent_id);

        let mut parts = vec![format!("You are {}.", name)];
        if let Some(role) = profile.get("role").and_then(|v| v.as_str()) {
            parts.push(format!("Your role: {}.", role));
        }
        if let Some(skills) = profile.get("skills").and_then(|v| v.as_array()) {
            let joined: Vec<&str> = skills.iter().filter_map(|s| s.as_str()).collect();
            if !joined.is_empty() {
                parts.push(format!("Your core skills: {}.", joined.join(", ")));
            }
        }
        if let Some(bio) = profile.get("bio").and_then(|v| v.as_str()) {
            parts.push(format!("About you: {}", bio));
        }
        if let Some(obj) = profile.as_object() {
            for (key, value) in obj {
                if matches!(key.as_str(), "name" | "role" | "skills" | "bio" | "agent_id" | "id") {
                    continue;
                }
                match value {
                    serde_json::Value::String(s) => parts.push(format!("{}: {}", key, s)),
                    serde_json::Value::Array(items) => {
                        let joined: Vec<String> =
                            items.iter().map(|i| match i {
                                serde_json::Value::String(s) => s.clone(),
                                other => other.to_string(),
                            }).collect();
                        if !joined.is_empty() {
                            parts.push(format!("{}: {}", key, joined.join(", ")));
                        }
                    }
                    _ => {}
                }
            }
        }
        parts.push("Stay in character. Reply concretely and with insight.".to_string());
        parts.join("\n")
    }

    /// Canned reply used when no reasoning client is configured (dev mode).
    fn canned_reply(&self, agent_id: &str) -> String {
        let empty = serde_json::json!({});
        let profile = self.profiles.get(agent_id).unwrap_or(&empty);
        let name = profile
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or(agent_id);
        let skills: Vec<&str> = profile
            .get("skills")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|s| s.as_str()).collect())
            .unwrap_or_default();
        let bio = profile.get("bio").and_then(|v| v.as_str()).unwrap_or("");
        format!("[{}] My skills are {}. {}", name, skills.join(", "), bio)
    }
}

#[async_trait]
impl ProfileSource for JsonProfileSource {
    async fn get_profile(&self, agent_id: &str) -> Result<serde_json::Value, AccordError> {
        match self.profiles.get(agent_id) {
            Some(profile) => Ok(profile.clone()),
            None => Ok(serde_json::json!({"agent_id": agent_id})),
        }
    }

    async fn chat(
        &self,
        agent_id: &str,
        messages: &[Message],
        system_prompt: Option<&str>,
    ) -> Result<String, AccordError> {
        let client = match &self.llm_client {
            Some(client) => client,
            None => return Ok(self.canned_reply(agent_id)),
        };
        let system = match system_prompt {
            Some(s) => s.to_string(),
            None => self.build_system_prompt(agent_id),
        };
        let response = client
            .chat(messages, Some(&system), None)
            .await
            .map_err(|e| {
                AccordError::adapter(format!("chat as agent {} failed", agent_id))
                    .with_cause(Box::new(e))
            })?;
        Ok(response.content.unwrap_or_default())
    }
}
