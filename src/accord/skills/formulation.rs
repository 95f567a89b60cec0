//! Demand formulation: enriching a raw intent with the user's own context.
//!
//! Client-side skill — the call runs through the user's
//! [`ProfileSource`](crate::profile::ProfileSource), so the enrichment is
//! grounded in what that user's model knows about them.

use crate::accord::errors::AccordError;
use crate::accord::profile::ProfileSource;
use crate::accord::reasoning::Message;
use crate::accord::skills::{reject_llm_errors, strip_code_fence, string_list, Skill};

const SYSTEM_PROMPT: &str = "\
You represent a real person. Your task is to understand what the user truly needs \
and help them express it more accurately and completely, based on your knowledge of them.

Rules:
1. Distinguish \"needs\" from \"requirements\" - the specific ask may be just one way to satisfy the real need.
2. Supplement with relevant context from the user's profile so responders understand better.
3. Do not replace the user's original intent - enrich and supplement it.
4. Preserve the user's preferences, but mark which are hard constraints and which are negotiable.

The user's profile:
{profile_data}

Output in JSON format:
{
  \"formulated_text\": \"the enriched demand text\",
  \"enrichments\": {
    \"hard_constraints\": [\"...\"],
    \"negotiable_preferences\": [\"...\"],
    \"context_added\": [\"...\"]
  }
}";

/// Structured additions the formulation surfaced alongside the text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enrichments {
    pub hard_constraints: Vec<String>,
    pub negotiable_preferences: Vec<String>,
    pub context_added: Vec<String>,
}

/// Validated output of the formulation skill.
#[derive(Debug, Clone)]
pub struct FormulationResult {
    pub formulated_text: String,
    pub enrichments: Enrichments,
}

/// Enriches a user's raw intent using their profile data.
#[derive(Debug, Clone, Default)]
pub struct FormulationSkill;

impl Skill for FormulationSkill {
    fn name(&self) -> &'static str {
        "demand_formulation"
    }
}

impl FormulationSkill {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute(
        &self,
        raw_intent: &str,
        agent_id: &str,
        profile_data: &serde_json::Value,
        adapter: &dyn ProfileSource,
    ) -> Result<FormulationResult, AccordError> {
        if raw_intent.trim().is_empty() {
            return Err(AccordError::skill("raw_intent is required").with_skill(self.name()));
        }
        if agent_id.trim().is_empty() {
            return Err(AccordError::skill("agent_id is required").with_skill(self.name()));
        }

        let (system_prompt, messages) = self.build_prompt(raw_intent, profile_data);
        let raw_output = adapter
            .chat(agent_id, &messages, Some(&system_prompt))
            .await?;
        self.validate_output(&raw_output)
    }

    fn build_prompt(
        &self,
        raw_intent: &str,
        profile_data: &serde_json::Value,
    ) -> (String, Vec<Message>) {
        let profile_str = if profile_data.is_null() {
            "(no profile data)".to_string()
        } else {
            serde_json::to_string_pretty(profile_data)
                .unwrap_or_else(|_| "(no profile data)".to_string())
        };
        let system = SYSTEM_PROMPT.replace("{profile_data}", &profile_str);
        let messages = vec![Message::user(format!(
            "The user says: {}\nPlease generate an enriched demand expression.",
            raw_intent
        ))];
        (system, messages)
    }

    fn validate_output(&self, raw_output: &str) -> Result<FormulationResult, AccordError> {
        reject_llm_errors(self.name(), raw_output)?;
        let cleaned = strip_code_fence(raw_output);

        let (formulated, enrichments) = match serde_json::from_str::<serde_json::Value>(cleaned) {
            Ok(parsed) => {
                let formulated = parsed
                    .get("formulated_text")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .trim()
                    .to_string();
                let raw = parsed.get("enrichments");
                let enrichments = Enrichments {
                    hard_constraints: string_list(raw.and_then(|e| e.get("hard_constraints"))),
                    negotiable_preferences: string_list(
                        raw.and_then(|e| e.get("negotiable_preferences")),
                    ),
                    context_added: string_list(raw.and_then(|e| e.get("context_added"))),
                };
                (formulated, enrichments)
            }
            // Lenient: treat the entire output as the formulated text.
            Err(_) => (cleaned.trim().to_string(), Enrichments::default()),
        };

        if formulated.is_empty() {
            return Err(
                AccordError::skill("demand_formulation: formulated_text is empty")
                    .with_skill(self.name()),
            );
        }

        Ok(FormulationResult {
            formulated_text: formulated,
            enrichments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accord::profile::JsonProfileSource;
    use async_trait::async_trait;

    struct ScriptedSource {
        response: String,
    }

    #[async_trait]
    impl ProfileSource for ScriptedSource {
        async fn get_profile(&self, agent_id: &str) -> Result<serde_json::Value, AccordError> {
            Ok(serde_json::json!({"agent_id": agent_id}))
        }

        async fn chat(
            &self,
            _agent_id: &str,
            _messages: &[Message],
            _system_prompt: Option<&str>,
        ) -> Result<String, AccordError> {
            Ok(self.response.clone())
        }
    }

    fn profile() -> serde_json::Value {
        serde_json::json!({"name": "Alice", "skills": ["python", "ML"]})
    }

    #[tokio::test]
    async fn test_json_response_parsed() {
        let source = ScriptedSource {
            response: serde_json::json!({
                "formulated_text": "I need an AI/ML technical co-founder with startup experience",
                "enrichments": {
                    "hard_constraints": ["technical background"],
                    "negotiable_preferences": ["location"],
                    "context_added": ["Alice has ML background"],
                }
            })
            .to_string(),
        };
        let result = FormulationSkill::new()
            .execute("I need a co-founder", "agent_alice", &profile(), &source)
            .await
            .unwrap();
        assert_eq!(
            result.formulated_text,
            "I need an AI/ML technical co-founder with startup experience"
        );
        assert_eq!(result.enrichments.hard_constraints, vec!["technical background"]);
    }

    #[tokio::test]
    async fn test_plain_text_is_lenient_fallback() {
        let source = ScriptedSource {
            response: "I need a technical co-founder who can build AI products".to_string(),
        };
        let result = FormulationSkill::new()
            .execute("I need a co-founder", "agent_alice", &profile(), &source)
            .await
            .unwrap();
        assert_eq!(
            result.formulated_text,
            "I need a technical co-founder who can build AI products"
        );
        assert_eq!(result.enrichments, Enrichments::default());
    }

    #[tokio::test]
    async fn test_fenced_json_accepted() {
        let source = ScriptedSource {
            response: "```json\n{\"formulated_text\": \"refined\", \"enrichments\": {}}\n```"
                .to_string(),
        };
        let result = FormulationSkill::new()
            .execute("intent", "agent_alice", &profile(), &source)
            .await
            .unwrap();
        assert_eq!(result.formulated_text, "refined");
    }

    #[tokio::test]
    async fn test_missing_raw_intent_rejected() {
        let source = ScriptedSource {
            response: "anything".to_string(),
        };
        let err = FormulationSkill::new()
            .execute("", "agent_alice", &profile(), &source)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("raw_intent is required"));
    }

    #[tokio::test]
    async fn test_missing_agent_id_rejected() {
        let source = ScriptedSource {
            response: "anything".to_string(),
        };
        let err = FormulationSkill::new()
            .execute("intent", "", &profile(), &source)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("agent_id is required"));
    }

    #[tokio::test]
    async fn test_empty_formulated_text_rejected() {
        let source = ScriptedSource {
            response: serde_json::json!({"formulated_text": "", "enrichments": {}}).to_string(),
        };
        let err = FormulationSkill::new()
            .execute("intent", "agent_alice", &profile(), &source)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("formulated_text is empty"));
    }

    #[tokio::test]
    async fn test_rate_limit_response_rejected() {
        let source = ScriptedSource {
            response: "Rate limit exceeded. Please try again later.".to_string(),
        };
        let err = FormulationSkill::new()
            .execute("I need help", "agent_alice", &profile(), &source)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("LLM returned error"));
    }

    #[tokio::test]
    async fn test_refusal_response_rejected() {
        let source = ScriptedSource {
            response: "I cannot fulfill this request as an AI assistant.".to_string(),
        };
        let err = FormulationSkill::new()
            .execute("intent", "agent_alice", &profile(), &source)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("LLM returned error"));
    }

    #[tokio::test]
    async fn test_works_against_json_profile_source() {
        // Dev-mode source without an LLM yields its canned profile summary,
        // which the lenient path accepts as the formulated text.
        let source = JsonProfileSource::from_value(serde_json::json!({
            "agent_alice": {"name": "Alice", "skills": ["python"], "bio": "Builds models."}
        }));
        let result = FormulationSkill::new()
            .execute("I need a co-founder", "agent_alice", &profile(), &source)
            .await
            .unwrap();
        assert!(result.formulated_text.contains("Alice"));
    }
}
