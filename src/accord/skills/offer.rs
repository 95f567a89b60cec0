//! Offer generation: one agent's honest response to a formulated demand.
//!
//! Client-side skill. Anti-fabrication is enforced by the caller, not the
//! prompt: this skill receives exactly one agent's profile and has no access
//! to any other agent's data.

use crate::accord::errors::AccordError;
use crate::accord::profile::ProfileSource;
use crate::accord::reasoning::Message;
use crate::accord::skills::{
    clamp_confidence, reject_llm_errors, strip_code_fence, string_list, Skill,
};

const SYSTEM_PROMPT: &str = "\
You represent a real person/service. Your task is to honestly respond to this demand \
based on your actual background.

Rules:
1. Only describe capabilities and experiences recorded in your profile.
2. If the demand is partially relevant, clearly state what's relevant and what's not.
3. If completely irrelevant, say \"I can't help with this.\"
4. Think: in the context of this demand, which of your experiences might have unexpected value?

Your profile:
{profile_data}

Output in JSON format:
{
  \"content\": \"your response to the demand\",
  \"capabilities\": [\"relevant capability 1\", \"relevant capability 2\"],
  \"confidence\": 0.0 to 1.0
}";

/// Validated output of the offer skill.
#[derive(Debug, Clone)]
pub struct OfferResult {
    pub content: String,
    pub capabilities: Vec<String>,
    pub confidence: f32,
}

/// Generates an offer from an agent in response to a demand.
#[derive(Debug, Clone, Default)]
pub struct OfferSkill;

impl Skill for OfferSkill {
    fn name(&self) -> &'static str {
        "offer_generation"
    }
}

impl OfferSkill {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute(
        &self,
        agent_id: &str,
        demand_text: &str,
        profile_data: &serde_json::Value,
        adapter: &dyn ProfileSource,
    ) -> Result<OfferResult, AccordError> {
        if agent_id.trim().is_empty() {
            return Err(AccordError::skill("agent_id is required").with_skill(self.name()));
        }
        if demand_text.trim().is_empty() {
            return Err(AccordError::skill("demand_text is required").with_skill(self.name()));
        }

        let (system_prompt, messages) = self.build_prompt(demand_text, profile_data);
        let raw_output = adapter
            .chat(agent_id, &messages, Some(&system_prompt))
            .await?;
        self.validate_output(&raw_output)
    }

    fn build_prompt(
        &self,
        demand_text: &str,
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
            "Demand: {}\nPlease give your response.",
            demand_text
        ))];
        (system, messages)
    }

    fn validate_output(&self, raw_output: &str) -> Result<OfferResult, AccordError> {
        reject_llm_errors(self.name(), raw_output)?;
        let cleaned = strip_code_fence(raw_output);

        let (content, capabilities, confidence) =
            match serde_json::from_str::<serde_json::Value>(cleaned) {
                Ok(parsed) => (
                    parsed
                        .get("content")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .trim()
                        .to_string(),
                    string_list(parsed.get("capabilities")),
                    clamp_confidence(parsed.get("confidence")),
                ),
                // Lenient: treat the entire output as the content.
                Err(_) => (cleaned.trim().to_string(), Vec::new(), 0.5),
            };

        if content.is_empty() {
            return Err(
                AccordError::skill("offer_generation: content is empty").with_skill(self.name())
            );
        }

        Ok(OfferResult {
            content,
            capabilities,
            confidence,
        })
    }
}
