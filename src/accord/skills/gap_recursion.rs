//! Gap recursion: composing a child negotiation's intent from a gap.
//!
//! Platform-side skill. When the coordinator identifies an unmet gap, this
//! skill turns the gap description (plus the parent demand's context) into a
//! standalone demand text a child negotiation can start from.

use crate::accord::errors::AccordError;
use crate::accord::reasoning::{Message, ReasoningClient};
use crate::accord::skills::{reject_llm_errors, strip_code_fence, Skill};

const SYSTEM_PROMPT: &str = "\
You turn a capability gap from a running negotiation into a standalone demand \
that can be broadcast on its own. The new demand must be self-contained: a reader \
who never saw the parent negotiation should understand exactly what is needed.

Output in JSON format:
{
  \"sub_demand_text\": \"the standalone demand\",
  \"context\": \"one or two sentences relating it to the parent negotiation\"
}";

/// Validated output of the gap-recursion skill.
#[derive(Debug, Clone)]
pub struct GapRecursionResult {
    pub sub_demand_text: String,
    pub context: String,
}

/// Composes a child negotiation's raw intent from a gap description.
#[derive(Debug, Clone, Default)]
pub struct GapRecursionSkill;

impl Skill for GapRecursionSkill {
    fn name(&self) -> &'static str {
        "gap_recursion"
    }
}

impl GapRecursionSkill {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute(
        &self,
        gap_description: &str,
        demand_context: &str,
        llm_client: &dyn ReasoningClient,
    ) -> Result<GapRecursionResult, AccordError> {
        if gap_description.trim().is_empty() {
            return Err(AccordError::skill("gap_description is required").with_skill(self.name()));
        }

        let messages = self.build_prompt(gap_description, demand_context);
        let response = llm_client
            .chat(&messages, Some(SYSTEM_PROMPT), None)
            .await?;
        let raw_output = response.content.unwrap_or_default();
        self.validate_output(&raw_output)
    }

    fn build_prompt(&self, gap_description: &str, demand_context: &str) -> Vec<Message> {
        vec![Message::user(format!(
            "Gap: {}\nParent demand context: {}\nCompose the standalone sub-demand.",
            gap_description, demand_context
        ))]
    }

    fn validate_output(&self, raw_output: &str) -> Result<GapRecursionResult, AccordError> {
        reject_llm_errors(self.name(), raw_output)?;
        let cleaned = strip_code_fence(raw_output);

        let (sub_demand_text, context) =
            match serde_json::from_str::<serde_json::Value>(cleaned) {
                Ok(parsed) => (
                    parsed
                        .get("sub_demand_text")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .trim()
                        .to_string(),
                    parsed
                        .get("context")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .trim()
                        .to_string(),
                ),
                // Lenient: plain text becomes the sub-demand.
                Err(_) => (cleaned.trim().to_string(), String::new()),
            };

        if sub_demand_text.is_empty() {
            return Err(
                AccordError::skill("gap_recursion: sub_demand_text is empty")
                    .with_skill(self.name()),
            );
        }

        Ok(GapRecursionResult {
            sub_demand_text,
            context,
        })
    }
}
