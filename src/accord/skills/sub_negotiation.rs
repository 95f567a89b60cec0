//! Pairwise discovery between two agents.
//!
//! Platform-side skill invoked by the coordinator's `start_discovery` tool:
//! given two parties' offers and profiles, surface associations neither
//! offer stated, a concrete way they could coordinate, and additional
//! contributions each could make.

use serde::Serialize;

use crate::accord::errors::AccordError;
use crate::accord::reasoning::{Message, ReasoningClient};
use crate::accord::skills::{reject_llm_errors, strip_code_fence, string_list, Skill};

const SYSTEM_PROMPT: &str = "\
You analyze a potential collaboration between two parties in a negotiation. \
Based on their offers and profiles, discover value neither side has stated yet.

Output in JSON format:
{
  \"discovery_report\": {
    \"new_associations\": [\"...\"],
    \"coordination\": \"how they could work together\",
    \"additional_contributions\": {\"agent_a\": [\"...\"], \"agent_b\": [\"...\"]},
    \"summary\": \"one-paragraph summary\"
  }
}";

/// One side of a discovery conversation.
#[derive(Debug, Clone)]
pub struct PartySummary {
    pub agent_id: String,
    pub display_name: String,
    pub offer: String,
    pub profile: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AdditionalContributions {
    pub agent_a: Vec<String>,
    pub agent_b: Vec<String>,
}

/// Structured result of one discovery run.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    pub new_associations: Vec<String>,
    pub coordination: Option<String>,
    pub additional_contributions: AdditionalContributions,
    pub summary: String,
}

/// Runs a pairwise discovery between two agents.
#[derive(Debug, Clone, Default)]
pub struct SubNegotiationSkill;

impl Skill for SubNegotiationSkill {
    fn name(&self) -> &'static str {
        "sub_negotiation"
    }
}

impl SubNegotiationSkill {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute(
        &self,
        agent_a: &PartySummary,
        agent_b: &PartySummary,
        reason: &str,
        llm_client: &dyn ReasoningClient,
    ) -> Result<DiscoveryReport, AccordError> {
        if agent_a.agent_id.trim().is_empty() {
            return Err(AccordError::skill("agent_a is required").with_skill(self.name()));
        }
        if agent_b.agent_id.trim().is_empty() {
            return Err(AccordError::skill("agent_b is required").with_skill(self.name()));
        }
        if reason.trim().is_empty() {
            return Err(AccordError::skill("reason is required").with_skill(self.name()));
        }

        let messages = self.build_prompt(agent_a, agent_b, reason);
        let response = llm_client
            .chat(&messages, Some(SYSTEM_PROMPT), None)
            .await?;
        let raw_output = response.content.unwrap_or_default();
        self.validate_output(&raw_output)
    }

    fn build_prompt(
        &self,
        agent_a: &PartySummary,
        agent_b: &PartySummary,
        reason: &str,
    ) -> Vec<Message> {
        let render = |label: &str, party: &PartySummary| {
            format!(
                "### Party {} - {} ({})\nOffer: {}\nProfile: {}\n",
                label,
                party.display_name,
                party.agent_id,
                party.offer,
                serde_json::to_string(&party.profile).unwrap_or_else(|_| "{}".to_string()),
            )
        };
        vec![Message::user(format!(
            "{}\n{}\nReason this pair looks promising: {}\nProduce the discovery report.",
            render("A", agent_a),
            render("B", agent_b),
            reason
        ))]
    }

    fn validate_output(&self, raw_output: &str) -> Result<DiscoveryReport, AccordError> {
        reject_llm_errors(self.name(), raw_output)?;
        let cleaned = strip_code_fence(raw_output);

        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(cleaned) {
            let report = parsed.get("discovery_report").unwrap_or(&parsed);
            let contributions = report.get("additional_contributions");
            let summary = report
                .get("summary")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .trim()
                .to_string();
            if summary.is_empty() {
                return Err(AccordError::skill("sub_negotiation: summary is empty")
                    .with_skill(self.name()));
            }
            return Ok(DiscoveryReport {
                new_associations: string_list(report.get("new_associations")),
                coordination: report
                    .get("coordination")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
                additional_contributions: AdditionalContributions {
                    agent_a: string_list(contributions.and_then(|c| c.get("agent_a"))),
                    agent_b: string_list(contributions.and_then(|c| c.get("agent_b"))),
                },
                summary,
            });
        }

        // Lenient: plain text becomes the summary.
        let summary = cleaned.trim().to_string();
        if summary.is_empty() {
            return Err(
                AccordError::skill("sub_negotiation: summary is empty").with_skill(self.name())
            );
        }
        Ok(DiscoveryReport {
            new_associations: Vec::new(),
            coordination: None,
            additional_contributions: AdditionalContributions::default(),
            summary,
        })
    }
}
