//! The coordinator: a tool-use agent that synthesizes all offers.
//!
//! Platform-side skill. The engine executes whatever tools the coordinator
//! calls; this skill owns prompt construction, the tool schema set, and
//! response validation. The tool vocabulary is a closed set of five names —
//! custom tools can be registered as `(definition, handler)` pairs, but the
//! core five are fixed:
//!
//! | tool | effect |
//! |---|---|
//! | `output_plan` | terminal: the plan text |
//! | `ask_agent` | forward a follow-up question to one agent |
//! | `start_discovery` | run a pairwise discovery between two agents |
//! | `create_sub_demand` | spawn a child negotiation for an unmet gap |
//! | `create_machine` | emit a structured workflow artifact |
//!
//! When the round cap is exhausted (`tools_restricted`), only
//! `output_plan` and `create_machine` are offered.
//!
//! From round 2 onward the prompt replaces the full offer texts with a short
//! summary; the coordinator has already read them, and every prior round's
//! reasoning and tool results stay in the history section. The offers
//! themselves are untouched — masking is a prompt-building rule only.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::accord::errors::AccordError;
use crate::accord::models::{AgentParticipant, Offer};
use crate::accord::reasoning::{
    Message, ReasoningClient, ToolCallRequest, ToolDefinition,
};
use crate::accord::skills::Skill;

pub const TOOL_OUTPUT_PLAN: &str = "output_plan";
pub const TOOL_ASK_AGENT: &str = "ask_agent";
pub const TOOL_START_DISCOVERY: &str = "start_discovery";
pub const TOOL_CREATE_SUB_DEMAND: &str = "create_sub_demand";
pub const TOOL_CREATE_MACHINE: &str = "create_machine";

const SYSTEM_PROMPT: &str = "\
You are the coordinator of a multi-party negotiation. A demand was broadcast to a set \
of agents and each responded with an offer describing what they can actually contribute. \
Your job is to synthesize those offers into one concrete, actionable plan.

Rules:
1. Ground the plan strictly in what the offers say - never invent capabilities.
2. Probe when it helps: ask an agent a follow-up, run a pairwise discovery, or open a \
sub-demand for a gap nobody covers.
3. When you have enough to decide, call output_plan with the final plan text.
4. Always respond by calling one of the provided tools.";

fn object_schema(properties: serde_json::Value, required: &[&str]) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// The full five-tool schema set.
pub fn all_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            TOOL_OUTPUT_PLAN,
            "Output the final negotiation plan. Terminal: ends the synthesis loop.",
            object_schema(
                serde_json::json!({
                    "plan_text": {"type": "string", "description": "The complete plan text."}
                }),
                &["plan_text"],
            ),
        ),
        ToolDefinition::new(
            TOOL_ASK_AGENT,
            "Forward a follow-up question to one participating agent and receive their answer.",
            object_schema(
                serde_json::json!({
                    "agent_id": {"type": "string", "description": "Id of the agent to ask."},
                    "question": {"type": "string", "description": "The follow-up question."}
                }),
                &["agent_id", "question"],
            ),
        ),
        ToolDefinition::new(
            TOOL_START_DISCOVERY,
            "Run a pairwise discovery conversation between two agents to surface synergies.",
            object_schema(
                serde_json::json!({
                    "agent_a": {"type": "string", "description": "First agent id."},
                    "agent_b": {"type": "string", "description": "Second agent id."},
                    "reason": {"type": "string", "description": "Why this pair looks promising."}
                }),
                &["agent_a", "agent_b", "reason"],
            ),
        ),
        ToolDefinition::new(
            TOOL_CREATE_SUB_DEMAND,
            "Spawn a child negotiation for a gap no current offer covers.",
            object_schema(
                serde_json::json!({
                    "gap_description": {"type": "string", "description": "What is missing."}
                }),
                &["gap_description"],
            ),
        ),
        ToolDefinition::new(
            TOOL_CREATE_MACHINE,
            "Emit a structured workflow artifact describing the plan as an executable machine.",
            object_schema(
                serde_json::json!({
                    "machine_json": {
                        "type": "object",
                        "description": "The workflow artifact, forwarded unchanged."
                    }
                }),
                &["machine_json"],
            ),
        ),
    ]
}

/// The restricted set offered once the round cap is exhausted.
pub fn restricted_tools() -> Vec<ToolDefinition> {
    all_tools()
        .into_iter()
        .filter(|t| t.name == TOOL_OUTPUT_PLAN || t.name == TOOL_CREATE_MACHINE)
        .collect()
}

/// Handler for a registered custom tool.
#[async_trait]
pub trait CustomToolHandler: Send + Sync {
    async fn handle(&self, arguments: &serde_json::Value) -> Result<serde_json::Value, AccordError>;
}

struct CustomTool {
    definition: ToolDefinition,
    handler: Arc<dyn CustomToolHandler>,
}

/// Input of one coordinator round.
#[derive(Debug, Clone)]
pub struct CoordinatorContext {
    pub demand_text: String,
    pub offers: Vec<Offer>,
    pub participants: Vec<AgentParticipant>,
    /// Prior rounds: reasoning entries and tool results, oldest first.
    pub history: Vec<serde_json::Value>,
    pub round_number: u32,
    pub tools_restricted: bool,
    pub scene_context: Option<String>,
}

/// Validated output of one coordinator round.
#[derive(Debug, Clone)]
pub struct CoordinatorDecision {
    /// Tool calls in the order the reasoning service returned them. Never
    /// empty: a free-text reply degrades into a synthetic `output_plan`.
    pub tool_calls: Vec<ToolCallRequest>,
    /// Free text the model produced alongside its tool calls, preserved so
    /// the next round can see it.
    pub reasoning_text: Option<String>,
}

/// The coordinator skill. Stateless apart from registered custom tools.
#[derive(Default)]
pub struct CoordinatorSkill {
    custom_tools: Vec<CustomTool>,
}

impl Skill for CoordinatorSkill {
    fn name(&self) -> &'static str {
        "coordinator"
    }
}

impl CoordinatorSkill {
    pub fn new() -> Self {
        Self {
            custom_tools: Vec::new(),
        }
    }

    /// Register an additional `(name, schema, handler)` tool. Custom tools
    /// are only offered in unrestricted rounds.
    pub fn register_tool(
        mut self,
        definition: ToolDefinition,
        handler: Arc<dyn CustomToolHandler>,
    ) -> Self {
        self.custom_tools.push(CustomTool {
            definition,
            handler,
        });
        self
    }

    /// Handler for a registered custom tool, if any.
    pub fn custom_handler(&self, name: &str) -> Option<Arc<dyn CustomToolHandler>> {
        self.custom_tools
            .iter()
            .find(|t| t.definition.name == name)
            .map(|t| t.handler.clone())
    }

    fn valid_tool_names(&self, restricted: bool) -> HashSet<String> {
        let mut names: HashSet<String> = if restricted {
            restricted_tools().into_iter().map(|t| t.name).collect()
        } else {
            all_tools().into_iter().map(|t| t.name).collect()
        };
        if !restricted {
            for tool in &self.custom_tools {
                names.insert(tool.definition.name.clone());
            }
        }
        names
    }

    fn tool_schemas(&self, restricted: bool) -> Vec<ToolDefinition> {
        if restricted {
            return restricted_tools();
        }
        let mut tools = all_tools();
        tools.extend(self.custom_tools.iter().map(|t| t.definition.clone()));
        tools
    }

    pub async fn execute(
        &self,
        context: &CoordinatorContext,
        llm_client: &dyn ReasoningClient,
    ) -> Result<CoordinatorDecision, AccordError> {
        if context.demand_text.trim().is_empty() {
            return Err(AccordError::skill("demand is required").with_skill(self.name()));
        }

        let (system_prompt, messages) = self.build_prompt(context);
        let tools = self.tool_schemas(context.tools_restricted);
        let response = llm_client
            .chat(&messages, Some(&system_prompt), Some(&tools))
            .await
            .map_err(|e| {
                AccordError::reasoning("coordinator reasoning call failed").with_cause(Box::new(e))
            })?;

        let valid = self.valid_tool_names(context.tools_restricted);
        for call in &response.tool_calls {
            if !valid.contains(&call.name) {
                return Err(
                    AccordError::skill(format!("invalid tool name '{}'", call.name))
                        .with_skill(self.name()),
                );
            }
        }

        if response.tool_calls.is_empty() {
            let content = response.content.unwrap_or_default();
            if content.trim().is_empty() {
                return Err(AccordError::skill("no tool calls and no content")
                    .with_skill(self.name()));
            }
            // Degrade: wrap the free text as if it were an output_plan call.
            return Ok(CoordinatorDecision {
                tool_calls: vec![ToolCallRequest {
                    id: "degraded_text".to_string(),
                    name: TOOL_OUTPUT_PLAN.to_string(),
                    arguments: serde_json::json!({"plan_text": content}),
                }],
                reasoning_text: None,
            });
        }

        let reasoning_text = response
            .content
            .filter(|c| !c.trim().is_empty());

        Ok(CoordinatorDecision {
            tool_calls: response.tool_calls,
            reasoning_text,
        })
    }

    /// Assemble the system prompt and user message for one round.
    pub fn build_prompt(&self, context: &CoordinatorContext) -> (String, Vec<Message>) {
        let mut system = SYSTEM_PROMPT.to_string();
        if let Some(scene) = &context.scene_context {
            if !scene.is_empty() {
                system.push_str("\n\n");
                system.push_str(scene);
            }
        }

        let mut body = String::new();
        body.push_str(&format!("## Demand\n{}\n", context.demand_text));

        body.push_str("\n## Offers\n");
        if context.offers.is_empty() {
            body.push_str("(no offers were received)\n");
        } else if context.round_number >= 2 {
            // Observation masking: prior rounds already saw the full texts.
            let names: Vec<&str> = context
                .offers
                .iter()
                .map(|o| o.agent_id.as_str())
                .collect();
            body.push_str(&format!(
                "{} offers received from: {}; see previous round reasoning.\n",
                context.offers.len(),
                names.join(", ")
            ));
        } else {
            for offer in &context.offers {
                body.push_str(&format!(
                    "- {} (confidence {:.2}): {}\n",
                    offer.agent_id, offer.confidence, offer.content
                ));
                if !offer.capabilities.is_empty() {
                    body.push_str(&format!(
                        "  capabilities: {}\n",
                        offer.capabilities.join(", ")
                    ));
                }
            }
        }

        if !context.participants.is_empty() {
            body.push_str("\n## Participants\n");
            for p in &context.participants {
                body.push_str(&format!(
                    "- {} ({}) resonance {:.2}, state {}\n",
                    p.agent_id,
                    p.display_name,
                    p.resonance_score,
                    p.state.as_str()
                ));
            }
        }

        if !context.history.is_empty() {
            body.push_str("\n## Prior rounds\n");
            for entry in &context.history {
                body.push_str(&format!("- {}\n", entry));
            }
        }

        body.push_str(&format!(
            "\nThis is round {}. Respond by calling a tool.",
            context.round_number
        ));

        (system, vec![Message::user(body)])
    }
}
