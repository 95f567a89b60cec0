//! Core data model for negotiations.
//!
//! These types define WHAT the engine works with: the demand snapshot taken
//! at submission, the participants selected by resonance, their offers, and
//! the session aggregate that owns them all. The lifecycle rules that govern
//! them live in [`crate::engine`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::accord::trace::TraceChain;

/// Fixed-dimension real vector. All stored vectors are unit-normalized, so
/// cosine similarity is a plain inner product.
pub type Vector = Vec<f32>;

/// Generate a prefixed identifier, e.g. `generate_id("neg")` -> `"neg_9f2c..."`.
pub fn generate_id(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

/// Lifecycle states of a negotiation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationState {
    Created,
    Formulating,
    Formulated,
    Encoding,
    Offering,
    BarrierWaiting,
    Synthesizing,
    Completed,
}

impl NegotiationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiationState::Created => "created",
            NegotiationState::Formulating => "formulating",
            NegotiationState::Formulated => "formulated",
            NegotiationState::Encoding => "encoding",
            NegotiationState::Offering => "offering",
            NegotiationState::BarrierWaiting => "barrier_waiting",
            NegotiationState::Synthesizing => "synthesizing",
            NegotiationState::Completed => "completed",
        }
    }
}

/// Terminal-or-active state of a participant within one negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Active,
    Replied,
    Exited,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Active => "active",
            AgentState::Replied => "replied",
            AgentState::Exited => "exited",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentState::Replied | AgentState::Exited)
    }
}

/// Provenance of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Hosted by the platform itself.
    Platform,
    /// A user's personal twin agent.
    UserTwin,
    /// A scripted/sample agent loaded from data files.
    Scripted,
}

/// Immutable identity of a registered agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub display_name: String,
    pub source_type: SourceType,
    /// Read-only to the engine.
    pub metadata: HashMap<String, String>,
}

impl AgentIdentity {
    pub fn new(
        agent_id: impl Into<String>,
        display_name: impl Into<String>,
        source_type: SourceType,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            display_name: display_name.into(),
            source_type,
            metadata: HashMap::new(),
        }
    }
}

/// The demand as captured at negotiation start. Immutable afterwards except
/// that `formulated_text` is set exactly once on transition to `formulated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemandSnapshot {
    pub raw_intent: String,
    pub formulated_text: Option<String>,
    pub user_id: String,
    pub scope: String,
    pub metadata: HashMap<String, String>,
}

impl DemandSnapshot {
    pub fn new(
        raw_intent: impl Into<String>,
        user_id: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            raw_intent: raw_intent.into(),
            formulated_text: None,
            user_id: user_id.into(),
            scope: scope.into(),
            metadata: HashMap::new(),
        }
    }

    /// The text the downstream stages work with: the formulated text when
    /// present, else the raw intent.
    pub fn effective_text(&self) -> &str {
        self.formulated_text.as_deref().unwrap_or(&self.raw_intent)
    }
}

/// Upper bound on the capabilities list accepted from an agent's offer.
pub const MAX_OFFER_CAPABILITIES: usize = 32;

/// A participant's response to the formulated demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub agent_id: String,
    pub content: String,
    pub capabilities: Vec<String>,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
}

impl Offer {
    /// Build an offer, clamping confidence to `[0, 1]` and bounding the
    /// capabilities list on ingest.
    pub fn new(
        agent_id: impl Into<String>,
        content: impl Into<String>,
        mut capabilities: Vec<String>,
        confidence: f32,
    ) -> Self {
        capabilities.truncate(MAX_OFFER_CAPABILITIES);
        Self {
            agent_id: agent_id.into(),
            content: content.into(),
            capabilities,
            confidence: confidence.clamp(0.0, 1.0),
            created_at: Utc::now(),
        }
    }
}

/// An agent selected for one specific negotiation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentParticipant {
    pub agent_id: String,
    pub display_name: String,
    pub resonance_score: f32,
    pub state: AgentState,
    pub offer: Option<Offer>,
}

impl AgentParticipant {
    pub fn new(
        agent_id: impl Into<String>,
        display_name: impl Into<String>,
        resonance_score: f32,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            display_name: display_name.into(),
            resonance_score,
            state: AgentState::Active,
            offer: None,
        }
    }

    /// Record a received offer and move to the `replied` terminal state.
    pub fn mark_replied(&mut self, offer: Offer) {
        self.offer = Some(offer);
        self.state = AgentState::Replied;
    }

    /// Absorb a timeout or failure: no offer, `exited` terminal state.
    pub fn mark_exited(&mut self) {
        self.offer = None;
        self.state = AgentState::Exited;
    }
}

/// Default per-agent offer timeout.
pub const DEFAULT_OFFER_TIMEOUT: Duration = Duration::from_secs(30);
/// Default confirmation-gate timeout before auto-confirm.
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(60);
/// Default coordinator round cap.
pub const DEFAULT_MAX_COORDINATOR_ROUNDS: u32 = 1;

/// The root aggregate for one negotiation run.
///
/// Owned by the session store; all mutation happens on the single engine
/// task driving the negotiation. Once `state == Completed` no field mutates
/// except `metadata`.
#[derive(Debug)]
pub struct NegotiationSession {
    pub negotiation_id: String,
    pub demand: DemandSnapshot,
    pub state: NegotiationState,
    pub participants: Vec<AgentParticipant>,
    pub coordinator_rounds: u32,
    pub max_coordinator_rounds: u32,
    pub plan_output: Option<String>,
    /// Structured workflow artifact forwarded unchanged from `create_machine`.
    pub plan_json: Option<serde_json::Value>,
    pub parent_negotiation_id: Option<String>,
    pub depth: u32,
    pub sub_session_ids: Vec<String>,
    pub trace: TraceChain,
    pub event_history: Vec<crate::accord::events::NegotiationEvent>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
    pub offer_timeout: Duration,
    pub confirm_timeout: Duration,
}

impl NegotiationSession {
    pub fn new(demand: DemandSnapshot) -> Self {
        let negotiation_id = generate_id("neg");
        let trace = TraceChain::new(negotiation_id.clone());
        Self {
            negotiation_id,
            demand,
            state: NegotiationState::Created,
            participants: Vec::new(),
            coordinator_rounds: 0,
            max_coordinator_rounds: DEFAULT_MAX_COORDINATOR_ROUNDS,
            plan_output: None,
            plan_json: None,
            parent_negotiation_id: None,
            depth: 0,
            sub_session_ids: Vec::new(),
            trace,
            event_history: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
            metadata: HashMap::new(),
            offer_timeout: DEFAULT_OFFER_TIMEOUT,
            confirm_timeout: DEFAULT_CONFIRM_TIMEOUT,
        }
    }

    /// Derive a child session for a sub-negotiation one level deeper.
    pub fn child(&self, demand: DemandSnapshot) -> Self {
        let mut session = Self::new(demand);
        session.parent_negotiation_id = Some(self.negotiation_id.clone());
        session.depth = self.depth + 1;
        session.max_coordinator_rounds = self.max_coordinator_rounds;
        session.offer_timeout = self.offer_timeout;
        session.confirm_timeout = self.confirm_timeout;
        session
    }

    pub fn participant(&self, agent_id: &str) -> Option<&AgentParticipant> {
        self.participants.iter().find(|p| p.agent_id == agent_id)
    }

    pub fn participant_mut(&mut self, agent_id: &str) -> Option<&mut AgentParticipant> {
        self.participants
            .iter_mut()
            .find(|p| p.agent_id == agent_id)
    }

    /// Agents in the `replied` terminal state, i.e. those with an offer.
    pub fn replied_agent_ids(&self) -> Vec<String> {
        self.participants
            .iter()
            .filter(|p| p.state == AgentState::Replied)
            .map(|p| p.agent_id.clone())
            .collect()
    }

    pub fn offers(&self) -> Vec<&Offer> {
        self.participants
            .iter()
            .filter_map(|p| p.offer.as_ref())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_prefix_and_uniqueness() {
        let a = generate_id("neg");
        let b = generate_id("neg");
        assert!(a.starts_with("neg_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_offer_confidence_clamped() {
        let high = Offer::new("a", "text", vec![], 7.5);
        let low = Offer::new("a", "text", vec![], -1.0);
        assert_eq!(high.confidence, 1.0);
        assert_eq!(low.confidence, 0.0);
    }

    #[test]
    fn test_offer_capabilities_bounded() {
        let caps: Vec<String> = (0..100).map(|i| format!("cap{}", i)).collect();
        let offer = Offer::new("a", "text", caps, 0.5);
        assert_eq!(offer.capabilities.len(), MAX_OFFER_CAPABILITIES);
    }

    #[test]
    fn test_participant_transitions() {
        let mut p = AgentParticipant::new("agent_alice", "Alice", 0.9);
        assert_eq!(p.state, AgentState::Active);
        assert!(!p.state.is_terminal());

        p.mark_replied(Offer::new("agent_alice", "I can help", vec![], 0.8));
        assert_eq!(p.state, AgentState::Replied);
        assert!(p.offer.is_some());

        let mut q = AgentParticipant::new("agent_bob", "Bob", 0.7);
        q.mark_exited();
        assert_eq!(q.state, AgentState::Exited);
        assert!(q.offer.is_none());
    }

    #[test]
    fn test_child_session_depth() {
        let root = NegotiationSession::new(DemandSnapshot::new("intent", "user_1", "all"));
        let child = root.child(DemandSnapshot::new("gap", "user_1", "all"));
        assert_eq!(child.depth, 1);
        assert_eq!(
            child.parent_negotiation_id.as_deref(),
            Some(root.negotiation_id.as_str())
        );
        assert_ne!(child.negotiation_id, root.negotiation_id);
    }

    #[test]
    fn test_effective_text_prefers_formulated() {
        let mut demand = DemandSnapshot::new("raw", "user_1", "all");
        assert_eq!(demand.effective_text(), "raw");
        demand.formulated_text = Some("refined".to_string());
        assert_eq!(demand.effective_text(), "refined");
    }
}
