//! End-to-end negotiation scenarios driven entirely by mocks.
//!
//! No real LLM calls: the profile source and reasoning client are scripted,
//! the encoder is fixed, and agent vectors are chosen so resonance scores
//! are exact. Fast and deterministic.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use accord::encoder::Encoder;
use accord::engine::{check_transition, EngineDeps, NegotiationEngine};
use accord::errors::AccordError;
use accord::events::EventType;
use accord::models::{
    AgentState, DemandSnapshot, NegotiationSession, NegotiationState, Vector,
};
use accord::profile::ProfileSource;
use accord::reasoning::{
    Message, ReasoningClient, ReasoningResponse, ToolCallRequest, ToolDefinition,
};
use accord::session_store::{ConfirmOutcome, SessionHandle, SessionStore};

// ── Mocks ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct MockProfileSource {
    profiles: HashMap<String, serde_json::Value>,
    responses: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    failing: HashSet<String>,
}

impl MockProfileSource {
    fn with_response(mut self, agent_id: &str, response: &str) -> Self {
        self.responses
            .insert(agent_id.to_string(), response.to_string());
        self
    }

    fn with_delay(mut self, agent_id: &str, delay: Duration) -> Self {
        self.delays.insert(agent_id.to_string(), delay);
        self
    }

    fn with_failure(mut self, agent_id: &str) -> Self {
        self.failing.insert(agent_id.to_string());
        self
    }
}

#[async_trait]
impl ProfileSource for MockProfileSource {
    async fn get_profile(&self, agent_id: &str) -> Result<serde_json::Value, AccordError> {
        Ok(self
            .profiles
            .get(agent_id)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({"agent_id": agent_id})))
    }

    async fn chat(
        &self,
        agent_id: &str,
        _messages: &[Message],
        _system_prompt: Option<&str>,
    ) -> Result<String, AccordError> {
        if self.failing.contains(agent_id) {
            return Err(AccordError::adapter(format!("{} is unreachable", agent_id)));
        }
        if let Some(delay) = self.delays.get(agent_id) {
            tokio::time::sleep(*delay).await;
        }
        Ok(self
            .responses
            .get(agent_id)
            .cloned()
            .unwrap_or_else(|| format!("[{}] offer response", agent_id)))
    }
}

struct MockReasoningClient {
    responses: Mutex<Vec<ReasoningResponse>>,
    /// Tool names offered on each call, in call order.
    offered: Mutex<Vec<Vec<String>>>,
}

impl MockReasoningClient {
    fn new(responses: Vec<ReasoningResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            offered: Mutex::new(Vec::new()),
        }
    }

    fn call_count(&self) -> usize {
        self.offered.lock().unwrap().len()
    }

    fn offered_tools(&self, call: usize) -> Vec<String> {
        self.offered.lock().unwrap()[call].clone()
    }
}

#[async_trait]
impl ReasoningClient for MockReasoningClient {
    async fn chat(
        &self,
        _messages: &[Message],
        _system_prompt: Option<&str>,
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ReasoningResponse, AccordError> {
        let names = tools
            .map(|tools| tools.iter().map(|t| t.name.clone()).collect())
            .unwrap_or_default();
        self.offered.lock().unwrap().push(names);
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(AccordError::reasoning("mock script exhausted"));
        }
        Ok(responses.remove(0))
    }

    fn model_name(&self) -> &str {
        "mock-reasoner"
    }
}

struct MockEncoder;

#[async_trait]
impl Encoder for MockEncoder {
    async fn encode(&self, text: &str) -> Result<Vector, AccordError> {
        if text.trim().is_empty() {
            return Err(AccordError::encoding("cannot encode empty input"));
        }
        Ok(vec![1.0, 0.0])
    }

    fn dim(&self) -> usize {
        2
    }
}

fn tool_call(name: &str, arguments: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest {
        id: format!("call_{}", name),
        name: name.to_string(),
        arguments,
    }
}

// Unit vectors whose cosine against the demand vector [1, 0] is exactly
// the first component.
fn aligned_vectors() -> HashMap<String, Vector> {
    let mut vectors = HashMap::new();
    vectors.insert("alice".to_string(), vec![0.9, 0.435_889_9]);
    vectors.insert("bob".to_string(), vec![0.7, 0.714_142_8]);
    vectors.insert("carol".to_string(), vec![0.6, 0.8]);
    vectors
}

fn display_names() -> HashMap<String, String> {
    [("alice", "Alice"), ("bob", "Bob"), ("carol", "Carol")]
        .iter()
        .map(|(id, name)| (id.to_string(), name.to_string()))
        .collect()
}

fn scripted_profiles() -> MockProfileSource {
    MockProfileSource::default()
        .with_response("user_1", "I need a technical co-founder who can build an AI product")
        .with_response("alice", "I can lead the ML side and ship AI products")
        .with_response("bob", "I can build the frontend")
        .with_response("carol", "I can run operations")
}

fn deps(profile: MockProfileSource, llm: Arc<MockReasoningClient>) -> EngineDeps {
    EngineDeps::new(Arc::new(profile), llm, Arc::new(MockEncoder))
        .with_agent_vectors(aligned_vectors())
        .with_k_star(5)
        .with_min_score(0.0)
        .with_display_names(display_names())
}

struct Run {
    handle: Arc<SessionHandle>,
    result: Result<(), AccordError>,
}

/// Drive one negotiation to completion with a short auto-confirm gate.
async fn run_negotiation(deps: EngineDeps, configure: impl FnOnce(&mut NegotiationSession)) -> Run {
    let store = Arc::new(SessionStore::new());
    let engine = NegotiationEngine::new(store.clone());
    let mut session = NegotiationSession::new(DemandSnapshot::new(
        "I need a technical co-founder who can build an AI product",
        "user_1",
        "all",
    ));
    session.confirm_timeout = Duration::from_millis(50);
    configure(&mut session);
    let handle = store.insert(session).await;
    let result = engine.start_negotiation(handle.clone(), deps).await;
    Run { handle, result }
}

async fn events_of(run: &Run, event_type: EventType) -> Vec<serde_json::Value> {
    run.handle
        .session
        .lock()
        .await
        .event_history
        .iter()
        .filter(|e| e.event_type == event_type)
        .map(|e| e.data.clone())
        .collect()
}

// ── Scenario 1: happy path ──────────────────────────────────────────────

#[tokio::test]
async fn scenario_1_happy_path() {
    let plan_text = "Recommended team: alice (ML), bob (Frontend), carol (Ops).";
    let llm = Arc::new(MockReasoningClient::new(vec![ReasoningResponse::tools(
        vec![tool_call(
            "output_plan",
            serde_json::json!({"plan_text": plan_text}),
        )],
    )]));

    let run = run_negotiation(deps(scripted_profiles(), llm.clone()), |_| {}).await;
    run.result.as_ref().unwrap();

    let session = run.handle.session.lock().await;
    assert_eq!(session.state, NegotiationState::Completed);
    assert_eq!(session.plan_output.as_deref(), Some(plan_text));
    assert_eq!(session.coordinator_rounds, 1);
    drop(session);

    let offers = events_of(&run, EventType::OfferReceived).await;
    assert_eq!(offers.len(), 3);

    let tool_calls = events_of(&run, EventType::CoordinatorToolCall).await;
    assert_eq!(tool_calls.len(), 1);
    assert_eq!(tool_calls[0]["tool_name"], "output_plan");

    let barriers = events_of(&run, EventType::BarrierComplete).await;
    assert_eq!(barriers.len(), 1);
    assert_eq!(barriers[0]["total_participants"], 3);
    assert_eq!(barriers[0]["offers_received"], 3);
    assert_eq!(barriers[0]["exited_count"], 0);

    // Activation ranking: alice (0.9), bob (0.7), carol (0.6).
    let resonance = events_of(&run, EventType::ResonanceActivated).await;
    let ranked: Vec<&str> = resonance[0]["agents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["agent_id"].as_str().unwrap())
        .collect();
    assert_eq!(ranked, vec!["alice", "bob", "carol"]);
}

// ── Scenario 2: agent timeout ───────────────────────────────────────────

#[tokio::test]
async fn scenario_2_agent_timeout() {
    let llm = Arc::new(MockReasoningClient::new(vec![ReasoningResponse::tools(
        vec![tool_call(
            "output_plan",
            serde_json::json!({"plan_text": "Team without carol."}),
        )],
    )]));
    let profile = scripted_profiles().with_delay("carol", Duration::from_secs(10));

    let run = run_negotiation(deps(profile, llm), |session| {
        session.offer_timeout = Duration::from_millis(100);
    })
    .await;
    run.result.as_ref().unwrap();

    let session = run.handle.session.lock().await;
    let carol = session.participant("carol").unwrap();
    assert_eq!(carol.state, AgentState::Exited);
    assert!(carol.offer.is_none());
    assert!(session.plan_output.is_some());
    drop(session);

    let offers = events_of(&run, EventType::OfferReceived).await;
    assert_eq!(offers.len(), 2);
    assert!(offers.iter().all(|o| o["agent_id"] != "carol"));

    let barriers = events_of(&run, EventType::BarrierComplete).await;
    assert_eq!(barriers[0]["offers_received"], 2);
    assert_eq!(barriers[0]["exited_count"], 1);
}

// ── Scenario 3: multi-round coordinator ─────────────────────────────────

#[tokio::test]
async fn scenario_3_multi_round_coordinator() {
    let llm = Arc::new(MockReasoningClient::new(vec![
        ReasoningResponse::tools(vec![tool_call(
            "ask_agent",
            serde_json::json!({"agent_id": "alice", "question": "elaborate on your ML experience?"}),
        )]),
        ReasoningResponse::tools(vec![tool_call(
            "output_plan",
            serde_json::json!({"plan_text": "After deeper eval: alice is the ideal co-founder."}),
        )]),
    ]));

    let run = run_negotiation(deps(scripted_profiles(), llm.clone()), |session| {
        session.max_coordinator_rounds = 5;
    })
    .await;
    run.result.as_ref().unwrap();

    let session = run.handle.session.lock().await;
    assert_eq!(session.coordinator_rounds, 2);
    assert_eq!(
        session.plan_output.as_deref(),
        Some("After deeper eval: alice is the ideal co-founder.")
    );

    // History is inspectable via the trace.
    let history_entry = session
        .trace
        .entries
        .iter()
        .find(|e| e.step_name == "coordinator_history")
        .unwrap();
    let entries = history_entry.metadata["entries"].as_array().unwrap();
    let ask_entries: Vec<_> = entries
        .iter()
        .filter(|e| e["tool"] == "ask_agent")
        .collect();
    assert_eq!(ask_entries.len(), 1);
    assert!(ask_entries[0]["result"]
        .as_str()
        .unwrap()
        .contains("ML side"));
    assert!(entries.iter().all(|e| e["type"] != "center_reasoning"));
    drop(session);

    let tool_calls = events_of(&run, EventType::CoordinatorToolCall).await;
    assert_eq!(tool_calls.len(), 2);
    assert_eq!(tool_calls[0]["tool_name"], "ask_agent");
    assert_eq!(tool_calls[0]["round_number"], 1);
    assert_eq!(tool_calls[1]["tool_name"], "output_plan");
    assert_eq!(tool_calls[1]["round_number"], 2);

    let plans = events_of(&run, EventType::PlanReady).await;
    assert_eq!(plans.len(), 1);
}

// ── Scenario 4: round limit forcing ─────────────────────────────────────

#[tokio::test]
async fn scenario_4_round_limit_forcing() {
    let ask = |question: &str| {
        ReasoningResponse::tools(vec![tool_call(
            "ask_agent",
            serde_json::json!({"agent_id": "alice", "question": question}),
        )])
    };
    let llm = Arc::new(MockReasoningClient::new(vec![
        ask("first question"),
        ask("second question"),
        ReasoningResponse::tools(vec![tool_call(
            "output_plan",
            serde_json::json!({"plan_text": "Forced plan."}),
        )]),
    ]));

    let run = run_negotiation(deps(scripted_profiles(), llm.clone()), |session| {
        session.max_coordinator_rounds = 2;
    })
    .await;
    run.result.as_ref().unwrap();

    let session = run.handle.session.lock().await;
    assert_eq!(session.plan_output.as_deref(), Some("Forced plan."));
    // The forced round counts toward the total, consistently.
    assert_eq!(session.coordinator_rounds, 3);
    assert!(session.coordinator_rounds <= session.max_coordinator_rounds + 1);
    drop(session);

    // The first two calls offered the full tool set; the forced third call
    // offered only the restricted set.
    assert_eq!(llm.call_count(), 3);
    let full: HashSet<String> = llm.offered_tools(0).into_iter().collect();
    assert!(full.contains("ask_agent"));
    let forced: HashSet<String> = llm.offered_tools(2).into_iter().collect();
    let expected: HashSet<String> = ["output_plan", "create_machine"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(forced, expected);
}

// ── Scenario 5: zero surviving agents ───────────────────────────────────

#[tokio::test]
async fn scenario_5_zero_surviving_agents() {
    let llm = Arc::new(MockReasoningClient::new(vec![ReasoningResponse::tools(
        vec![tool_call(
            "output_plan",
            serde_json::json!({"plan_text": "No agents could participate."}),
        )],
    )]));
    let profile = MockProfileSource::default()
        .with_response("user_1", "formulated demand text")
        .with_failure("alice")
        .with_failure("bob")
        .with_failure("carol");

    let run = run_negotiation(deps(profile, llm.clone()), |_| {}).await;
    run.result.as_ref().unwrap();

    let session = run.handle.session.lock().await;
    assert!(session
        .participants
        .iter()
        .all(|p| p.state == AgentState::Exited));
    assert!(session.plan_output.is_some());
    drop(session);

    let barriers = events_of(&run, EventType::BarrierComplete).await;
    assert_eq!(barriers[0]["offers_received"], 0);
    assert_eq!(barriers[0]["exited_count"], 3);

    // The reasoning client is still invoked with an empty offer set.
    assert_eq!(llm.call_count(), 1);
    assert_eq!(events_of(&run, EventType::PlanReady).await.len(), 1);
}

// ── Scenario 6: no agents in scope ──────────────────────────────────────

#[tokio::test]
async fn scenario_6_no_agents_in_scope() {
    let llm = Arc::new(MockReasoningClient::new(vec![ReasoningResponse::tools(
        vec![tool_call(
            "output_plan",
            serde_json::json!({"plan_text": "Nothing to coordinate."}),
        )],
    )]));
    let empty_deps = deps(scripted_profiles(), llm.clone()).with_agent_vectors(HashMap::new());

    let run = run_negotiation(empty_deps, |_| {}).await;
    run.result.as_ref().unwrap();

    let session = run.handle.session.lock().await;
    assert_eq!(session.state, NegotiationState::Completed);
    assert!(session.participants.is_empty());

    // State sequence recorded in the trace walks the full lifecycle.
    let transitions: Vec<(String, String)> = session
        .trace
        .entries
        .iter()
        .filter(|e| e.step_name == "state_transition")
        .map(|e| {
            (
                e.metadata["from"].as_str().unwrap().to_string(),
                e.metadata["to"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    let sequence: Vec<&str> = transitions.iter().map(|(_, to)| to.as_str()).collect();
    assert_eq!(
        sequence,
        vec![
            "formulating",
            "formulated",
            "encoding",
            "offering",
            "barrier_waiting",
            "synthesizing",
            "completed"
        ]
    );
    drop(session);

    assert!(events_of(&run, EventType::ResonanceActivated).await.is_empty());
    assert!(events_of(&run, EventType::OfferReceived).await.is_empty());
    assert_eq!(llm.call_count(), 1);
    assert_eq!(events_of(&run, EventType::PlanReady).await.len(), 1);
}

// ── Universal invariants ────────────────────────────────────────────────

#[tokio::test]
async fn universal_invariants_hold_on_happy_path() {
    let llm = Arc::new(MockReasoningClient::new(vec![ReasoningResponse::tools(
        vec![tool_call(
            "output_plan",
            serde_json::json!({"plan_text": "plan"}),
        )],
    )]));
    let run = run_negotiation(deps(scripted_profiles(), llm), |_| {}).await;
    run.result.as_ref().unwrap();

    let session = run.handle.session.lock().await;

    // 1-2: terminal state and completed trace.
    assert_eq!(session.state, NegotiationState::Completed);
    let completed_at = session.trace.completed_at.unwrap();
    assert!(completed_at >= session.trace.started_at);

    // 3: monotone trace timestamps.
    for pair in session.trace.entries.windows(2) {
        assert!(pair[1].wall_timestamp >= pair[0].wall_timestamp);
    }

    // 4: participant terminal states match offers.
    for p in &session.participants {
        assert!(p.state.is_terminal());
        assert_eq!(p.state == AgentState::Replied, p.offer.is_some());
    }

    // 5: barrier arithmetic.
    let barrier = session
        .event_history
        .iter()
        .find(|e| e.event_type == EventType::BarrierComplete)
        .unwrap();
    let total = barrier.data["total_participants"].as_u64().unwrap();
    let replied = barrier.data["offers_received"].as_u64().unwrap();
    let exited = barrier.data["exited_count"].as_u64().unwrap();
    assert_eq!(replied + exited, total);

    // 6: every event carries the session id.
    for event in &session.event_history {
        assert_eq!(event.negotiation_id, session.negotiation_id);
    }

    // 8: round bound.
    assert!(session.coordinator_rounds <= session.max_coordinator_rounds + 1);

    // Quantified state-machine property over the trace.
    let mut previous = "created".to_string();
    for entry in session
        .trace
        .entries
        .iter()
        .filter(|e| e.step_name == "state_transition")
    {
        let from = entry.metadata["from"].as_str().unwrap();
        let to = entry.metadata["to"].as_str().unwrap();
        assert_eq!(from, previous);
        let parse = |s: &str| -> NegotiationState {
            serde_json::from_value(serde_json::json!(s)).unwrap()
        };
        check_transition(parse(from), parse(to)).unwrap();
        previous = to.to_string();
    }
    assert_eq!(previous, "completed");

    // Hash chain survives the whole run.
    assert!(session.trace.verify_integrity());
}

// ── Determinism ─────────────────────────────────────────────────────────

#[tokio::test]
async fn identical_inputs_produce_identical_outcomes() {
    let mut outcomes = Vec::new();
    for _ in 0..2 {
        let llm = Arc::new(MockReasoningClient::new(vec![ReasoningResponse::tools(
            vec![tool_call(
                "output_plan",
                serde_json::json!({"plan_text": "deterministic plan"}),
            )],
        )]));
        let run = run_negotiation(deps(scripted_profiles(), llm), |_| {}).await;
        run.result.as_ref().unwrap();

        let session = run.handle.session.lock().await;
        let plan = session.plan_output.clone();
        // Offer events may interleave in any order within Stage 3; compare
        // them as a set and everything else as a sequence.
        let mut offer_agents: Vec<String> = session
            .event_history
            .iter()
            .filter(|e| e.event_type == EventType::OfferReceived)
            .map(|e| e.data["agent_id"].as_str().unwrap().to_string())
            .collect();
        offer_agents.sort();
        let rest: Vec<(EventType, serde_json::Value)> = session
            .event_history
            .iter()
            .filter(|e| e.event_type != EventType::OfferReceived)
            .map(|e| (e.event_type, e.data.clone()))
            .collect();
        outcomes.push((plan, offer_agents, rest));
    }
    assert_eq!(outcomes[0].0, outcomes[1].0);
    assert_eq!(outcomes[0].1, outcomes[1].1);
    assert_eq!(outcomes[0].2.len(), outcomes[1].2.len());
    for (a, b) in outcomes[0].2.iter().zip(outcomes[1].2.iter()) {
        assert_eq!(a.0, b.0);
        assert_eq!(a.1, b.1);
    }
}

// ── Confirmation idempotence ────────────────────────────────────────────

#[tokio::test]
async fn confirming_twice_leaves_text_unchanged() {
    let llm = Arc::new(MockReasoningClient::new(vec![ReasoningResponse::tools(
        vec![tool_call(
            "output_plan",
            serde_json::json!({"plan_text": "plan"}),
        )],
    )]));

    let store = Arc::new(SessionStore::new());
    let engine = Arc::new(NegotiationEngine::new(store.clone()));
    let mut session = NegotiationSession::new(DemandSnapshot::new(
        "I need a technical co-founder",
        "user_1",
        "all",
    ));
    session.confirm_timeout = Duration::from_secs(30);
    let negotiation_id = session.negotiation_id.clone();
    let handle = store.insert(session).await;

    let engine_task = {
        let engine = engine.clone();
        let handle = handle.clone();
        let deps = deps(scripted_profiles(), llm);
        tokio::spawn(async move { engine.start_negotiation(handle, deps).await })
    };

    // Wait for the gate to open.
    while !handle.awaiting_confirmation() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let first = store
        .confirm_formulation(&negotiation_id, Some("edited demand text".to_string()))
        .await
        .unwrap();
    assert_eq!(first, ConfirmOutcome::Confirmed);

    let second = store
        .confirm_formulation(&negotiation_id, Some("should be ignored".to_string()))
        .await
        .unwrap();
    assert_eq!(second, ConfirmOutcome::NotAwaiting);

    engine_task.await.unwrap().unwrap();
    let session = handle.session.lock().await;
    assert_eq!(
        session.demand.formulated_text.as_deref(),
        Some("edited demand text")
    );
}

// ── Cancellation ────────────────────────────────────────────────────────

#[tokio::test]
async fn cancellation_forces_completed_with_terminal_event() {
    let llm = Arc::new(MockReasoningClient::new(vec![]));

    let store = Arc::new(SessionStore::new());
    let engine = Arc::new(NegotiationEngine::new(store.clone()));
    let mut session = NegotiationSession::new(DemandSnapshot::new(
        "I need a technical co-founder",
        "user_1",
        "all",
    ));
    // A long gate so cancellation lands while the engine is suspended.
    session.confirm_timeout = Duration::from_secs(60);
    let handle = store.insert(session).await;

    let engine_task = {
        let engine = engine.clone();
        let handle = handle.clone();
        let deps = deps(scripted_profiles(), llm);
        tokio::spawn(async move { engine.start_negotiation(handle, deps).await })
    };

    while !handle.awaiting_confirmation() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    handle.cancel();

    let result = engine_task.await.unwrap();
    assert!(result.is_err());

    let session = handle.session.lock().await;
    assert_eq!(session.state, NegotiationState::Completed);
    assert_eq!(session.metadata.get("error").map(String::as_str), Some("cancelled"));
    // Subscribers always see a finite stream: a terminal event was flushed.
    assert_eq!(
        session.event_history.last().unwrap().event_type,
        EventType::PlanReady
    );
    drop(session);

    // The gate died with the run.
    let outcome = store
        .confirm_formulation(
            &handle.session.lock().await.negotiation_id.clone(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(outcome, ConfirmOutcome::NotAwaiting);
}

// ── Degraded coordinator responses ──────────────────────────────────────

#[tokio::test]
async fn free_text_coordinator_reply_becomes_the_plan() {
    let llm = Arc::new(MockReasoningClient::new(vec![ReasoningResponse::text(
        "Alice should simply lead the team.",
    )]));
    let run = run_negotiation(deps(scripted_profiles(), llm), |_| {}).await;
    run.result.as_ref().unwrap();

    let session = run.handle.session.lock().await;
    assert_eq!(
        session.plan_output.as_deref(),
        Some("Alice should simply lead the team.")
    );
}

#[tokio::test]
async fn invalid_tool_name_short_circuits_with_error_metadata() {
    let llm = Arc::new(MockReasoningClient::new(vec![ReasoningResponse::tools(
        vec![tool_call("explode", serde_json::json!({}))],
    )]));
    let run = run_negotiation(deps(scripted_profiles(), llm), |_| {}).await;

    let err = run.result.as_ref().unwrap_err();
    assert!(err.to_string().contains("invalid tool name 'explode'"));

    let session = run.handle.session.lock().await;
    assert_eq!(session.state, NegotiationState::Completed);
    assert!(session.metadata["error"].contains("invalid tool name"));
    // The stream still terminated for subscribers.
    assert_eq!(
        session.event_history.last().unwrap().event_type,
        EventType::PlanReady
    );
}

// ── Sub-demand surfacing ────────────────────────────────────────────────

#[tokio::test]
async fn create_sub_demand_emits_event_and_continues() {
    let llm = Arc::new(MockReasoningClient::new(vec![
        ReasoningResponse::tools(vec![tool_call(
            "create_sub_demand",
            serde_json::json!({"gap_description": "Need a DevOps engineer"}),
        )]),
        // Consumed by the gap-recursion skill composing the child demand.
        ReasoningResponse::text(
            serde_json::json!({
                "sub_demand_text": "Standalone: need a DevOps engineer for CI/CD",
                "context": "Supports a larger team formation."
            })
            .to_string(),
        ),
        ReasoningResponse::tools(vec![tool_call(
            "output_plan",
            serde_json::json!({"plan_text": "Plan with a sub-demand open."}),
        )]),
    ]));

    let run = run_negotiation(deps(scripted_profiles(), llm), |session| {
        session.max_coordinator_rounds = 3;
    })
    .await;
    run.result.as_ref().unwrap();

    let session = run.handle.session.lock().await;
    assert_eq!(session.sub_session_ids.len(), 1);
    drop(session);

    let sub_events = events_of(&run, EventType::SubNegotiationStarted).await;
    assert_eq!(sub_events.len(), 1);
    assert_eq!(sub_events[0]["gap_description"], "Need a DevOps engineer");
    assert_eq!(
        sub_events[0]["sub_negotiation_id"],
        run.handle.session.lock().await.sub_session_ids[0].as_str()
    );
}

// ── create_machine is terminal-compatible ───────────────────────────────

#[tokio::test]
async fn create_machine_sets_plan_json_and_finalizes() {
    let machine = serde_json::json!({"steps": [{"do": "intro", "who": ["alice", "bob"]}]});
    let llm = Arc::new(MockReasoningClient::new(vec![ReasoningResponse::tools(
        vec![tool_call(
            "create_machine",
            serde_json::json!({"machine_json": machine}),
        )],
    )]));

    let run = run_negotiation(deps(scripted_profiles(), llm), |_| {}).await;
    run.result.as_ref().unwrap();

    let session = run.handle.session.lock().await;
    assert_eq!(session.state, NegotiationState::Completed);
    assert_eq!(session.plan_json.as_ref().unwrap(), &machine);
    assert!(session.plan_output.as_deref().unwrap().contains("intro"));
}
