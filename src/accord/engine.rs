//! The negotiation engine: a deterministic state machine from intent to plan.
//!
//! One call to [`NegotiationEngine::start_negotiation`] drives a session
//! through formulation (with a user confirmation gate), encoding and
//! resonance selection, a parallel offer stage joined at a barrier, and a
//! bounded coordinator tool-use loop, emitting events and trace entries at
//! every step. The engine provides determinism via code control; judgment
//! lives in the skills.
//!
//! # State machine
//!
//! ```text
//! created → formulating → formulated → encoding → offering
//!        → barrier_waiting → synthesizing ⟲ → completed
//! ```
//!
//! Any non-terminal state may short-circuit to `completed` on unrecoverable
//! error; `metadata["error"]` records the reason and the original error
//! propagates to the caller. Every other transition is validated against
//! [`allowed_transitions`] and rejected with a typed engine error.
//!
//! # Concurrency
//!
//! The whole negotiation runs on the single task that called
//! `start_negotiation`. Stage 3 fans out one future per participant (each
//! under its own timeout) and joins them at the barrier; because the futures
//! are owned by the driving task, cancelling the outer call cancels every
//! outstanding request. Cancellation is requested through the session
//! handle and observed between suspension points; it forces the state to
//! `completed` with `metadata["error"] = "cancelled"` and flushes a terminal
//! event so subscribers always see a finite stream.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::time::timeout;

use crate::accord::encoder::Encoder;
use crate::accord::errors::AccordError;
use crate::accord::events;
use crate::accord::events::EventBus;
use crate::accord::models::{
    generate_id, AgentParticipant, NegotiationSession, NegotiationState, Offer, Vector,
};
use crate::accord::profile::ProfileSource;
use crate::accord::reasoning::{Message, ReasoningClient};
use crate::accord::resonance::ResonanceDetector;
use crate::accord::session_store::{SessionHandle, SessionStore};
use crate::accord::skills::coordinator::{
    TOOL_ASK_AGENT, TOOL_CREATE_MACHINE, TOOL_CREATE_SUB_DEMAND, TOOL_OUTPUT_PLAN,
    TOOL_START_DISCOVERY,
};
use crate::accord::skills::{
    CoordinatorContext, CoordinatorSkill, FormulationSkill, GapRecursionSkill, OfferResult,
    OfferSkill, PartySummary, SubNegotiationSkill,
};

const PLACEHOLDER_PLAN: &str = "Plan could not be generated (round limit reached)";

/// Allowed successor states per the lifecycle table.
pub fn allowed_transitions(from: NegotiationState) -> &'static [NegotiationState] {
    use NegotiationState::*;
    match from {
        Created => &[Formulating, Completed],
        Formulating => &[Formulated, Completed],
        Formulated => &[Encoding, Completed],
        Encoding => &[Offering, Completed],
        Offering => &[BarrierWaiting, Completed],
        BarrierWaiting => &[Synthesizing, Completed],
        Synthesizing => &[Synthesizing, Completed],
        Completed => &[],
    }
}

/// Validate a transition against the table.
pub fn check_transition(
    from: NegotiationState,
    to: NegotiationState,
) -> Result<(), AccordError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(AccordError::engine(format!(
            "invalid state transition: {} -> {}",
            from.as_str(),
            to.as_str()
        )))
    }
}

/// Dependencies injected into one `start_negotiation` call.
///
/// Any skill may be absent: formulation then passes the raw intent through,
/// offers fall back to plain profile chat, and the coordinator falls back to
/// a default skill instance over the reasoning client.
pub struct EngineDeps {
    pub profile_source: Arc<dyn ProfileSource>,
    pub reasoning_client: Arc<dyn ReasoningClient>,
    pub encoder: Arc<dyn Encoder>,
    pub detector: ResonanceDetector,
    pub formulation_skill: Option<FormulationSkill>,
    pub offer_skill: Option<OfferSkill>,
    pub coordinator_skill: Option<CoordinatorSkill>,
    pub sub_negotiation_skill: Option<SubNegotiationSkill>,
    pub gap_recursion_skill: Option<GapRecursionSkill>,
    /// Candidate vectors already restricted to the negotiation's scope.
    pub agent_vectors: HashMap<String, Vector>,
    pub k_star: usize,
    pub min_score: f32,
    pub display_names: HashMap<String, String>,
    pub scene_context: Option<String>,
}

impl EngineDeps {
    pub fn new(
        profile_source: Arc<dyn ProfileSource>,
        reasoning_client: Arc<dyn ReasoningClient>,
        encoder: Arc<dyn Encoder>,
    ) -> Self {
        Self {
            profile_source,
            reasoning_client,
            encoder,
            detector: ResonanceDetector::new(),
            formulation_skill: Some(FormulationSkill::new()),
            offer_skill: Some(OfferSkill::new()),
            coordinator_skill: Some(CoordinatorSkill::new()),
            sub_negotiation_skill: Some(SubNegotiationSkill::new()),
            gap_recursion_skill: Some(GapRecursionSkill::new()),
            agent_vectors: HashMap::new(),
            k_star: 5,
            min_score: 0.0,
            display_names: HashMap::new(),
            scene_context: None,
        }
    }

    pub fn with_agent_vectors(mut self, agent_vectors: HashMap<String, Vector>) -> Self {
        self.agent_vectors = agent_vectors;
        self
    }

    pub fn with_k_star(mut self, k_star: usize) -> Self {
        self.k_star = k_star;
        self
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn with_display_names(mut self, display_names: HashMap<String, String>) -> Self {
        self.display_names = display_names;
        self
    }

    pub fn with_scene_context(mut self, scene_context: impl Into<String>) -> Self {
        self.scene_context = Some(scene_context.into());
        self
    }

    pub fn without_formulation_skill(mut self) -> Self {
        self.formulation_skill = None;
        self
    }

    pub fn without_offer_skill(mut self) -> Self {
        self.offer_skill = None;
        self
    }
}

enum RoundOutcome {
    /// A plan was produced; synthesis is done.
    Plan(String),
    /// No terminal tool call yet; loop again.
    Continue,
}

/// The lifecycle state machine driver.
pub struct NegotiationEngine {
    store: Arc<SessionStore>,
    bus: Arc<EventBus>,
}

impl NegotiationEngine {
    pub fn new(store: Arc<SessionStore>) -> Self {
        let bus = store.bus();
        Self { store, bus }
    }

    pub fn store(&self) -> Arc<SessionStore> {
        self.store.clone()
    }

    /// Drive a session from `created` to `completed`.
    ///
    /// On failure the state is forced to `completed`, `metadata["error"]` is
    /// set, a terminal event is flushed, and the original error propagates.
    pub async fn start_negotiation(
        &self,
        handle: Arc<SessionHandle>,
        deps: EngineDeps,
    ) -> Result<(), AccordError> {
        let mut cancel = handle.cancel_signal();
        let drive = self.drive(&handle, &deps);
        tokio::pin!(drive);

        let result = loop {
            if *cancel.borrow() {
                break Err(AccordError::engine("cancelled"));
            }
            tokio::select! {
                result = &mut drive => break result,
                _ = cancel.changed() => {
                    // Loop re-checks the flag; dropping `drive` on exit
                    // cancels the gate and any outstanding requests.
                }
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(error) => {
                self.force_complete(&handle, &error).await;
                Err(error)
            }
        }
    }

    /// Apply a validated state transition and record it in the trace.
    async fn transition(
        &self,
        handle: &SessionHandle,
        to: NegotiationState,
    ) -> Result<(), AccordError> {
        let mut session = handle.session.lock().await;
        let from = session.state;
        check_transition(from, to).map_err(|e| {
            e.with_negotiation(session.negotiation_id.clone())
                .with_stage(from.as_str())
        })?;
        session.state = to;
        let mut metadata = HashMap::new();
        metadata.insert("from".to_string(), serde_json::json!(from.as_str()));
        metadata.insert("to".to_string(), serde_json::json!(to.as_str()));
        session
            .trace
            .append_with_metadata("state_transition", 0, None, None, metadata);
        Ok(())
    }

    /// Append to history and publish, both under the session lock the
    /// caller already holds — this is what makes replay snapshots exact
    /// prefixes of the live stream.
    fn emit(&self, session: &mut NegotiationSession, event: events::NegotiationEvent) {
        session.event_history.push(event.clone());
        self.bus.publish(&event);
    }

    /// Short-circuit to `completed` after an unrecoverable error.
    async fn force_complete(&self, handle: &SessionHandle, error: &AccordError) {
        let mut session = handle.session.lock().await;
        if session.state == NegotiationState::Completed {
            return;
        }
        log::error!(
            "negotiation {} failed in {}: {}",
            session.negotiation_id,
            session.state.as_str(),
            error
        );
        session.state = NegotiationState::Completed;
        session.completed_at = Some(chrono::Utc::now());
        session
            .metadata
            .insert("error".to_string(), error.message().to_string());
        session
            .trace
            .append("negotiation_failed", 0, None, Some(error.to_string()));
        session.trace.complete();
        // Flush a terminal event so subscribers always observe a finite
        // stream, even on failure.
        let event = events::plan_ready(
            &session.negotiation_id.clone(),
            session.plan_output.clone().unwrap_or_default().as_str(),
            session.coordinator_rounds,
            &session.replied_agent_ids(),
        );
        self.emit(&mut session, event);
        handle.close_confirm_gate();
    }

    async fn drive(&self, handle: &SessionHandle, deps: &EngineDeps) -> Result<(), AccordError> {
        self.run_formulation(handle, deps).await?;
        self.await_confirmation(handle).await?;
        self.run_resonance(handle, deps).await?;
        self.run_offers(handle, deps).await?;
        let plan = self.run_coordinator(handle, deps).await?;
        self.finalize(handle, plan).await
    }

    // ── Stage 1: formulation ────────────────────────────────────────────

    async fn run_formulation(
        &self,
        handle: &SessionHandle,
        deps: &EngineDeps,
    ) -> Result<(), AccordError> {
        self.transition(handle, NegotiationState::Formulating).await?;
        let started = Instant::now();

        let (negotiation_id, raw_intent, user_id) = {
            let session = handle.session.lock().await;
            (
                session.negotiation_id.clone(),
                session.demand.raw_intent.clone(),
                session.demand.user_id.clone(),
            )
        };

        let formulated = match &deps.formulation_skill {
            Some(skill) => {
                let profile = deps.profile_source.get_profile(&user_id).await?;
                skill
                    .execute(&raw_intent, &user_id, &profile, deps.profile_source.as_ref())
                    .await
                    .map_err(|e| e.with_negotiation(negotiation_id.clone()).with_stage("formulating"))?
                    .formulated_text
            }
            None => raw_intent.clone(),
        };

        let mut session = handle.session.lock().await;
        session.demand.formulated_text = Some(formulated.clone());
        session.trace.append(
            "formulation_ready",
            started.elapsed().as_millis() as u64,
            Some(raw_intent.clone()),
            Some(formulated.clone()),
        );
        let event = events::formulation_ready(&negotiation_id, &raw_intent, &formulated);
        self.emit(&mut session, event);
        Ok(())
    }

    // ── Confirmation gate ───────────────────────────────────────────────

    async fn await_confirmation(&self, handle: &SessionHandle) -> Result<(), AccordError> {
        self.transition(handle, NegotiationState::Formulated).await?;
        let started = Instant::now();

        let confirm_timeout = handle.session.lock().await.confirm_timeout;
        let gate = handle.open_confirm_gate();

        let edited = match timeout(confirm_timeout, gate).await {
            Ok(Ok(edited)) => edited,
            // Sender dropped without a confirm; treat as auto-confirm.
            Ok(Err(_)) => None,
            // Timeout: auto-confirm with the current formulated text.
            Err(_) => {
                handle.close_confirm_gate();
                None
            }
        };

        let mut session = handle.session.lock().await;
        let outcome = match edited {
            Some(text) => {
                session.demand.formulated_text = Some(text);
                "confirmed_with_edit"
            }
            None => "confirmed",
        };
        session.trace.append(
            "formulation_confirmed",
            started.elapsed().as_millis() as u64,
            None,
            Some(outcome.to_string()),
        );
        Ok(())
    }

    // ── Stage 2: encoding & resonance ───────────────────────────────────

    async fn run_resonance(
        &self,
        handle: &SessionHandle,
        deps: &EngineDeps,
    ) -> Result<(), AccordError> {
        self.transition(handle, NegotiationState::Encoding).await?;
        let started = Instant::now();

        if deps.agent_vectors.is_empty() {
            // No candidates in scope: proceed with zero participants.
            log::debug!("no agent vectors in scope, skipping resonance");
            self.transition(handle, NegotiationState::Offering).await?;
            return Ok(());
        }

        let (negotiation_id, demand_text) = {
            let session = handle.session.lock().await;
            (
                session.negotiation_id.clone(),
                session.demand.effective_text().to_string(),
            )
        };

        let demand_vector = deps
            .encoder
            .encode(&demand_text)
            .await
            .map_err(|e| e.with_negotiation(negotiation_id.clone()).with_stage("encoding"))?;

        let result = deps.detector.detect(
            &demand_vector,
            &deps.agent_vectors,
            deps.k_star,
            deps.min_score,
        );

        let mut session = handle.session.lock().await;
        let mut activated: Vec<(String, String, f32)> = Vec::new();
        for (agent_id, score) in &result.activated {
            let display_name = deps
                .display_names
                .get(agent_id)
                .cloned()
                .unwrap_or_else(|| agent_id.clone());
            session.participants.push(AgentParticipant::new(
                agent_id.clone(),
                display_name.clone(),
                *score,
            ));
            activated.push((agent_id.clone(), display_name, *score));
        }
        let mut metadata = HashMap::new();
        metadata.insert(
            "filtered_count".to_string(),
            serde_json::json!(result.filtered.len()),
        );
        session.trace.append_with_metadata(
            "resonance_activated",
            started.elapsed().as_millis() as u64,
            Some(demand_text),
            Some(format!("{} activated", activated.len())),
            metadata,
        );
        let event = events::resonance_activated(&negotiation_id, &activated);
        self.emit(&mut session, event);
        drop(session);

        self.transition(handle, NegotiationState::Offering).await
    }

    // ── Stage 3: parallel offers and barrier ────────────────────────────

    /// Collect one agent's offer: fetch exactly that agent's profile, then
    /// run the offer skill (or fall back to plain profile chat).
    async fn collect_offer(
        deps: &EngineDeps,
        agent_id: &str,
        demand_text: &str,
    ) -> Result<OfferResult, AccordError> {
        let profile = deps.profile_source.get_profile(agent_id).await?;
        match &deps.offer_skill {
            Some(skill) => {
                skill
                    .execute(agent_id, demand_text, &profile, deps.profile_source.as_ref())
                    .await
            }
            None => {
                let reply = deps
                    .profile_source
                    .chat(
                        agent_id,
                        &[Message::user(format!(
                            "Demand: {}\nPlease give your response.",
                            demand_text
                        ))],
                        None,
                    )
                    .await?;
                if reply.trim().is_empty() {
                    return Err(AccordError::adapter(format!(
                        "agent {} returned an empty reply",
                        agent_id
                    )));
                }
                Ok(OfferResult {
                    content: reply,
                    capabilities: Vec::new(),
                    confidence: 0.5,
                })
            }
        }
    }

    async fn run_offers(&self, handle: &SessionHandle, deps: &EngineDeps) -> Result<(), AccordError> {
        let started = Instant::now();
        let (negotiation_id, demand_text, offer_timeout, roster) = {
            let session = handle.session.lock().await;
            (
                session.negotiation_id.clone(),
                session.demand.effective_text().to_string(),
                session.offer_timeout,
                session
                    .participants
                    .iter()
                    .map(|p| (p.agent_id.clone(), p.display_name.clone()))
                    .collect::<Vec<_>>(),
            )
        };

        // All offer requests run concurrently on this task; each carries
        // its own timeout, and a failure or timeout exits only that
        // participant.
        let mut tasks = FuturesUnordered::new();
        for (agent_id, display_name) in roster.iter().cloned() {
            let demand_text = demand_text.clone();
            tasks.push(async move {
                let outcome =
                    timeout(offer_timeout, Self::collect_offer(deps, &agent_id, &demand_text))
                        .await;
                (agent_id, display_name, outcome)
            });
        }

        while let Some((agent_id, display_name, outcome)) = tasks.next().await {
            let mut session = handle.session.lock().await;
            match outcome {
                Ok(Ok(result)) => {
                    let offer = Offer::new(
                        agent_id.clone(),
                        result.content.clone(),
                        result.capabilities.clone(),
                        result.confidence,
                    );
                    if let Some(participant) = session.participant_mut(&agent_id) {
                        participant.mark_replied(offer);
                    }
                    let event = events::offer_received(
                        &negotiation_id,
                        &agent_id,
                        &display_name,
                        &result.content,
                        &result.capabilities,
                    );
                    self.emit(&mut session, event);
                }
                Ok(Err(error)) => {
                    log::warn!("agent {} failed to offer: {}", agent_id, error);
                    if let Some(participant) = session.participant_mut(&agent_id) {
                        participant.mark_exited();
                    }
                }
                Err(_) => {
                    log::warn!(
                        "agent {} timed out after {:?}",
                        agent_id,
                        offer_timeout
                    );
                    if let Some(participant) = session.participant_mut(&agent_id) {
                        participant.mark_exited();
                    }
                }
            }
        }
        drop(tasks);

        // Barrier met: every participant is in a terminal state.
        self.transition(handle, NegotiationState::BarrierWaiting).await?;

        let mut session = handle.session.lock().await;
        debug_assert!(session.participants.iter().all(|p| p.state.is_terminal()));
        let total = session.participants.len();
        let replied = session.replied_agent_ids().len();
        let exited = total - replied;
        session.trace.append(
            "barrier_complete",
            started.elapsed().as_millis() as u64,
            None,
            Some(format!("{} replied, {} exited", replied, exited)),
        );
        let event = events::barrier_complete(&negotiation_id, total, replied, exited);
        self.emit(&mut session, event);
        drop(session);

        self.transition(handle, NegotiationState::Synthesizing).await
    }

    // ── Stage 4: coordinator synthesis loop ─────────────────────────────

    async fn run_coordinator(
        &self,
        handle: &SessionHandle,
        deps: &EngineDeps,
    ) -> Result<String, AccordError> {
        let fallback_coordinator = CoordinatorSkill::new();
        let coordinator = deps
            .coordinator_skill
            .as_ref()
            .unwrap_or(&fallback_coordinator);

        let (negotiation_id, demand_text, offers, participants, max_rounds, offer_timeout) = {
            let session = handle.session.lock().await;
            (
                session.negotiation_id.clone(),
                session.demand.effective_text().to_string(),
                session.offers().into_iter().cloned().collect::<Vec<_>>(),
                session.participants.clone(),
                session.max_coordinator_rounds,
                session.offer_timeout,
            )
        };

        let mut history: Vec<serde_json::Value> = Vec::new();
        let mut round_number: u32 = 1;

        let plan = loop {
            let completed_rounds = handle.session.lock().await.coordinator_rounds;
            let restricted = completed_rounds >= max_rounds;
            if round_number > 1 {
                // Coordinator self-loop round.
                self.transition(handle, NegotiationState::Synthesizing).await?;
            }

            let started = Instant::now();
            let context = CoordinatorContext {
                demand_text: demand_text.clone(),
                offers: offers.clone(),
                participants: participants.clone(),
                history: history.clone(),
                round_number,
                tools_restricted: restricted,
                scene_context: deps.scene_context.clone(),
            };

            // A reasoning-layer timeout aborts this round only; it still
            // counts toward the round cap.
            let round_timeout = offer_timeout.saturating_mul(4);
            let decision = match timeout(
                round_timeout,
                coordinator.execute(&context, deps.reasoning_client.as_ref()),
            )
            .await
            {
                Ok(decision) => decision,
                Err(_) => {
                    log::warn!(
                        "coordinator round {} of {} timed out after {:?}",
                        round_number,
                        negotiation_id,
                        round_timeout
                    );
                    let mut session = handle.session.lock().await;
                    session.coordinator_rounds += 1;
                    session.trace.append(
                        "coordinator_round",
                        started.elapsed().as_millis() as u64,
                        Some(format!("round {}", round_number)),
                        Some("timed out".to_string()),
                    );
                    drop(session);
                    round_number += 1;
                    if restricted {
                        break PLACEHOLDER_PLAN.to_string();
                    }
                    continue;
                }
            };

            {
                let mut session = handle.session.lock().await;
                session.coordinator_rounds += 1;
                session.trace.append(
                    "coordinator_round",
                    started.elapsed().as_millis() as u64,
                    Some(format!(
                        "round {} ({})",
                        round_number,
                        if restricted { "restricted" } else { "full" }
                    )),
                    Some(match &decision {
                        Ok(d) => format!("{} tool call(s)", d.tool_calls.len()),
                        Err(e) => format!("error: {}", e),
                    }),
                );
            }

            let decision = match decision {
                Ok(decision) => decision,
                Err(error) => {
                    if restricted {
                        // The forced final round failed to produce a plan.
                        log::warn!(
                            "forced coordinator round failed for {}: {}",
                            negotiation_id,
                            error
                        );
                        break PLACEHOLDER_PLAN.to_string();
                    }
                    return Err(error
                        .with_negotiation(negotiation_id.clone())
                        .with_stage("synthesizing"));
                }
            };

            match self
                .dispatch_tool_calls(handle, deps, &negotiation_id, &decision.tool_calls, round_number, offer_timeout, &mut history)
                .await?
            {
                RoundOutcome::Plan(plan) => break plan,
                RoundOutcome::Continue => {}
            }

            // Preserve any free text the model produced alongside its tool
            // calls so the next round can see it.
            if let Some(reasoning) = &decision.reasoning_text {
                history.push(serde_json::json!({
                    "type": "center_reasoning",
                    "round": round_number,
                    "content": reasoning,
                }));
            }

            round_number += 1;
            if restricted {
                // The forced round produced no terminal tool call; its text
                // (if any) was already degraded by the skill, so give up.
                break PLACEHOLDER_PLAN.to_string();
            }
        };

        let mut session = handle.session.lock().await;
        let mut metadata = HashMap::new();
        metadata.insert("entries".to_string(), serde_json::json!(history));
        session.trace.append_with_metadata(
            "coordinator_history",
            0,
            None,
            Some(format!("{} entries", history.len())),
            metadata,
        );
        Ok(plan)
    }

    async fn dispatch_tool_calls(
        &self,
        handle: &SessionHandle,
        deps: &EngineDeps,
        negotiation_id: &str,
        tool_calls: &[crate::accord::reasoning::ToolCallRequest],
        round_number: u32,
        offer_timeout: std::time::Duration,
        history: &mut Vec<serde_json::Value>,
    ) -> Result<RoundOutcome, AccordError> {
        let fallback_coordinator = CoordinatorSkill::new();
        let coordinator = deps
            .coordinator_skill
            .as_ref()
            .unwrap_or(&fallback_coordinator);

        for call in tool_calls {
            {
                let mut session = handle.session.lock().await;
                let event = events::coordinator_tool_call(
                    negotiation_id,
                    &call.name,
                    &call.arguments,
                    round_number,
                );
                self.emit(&mut session, event);
            }

            match call.name.as_str() {
                TOOL_OUTPUT_PLAN => {
                    let plan = call.arguments["plan_text"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string();
                    return Ok(RoundOutcome::Plan(plan));
                }
                TOOL_ASK_AGENT => {
                    let agent_id = call.arguments["agent_id"].as_str().unwrap_or_default();
                    let question = call.arguments["question"].as_str().unwrap_or_default();
                    let answer = match timeout(
                        offer_timeout,
                        deps.profile_source.chat(
                            agent_id,
                            &[Message::user(question)],
                            None,
                        ),
                    )
                    .await
                    {
                        Ok(Ok(answer)) if !answer.trim().is_empty() => answer,
                        other => {
                            if let Ok(Err(e)) = &other {
                                log::warn!("ask_agent {} failed: {}", agent_id, e);
                            }
                            format!("Agent {} did not respond", agent_id)
                        }
                    };
                    history.push(serde_json::json!({
                        "tool": TOOL_ASK_AGENT,
                        "args": call.arguments,
                        "result": answer,
                    }));
                }
                TOOL_START_DISCOVERY => {
                    let result = self.run_discovery(handle, deps, call).await;
                    history.push(serde_json::json!({
                        "tool": TOOL_START_DISCOVERY,
                        "args": call.arguments,
                        "result": result,
                    }));
                }
                TOOL_CREATE_SUB_DEMAND => {
                    let gap = call.arguments["gap_description"]
                        .as_str()
                        .unwrap_or_default();
                    let sub_id = generate_id("neg");
                    // Compose the child's standalone demand when the skill
                    // is available; the child itself is driven by a
                    // collaborator, not by this loop.
                    let sub_demand_text = match &deps.gap_recursion_skill {
                        Some(skill) => {
                            let demand_text = {
                                let session = handle.session.lock().await;
                                session.demand.effective_text().to_string()
                            };
                            match skill
                                .execute(gap, &demand_text, deps.reasoning_client.as_ref())
                                .await
                            {
                                Ok(result) => Some(result.sub_demand_text),
                                Err(e) => {
                                    log::warn!("gap recursion failed: {}", e);
                                    None
                                }
                            }
                        }
                        None => None,
                    };
                    {
                        let mut session = handle.session.lock().await;
                        session.sub_session_ids.push(sub_id.clone());
                        let event =
                            events::sub_negotiation_started(negotiation_id, &sub_id, gap);
                        self.emit(&mut session, event);
                    }
                    let mut entry = serde_json::json!({
                        "tool": TOOL_CREATE_SUB_DEMAND,
                        "args": call.arguments,
                        "result": "started",
                    });
                    if let Some(text) = sub_demand_text {
                        entry["sub_demand_text"] = serde_json::json!(text);
                    }
                    history.push(entry);
                }
                TOOL_CREATE_MACHINE => {
                    // Accepted and forwarded unchanged; terminal-compatible.
                    let machine = call
                        .arguments
                        .get("machine_json")
                        .cloned()
                        .unwrap_or(call.arguments.clone());
                    let mut session = handle.session.lock().await;
                    session.plan_json = Some(machine.clone());
                    drop(session);
                    let plan = serde_json::to_string(&machine).unwrap_or_default();
                    return Ok(RoundOutcome::Plan(plan));
                }
                custom => match coordinator.custom_handler(custom) {
                    Some(handler) => {
                        let result = match handler.handle(&call.arguments).await {
                            Ok(result) => result,
                            Err(e) => serde_json::json!(format!("tool failed: {}", e)),
                        };
                        history.push(serde_json::json!({
                            "tool": custom,
                            "args": call.arguments,
                            "result": result,
                        }));
                    }
                    // The skill validated names already; an unknown name
                    // here is an engine bug.
                    None => {
                        return Err(AccordError::engine(format!(
                            "no handler for tool '{}'",
                            custom
                        )))
                    }
                },
            }
        }
        Ok(RoundOutcome::Continue)
    }

    /// Run a pairwise discovery for `start_discovery`; failures are
    /// absorbed into a synthesized negative result.
    async fn run_discovery(
        &self,
        handle: &SessionHandle,
        deps: &EngineDeps,
        call: &crate::accord::reasoning::ToolCallRequest,
    ) -> serde_json::Value {
        let agent_a = call.arguments["agent_a"].as_str().unwrap_or_default();
        let agent_b = call.arguments["agent_b"].as_str().unwrap_or_default();
        let reason = call.arguments["reason"].as_str().unwrap_or_default();

        let skill = match &deps.sub_negotiation_skill {
            Some(skill) => skill,
            None => return serde_json::json!("discovery unavailable"),
        };

        let party = |agent_id: &str, session: &NegotiationSession| -> PartySummary {
            let participant = session.participant(agent_id);
            PartySummary {
                agent_id: agent_id.to_string(),
                display_name: participant
                    .map(|p| p.display_name.clone())
                    .unwrap_or_else(|| agent_id.to_string()),
                offer: participant
                    .and_then(|p| p.offer.as_ref())
                    .map(|o| o.content.clone())
                    .unwrap_or_default(),
                profile: serde_json::json!({}),
            }
        };

        let (mut party_a, mut party_b) = {
            let session = handle.session.lock().await;
            (party(agent_a, &session), party(agent_b, &session))
        };
        // Each party's summary carries only that party's own profile.
        if let Ok(profile) = deps.profile_source.get_profile(agent_a).await {
            party_a.profile = profile;
        }
        if let Ok(profile) = deps.profile_source.get_profile(agent_b).await {
            party_b.profile = profile;
        }

        match skill
            .execute(&party_a, &party_b, reason, deps.reasoning_client.as_ref())
            .await
        {
            Ok(report) => serde_json::to_value(&report)
                .unwrap_or_else(|_| serde_json::json!("discovery report unavailable")),
            Err(e) => {
                log::warn!("discovery {} / {} failed: {}", agent_a, agent_b, e);
                serde_json::json!(format!(
                    "Discovery between {} and {} did not complete",
                    agent_a, agent_b
                ))
            }
        }
    }

    // ── Finalization ────────────────────────────────────────────────────

    async fn finalize(&self, handle: &SessionHandle, plan: String) -> Result<(), AccordError> {
        self.transition(handle, NegotiationState::Completed).await?;
        let mut session = handle.session.lock().await;
        session.plan_output = Some(plan.clone());
        session.completed_at = Some(chrono::Utc::now());
        session.trace.append(
            "synthesis_complete",
            0,
            None,
            Some(format!("{} chars", plan.len())),
        );
        session.trace.complete();
        let event = events::plan_ready(
            &session.negotiation_id.clone(),
            &plan,
            session.coordinator_rounds,
            &session.replied_agent_ids(),
        );
        self.emit(&mut session, event);
        Ok(())
    }
}
