//! Typed negotiation events and the per-session event bus.
//!
//! Every engine step emits a [`NegotiationEvent`] on the session's channel.
//! Events are immutable, timestamped, and serialize to the wire frame
//! `{event_type, negotiation_id, timestamp, data}`. Within a session the
//! stream order matches the state-machine operations that produced it; the
//! bus makes no ordering promise across sessions.
//!
//! Subscribers own a bounded queue (depth [`SUBSCRIBER_QUEUE_DEPTH`]). A
//! subscriber whose queue is full at publish time is dropped so the engine
//! never blocks on a slow reader.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;

use crate::accord::models::generate_id;

/// The closed set of event types the engine emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    FormulationReady,
    ResonanceActivated,
    OfferReceived,
    BarrierComplete,
    CoordinatorToolCall,
    SubNegotiationStarted,
    PlanReady,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::FormulationReady => "formulation.ready",
            EventType::ResonanceActivated => "resonance.activated",
            EventType::OfferReceived => "offer.received",
            EventType::BarrierComplete => "barrier.complete",
            EventType::CoordinatorToolCall => "coordinator.tool_call",
            EventType::SubNegotiationStarted => "sub_negotiation.started",
            EventType::PlanReady => "plan.ready",
        }
    }
}

impl Serialize for EventType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "formulation.ready" => Ok(EventType::FormulationReady),
            "resonance.activated" => Ok(EventType::ResonanceActivated),
            "offer.received" => Ok(EventType::OfferReceived),
            "barrier.complete" => Ok(EventType::BarrierComplete),
            "coordinator.tool_call" => Ok(EventType::CoordinatorToolCall),
            "sub_negotiation.started" => Ok(EventType::SubNegotiationStarted),
            "plan.ready" => Ok(EventType::PlanReady),
            other => Err(serde::de::Error::custom(format!(
                "unknown event type: {}",
                other
            ))),
        }
    }
}

/// An immutable, typed, timestamped record broadcast on the session channel
/// and appended to the session's event history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationEvent {
    pub event_type: EventType,
    pub negotiation_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl NegotiationEvent {
    pub fn new(event_type: EventType, negotiation_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type,
            negotiation_id: negotiation_id.into(),
            timestamp: Utc::now(),
            data,
        }
    }
}

pub fn formulation_ready(
    negotiation_id: &str,
    raw_intent: &str,
    formulated_text: &str,
) -> NegotiationEvent {
    NegotiationEvent::new(
        EventType::FormulationReady,
        negotiation_id,
        serde_json::json!({
            "raw_intent": raw_intent,
            "formulated_text": formulated_text,
        }),
    )
}

pub fn resonance_activated(
    negotiation_id: &str,
    agents: &[(String, String, f32)],
) -> NegotiationEvent {
    let agent_objs: Vec<serde_json::Value> = agents
        .iter()
        .map(|(agent_id, display_name, score)| {
            serde_json::json!({
                "agent_id": agent_id,
                "display_name": display_name,
                "resonance_score": score,
            })
        })
        .collect();
    NegotiationEvent::new(
        EventType::ResonanceActivated,
        negotiation_id,
        serde_json::json!({
            "activated_count": agents.len(),
            "agents": agent_objs,
        }),
    )
}

pub fn offer_received(
    negotiation_id: &str,
    agent_id: &str,
    display_name: &str,
    content: &str,
    capabilities: &[String],
) -> NegotiationEvent {
    NegotiationEvent::new(
        EventType::OfferReceived,
        negotiation_id,
        serde_json::json!({
            "agent_id": agent_id,
            "display_name": display_name,
            "content": content,
            "capabilities": capabilities,
        }),
    )
}

pub fn barrier_complete(
    negotiation_id: &str,
    total_participants: usize,
    offers_received: usize,
    exited_count: usize,
) -> NegotiationEvent {
    NegotiationEvent::new(
        EventType::BarrierComplete,
        negotiation_id,
        serde_json::json!({
            "total_participants": total_participants,
            "offers_received": offers_received,
            "exited_count": exited_count,
        }),
    )
}

pub fn coordinator_tool_call(
    negotiation_id: &str,
    tool_name: &str,
    tool_args: &serde_json::Value,
    round_number: u32,
) -> NegotiationEvent {
    NegotiationEvent::new(
        EventType::CoordinatorToolCall,
        negotiation_id,
        serde_json::json!({
            "tool_name": tool_name,
            "tool_args": tool_args,
            "round_number": round_number,
        }),
    )
}

pub fn sub_negotiation_started(
    negotiation_id: &str,
    sub_negotiation_id: &str,
    gap_description: &str,
) -> NegotiationEvent {
    NegotiationEvent::new(
        EventType::SubNegotiationStarted,
        negotiation_id,
        serde_json::json!({
            "sub_negotiation_id": sub_negotiation_id,
            "gap_description": gap_description,
        }),
    )
}

pub fn plan_ready(
    negotiation_id: &str,
    plan_text: &str,
    coordinator_rounds: u32,
    participating_agents: &[String],
) -> NegotiationEvent {
    NegotiationEvent::new(
        EventType::PlanReady,
        negotiation_id,
        serde_json::json!({
            "plan_text": plan_text,
            "coordinator_rounds": coordinator_rounds,
            "participating_agents": participating_agents,
        }),
    )
}

/// Bound on each subscriber's send-side queue.
pub const SUBSCRIBER_QUEUE_DEPTH: usize = 128;

struct Subscriber {
    id: String,
    sender: mpsc::Sender<NegotiationEvent>,
}

/// Handle identifying one subscription; pass back to
/// [`EventBus::unsubscribe`] when the reader goes away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub negotiation_id: String,
    pub subscriber_id: String,
}

/// Per-session fan-out of [`NegotiationEvent`]s.
///
/// Publishing is synchronous and bounded: each subscriber gets a `try_send`
/// into its queue, and a subscriber whose queue is full (or whose receiver
/// was dropped) is removed on the spot.
pub struct EventBus {
    channels: RwLock<HashMap<String, Vec<Subscriber>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Register a subscriber for a session's live stream.
    pub fn subscribe(
        &self,
        negotiation_id: &str,
    ) -> (SubscriptionHandle, mpsc::Receiver<NegotiationEvent>) {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_QUEUE_DEPTH);
        let subscriber_id = generate_id("sub");
        let handle = SubscriptionHandle {
            negotiation_id: negotiation_id.to_string(),
            subscriber_id: subscriber_id.clone(),
        };
        let mut channels = self.channels.write().unwrap();
        channels
            .entry(negotiation_id.to_string())
            .or_insert_with(Vec::new)
            .push(Subscriber {
                id: subscriber_id,
                sender,
            });
        (handle, receiver)
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut channels = self.channels.write().unwrap();
        if let Some(subs) = channels.get_mut(&handle.negotiation_id) {
            subs.retain(|s| s.id != handle.subscriber_id);
            if subs.is_empty() {
                channels.remove(&handle.negotiation_id);
            }
        }
    }

    pub fn subscriber_count(&self, negotiation_id: &str) -> usize {
        self.channels
            .read()
            .unwrap()
            .get(negotiation_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// Fan an event out to every live subscriber of its session.
    ///
    /// Returns the number of subscribers dropped for having a full or
    /// closed queue.
    pub fn publish(&self, event: &NegotiationEvent) -> usize {
        let dead: Vec<String> = {
            let channels = self.channels.read().unwrap();
            let subs = match channels.get(&event.negotiation_id) {
                Some(subs) => subs,
                None => return 0,
            };
            subs.iter()
                .filter(|s| s.sender.try_send(event.clone()).is_err())
                .map(|s| s.id.clone())
                .collect()
        };
        if dead.is_empty() {
            return 0;
        }
        log::warn!(
            "event bus: dropping {} slow subscriber(s) on {}",
            dead.len(),
            event.negotiation_id
        );
        let mut channels = self.channels.write().unwrap();
        if let Some(subs) = channels.get_mut(&event.negotiation_id) {
            subs.retain(|s| !dead.contains(&s.id));
        }
        dead.len()
    }

    /// Drop every subscription of a session (used when the session is
    /// destroyed).
    pub fn close_session(&self, negotiation_id: &str) {
        self.channels.write().unwrap().remove(negotiation_id);
    }
}
