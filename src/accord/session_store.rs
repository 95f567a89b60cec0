//! In-memory registry of live negotiation sessions.
//!
//! The store maps negotiation ids to session handles. Each handle bundles
//! the session aggregate (all mutation happens on the single engine task
//! driving it), the one-shot confirmation gate for the formulation stage,
//! and the cancellation flag observed at every suspension point.
//!
//! Event-history replay for a newly connecting subscriber snapshots the
//! history and registers the subscription while holding the session lock —
//! the engine appends to history and publishes under that same lock, so the
//! snapshot is always a prefix of the full event sequence.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};

use crate::accord::events::{EventBus, NegotiationEvent, SubscriptionHandle};
use crate::accord::models::{NegotiationSession, NegotiationState};

/// Outcome of a confirmation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The gate was open and has now been completed.
    Confirmed,
    /// No gate was open: the session is not awaiting confirmation.
    NotAwaiting,
}

/// One live negotiation: the aggregate plus its control primitives.
pub struct SessionHandle {
    pub session: Mutex<NegotiationSession>,
    confirm_gate: StdMutex<Option<oneshot::Sender<Option<String>>>>,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
}

impl SessionHandle {
    fn new(session: NegotiationSession) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            session: Mutex::new(session),
            confirm_gate: StdMutex::new(None),
            cancel_tx,
            cancel_rx,
        }
    }

    /// Open the confirmation gate and return the receiving side for the
    /// engine to await. Any previously open gate is replaced.
    pub fn open_confirm_gate(&self) -> oneshot::Receiver<Option<String>> {
        let (tx, rx) = oneshot::channel();
        *self.confirm_gate.lock().unwrap() = Some(tx);
        rx
    }

    /// Complete the gate with optionally edited text.
    pub fn confirm(&self, edited_text: Option<String>) -> ConfirmOutcome {
        match self.confirm_gate.lock().unwrap().take() {
            Some(tx) => {
                // A dropped receiver means the engine already moved on;
                // treat it the same as a closed gate.
                if tx.send(edited_text).is_ok() {
                    ConfirmOutcome::Confirmed
                } else {
                    ConfirmOutcome::NotAwaiting
                }
            }
            None => ConfirmOutcome::NotAwaiting,
        }
    }

    /// Drop an unconsumed gate (after an auto-confirm timeout) so later
    /// confirm calls report `NotAwaiting`.
    pub fn close_confirm_gate(&self) {
        self.confirm_gate.lock().unwrap().take();
    }

    pub fn awaiting_confirmation(&self) -> bool {
        self.confirm_gate.lock().unwrap().is_some()
    }

    /// Request cancellation of the running negotiation.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// A watch receiver that resolves when cancellation is requested.
    pub fn cancel_signal(&self) -> watch::Receiver<bool> {
        self.cancel_rx.clone()
    }
}

/// Concurrent map of negotiation id → session handle, plus the event bus
/// used for per-session fan-out.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    bus: Arc<EventBus>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            bus: Arc::new(EventBus::new()),
        }
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    /// Register a session; returns its handle.
    pub async fn insert(&self, session: NegotiationSession) -> Arc<SessionHandle> {
        let negotiation_id = session.negotiation_id.clone();
        let handle = Arc::new(SessionHandle::new(session));
        self.sessions
            .write()
            .await
            .insert(negotiation_id, handle.clone());
        handle
    }

    pub async fn get(&self, negotiation_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(negotiation_id).cloned()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Confirm the formulation gate of a session.
    pub async fn confirm_formulation(
        &self,
        negotiation_id: &str,
        edited_text: Option<String>,
    ) -> Option<ConfirmOutcome> {
        let handle = self.get(negotiation_id).await?;
        Some(handle.confirm(edited_text))
    }

    /// Snapshot the event history and join the live stream atomically with
    /// respect to the engine's emits.
    pub async fn subscribe_with_replay(
        &self,
        negotiation_id: &str,
    ) -> Option<(
        Vec<NegotiationEvent>,
        SubscriptionHandle,
        mpsc::Receiver<NegotiationEvent>,
    )> {
        let handle = self.get(negotiation_id).await?;
        let session = handle.session.lock().await;
        let history = session.event_history.clone();
        let (sub_handle, receiver) = self.bus.subscribe(negotiation_id);
        drop(session);
        Some((history, sub_handle, receiver))
    }

    /// Destroy a session if it is completed, nothing subscribes to its
    /// channel, and no sub-session still refers to it. Returns whether the
    /// session was removed.
    pub async fn destroy_if_settled(&self, negotiation_id: &str) -> bool {
        let handle = match self.get(negotiation_id).await {
            Some(handle) => handle,
            None => return false,
        };
        {
            let session = handle.session.lock().await;
            if session.state != NegotiationState::Completed {
                return false;
            }
            if !session.sub_session_ids.is_empty() {
                let sessions = self.sessions.read().await;
                if session
                    .sub_session_ids
                    .iter()
                    .any(|id| sessions.contains_key(id))
                {
                    return false;
                }
            }
        }
        if self.bus.subscriber_count(negotiation_id) > 0 {
            return false;
        }
        self.sessions.write().await.remove(negotiation_id);
        self.bus.close_session(negotiation_id);
        true
    }
}
