//! HTTP and WebSocket facade over the engine.
//!
//! A thin axum router exposing the negotiation lifecycle; only available
//! with the `http-server` feature. The facade owns no negotiation logic:
//! it assembles the per-call [`EngineDeps`] from the registries, spawns the
//! engine task, and serves reads out of the session store.
//!
//! Routes:
//! - `POST /api/negotiate` — create a negotiation
//! - `GET /api/negotiate/{id}` — session snapshot
//! - `POST /api/negotiate/{id}/confirm` — complete the formulation gate
//! - `GET /api/agents?scope=…` — enumerate agents
//! - `GET /api/scenes`, `POST /api/scenes/register`,
//!   `POST /api/scenes/{id}/connect` — scene lifecycle
//! - `WS /ws/{id}` — replay event history, then stream live events
//!   (close code 4004 for an unknown negotiation id)

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use subtle::ConstantTimeEq;

use crate::accord::config::AccordConfig;
use crate::accord::encoder::Encoder;
use crate::accord::engine::{EngineDeps, NegotiationEngine};
use crate::accord::models::{DemandSnapshot, NegotiationSession};
use crate::accord::profile::ProfileSource;
use crate::accord::reasoning::ReasoningClient;
use crate::accord::registry::{AgentRegistry, RegistryProfileSource};
use crate::accord::scenes::{SceneDefinition, SceneRegistry};
use crate::accord::session_store::{ConfirmOutcome, SessionStore};

/// Close code sent when the negotiation id is unknown.
const CLOSE_UNKNOWN_NEGOTIATION: u16 = 4004;

/// Shared state behind the router.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SessionStore>,
    pub engine: Arc<NegotiationEngine>,
    pub registry: Arc<AgentRegistry>,
    pub scenes: Arc<SceneRegistry>,
    pub reasoning_client: Arc<dyn ReasoningClient>,
    pub encoder: Arc<dyn Encoder>,
    pub config: AccordConfig,
    pub k_star: usize,
    pub min_score: f32,
}

impl AppState {
    pub fn new(
        registry: Arc<AgentRegistry>,
        scenes: Arc<SceneRegistry>,
        reasoning_client: Arc<dyn ReasoningClient>,
        encoder: Arc<dyn Encoder>,
        config: AccordConfig,
    ) -> Self {
        let store = Arc::new(SessionStore::new());
        let engine = Arc::new(NegotiationEngine::new(store.clone()));
        Self {
            store,
            engine,
            registry,
            scenes,
            reasoning_client,
            encoder,
            config,
            k_star: 5,
            min_score: 0.0,
        }
    }
}

/// Adopt the precomputed vector archive named by `ACCORD_VECTORS_PATH`,
/// when one is configured. Returns how many agents received a vector.
pub async fn bootstrap_vectors(state: &AppState) -> Result<usize, crate::accord::errors::AccordError> {
    let path = match &state.config.vectors_path {
        Some(path) => path,
        None => return Ok(0),
    };
    let archive = crate::accord::vectors::load_archive(path)?;
    state
        .registry
        .load_vector_archive(&archive, state.encoder.dim())
        .await
}

/// Constant-time bearer check; a facade without a configured token accepts
/// every request.
fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let expected = match &state.config.bearer_token {
        Some(token) => token,
        None => return true,
    };
    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/negotiate", post(create_negotiation))
        .route("/api/negotiate/{id}", get(get_negotiation))
        .route("/api/negotiate/{id}/confirm", post(confirm_negotiation))
        .route("/api/agents", get(list_agents))
        .route("/api/scenes", get(list_scenes))
        .route("/api/scenes/register", post(register_scene))
        .route("/api/scenes/{id}/connect", post(connect_scene))
        .route("/ws/{id}", get(event_stream))
        .with_state(state)
}

/// Bind and serve until the listener fails.
pub async fn serve(state: AppState, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("accord facade listening on {}", addr);
    axum::serve(listener, router(state)).await
}

#[derive(Debug, Deserialize)]
struct NegotiateRequest {
    intent: String,
    user_id: String,
    #[serde(default)]
    scope: Option<String>,
}

async fn create_negotiation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<NegotiateRequest>,
) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if body.intent.trim().is_empty() || body.user_id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "intent and user_id are required"})),
        )
            .into_response();
    }

    let scope = body
        .scope
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| state.config.scope_default.clone());

    let agent_vectors = state
        .registry
        .agent_vectors(&scope, state.encoder.as_ref(), None)
        .await;
    let display_names = state.registry.display_names(&scope).await;
    let agent_count = agent_vectors.len();

    let scene_context = scope
        .strip_prefix("scene:")
        .map(|scene_id| state.scenes.coordinator_context(scene_id))
        .filter(|context| !context.is_empty());

    let session = NegotiationSession::new(DemandSnapshot::new(
        body.intent.clone(),
        body.user_id.clone(),
        scope.clone(),
    ));
    let negotiation_id = session.negotiation_id.clone();
    let handle = state.store.insert(session).await;

    let profile_source: Arc<dyn ProfileSource> =
        Arc::new(RegistryProfileSource::new(state.registry.clone()));
    let mut deps = EngineDeps::new(
        profile_source,
        state.reasoning_client.clone(),
        state.encoder.clone(),
    )
    .with_agent_vectors(agent_vectors)
    .with_k_star(state.k_star)
    .with_min_score(state.min_score)
    .with_display_names(display_names);
    if let Some(context) = scene_context {
        deps = deps.with_scene_context(context);
    }

    let engine = state.engine.clone();
    let task_handle = handle.clone();
    let task_id = negotiation_id.clone();
    tokio::spawn(async move {
        if let Err(e) = engine.start_negotiation(task_handle, deps).await {
            log::error!("negotiation {} ended with error: {}", task_id, e);
        }
    });

    let mut response = (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "negotiation_id": negotiation_id,
            "state": "created",
            "demand_raw": body.intent,
            "scope": scope,
            "agent_count": agent_count,
        })),
    )
        .into_response();
    // Session propagation cookie, when a domain is configured.
    if let Some(domain) = &state.config.cookie_domain {
        if let Ok(value) = format!(
            "accord_uid={}; Domain={}; Path=/; SameSite=Lax",
            body.user_id, domain
        )
        .parse()
        {
            response.headers_mut().insert("set-cookie", value);
        }
    }
    response
}

async fn get_negotiation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let handle = match state.store.get(&id).await {
        Some(handle) => handle,
        None => return StatusCode::NOT_FOUND.into_response(),
    };
    let session = handle.session.lock().await;

    let mut participants = Vec::with_capacity(session.participants.len());
    for p in &session.participants {
        let source = state
            .registry
            .source_tag(&p.agent_id)
            .await
            .map(|tag| serde_json::to_value(tag).unwrap_or(serde_json::Value::Null));
        participants.push(serde_json::json!({
            "agent_id": p.agent_id,
            "display_name": p.display_name,
            "resonance_score": p.resonance_score,
            "state": p.state.as_str(),
            "offer_content": p.offer.as_ref().map(|o| o.content.clone()),
            "source": source,
        }));
    }

    Json(serde_json::json!({
        "negotiation_id": session.negotiation_id,
        "state": session.state.as_str(),
        "demand_raw": session.demand.raw_intent,
        "demand_formulated": session.demand.formulated_text,
        "participants": participants,
        "plan_output": session.plan_output,
        "plan_json": session.plan_json,
        "center_rounds": session.coordinator_rounds,
        "scope": session.demand.scope,
    }))
    .into_response()
}

#[derive(Debug, Default, Deserialize)]
struct ConfirmRequest {
    #[serde(default)]
    confirmed_text: Option<String>,
}

async fn confirm_negotiation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<ConfirmRequest>>,
) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let edited = body.and_then(|Json(b)| b.confirmed_text);
    match state.store.confirm_formulation(&id, edited).await {
        Some(ConfirmOutcome::Confirmed) => {
            Json(serde_json::json!({"status": "ok"})).into_response()
        }
        Some(ConfirmOutcome::NotAwaiting) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({"error": "not awaiting confirmation"})),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct ScopeQuery {
    #[serde(default)]
    scope: Option<String>,
}

async fn list_agents(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ScopeQuery>,
) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let scope = query
        .scope
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| state.config.scope_default.clone());
    let names = state.registry.display_names(&scope).await;
    let mut agents: Vec<serde_json::Value> = names
        .into_iter()
        .map(|(agent_id, display_name)| {
            serde_json::json!({"agent_id": agent_id, "display_name": display_name})
        })
        .collect();
    agents.sort_by_key(|a| a["agent_id"].as_str().unwrap_or_default().to_string());
    Json(serde_json::json!({"scope": scope, "count": agents.len(), "agents": agents}))
        .into_response()
}

async fn list_scenes(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let mut scenes = state.scenes.list();
    scenes.sort_by(|a, b| a.scene_id.cmp(&b.scene_id));
    Json(serde_json::json!({"scenes": scenes})).into_response()
}

async fn register_scene(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(scene): Json<SceneDefinition>,
) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if scene.scene_id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "scene_id is required"})),
        )
            .into_response();
    }
    let scene_id = scene.scene_id.clone();
    state.scenes.register(scene);
    Json(serde_json::json!({"status": "ok", "scene_id": scene_id})).into_response()
}

#[derive(Debug, Deserialize)]
struct ConnectRequest {
    agent_id: String,
}

async fn connect_scene(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ConnectRequest>,
) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if state.scenes.get(&id).is_none() {
        return StatusCode::NOT_FOUND.into_response();
    }
    if !state.registry.connect_scene(&body.agent_id, &id).await {
        return StatusCode::NOT_FOUND.into_response();
    }
    state.scenes.increment_agent_count(&id);
    Json(serde_json::json!({"status": "ok"})).into_response()
}

async fn event_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, id))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, negotiation_id: String) {
    // Snapshot-and-subscribe happens under the session lock, so the replay
    // is an exact prefix of the live stream.
    let (history, sub_handle, mut receiver) =
        match state.store.subscribe_with_replay(&negotiation_id).await {
            Some(parts) => parts,
            None => {
                let _ = socket
                    .send(WsMessage::Close(Some(CloseFrame {
                        code: CLOSE_UNKNOWN_NEGOTIATION,
                        reason: "unknown negotiation".into(),
                    })))
                    .await;
                return;
            }
        };

    for event in history {
        if let Ok(frame) = serde_json::to_string(&event) {
            if socket.send(WsMessage::Text(frame.into())).await.is_err() {
                state.store.bus().unsubscribe(&sub_handle);
                return;
            }
        }
    }

    loop {
        tokio::select! {
            event = receiver.recv() => match event {
                Some(event) => {
                    let frame = match serde_json::to_string(&event) {
                        Ok(frame) => frame,
                        Err(_) => continue,
                    };
                    if socket.send(WsMessage::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                // Engine side closed the channel (or we were dropped as a
                // slow subscriber).
                None => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(WsMessage::Close(_))) | None => break,
                // Ignore pings and client chatter.
                Some(_) => {}
            },
        }
    }

    state.store.bus().unsubscribe(&sub_handle);
    state.store.destroy_if_settled(&negotiation_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_token(token: Option<&str>) -> AppState {
        let registry = Arc::new(AgentRegistry::new());
        let scenes = Arc::new(SceneRegistry::new());
        let encoder: Arc<dyn Encoder> =
            Arc::new(crate::accord::encoder::HashedTokenEncoder::new(16));

        struct NoopClient;

        #[async_trait::async_trait]
        impl ReasoningClient for NoopClient {
            async fn chat(
                &self,
                _messages: &[crate::accord::reasoning::Message],
                _system_prompt: Option<&str>,
                _tools: Option<&[crate::accord::reasoning::ToolDefinition]>,
            ) -> Result<crate::accord::reasoning::ReasoningResponse, crate::accord::errors::AccordError>
            {
                Ok(crate::accord::reasoning::ReasoningResponse::text("ok"))
            }

            fn model_name(&self) -> &str {
                "noop"
            }
        }

        let config = AccordConfig {
            bearer_token: token.map(|t| t.to_string()),
            ..AccordConfig::default()
        };
        AppState::new(registry, scenes, Arc::new(NoopClient), encoder, config)
    }

    #[test]
    fn test_authorized_without_token() {
        let state = state_with_token(None);
        assert!(authorized(&state, &HeaderMap::new()));
    }

    #[test]
    fn test_authorized_with_token() {
        let state = state_with_token(Some("secret"));
        let mut headers = HeaderMap::new();
        assert!(!authorized(&state, &headers));

        headers.insert("authorization", "Bearer wrong".parse().unwrap());
        assert!(!authorized(&state, &headers));

        headers.insert("authorization", "Bearer secret".parse().unwrap());
        assert!(authorized(&state, &headers));
    }

    #[tokio::test]
    async fn test_router_builds() {
        let state = state_with_token(None);
        let _router = router(state);
    }
}
