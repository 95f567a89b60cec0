//! Agent registry: who exists, which scenes they belong to, and the vectors
//! the resonance stage matches against.
//!
//! Each registered agent carries its own [`ProfileSource`] — the engine
//! never reaches for a global profile map, which is what makes the
//! anti-fabrication rule enforceable at the call site. Vectors come from a
//! precomputed archive when one is loaded at startup, and are computed
//! lazily on first use otherwise.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::accord::encoder::Encoder;
use crate::accord::errors::AccordError;
use crate::accord::models::{AgentIdentity, SourceType, Vector};
use crate::accord::profile::{profile_to_text, ProfileSource};
use crate::accord::skills::ReflectionSkill;
use crate::accord::vectors::VectorArchive;

/// Scope selectors understood by [`AgentRegistry::scope_agent_ids`].
pub const SCOPE_ALL: &str = "all";
pub const SCOPE_SCENE_PREFIX: &str = "scene:";

#[derive(Clone)]
struct AgentEntry {
    identity: AgentIdentity,
    profile_source: Arc<dyn ProfileSource>,
    scene_ids: HashSet<String>,
    /// Inline profile data; when present it wins over a source round-trip.
    profile_data: Option<serde_json::Value>,
    vector: Option<Vector>,
}

/// Registry of all agents known to the process.
pub struct AgentRegistry {
    entries: RwLock<HashMap<String, AgentEntry>>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register an agent. Registration replaces any previous entry with the
    /// same id; identity is otherwise immutable.
    pub async fn register_agent(
        &self,
        agent_id: impl Into<String>,
        profile_source: Arc<dyn ProfileSource>,
        source_tag: SourceType,
        scene_ids: Vec<String>,
        display_name: impl Into<String>,
        profile_data: Option<serde_json::Value>,
    ) {
        let agent_id = agent_id.into();
        let entry = AgentEntry {
            identity: AgentIdentity::new(agent_id.clone(), display_name, source_tag),
            profile_source,
            scene_ids: scene_ids.into_iter().collect(),
            profile_data,
            vector: None,
        };
        self.entries.write().await.insert(agent_id, entry);
    }

    pub async fn remove_agent(&self, agent_id: &str) -> bool {
        self.entries.write().await.remove(agent_id).is_some()
    }

    pub async fn agent_count(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn all_agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Immutable identity of a registered agent.
    pub async fn identity(&self, agent_id: &str) -> Option<AgentIdentity> {
        self.entries
            .read()
            .await
            .get(agent_id)
            .map(|e| e.identity.clone())
    }

    pub async fn source_tag(&self, agent_id: &str) -> Option<SourceType> {
        self.entries
            .read()
            .await
            .get(agent_id)
            .map(|e| e.identity.source_type)
    }

    /// Attach an agent to a scene after registration.
    pub async fn connect_scene(&self, agent_id: &str, scene_id: &str) -> bool {
        match self.entries.write().await.get_mut(agent_id) {
            Some(entry) => {
                entry.scene_ids.insert(scene_id.to_string());
                true
            }
            None => false,
        }
    }

    /// Resolve a scope selector to agent ids (sorted for determinism).
    ///
    /// `"all"` selects everyone; `"scene:<id>"` selects agents tagged with
    /// that scene; other selectors are reserved and select nobody.
    pub async fn scope_agent_ids(&self, scope: &str) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut ids: Vec<String> = if scope == SCOPE_ALL {
            entries.keys().cloned().collect()
        } else if let Some(scene_id) = scope.strip_prefix(SCOPE_SCENE_PREFIX) {
            entries
                .values()
                .filter(|e| e.scene_ids.contains(scene_id))
                .map(|e| e.identity.agent_id.clone())
                .collect()
        } else {
            log::warn!("unknown scope selector '{}', selecting no agents", scope);
            Vec::new()
        };
        ids.sort();
        ids
    }

    /// Display names for the given scope; the engine falls back to the
    /// agent id for anyone missing.
    pub async fn display_names(&self, scope: &str) -> HashMap<String, String> {
        let ids = self.scope_agent_ids(scope).await;
        let entries = self.entries.read().await;
        ids.into_iter()
            .filter_map(|id| {
                entries
                    .get(&id)
                    .map(|e| (id.clone(), e.identity.display_name.clone()))
            })
            .collect()
    }

    pub async fn profile_source(&self, agent_id: &str) -> Option<Arc<dyn ProfileSource>> {
        self.entries
            .read()
            .await
            .get(agent_id)
            .map(|e| e.profile_source.clone())
    }

    /// The agent's profile document: the inline copy when present, else a
    /// round-trip through its profile source.
    pub async fn get_profile(&self, agent_id: &str) -> Result<serde_json::Value, AccordError> {
        let (inline, source) = {
            let entries = self.entries.read().await;
            let entry = entries.get(agent_id).ok_or_else(|| {
                AccordError::engine(format!("unknown agent: {}", agent_id))
            })?;
            (entry.profile_data.clone(), entry.profile_source.clone())
        };
        match inline {
            Some(profile) => Ok(profile),
            None => source.get_profile(agent_id).await,
        }
    }

    /// Adopt precomputed vectors from an archive. The archive dimension
    /// must match the live encoder's dimension.
    pub async fn load_vector_archive(
        &self,
        archive: &VectorArchive,
        expected_dim: usize,
    ) -> Result<usize, AccordError> {
        if archive.dim != expected_dim {
            return Err(AccordError::config(format!(
                "vector archive dim {} does not match encoder dim {}",
                archive.dim, expected_dim
            )));
        }
        let mut entries = self.entries.write().await;
        let mut adopted = 0;
        for (agent_id, vector) in &archive.vectors {
            if let Some(entry) = entries.get_mut(agent_id) {
                entry.vector = Some(vector.clone());
                adopted += 1;
            }
        }
        log::info!(
            "adopted {} precomputed vector(s) out of {} archive entries",
            adopted,
            archive.vectors.len()
        );
        Ok(adopted)
    }

    /// Candidate vectors for a scope, computing and caching any that are
    /// missing. A reflection skill, when provided, distills the profile into
    /// feature strings before encoding; otherwise the raw profile text
    /// projection is encoded. Per-agent failures are absorbed: the agent is
    /// skipped with a warning rather than failing the whole selection.
    pub async fn agent_vectors(
        &self,
        scope: &str,
        encoder: &dyn Encoder,
        reflection: Option<&ReflectionSkill>,
    ) -> HashMap<String, Vector> {
        let ids = self.scope_agent_ids(scope).await;
        let mut vectors = HashMap::with_capacity(ids.len());
        let mut missing: Vec<String> = Vec::new();
        {
            let entries = self.entries.read().await;
            for id in &ids {
                match entries.get(id).and_then(|e| e.vector.clone()) {
                    Some(vector) => {
                        vectors.insert(id.clone(), vector);
                    }
                    None => missing.push(id.clone()),
                }
            }
        }

        for agent_id in missing {
            match self.compute_vector(&agent_id, encoder, reflection).await {
                Ok(vector) => {
                    if let Some(entry) = self.entries.write().await.get_mut(&agent_id) {
                        entry.vector = Some(vector.clone());
                    }
                    vectors.insert(agent_id, vector);
                }
                Err(e) => {
                    log::warn!("skipping agent {} in resonance: {}", agent_id, e);
                }
            }
        }
        vectors
    }

    async fn compute_vector(
        &self,
        agent_id: &str,
        encoder: &dyn Encoder,
        reflection: Option<&ReflectionSkill>,
    ) -> Result<Vector, AccordError> {
        let profile = self.get_profile(agent_id).await?;
        let text = match reflection {
            Some(skill) => {
                let source = self
                    .profile_source(agent_id)
                    .await
                    .ok_or_else(|| AccordError::engine(format!("unknown agent: {}", agent_id)))?;
                match skill.execute(agent_id, Some(&profile), source.as_ref()).await {
                    Ok(result) => result.features.join(" "),
                    Err(e) => {
                        // Reflection is best-effort; fall back to the raw
                        // profile projection.
                        log::warn!("reflection failed for {}: {}", agent_id, e);
                        profile_to_text(agent_id, &profile)
                    }
                }
            }
            None => profile_to_text(agent_id, &profile),
        };
        encoder.encode(&text).await
    }
}

/// [`ProfileSource`] view over the registry: every call routes to the
/// target agent's own registered source, so a caller holding this adapter
/// still only ever reaches one agent's data per request.
pub struct RegistryProfileSource {
    registry: Arc<AgentRegistry>,
}

impl RegistryProfileSource {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait::async_trait]
impl ProfileSource for RegistryProfileSource {
    async fn get_profile(&self, agent_id: &str) -> Result<serde_json::Value, AccordError> {
        self.registry.get_profile(agent_id).await
    }

    async fn chat(
        &self,
        agent_id: &str,
        messages: &[crate::accord::reasoning::Message],
        system_prompt: Option<&str>,
    ) -> Result<String, AccordError> {
        let source = self.registry.profile_source(agent_id).await.ok_or_else(|| {
            AccordError::adapter(format!("unknown agent: {}", agent_id))
        })?;
        source.chat(agent_id, messages, system_prompt).await
    }
}
