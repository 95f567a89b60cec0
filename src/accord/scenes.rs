//! Scene registration and lookup.
//!
//! A scene is a lens, not a boundary: it scopes which agents a negotiation
//! may activate and injects domain context into the coordinator prompt.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// A registered scene.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneDefinition {
    pub scene_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// What capabilities or traits this scene prioritizes.
    #[serde(default)]
    pub priority_strategy: String,
    /// Background knowledge injected into the coordinator prompt.
    #[serde(default)]
    pub domain_context: String,
    /// Who registered the scene (application name or developer).
    #[serde(default)]
    pub created_by: String,
    /// Number of agents connected to this scene.
    #[serde(default)]
    pub agent_count: usize,
}

impl SceneDefinition {
    pub fn new(scene_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scene_id: scene_id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Render the context fragment injected into the coordinator's system
    /// prompt.
    pub fn to_coordinator_context(&self) -> String {
        let mut parts = Vec::new();
        if !self.name.is_empty() {
            parts.push(format!("Current scene: {}", self.name));
        }
        if !self.description.is_empty() {
            parts.push(format!("Scene description: {}", self.description));
        }
        if !self.priority_strategy.is_empty() {
            parts.push(format!("Priority strategy: {}", self.priority_strategy));
        }
        if !self.domain_context.is_empty() {
            parts.push(format!("Domain context: {}", self.domain_context));
        }
        parts.join("\n")
    }
}

/// Registry of all known scenes. Read-mostly; writes are serialized behind
/// the lock.
pub struct SceneRegistry {
    scenes: RwLock<HashMap<String, SceneDefinition>>,
}

impl Default for SceneRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneRegistry {
    pub fn new() -> Self {
        Self {
            scenes: RwLock::new(HashMap::new()),
        }
    }

    /// Register or update a scene.
    pub fn register(&self, scene: SceneDefinition) {
        log::info!("registering scene {} ({})", scene.scene_id, scene.name);
        self.scenes
            .write()
            .unwrap()
            .insert(scene.scene_id.clone(), scene);
    }

    pub fn unregister(&self, scene_id: &str) -> bool {
        self.scenes.write().unwrap().remove(scene_id).is_some()
    }

    pub fn get(&self, scene_id: &str) -> Option<SceneDefinition> {
        self.scenes.read().unwrap().get(scene_id).cloned()
    }

    pub fn list(&self) -> Vec<SceneDefinition> {
        self.scenes.read().unwrap().values().cloned().collect()
    }

    /// Scene context for injection into a negotiation; empty string for an
    /// unknown scene.
    pub fn coordinator_context(&self, scene_id: &str) -> String {
        self.get(scene_id)
            .map(|s| s.to_coordinator_context())
            .unwrap_or_default()
    }

    pub fn increment_agent_count(&self, scene_id: &str) {
        if let Some(scene) = self.scenes.write().unwrap().get_mut(scene_id) {
            scene.agent_count += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hackathon() -> SceneDefinition {
        SceneDefinition {
            scene_id: "s1_hackathon".to_string(),
            name: "Hackathon".to_string(),
            description: "48-hour team formation".to_string(),
            priority_strategy: "shipping speed over polish".to_string(),
            domain_context: "Teams need complementary build skills.".to_string(),
            created_by: "s1_app".to_string(),
            agent_count: 0,
        }
    }

    #[test]
    fn test_register_and_get() {
        let registry = SceneRegistry::new();
        registry.register(hackathon());
        let scene = registry.get("s1_hackathon").unwrap();
        assert_eq!(scene.name, "Hackathon");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_coordinator_context_rendering() {
        let context = hackathon().to_coordinator_context();
        assert!(context.contains("Current scene: Hackathon"));
        assert!(context.contains("Priority strategy: shipping speed over polish"));
        assert!(context.contains("Domain context: Teams need complementary build skills."));
    }

    #[test]
    fn test_unknown_scene_context_is_empty() {
        let registry = SceneRegistry::new();
        assert_eq!(registry.coordinator_context("nope"), "");
    }

    #[test]
    fn test_increment_agent_count() {
        let registry = SceneRegistry::new();
        registry.register(hackathon());
        registry.increment_agent_count("s1_hackathon");
        registry.increment_agent_count("s1_hackathon");
        assert_eq!(registry.get("s1_hackathon").unwrap().agent_count, 2);
    }

    #[test]
    fn test_unregister() {
        let registry = SceneRegistry::new();
        registry.register(hackathon());
        assert!(registry.unregister("s1_hackathon"));
        assert!(!registry.unregister("s1_hackathon"));
    }
}
