//! Profile reflection: extracting encodable capability features.
//!
//! Client-side skill used when an agent has no precomputed vector: it asks
//! the agent's own model to distill the profile into short feature strings,
//! which the registry then encodes and superposes into the agent's vector.

use crate::accord::errors::AccordError;
use crate::accord::profile::ProfileSource;
use crate::accord::reasoning::Message;
use crate::accord::skills::{reject_llm_errors, strip_code_fence, string_list, Skill};

const SYSTEM_PROMPT: &str = "\
You are a profile analyst. Your task is to extract the key capability features \
from an agent's profile data for encoding into a searchable vector representation.

Rules:
1. Each feature should be a short, self-contained description (1-2 sentences max).
2. Cover different dimensions: skills, experience, domain knowledge, soft skills.
3. Be specific - \"3 years of React development\" beats \"frontend skills\".
4. Do not invent or embellish - only describe what's in the profile.

Output in JSON format:
{\"features\": [\"feature 1\", \"feature 2\"]}";

/// Validated output of the reflection skill.
#[derive(Debug, Clone)]
pub struct ReflectionResult {
    pub features: Vec<String>,
}

/// Extracts text features from an agent's profile for vector encoding.
#[derive(Debug, Clone, Default)]
pub struct ReflectionSkill;

impl Skill for ReflectionSkill {
    fn name(&self) -> &'static str {
        "reflection_selector"
    }
}

impl ReflectionSkill {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute(
        &self,
        agent_id: &str,
        profile_data: Option<&serde_json::Value>,
        adapter: &dyn ProfileSource,
    ) -> Result<ReflectionResult, AccordError> {
        if agent_id.trim().is_empty() {
            return Err(AccordError::skill("agent_id is required").with_skill(self.name()));
        }

        let profile = match profile_data {
            Some(profile) => profile.clone(),
            None => adapter.get_profile(agent_id).await?,
        };

        let profile_str = serde_json::to_string_pretty(&profile)
            .unwrap_or_else(|_| "(no profile data)".to_string());
        let messages = vec![Message::user(format!(
            "Extract capability features from this profile:\n{}",
            profile_str
        ))];

        let raw_output = adapter
            .chat(agent_id, &messages, Some(SYSTEM_PROMPT))
            .await?;
        self.validate_output(&raw_output)
    }

    fn validate_output(&self, raw_output: &str) -> Result<ReflectionResult, AccordError> {
        reject_llm_errors(self.name(), raw_output)?;
        let cleaned = strip_code_fence(raw_output);

        let features: Vec<String> = match serde_json::from_str::<serde_json::Value>(cleaned) {
            Ok(parsed) => string_list(parsed.get("features")),
            // Lenient: split by lines, strip bullet markers.
            Err(_) => cleaned
                .lines()
                .map(|line| line.trim().trim_start_matches('-').trim().to_string())
                .filter(|line| !line.is_empty())
                .collect(),
        };

        if features.is_empty() {
            return Err(AccordError::skill("reflection_selector: no features extracted")
                .with_skill(self.name()));
        }

        Ok(ReflectionResult { features })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct ScriptedSource {
        response: String,
    }

    #[async_trait]
    impl ProfileSource for ScriptedSource {
        async fn get_profile(&self, _agent_id: &str) -> Result<serde_json::Value, AccordError> {
            Ok(serde_json::json!({"skills": ["python"]}))
        }

        async fn chat(
            &self,
            _agent_id: &str,
            _messages: &[Message],
            _system_prompt: Option<&str>,
        ) -> Result<String, AccordError> {
            Ok(self.response.clone())
        }
    }

    #[tokio::test]
    async fn test_json_features_parsed() {
        let source = ScriptedSource {
            response: serde_json::json!({
                "features": ["3 years of React development", "led a data platform team"]
            })
            .to_string(),
        };
        let result = ReflectionSkill::new()
            .execute("agent_alice", None, &source)
            .await
            .unwrap();
        assert_eq!(result.features.len(), 2);
    }

    #[tokio::test]
    async fn test_line_split_fallback() {
        let source = ScriptedSource {
            response: "- python and ML\n- startup experience\n\n- public speaking".to_string(),
        };
        let result = ReflectionSkill::new()
            .execute("agent_alice", None, &source)
            .await
            .unwrap();
        assert_eq!(
            result.features,
            vec!["python and ML", "startup experience", "public speaking"]
        );
    }

    #[tokio::test]
    async fn test_no_features_rejected() {
        let source = ScriptedSource {
            response: serde_json::json!({"features": []}).to_string(),
        };
        let err = ReflectionSkill::new()
            .execute("agent_alice", None, &source)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no features extracted"));
    }
}
