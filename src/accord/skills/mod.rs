//! The capability layer: skills that provide intelligence via LLM calls.
//!
//! The engine provides determinism through code control; skills provide
//! judgment through prompts. Every skill follows the same contract:
//!
//! 1. validate required inputs (descriptive [`AccordError`] otherwise),
//! 2. assemble a system prompt and user messages purely from its inputs,
//! 3. call the LLM — client-side skills through a
//!    [`ProfileSource`](crate::profile::ProfileSource), platform-side skills
//!    through a [`ReasoningClient`](crate::reasoning::ReasoningClient),
//! 4. validate the output leniently (strip code fences, fall back to
//!    treating the whole body as the primary text field) but reject LLM
//!    error-pattern strings outright,
//! 5. return a typed result with numeric fields clamped and list fields
//!    defaulted.
//!
//! Skills are independent structs; the engine bundles the ones it needs into
//! its per-call dependency set.

pub mod coordinator;
pub mod formulation;
pub mod gap_recursion;
pub mod offer;
pub mod reflection;
pub mod sub_negotiation;

pub use coordinator::{CoordinatorContext, CoordinatorDecision, CoordinatorSkill};
pub use formulation::{Enrichments, FormulationResult, FormulationSkill};
pub use gap_recursion::{GapRecursionResult, GapRecursionSkill};
pub use offer::{OfferResult, OfferSkill};
pub use reflection::{ReflectionResult, ReflectionSkill};
pub use sub_negotiation::{DiscoveryReport, PartySummary, SubNegotiationSkill};

use crate::accord::errors::AccordError;

/// Common identity surface of every skill.
pub trait Skill {
    /// Stable skill identifier (e.g. `"offer_generation"`).
    fn name(&self) -> &'static str;
}

/// Strip markdown code fences (```json ... ```) from LLM output.
///
/// Real LLMs frequently wrap JSON in fences even when told not to; the code
/// guarantee has to hold regardless of the prompt.
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let stripped = text.trim();
    if !stripped.starts_with("```") {
        return stripped;
    }
    let without_close = match stripped.strip_suffix("```") {
        Some(body) => body,
        None => return stripped,
    };
    // Drop the opening fence line ("```" or "```json").
    match without_close.split_once('\n') {
        Some((_, rest)) => rest.trim(),
        None => stripped,
    }
}

/// Phrases that mark a reply as an upstream failure rather than content.
const LLM_ERROR_PATTERNS: &[&str] = &[
    "rate limit",
    "rate-limit",
    "too many requests",
    "quota exceeded",
    "service unavailable",
    "api error",
    "internal server error",
    "i cannot fulfill",
    "i can't fulfill",
    "i cannot assist with",
    "as an ai assistant",
    "as an ai language model",
];

/// Detect rate-limit and refusal phrasings so they surface as skill errors
/// instead of leaking into negotiation content.
pub(crate) fn matches_llm_error_pattern(text: &str) -> bool {
    let lowered = text.to_lowercase();
    LLM_ERROR_PATTERNS.iter().any(|p| lowered.contains(p))
}

/// Reject error-pattern output; the message keeps a short excerpt for logs.
pub(crate) fn reject_llm_errors(skill: &str, raw_output: &str) -> Result<(), AccordError> {
    if matches_llm_error_pattern(raw_output) {
        let excerpt: String = raw_output.chars().take(120).collect();
        return Err(AccordError::skill(format!("LLM returned error: {}", excerpt)).with_skill(skill));
    }
    Ok(())
}

/// Clamp a JSON confidence-like value to `[0, 1]`, defaulting to 0.5 when
/// absent or non-numeric.
pub(crate) fn clamp_confidence(value: Option<&serde_json::Value>) -> f32 {
    let confidence = value.and_then(|v| v.as_f64()).unwrap_or(0.5) as f32;
    confidence.clamp(0.0, 1.0)
}

/// Pull a list of strings out of a JSON field, defaulting to empty.
pub(crate) fn string_list(value: Option<&serde_json::Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .map(|item| match item {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fence_json() {
        let fenced = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fence(fenced), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_code_fence_bare() {
        let fenced = "```\nplain body\n```";
        assert_eq!(strip_code_fence(fenced), "plain body");
    }

    #[test]
    fn test_strip_code_fence_passthrough() {
        assert_eq!(strip_code_fence("  no fences here "), "no fences here");
    }

    #[test]
    fn test_error_patterns() {
        assert!(matches_llm_error_pattern(
            "Rate limit exceeded. Please try again later."
        ));
        assert!(matches_llm_error_pattern(
            "I cannot fulfill this request as an AI assistant."
        ));
        assert!(!matches_llm_error_pattern(
            "I can build the rate limiter you asked about."
        ));
    }

    #[test]
    fn test_clamp_confidence() {
        let five = serde_json::json!(5.0);
        let neg = serde_json::json!(-1.0);
        let text = serde_json::json!("high");
        assert_eq!(clamp_confidence(Some(&five)), 1.0);
        assert_eq!(clamp_confidence(Some(&neg)), 0.0);
        assert_eq!(clamp_confidence(Some(&text)), 0.5);
        assert_eq!(clamp_confidence(None), 0.5);
    }

    #[test]
    fn test_string_list_defaults_empty() {
        let mixed = serde_json::json!(["a", 2, true]);
        assert_eq!(string_list(Some(&mixed)), vec!["a", "2", "true"]);
        assert!(string_list(None).is_empty());
        let not_list = serde_json::json!("x");
        assert!(string_list(Some(&not_list)).is_empty());
    }
}
