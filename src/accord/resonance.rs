//! Resonance detection: ranking agents against a demand vector.
//!
//! Scores every candidate agent by cosine similarity against the demand
//! vector, partitions by a minimum score, and truncates the activated
//! partition to `k_star`. Both partitions come back so callers can surface
//! filtered agents to telemetry.

use std::collections::HashMap;

use crate::accord::models::Vector;

const EPSILON: f32 = 1e-10;

/// A scored agent: `(agent_id, resonance score)`.
pub type ScoredAgent = (String, f32);

/// Result of one detection pass.
#[derive(Debug, Clone)]
pub struct ResonanceResult {
    /// Agents with score >= min_score, best first, at most `k_star`.
    pub activated: Vec<ScoredAgent>,
    /// Agents below the threshold, best first.
    pub filtered: Vec<ScoredAgent>,
}

/// Cosine-similarity ranking of agent vectors against a demand vector.
#[derive(Debug, Clone, Default)]
pub struct ResonanceDetector;

impl ResonanceDetector {
    pub fn new() -> Self {
        Self
    }

    /// Score, partition by `min_score`, sort descending (ties broken by
    /// ascending agent id), and truncate the activated set to `k_star`.
    pub fn detect(
        &self,
        demand_vector: &[f32],
        agent_vectors: &HashMap<String, Vector>,
        k_star: usize,
        min_score: f32,
    ) -> ResonanceResult {
        let mut activated: Vec<ScoredAgent> = Vec::new();
        let mut filtered: Vec<ScoredAgent> = Vec::new();

        for (agent_id, vector) in agent_vectors {
            let score = Self::cosine(demand_vector, vector);
            if score >= min_score {
                activated.push((agent_id.clone(), score));
            } else {
                filtered.push((agent_id.clone(), score));
            }
        }

        Self::sort_ranked(&mut activated);
        Self::sort_ranked(&mut filtered);
        activated.truncate(k_star);

        ResonanceResult {
            activated,
            filtered,
        }
    }

    /// Inner product over the product of norms, with a small epsilon so a
    /// degenerate zero vector scores 0 instead of dividing by zero.
    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        dot / (norm_a * norm_b + EPSILON)
    }

    /// Descending by score; deterministic tie-break on ascending agent id.
    fn sort_ranked(ranked: &mut Vec<ScoredAgent>) {
        ranked.sort_by(|(id_a, score_a), (id_b, score_b)| {
            score_b
                .partial_cmp(score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| id_a.cmp(id_b))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vectors(entries: &[(&str, Vec<f32>)]) -> HashMap<String, Vector> {
        entries
            .iter()
            .map(|(id, v)| (id.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_ranking_descends_by_score() {
        let detector = ResonanceDetector::new();
        let agents = vectors(&[
            ("bob", vec![0.7, 0.7]),
            ("alice", vec![1.0, 0.0]),
            ("carol", vec![0.0, 1.0]),
        ]);
        let result = detector.detect(&[1.0, 0.0], &agents, 10, -1.0);
        let ids: Vec<&str> = result.activated.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["alice", "bob", "carol"]);
        assert!(result.filtered.is_empty());
    }

    #[test]
    fn test_min_score_partitions() {
        let detector = ResonanceDetector::new();
        let agents = vectors(&[
            ("alice", vec![1.0, 0.0]),
            ("carol", vec![-1.0, 0.0]),
        ]);
        let result = detector.detect(&[1.0, 0.0], &agents, 10, 0.5);
        assert_eq!(result.activated.len(), 1);
        assert_eq!(result.activated[0].0, "alice");
        assert_eq!(result.filtered.len(), 1);
        assert_eq!(result.filtered[0].0, "carol");
    }

    #[test]
    fn test_k_star_truncates_after_sort() {
        let detector = ResonanceDetector::new();
        let agents = vectors(&[
            ("low", vec![0.1, 0.9]),
            ("high", vec![1.0, 0.0]),
            ("mid", vec![0.8, 0.2]),
        ]);
        let result = detector.detect(&[1.0, 0.0], &agents, 2, -1.0);
        assert_eq!(result.activated.len(), 2);
        assert_eq!(result.activated[0].0, "high");
        assert_eq!(result.activated[1].0, "mid");
    }

    #[test]
    fn test_tie_break_is_lexicographic() {
        let detector = ResonanceDetector::new();
        let agents = vectors(&[
            ("zed", vec![1.0, 0.0]),
            ("amy", vec![1.0, 0.0]),
            ("kim", vec![1.0, 0.0]),
        ]);
        let result = detector.detect(&[1.0, 0.0], &agents, 10, 0.0);
        let ids: Vec<&str> = result.activated.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["amy", "kim", "zed"]);
    }

    #[test]
    fn test_zero_vector_scores_zero() {
        let detector = ResonanceDetector::new();
        let agents = vectors(&[("ghost", vec![0.0, 0.0])]);
        let result = detector.detect(&[1.0, 0.0], &agents, 10, 0.5);
        assert!(result.activated.is_empty());
        assert_eq!(result.filtered[0].1, 0.0);
    }

    #[test]
    fn test_k_star_zero_activates_nobody() {
        let detector = ResonanceDetector::new();
        let agents = vectors(&[("alice", vec![1.0, 0.0])]);
        let result = detector.detect(&[1.0, 0.0], &agents, 0, 0.0);
        assert!(result.activated.is_empty());
    }
}
