//! Engine configuration: every recognised knob with its default

use serde::{Deserialize, Serialize};

use crate::types::Versions;

/// Weights for the seed-relative relevance score.
///
/// The four-component form is canonical; callers may override per run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FinalScoreWeights {
    pub vector_similarity: f64,
    pub serp_overlap: f64,
    pub intent_match: f64,
    pub concept_overlap: f64,
}

impl Default for FinalScoreWeights {
    fn default() -> Self {
        Self {
            vector_similarity: 0.40,
            serp_overlap: 0.30,
            intent_match: 0.15,
            concept_overlap: 0.15,
        }
    }
}

/// Global budgets for one run. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunBudgets {
    pub max_adapter_calls: Option<u32>,
    pub max_llm_tokens: Option<u64>,
    pub run_deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Top-K size of the related-queries list.
    pub target_count: usize,
    /// Hard cap on the merged candidate pool.
    pub candidate_pool_max: usize,
    /// Per-source candidate fetch limit.
    pub per_source_limit: usize,
    pub mmr_lambda: f64,
    pub max_same_per_facet: usize,
    pub max_near_duplicate: usize,
    /// Similarity above which two selections count as near-duplicates.
    pub near_duplicate_threshold: f64,
    pub min_synapse_strength: f64,
    pub min_confidence: f64,
    pub min_pass_ratio: f64,
    pub intent_extraction_retry_max: usize,
    /// Ceiling on LLM classification calls per run.
    pub classification_budget: usize,
    /// In-flight operations per batched stage.
    pub adapter_concurrency: usize,
    pub adapter_timeout_ms: u64,
    pub llm_timeout_ms: u64,
    pub budgets: RunBudgets,
    pub final_score_weights: FinalScoreWeights,
    pub taxonomy_version: String,
    pub versions: Versions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_count: 50,
            candidate_pool_max: 800,
            per_source_limit: 200,
            mmr_lambda: 0.75,
            max_same_per_facet: 12,
            max_near_duplicate: 5,
            near_duplicate_threshold: 0.9,
            min_synapse_strength: 0.30,
            min_confidence: 0.60,
            min_pass_ratio: 0.70,
            intent_extraction_retry_max: 3,
            classification_budget: 200,
            adapter_concurrency: 8,
            adapter_timeout_ms: 45_000,
            llm_timeout_ms: 60_000,
            budgets: RunBudgets::default(),
            final_score_weights: FinalScoreWeights::default(),
            taxonomy_version: "taxonomy-v1".to_string(),
            versions: Versions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_knobs() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.target_count, 50);
        assert_eq!(cfg.candidate_pool_max, 800);
        assert!((cfg.mmr_lambda - 0.75).abs() < f64::EPSILON);
        assert_eq!(cfg.max_same_per_facet, 12);
        assert_eq!(cfg.max_near_duplicate, 5);
        assert!((cfg.min_synapse_strength - 0.30).abs() < f64::EPSILON);
        assert!((cfg.min_confidence - 0.60).abs() < f64::EPSILON);
        assert!((cfg.min_pass_ratio - 0.70).abs() < f64::EPSILON);
        assert_eq!(cfg.intent_extraction_retry_max, 3);
        assert_eq!(cfg.classification_budget, 200);
        assert_eq!(cfg.adapter_concurrency, 8);
    }

    #[test]
    fn final_score_weights_sum_to_one() {
        let w = FinalScoreWeights::default();
        let sum = w.vector_similarity + w.serp_overlap + w.intent_match + w.concept_overlap;
        assert!((sum - 1.0).abs() < 1e-9);
    }
}
