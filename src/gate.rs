//! Validation gate: annotate low-confidence runs after extraction
//!
//! The gate never aborts a run. It computes the fraction of nodes whose
//! overall signature confidence clears the threshold and flags the run
//! when too few do.

use crate::config::EngineConfig;
use crate::error::{RunWarning, Stage};
use crate::types::Node;

#[derive(Debug, Clone, PartialEq)]
pub struct GateReport {
    pub pass_ratio: f64,
    pub low_confidence: bool,
    pub warnings: Vec<RunWarning>,
}

/// Check per-node confidence against `min_confidence` and the pass ratio
/// against `min_pass_ratio`.
pub fn check(nodes: &[Node], config: &EngineConfig) -> GateReport {
    if nodes.is_empty() {
        return GateReport {
            pass_ratio: 0.0,
            low_confidence: true,
            warnings: vec![RunWarning::stage_level(
                Stage::Extract,
                "no nodes survived extraction",
            )],
        };
    }

    let passing = nodes
        .iter()
        .filter(|n| n.signature.confidence_by_field.overall >= config.min_confidence)
        .count();
    let pass_ratio = passing as f64 / nodes.len() as f64;
    let low_confidence = pass_ratio < config.min_pass_ratio;

    let mut warnings = Vec::new();
    if low_confidence {
        warnings.push(RunWarning::stage_level(
            Stage::Extract,
            format!(
                "only {:.0}% of nodes reached confidence {:.2} (threshold {:.0}%)",
                pass_ratio * 100.0,
                config.min_confidence,
                config.min_pass_ratio * 100.0
            ),
        ));
    }

    GateReport { pass_ratio, low_confidence, warnings }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::Taxonomy;
    use crate::types::{
        CandidateSource, ConfidenceByField, IntentSignature, Phrase, Provenance, SerpProfile,
        SerpSource,
    };

    fn node_with_confidence(text: &str, overall: f64) -> Node {
        let phrase = Phrase::new(text, "sv", "se");
        let taxonomy = Taxonomy::default_for_market("se");
        Node {
            id: phrase.id(),
            phrase: phrase.clone(),
            sources: vec![CandidateSource::AhrefsRelated],
            signature: IntentSignature {
                confidence_by_field: ConfidenceByField { overall, ..Default::default() },
                vector_fingerprint: vec![0.0; taxonomy.len()],
                ..Default::default()
            },
            serp: SerpProfile {
                query: phrase.text,
                market: "se".into(),
                fetched_at: 0,
                source: SerpSource::OfflineSynthetic,
                results: vec![],
                intent_distribution: Default::default(),
                perspective_distribution: Default::default(),
                page_type_distribution: Default::default(),
            },
            provenance: Provenance { source: "test".into(), observed_at: 0, model: None },
        }
    }

    #[test]
    fn passes_when_enough_nodes_clear_threshold() {
        let config = EngineConfig::default();
        let nodes: Vec<Node> = (0..10)
            .map(|i| node_with_confidence(&format!("n{i}"), if i < 8 { 0.8 } else { 0.3 }))
            .collect();
        let report = check(&nodes, &config);
        assert!(!report.low_confidence);
        assert!((report.pass_ratio - 0.8).abs() < 1e-9);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn flags_low_confidence_without_aborting() {
        let config = EngineConfig::default();
        let nodes: Vec<Node> = (0..10)
            .map(|i| node_with_confidence(&format!("n{i}"), if i < 3 { 0.8 } else { 0.3 }))
            .collect();
        let report = check(&nodes, &config);
        assert!(report.low_confidence);
        assert_eq!(report.warnings.len(), 1);
    }
}
