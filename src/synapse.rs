//! Synapse builder: pairwise scoring, bounded LLM classification, and
//! deterministic family inference when the budget runs out

use std::collections::BTreeMap;

use crate::config::EngineConfig;
use crate::error::{RunWarning, Stage};
use crate::llm::LlmClient;
use crate::scoring::{
    self, concept_overlap, entity_overlap, intent_proximity, perspective_alignment, serp_overlap,
};
use crate::types::{
    ClassificationOrigin, ComponentBreakdown, Node, PhraseId, Synapse, SynapseFamily,
    SynapseSubtype,
};

/// Minimum SERP overlap for a pair with no shared concept to pass the gate.
const PAIR_GATE_SERP_OVERLAP: f64 = 0.1;

/// Outcome of the CLASSIFY stage.
#[derive(Debug)]
pub struct SynapseBuild {
    /// Edges ordered by (source, target).
    pub edges: Vec<Synapse>,
    /// True when the classification budget cut LLM calls short.
    pub classification_truncated: bool,
    pub llm_calls: u32,
    pub llm_tokens: u64,
    pub warnings: Vec<RunWarning>,
}

/// SCORE stage: compute pairwise component scores for every gated pair
/// and keep edges at or above the strength threshold.
///
/// Gate: the nodes share at least one canonical concept, or their SERP
/// overlap reaches 0.1. Edges involving the seed flow seed → node;
/// all other edges flow from the smaller node id. Families start as
/// deterministic inferences and are refined by the CLASSIFY stage.
pub fn score_pairs(nodes: &[Node], seed_id: &PhraseId, config: &EngineConfig) -> Vec<Synapse> {
    let mut edges = Vec::new();

    for i in 0..nodes.len() {
        for j in (i + 1)..nodes.len() {
            let (a, b) = (&nodes[i], &nodes[j]);

            let concepts = concept_overlap(
                &a.signature.canonical_concepts,
                &b.signature.canonical_concepts,
            );
            let serp = serp_overlap(&a.serp.urls(), &b.serp.urls());

            if concepts.shared.is_empty() && serp.overlap < PAIR_GATE_SERP_OVERLAP {
                continue;
            }

            let alignment = perspective_alignment(
                a.signature.perspective.primary,
                b.signature.perspective.primary,
            );
            let entities = entity_overlap(
                &a.signature.canonical_concepts,
                &b.signature.canonical_concepts,
            );
            let proximity = intent_proximity(
                a.signature.intent_gradient.value,
                b.signature.intent_gradient.value,
            );

            let serp_present = a.serp.results.len() >= 3 && b.serp.results.len() >= 3;
            let entities_present = has_entities(a) && has_entities(b);

            let components = ComponentBreakdown {
                serp_overlap: serp_present.then_some(serp.overlap),
                concept_overlap: Some(concepts.overlap),
                perspective_alignment: Some(alignment.alignment),
                entity_overlap: entities_present.then_some(entities),
                intent_proximity: Some(proximity),
            };

            let strength = scoring::synapse_strength(&components, alignment.inversion);
            if strength.strength < config.min_synapse_strength {
                continue;
            }

            let seed_first = b.id == *seed_id || (a.id > b.id && a.id != *seed_id);
            let (source, target) = if seed_first {
                (b.id.clone(), a.id.clone())
            } else {
                (a.id.clone(), b.id.clone())
            };

            let (family, subtype) = infer_family(&components);
            edges.push(Synapse {
                source,
                target,
                strength: strength.strength,
                family,
                subtype,
                explanation: String::new(),
                actionable_insight: String::new(),
                contradiction: strength.contradiction,
                risk_notes: None,
                components,
                classified_by: ClassificationOrigin::Inferred,
            });
        }
    }

    edges.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));
    edges
}

fn has_entities(node: &Node) -> bool {
    node.signature
        .canonical_concepts
        .iter()
        .any(|c| !c.source_terms.is_empty())
}

/// Table-driven family inference from the component breakdown, used when
/// no LLM classification is available for an edge.
pub fn infer_family(components: &ComponentBreakdown) -> (SynapseFamily, SynapseSubtype) {
    let concept = components.concept_overlap.unwrap_or(0.0);
    let intent_delta = components.intent_proximity.map(|p| 1.0 - p).unwrap_or(0.0);
    let alignment = components.perspective_alignment.unwrap_or(1.0);

    let family = if concept > 0.6 && intent_delta < 0.25 {
        SynapseFamily::Expansion
    } else if concept >= 0.3 && intent_delta > 0.4 {
        SynapseFamily::Transition
    } else if alignment < 0.3 {
        SynapseFamily::Boundary
    } else {
        SynapseFamily::Contextual
    };

    (family, SynapseSubtype::default_for(family))
}

pub struct SynapseBuilder<'a> {
    pub llm: Option<&'a LlmClient>,
    pub config: &'a EngineConfig,
    pub seed_id: &'a PhraseId,
}

impl SynapseBuilder<'_> {
    /// CLASSIFY stage: refine scored edges with LLM classifications in
    /// priority order (seed edges first, then by descending effective
    /// strength) until `budget` calls are spent. Edges past the budget
    /// keep their deterministic inference and the build is marked
    /// truncated.
    pub async fn classify(
        &self,
        nodes: &[Node],
        mut edges: Vec<Synapse>,
        budget: usize,
    ) -> SynapseBuild {
        let by_id: BTreeMap<&PhraseId, &Node> = nodes.iter().map(|n| (&n.id, n)).collect();
        let mut warnings = Vec::new();
        let mut llm_calls = 0u32;
        let mut llm_tokens = 0u64;
        let mut truncated = false;

        edges.sort_by(|a, b| {
            let a_seed = a.source == *self.seed_id;
            let b_seed = b.source == *self.seed_id;
            b_seed
                .cmp(&a_seed)
                .then_with(|| {
                    b.effective_strength()
                        .partial_cmp(&a.effective_strength())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| (&a.source, &a.target).cmp(&(&b.source, &b.target)))
        });

        for edge in &mut edges {
            let can_classify = self.llm.is_some() && (llm_calls as usize) < budget;
            let (Some(llm), true) = (self.llm, can_classify) else {
                if self.llm.is_some() {
                    truncated = true;
                }
                continue;
            };
            let (Some(a), Some(b)) = (by_id.get(&edge.source), by_id.get(&edge.target)) else {
                continue;
            };

            let concepts = concept_overlap(
                &a.signature.canonical_concepts,
                &b.signature.canonical_concepts,
            );

            llm_calls += 1;
            match llm
                .synapse_classification(
                    &a.phrase.text,
                    &b.phrase.text,
                    &edge.components,
                    &concepts.shared,
                    &concepts.only_a,
                    &concepts.only_b,
                    a.signature.perspective.primary,
                    b.signature.perspective.primary,
                )
                .await
            {
                Ok(outcome) => {
                    llm_tokens += outcome.tokens_estimate;
                    let c = outcome.value;
                    edge.family = c.family;
                    edge.subtype = c.subtype;
                    edge.explanation = c.explanation;
                    edge.actionable_insight = c.actionable_insight;
                    // The kernel rule and the model each may flag it.
                    edge.contradiction = edge.contradiction || c.contradiction;
                    edge.risk_notes = c.risk_notes;
                    edge.classified_by = ClassificationOrigin::Llm;
                }
                Err(err) => {
                    // Recoverable-per-item: keep the inferred family.
                    warnings.push(RunWarning::item(
                        Stage::Classify,
                        format!("{}->{}", edge.source, edge.target),
                        format!("classification failed: {err}"),
                    ));
                }
            }
        }

        edges.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));

        tracing::info!(
            "synapse classify: {} edges, {} llm calls (truncated={})",
            edges.len(),
            llm_calls,
            truncated
        );

        SynapseBuild {
            edges,
            classification_truncated: truncated,
            llm_calls,
            llm_tokens,
            warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::RepeatingChatModel;
    use crate::taxonomy::Taxonomy;
    use crate::types::{
        CanonicalConcept, CandidateSource, ConfidenceByField, IntentGradient, IntentLabel,
        IntentSignature, Perspective, PerspectiveSignal, Phrase, Provenance, SerpProfile,
        SerpResult, SerpSource,
    };
    use std::sync::Arc;
    use std::time::Duration;

    fn concept(token: &str, weight: f64, term: &str) -> CanonicalConcept {
        CanonicalConcept {
            token: token.into(),
            weight,
            evidence: String::new(),
            source_terms: vec![term.into()],
            confidence: 0.9,
        }
    }

    fn node(
        text: &str,
        concepts: Vec<CanonicalConcept>,
        perspective: Perspective,
        gradient: f64,
        urls: &[&str],
    ) -> Node {
        let phrase = Phrase::new(text, "sv", "se");
        let taxonomy = Taxonomy::default_for_market("se");
        let results: Vec<SerpResult> = urls
            .iter()
            .enumerate()
            .map(|(i, url)| SerpResult {
                rank: i + 1,
                url: (*url).to_string(),
                title: String::new(),
                description: String::new(),
                page_type: Default::default(),
                perspective: Perspective::Neutral,
                intent: IntentLabel::Informational,
                key_concepts: vec![],
            })
            .collect();
        let fingerprint = taxonomy.vector_fingerprint(&concepts);
        Node {
            id: phrase.id(),
            phrase,
            sources: vec![CandidateSource::AhrefsRelated],
            signature: IntentSignature {
                canonical_concepts: concepts,
                perspective: PerspectiveSignal {
                    primary: perspective,
                    secondary: None,
                    confidence: 0.9,
                    evidence: String::new(),
                },
                intent_gradient: IntentGradient {
                    value: gradient,
                    label: IntentLabel::from_gradient(gradient),
                    confidence: 0.9,
                },
                confidence_by_field: ConfidenceByField {
                    concepts: 0.9,
                    promises: 0.9,
                    perspective: 0.9,
                    intent: 0.9,
                    elements: 0.9,
                    overall: 0.9,
                },
                vector_fingerprint: fingerprint,
                evidence_used: vec!["serp".into()],
                ..Default::default()
            },
            serp: SerpProfile {
                query: text.into(),
                market: "se".into(),
                fetched_at: 0,
                source: SerpSource::AhrefsCached,
                results,
                intent_distribution: Default::default(),
                perspective_distribution: Default::default(),
                page_type_distribution: Default::default(),
            },
            provenance: Provenance {
                source: "test".into(),
                observed_at: 0,
                model: None,
            },
        }
    }

    fn seedless_id() -> PhraseId {
        PhraseId("0000000000000000".into())
    }

    #[test]
    fn gate_requires_shared_concept_or_serp_overlap() {
        let config = EngineConfig::default();
        let a = node("a", vec![concept("AGENT", 0.9, "mäklare")], Perspective::Seeker, 0.5, &[]);
        let b = node("b", vec![concept("COST", 0.9, "pris")], Perspective::Seeker, 0.5, &[]);
        assert!(score_pairs(&[a, b], &seedless_id(), &config).is_empty());

        let c = node("c", vec![concept("AGENT", 0.9, "mäklare")], Perspective::Seeker, 0.5, &[]);
        let d = node("d", vec![concept("AGENT", 0.8, "mäklare")], Perspective::Seeker, 0.55, &[]);
        let edges = score_pairs(&[c, d], &seedless_id(), &config);
        assert_eq!(edges.len(), 1);
        assert!(edges[0].strength >= config.min_synapse_strength);
        assert!(edges[0].source <= edges[0].target);
    }

    #[test]
    fn contradiction_rule_matches_provider_seeker_inversion() {
        let config = EngineConfig::default();
        // High concept overlap, inverted stance, distant intent.
        let provider = node(
            "privatlån upp till 800 000",
            vec![concept("AMOUNT", 0.9, "800 000"), concept("COST", 0.8, "privatlån")],
            Perspective::Provider,
            0.9,
            &[],
        );
        let seeker = node(
            "jag har ett lån på 800 000 jag ska betala av",
            vec![concept("AMOUNT", 0.9, "800 000"), concept("COST", 0.8, "lån")],
            Perspective::Seeker,
            0.2,
            &[],
        );
        let edges = score_pairs(&[provider, seeker], &seedless_id(), &config);
        assert_eq!(edges.len(), 1);
        assert!(edges[0].contradiction);
        assert!((edges[0].strength - edges[0].effective_strength() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn serp_component_is_absent_for_thin_serps() {
        let config = EngineConfig::default();
        let a = node(
            "a",
            vec![concept("AGENT", 0.9, "mäklare")],
            Perspective::Seeker,
            0.5,
            &["https://x.se/"],
        );
        let b = node(
            "b",
            vec![concept("AGENT", 0.8, "mäklare")],
            Perspective::Seeker,
            0.5,
            &["https://x.se/"],
        );
        let edges = score_pairs(&[a, b], &seedless_id(), &config);
        assert_eq!(edges.len(), 1);
        assert!(edges[0].components.serp_overlap.is_none());
    }

    #[test]
    fn inference_table_covers_the_four_families() {
        let expansion = ComponentBreakdown {
            concept_overlap: Some(0.8),
            intent_proximity: Some(0.9),
            perspective_alignment: Some(0.7),
            ..Default::default()
        };
        assert_eq!(infer_family(&expansion).0, SynapseFamily::Expansion);

        let transition = ComponentBreakdown {
            concept_overlap: Some(0.4),
            intent_proximity: Some(0.4),
            perspective_alignment: Some(0.7),
            ..Default::default()
        };
        assert_eq!(infer_family(&transition).0, SynapseFamily::Transition);

        let boundary = ComponentBreakdown {
            concept_overlap: Some(0.2),
            intent_proximity: Some(0.9),
            perspective_alignment: Some(0.1),
            ..Default::default()
        };
        assert_eq!(infer_family(&boundary).0, SynapseFamily::Boundary);

        let contextual = ComponentBreakdown {
            concept_overlap: Some(0.2),
            intent_proximity: Some(0.9),
            perspective_alignment: Some(0.7),
            ..Default::default()
        };
        assert_eq!(infer_family(&contextual).0, SynapseFamily::Contextual);
    }

    #[tokio::test]
    async fn zero_budget_marks_truncated_with_no_llm_calls() {
        let config = EngineConfig::default();
        let a = node("a", vec![concept("AGENT", 0.9, "mäklare")], Perspective::Seeker, 0.5, &[]);
        let b = node("b", vec![concept("AGENT", 0.8, "mäklare")], Perspective::Seeker, 0.55, &[]);
        let seed_id = a.id.clone();
        let model = Arc::new(RepeatingChatModel::new("test-model", "{}"));
        let client = LlmClient::new(model.clone(), 3, Duration::from_secs(5));

        let nodes = vec![a, b];
        let edges = score_pairs(&nodes, &seed_id, &config);
        let builder = SynapseBuilder {
            llm: Some(&client),
            config: &config,
            seed_id: &seed_id,
        };
        let build = builder.classify(&nodes, edges, 0).await;

        assert!(build.classification_truncated);
        assert_eq!(build.llm_calls, 0);
        assert_eq!(model.call_count(), 0);
        assert_eq!(build.edges.len(), 1);
        assert_eq!(build.edges[0].classified_by, ClassificationOrigin::Inferred);
    }

    #[tokio::test]
    async fn seed_edges_flow_from_seed_and_get_classified() {
        let config = EngineConfig::default();
        let seed = node("seed", vec![concept("AGENT", 0.9, "seed")], Perspective::Seeker, 0.5, &[]);
        let other = node(
            "other",
            vec![concept("AGENT", 0.85, "other")],
            Perspective::Seeker,
            0.52,
            &[],
        );
        let seed_id = seed.id.clone();
        let response = r#"{"family": "EXPANSION", "subtype": "attribute_expansion", "explanation": "adds an attribute", "actionable_insight": "cover the variant", "contradiction": false}"#;
        let model = Arc::new(RepeatingChatModel::new("test-model", response));
        let client = LlmClient::new(model, 3, Duration::from_secs(5));

        let nodes = vec![seed, other];
        let edges = score_pairs(&nodes, &seed_id, &config);
        let builder = SynapseBuilder {
            llm: Some(&client),
            config: &config,
            seed_id: &seed_id,
        };
        let build = builder.classify(&nodes, edges, 10).await;

        assert_eq!(build.edges.len(), 1);
        let edge = &build.edges[0];
        assert_eq!(edge.source, seed_id);
        assert_eq!(edge.subtype, SynapseSubtype::AttributeExpansion);
        assert_eq!(edge.classified_by, ClassificationOrigin::Llm);
        assert!(!build.classification_truncated);
    }
}
