//! Selector & clusterer: seed-relative ranking, MMR top-K, community
//! detection, cluster labels, and layout coordinates

use std::collections::BTreeMap;

use crate::community::{detect_communities, WeightedEdge};
use crate::config::EngineConfig;
use crate::error::{RunWarning, Stage};
use crate::llm::LlmClient;
use crate::scoring::{
    concept_overlap, cosine_similarity, final_score, group_signature, intent_proximity,
    serp_overlap, ScoreBreakdown,
};
use crate::selection::{select_with_mmr, MmrCandidate, MmrParams};
use crate::types::{
    CandidateSource, Cluster, Coordinates, Node, PhraseId, Synapse,
};

/// One entry of the ranked related-queries list.
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub id: PhraseId,
    pub phrase: String,
    /// Seed-relative relevance before any contradiction downgrade.
    pub relevance: f64,
    pub breakdown: ScoreBreakdown,
    pub sources: Vec<CandidateSource>,
}

/// SELECT stage: score every node against the seed and run MMR.
///
/// The MMR relevance of a node whose seed edge carries a contradiction
/// is downgraded by exactly 0.2; the reported relevance stays intact.
pub fn select(
    seed: &Node,
    nodes: &[Node],
    edges: &[Synapse],
    config: &EngineConfig,
) -> Vec<RankedCandidate> {
    let contradicted: std::collections::BTreeSet<&PhraseId> = edges
        .iter()
        .filter(|e| e.source == seed.id && e.contradiction)
        .map(|e| &e.target)
        .collect();

    let seed_urls = seed.serp.urls();
    let mut pool = Vec::new();
    let mut details: BTreeMap<PhraseId, (f64, ScoreBreakdown)> = BTreeMap::new();

    for node in nodes {
        if node.id == seed.id {
            continue;
        }
        let breakdown = ScoreBreakdown {
            vector_similarity: cosine_similarity(
                &seed.signature.vector_fingerprint,
                &node.signature.vector_fingerprint,
            ),
            serp_overlap: serp_overlap(&seed_urls, &node.serp.urls()).overlap,
            intent_match: intent_proximity(
                seed.signature.intent_gradient.value,
                node.signature.intent_gradient.value,
            ),
            concept_overlap: concept_overlap(
                &seed.signature.canonical_concepts,
                &node.signature.canonical_concepts,
            )
            .overlap,
        };
        let relevance = final_score(&config.final_score_weights, &breakdown);
        let selection_relevance = if contradicted.contains(&node.id) {
            (relevance - 0.2).max(0.0)
        } else {
            relevance
        };

        details.insert(node.id.clone(), (relevance, breakdown));
        pool.push(MmrCandidate {
            id: node.id.clone(),
            phrase: node.phrase.text.clone(),
            relevance: selection_relevance,
            fingerprint: node.signature.vector_fingerprint.clone(),
            facet: node.dominant_facet().map(|f| f.to_string()),
        });
    }

    let params = MmrParams {
        k: config.target_count,
        lambda: config.mmr_lambda,
        max_same_per_facet: config.max_same_per_facet,
        max_near_duplicate: config.max_near_duplicate,
        near_duplicate_threshold: config.near_duplicate_threshold,
    };

    let by_id: BTreeMap<&PhraseId, &Node> = nodes.iter().map(|n| (&n.id, n)).collect();
    select_with_mmr(pool, &params)
        .into_iter()
        .filter_map(|picked| {
            let (relevance, breakdown) = details.get(&picked.candidate.id)?.clone();
            let node = by_id.get(&picked.candidate.id)?;
            Some(RankedCandidate {
                id: picked.candidate.id,
                phrase: picked.candidate.phrase,
                relevance,
                breakdown,
                sources: node.sources.clone(),
            })
        })
        .collect()
}

/// Outcome of the CLUSTER stage.
#[derive(Debug)]
pub struct ClusterOutcome {
    pub clusters: Vec<Cluster>,
    pub modularity: f64,
    pub llm_calls: u32,
    pub llm_tokens: u64,
    pub warnings: Vec<RunWarning>,
}

pub struct ClusterBuilder<'a> {
    pub llm: Option<&'a LlmClient>,
    pub config: &'a EngineConfig,
}

impl ClusterBuilder<'_> {
    /// Community detection on the selected-node subgraph, then a label
    /// and centroid per cluster. LLM labelling is used while
    /// `label_budget` allows; afterwards the top shared concept token
    /// names the cluster.
    pub async fn cluster(
        &self,
        nodes: &[Node],
        selected_ids: &[PhraseId],
        edges: &[Synapse],
        label_budget: usize,
    ) -> ClusterOutcome {
        let by_id: BTreeMap<&PhraseId, &Node> = nodes.iter().map(|n| (&n.id, n)).collect();
        let selected: Vec<PhraseId> = selected_ids.to_vec();
        let selected_set: std::collections::BTreeSet<&PhraseId> = selected.iter().collect();

        let subgraph: Vec<WeightedEdge> = edges
            .iter()
            .filter(|e| selected_set.contains(&e.source) && selected_set.contains(&e.target))
            .map(|e| WeightedEdge {
                a: e.source.clone(),
                b: e.target.clone(),
                weight: e.effective_strength(),
            })
            .collect();

        let partition = detect_communities(&selected, &subgraph);

        let mut clusters = Vec::with_capacity(partition.communities.len());
        let mut warnings = Vec::new();
        let mut llm_calls = 0u32;
        let mut llm_tokens = 0u64;

        for (idx, members) in partition.communities.iter().enumerate() {
            let member_nodes: Vec<&Node> =
                members.iter().filter_map(|id| by_id.get(id).copied()).collect();

            let fallback = top_shared_token(&member_nodes)
                .unwrap_or_else(|| format!("cluster {}", idx + 1));

            let mut label = fallback.clone();
            if let Some(llm) = self.llm {
                if (llm_calls as usize) < label_budget {
                    let phrases: Vec<String> =
                        member_nodes.iter().map(|n| n.phrase.text.clone()).collect();
                    let shared = shared_tokens(&member_nodes);
                    llm_calls += 1;
                    match llm.cluster_label(&phrases, &shared).await {
                        Ok(outcome) => {
                            llm_tokens += outcome.tokens_estimate;
                            label = outcome.value;
                        }
                        Err(err) => {
                            warnings.push(RunWarning::item(
                                Stage::Cluster,
                                format!("cluster-{idx}"),
                                format!("labelling failed: {err}"),
                            ));
                        }
                    }
                }
            }

            clusters.push(Cluster {
                id: idx,
                label,
                node_ids: members.clone(),
                cohesion: cohesion(members, &subgraph),
                centroid: centroid(&member_nodes),
            });
        }

        tracing::info!(
            "clustering: {} clusters, modularity {:.3}",
            clusters.len(),
            partition.modularity
        );

        ClusterOutcome {
            clusters,
            modularity: partition.modularity,
            llm_calls,
            llm_tokens,
            warnings,
        }
    }
}

/// Mean effective strength of edges internal to the cluster.
fn cohesion(members: &[PhraseId], edges: &[WeightedEdge]) -> f64 {
    let set: std::collections::BTreeSet<&PhraseId> = members.iter().collect();
    let internal: Vec<f64> = edges
        .iter()
        .filter(|e| set.contains(&e.a) && set.contains(&e.b))
        .map(|e| e.weight)
        .collect();
    if internal.is_empty() {
        0.0
    } else {
        (internal.iter().sum::<f64>() / internal.len() as f64).clamp(0.0, 1.0)
    }
}

/// Cluster centroid on the intent × perspective plane: mean intent
/// gradient on x, perspective-mode ordinal on y.
fn centroid(members: &[&Node]) -> Coordinates {
    let fingerprints: Vec<(&[f64], f64)> = members
        .iter()
        .map(|n| {
            (
                n.signature.vector_fingerprint.as_slice(),
                n.signature.confidence_by_field.overall,
            )
        })
        .collect();
    let perspectives: Vec<_> =
        members.iter().map(|n| n.signature.perspective.primary).collect();
    let gradients: Vec<f64> =
        members.iter().map(|n| n.signature.intent_gradient.value).collect();

    let signature = group_signature(&fingerprints, &perspectives, &gradients);
    Coordinates {
        intent_x: signature.intent_mean,
        perspective_y: signature.perspective.ordinal() as f64,
    }
}

/// Tokens shared by at least two members (or all tokens for singletons).
fn shared_tokens(members: &[&Node]) -> Vec<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for node in members {
        let mut seen = std::collections::BTreeSet::new();
        for c in &node.signature.canonical_concepts {
            if seen.insert(c.token.as_str()) {
                *counts.entry(c.token.as_str()).or_insert(0) += 1;
            }
        }
    }
    let threshold = if members.len() > 1 { 2 } else { 1 };
    counts
        .into_iter()
        .filter(|(_, n)| *n >= threshold)
        .map(|(t, _)| t.to_string())
        .collect()
}

/// Highest summed-weight token among the shared tokens.
fn top_shared_token(members: &[&Node]) -> Option<String> {
    let shared = shared_tokens(members);
    let mut weights: BTreeMap<&str, f64> = BTreeMap::new();
    for node in members {
        for c in &node.signature.canonical_concepts {
            if shared.iter().any(|s| s == &c.token) {
                *weights.entry(c.token.as_str()).or_insert(0.0) += c.weight;
            }
        }
    }
    weights
        .into_iter()
        .max_by(|(ta, wa), (tb, wb)| {
            wa.partial_cmp(wb)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| tb.cmp(ta))
        })
        .map(|(t, _)| t.to_string())
}
