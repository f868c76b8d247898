//! Artifact emitter: the two output documents and their schema checks
//!
//! Both documents are validated before return; a violation is fatal for
//! the run and points at the first offending path.

use serde::Serialize;

use crate::cluster::RankedCandidate;
use crate::error::{RunFailure, RunWarning, Stage};
use crate::extraction::NO_SERP_CONFIDENCE_CAP;
use crate::scoring::ScoreBreakdown;
use crate::types::{
    CandidateSource, Cluster, Coordinates, IntentSignature, Node, PhraseId, Synapse, Versions,
};

/// Truncation / degradation flags carried by both documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunFlags {
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncation_reason: Option<String>,
    pub classification_truncated: bool,
    pub low_confidence: bool,
    pub cancelled: bool,
}

/// One adapter observation in the run's provenance log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvenanceEvent {
    pub stage: Stage,
    pub source: String,
    pub operation: String,
    pub observed_at: i64,
}

/// Run-level metadata shared by both documents.
#[derive(Debug, Clone, Serialize)]
pub struct RunMeta {
    pub run_id: String,
    pub seed_id: PhraseId,
    pub versions: Versions,
    pub taxonomy_version: String,
    pub flags: RunFlags,
    pub warnings: Vec<RunWarning>,
    pub provenance: Vec<ProvenanceEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: PhraseId,
    pub phrase: String,
    pub language: String,
    pub market: String,
    pub signature: IntentSignature,
    pub serp_source: String,
    pub serp_fetched_at: i64,
    pub coordinates: Coordinates,
}

#[derive(Debug, Clone, Serialize)]
pub struct LayoutMeta {
    pub plane: String,
    pub x_axis: String,
    pub y_axis: String,
    pub modularity: f64,
}

/// The full semantic graph: nodes, thresholded edges, clusters, layout.
#[derive(Debug, Serialize)]
pub struct GraphArtifact {
    pub seed: PhraseId,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<Synapse>,
    pub clusters: Vec<Cluster>,
    pub layout: LayoutMeta,
    pub run: RunMeta,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelatedQueryItem {
    pub phrase: String,
    pub relevance_score: f64,
    pub components: ScoreBreakdown,
    pub sources: Vec<CandidateSource>,
    /// Cross-link into the graph document's cluster list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterSummary {
    pub id: usize,
    pub label: String,
    pub size: usize,
    pub cohesion: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvidenceSummary {
    pub nodes_with_serp: usize,
    pub nodes_without_serp: usize,
    pub confidence_pass_ratio: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratorMeta {
    pub engine_version: String,
    pub model_version: String,
    pub rules_version: String,
    pub flags: RunFlags,
}

/// The ranked related-queries document.
#[derive(Debug, Serialize)]
pub struct RelatedQueriesOutput {
    pub seed: String,
    pub language: String,
    pub market: String,
    pub items: Vec<RelatedQueryItem>,
    pub clusters: Vec<ClusterSummary>,
    pub evidence_summary: EvidenceSummary,
    pub generator: GeneratorMeta,
    pub run: RunMeta,
}

/// Everything the emitter needs from the finished stages.
pub struct ArtifactInputs<'a> {
    pub seed: &'a Node,
    pub nodes: &'a [Node],
    pub edges: &'a [Synapse],
    pub clusters: &'a [Cluster],
    pub ranked: &'a [RankedCandidate],
    pub modularity: f64,
    pub pass_ratio: f64,
    pub run: RunMeta,
    pub taxonomy_len: usize,
}

/// Build and validate both documents. Validation failure is fatal.
pub fn emit(inputs: ArtifactInputs<'_>) -> Result<(RelatedQueriesOutput, GraphArtifact), RunFailure> {
    let graph = build_graph(&inputs);
    let related = build_related(&inputs);

    validate_graph(&graph, inputs.taxonomy_len)?;
    validate_related(&related)?;

    Ok((related, graph))
}

fn build_graph(inputs: &ArtifactInputs<'_>) -> GraphArtifact {
    // Seed first, then the rest in id order.
    let mut nodes: Vec<GraphNode> = Vec::with_capacity(inputs.nodes.len());
    nodes.push(graph_node(inputs.seed));
    for node in inputs.nodes {
        if node.id != inputs.seed.id {
            nodes.push(graph_node(node));
        }
    }

    GraphArtifact {
        seed: inputs.seed.id.clone(),
        nodes,
        edges: inputs.edges.to_vec(),
        clusters: inputs.clusters.to_vec(),
        layout: LayoutMeta {
            plane: "intent_x_perspective_y".to_string(),
            x_axis: "intent gradient (informational 0.0 → transactional 1.0)".to_string(),
            y_axis: "perspective ordinal (seeker 0 → neutral 5)".to_string(),
            modularity: inputs.modularity,
        },
        run: inputs.run.clone(),
    }
}

fn graph_node(node: &Node) -> GraphNode {
    GraphNode {
        id: node.id.clone(),
        phrase: node.phrase.text.clone(),
        language: node.phrase.language.clone(),
        market: node.phrase.market.clone(),
        signature: node.signature.clone(),
        serp_source: node.serp.source.as_str().to_string(),
        serp_fetched_at: node.serp.fetched_at,
        coordinates: Coordinates {
            intent_x: node.signature.intent_gradient.value,
            perspective_y: node.signature.perspective.primary.ordinal() as f64,
        },
    }
}

fn build_related(inputs: &ArtifactInputs<'_>) -> RelatedQueriesOutput {
    let cluster_of = |id: &PhraseId| -> Option<usize> {
        inputs
            .clusters
            .iter()
            .find(|c| c.node_ids.contains(id))
            .map(|c| c.id)
    };

    let items: Vec<RelatedQueryItem> = inputs
        .ranked
        .iter()
        .map(|r| RelatedQueryItem {
            phrase: r.phrase.clone(),
            relevance_score: r.relevance,
            components: r.breakdown,
            sources: r.sources.clone(),
            cluster_id: cluster_of(&r.id),
        })
        .collect();

    let clusters: Vec<ClusterSummary> = inputs
        .clusters
        .iter()
        .map(|c| ClusterSummary {
            id: c.id,
            label: c.label.clone(),
            size: c.node_ids.len(),
            cohesion: c.cohesion,
        })
        .collect();

    let without_serp = inputs
        .nodes
        .iter()
        .filter(|n| n.signature.evidence_used.iter().any(|e| e == "no_serp"))
        .count();

    RelatedQueriesOutput {
        seed: inputs.seed.phrase.text.clone(),
        language: inputs.seed.phrase.language.clone(),
        market: inputs.seed.phrase.market.clone(),
        items,
        clusters,
        evidence_summary: EvidenceSummary {
            nodes_with_serp: inputs.nodes.len() - without_serp,
            nodes_without_serp: without_serp,
            confidence_pass_ratio: inputs.pass_ratio,
        },
        generator: GeneratorMeta {
            engine_version: inputs.run.versions.engine.clone(),
            model_version: inputs.run.versions.model.clone(),
            rules_version: inputs.run.versions.rules.clone(),
            flags: inputs.run.flags.clone(),
        },
        run: inputs.run.clone(),
    }
}

fn validate_graph(graph: &GraphArtifact, taxonomy_len: usize) -> Result<(), RunFailure> {
    if graph.nodes.is_empty() {
        return Err(RunFailure::validation(Stage::Emit, "graph has no nodes", "/nodes"));
    }
    if graph.nodes[0].id != graph.seed {
        return Err(RunFailure::validation(Stage::Emit, "seed node must come first", "/nodes/0"));
    }

    let mut ids = std::collections::BTreeSet::new();
    for (i, node) in graph.nodes.iter().enumerate() {
        if node.phrase.is_empty() {
            return Err(RunFailure::validation(
                Stage::Emit,
                "node phrase is empty",
                format!("/nodes/{i}/phrase"),
            ));
        }
        if node.signature.vector_fingerprint.len() != taxonomy_len {
            return Err(RunFailure::validation(
                Stage::Emit,
                format!(
                    "fingerprint length {} does not match taxonomy size {taxonomy_len}",
                    node.signature.vector_fingerprint.len()
                ),
                format!("/nodes/{i}/signature/vector_fingerprint"),
            ));
        }
        if node.signature.vector_fingerprint.iter().any(|v| *v < 0.0) {
            return Err(RunFailure::validation(
                Stage::Emit,
                "fingerprint slot below zero",
                format!("/nodes/{i}/signature/vector_fingerprint"),
            ));
        }
        let overall = node.signature.confidence_by_field.overall;
        if !(0.0..=1.0).contains(&overall) {
            return Err(RunFailure::validation(
                Stage::Emit,
                "overall confidence out of range",
                format!("/nodes/{i}/signature/confidence_by_field/overall"),
            ));
        }
        let no_serp = node.signature.evidence_used.iter().any(|e| e == "no_serp");
        if node.serp_source == "offline_synthetic" && !no_serp {
            return Err(RunFailure::validation(
                Stage::Emit,
                "synthetic SERP without no_serp evidence tag",
                format!("/nodes/{i}/signature/evidence_used"),
            ));
        }
        if no_serp && overall > NO_SERP_CONFIDENCE_CAP {
            return Err(RunFailure::validation(
                Stage::Emit,
                format!("confidence {overall} exceeds the no_serp cap"),
                format!("/nodes/{i}/signature/confidence_by_field/overall"),
            ));
        }
        ids.insert(node.id.clone());
    }

    for (i, edge) in graph.edges.iter().enumerate() {
        if !(0.0..=1.0).contains(&edge.strength) {
            return Err(RunFailure::validation(
                Stage::Emit,
                "edge strength out of range",
                format!("/edges/{i}/strength"),
            ));
        }
        if edge.subtype.family() != edge.family {
            return Err(RunFailure::validation(
                Stage::Emit,
                "edge subtype inconsistent with family",
                format!("/edges/{i}/subtype"),
            ));
        }
        if !ids.contains(&edge.source) || !ids.contains(&edge.target) {
            return Err(RunFailure::validation(
                Stage::Emit,
                "edge references an unknown node",
                format!("/edges/{i}"),
            ));
        }
    }

    let mut clustered = std::collections::BTreeSet::new();
    for (i, cluster) in graph.clusters.iter().enumerate() {
        if !(0.0..=1.0).contains(&cluster.cohesion) {
            return Err(RunFailure::validation(
                Stage::Emit,
                "cluster cohesion out of range",
                format!("/clusters/{i}/cohesion"),
            ));
        }
        for id in &cluster.node_ids {
            if !ids.contains(id) {
                return Err(RunFailure::validation(
                    Stage::Emit,
                    "cluster references an unknown node",
                    format!("/clusters/{i}/node_ids"),
                ));
            }
            if !clustered.insert(id.clone()) {
                return Err(RunFailure::validation(
                    Stage::Emit,
                    "node assigned to more than one cluster",
                    format!("/clusters/{i}/node_ids"),
                ));
            }
        }
    }

    Ok(())
}

fn validate_related(related: &RelatedQueriesOutput) -> Result<(), RunFailure> {
    if related.seed.is_empty() {
        return Err(RunFailure::validation(Stage::Emit, "seed phrase is empty", "/seed"));
    }
    for (i, item) in related.items.iter().enumerate() {
        if item.phrase.is_empty() {
            return Err(RunFailure::validation(
                Stage::Emit,
                "related query phrase is empty",
                format!("/items/{i}/phrase"),
            ));
        }
        if !(0.0..=1.0).contains(&item.relevance_score) {
            return Err(RunFailure::validation(
                Stage::Emit,
                "relevance score out of range",
                format!("/items/{i}/relevance_score"),
            ));
        }
        if item.sources.is_empty() {
            return Err(RunFailure::validation(
                Stage::Emit,
                "related query without provenance tags",
                format!("/items/{i}/sources"),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::Taxonomy;
    use crate::types::{
        ConfidenceByField, IntentSignature, Phrase, Provenance, SerpProfile, SerpSource,
    };

    fn node(text: &str, overall: f64, evidence: &str, serp_source: SerpSource) -> Node {
        let phrase = Phrase::new(text, "sv", "se");
        let taxonomy = Taxonomy::default_for_market("se");
        Node {
            id: phrase.id(),
            phrase: phrase.clone(),
            sources: vec![CandidateSource::Seed],
            signature: IntentSignature {
                confidence_by_field: ConfidenceByField { overall, ..Default::default() },
                vector_fingerprint: vec![0.0; taxonomy.len()],
                evidence_used: vec![evidence.to_string()],
                ..Default::default()
            },
            serp: SerpProfile {
                query: phrase.text,
                market: "se".into(),
                fetched_at: 0,
                source: serp_source,
                results: vec![],
                intent_distribution: Default::default(),
                perspective_distribution: Default::default(),
                page_type_distribution: Default::default(),
            },
            provenance: Provenance { source: "test".into(), observed_at: 0, model: None },
        }
    }

    fn run_meta(seed_id: PhraseId) -> RunMeta {
        RunMeta {
            run_id: "run-1".into(),
            seed_id,
            versions: Versions::default(),
            taxonomy_version: "taxonomy-v1".into(),
            flags: RunFlags::default(),
            warnings: vec![],
            provenance: vec![],
        }
    }

    #[test]
    fn emits_valid_documents_for_seed_only_run() {
        let taxonomy = Taxonomy::default_for_market("se");
        let seed = node("mäklare stockholm", 0.8, "serp", SerpSource::AhrefsCached);
        let nodes = vec![seed.clone()];

        let (related, graph) = emit(ArtifactInputs {
            seed: &seed,
            nodes: &nodes,
            edges: &[],
            clusters: &[],
            ranked: &[],
            modularity: 0.0,
            pass_ratio: 1.0,
            run: run_meta(seed.id.clone()),
            taxonomy_len: taxonomy.len(),
        })
        .unwrap();

        assert!(related.items.is_empty());
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.seed, seed.id);

        // canonical serialization round-trips
        let json = serde_json::to_string(&graph).unwrap();
        assert!(json.contains("\"seed\""));
    }

    #[test]
    fn rejects_capped_violations() {
        let taxonomy = Taxonomy::default_for_market("se");
        let seed = node("seed", 0.8, "serp", SerpSource::AhrefsCached);
        // synthetic SERP but confidence above the cap
        let bad = node("bad node", 0.9, "no_serp", SerpSource::OfflineSynthetic);
        let nodes = vec![seed.clone(), bad];

        let result = emit(ArtifactInputs {
            seed: &seed,
            nodes: &nodes,
            edges: &[],
            clusters: &[],
            ranked: &[],
            modularity: 0.0,
            pass_ratio: 1.0,
            run: run_meta(seed.id.clone()),
            taxonomy_len: taxonomy.len(),
        });

        let failure = result.unwrap_err();
        assert!(failure.pointer.unwrap().contains("confidence_by_field"));
    }

    #[test]
    fn rejects_fingerprint_length_mismatch() {
        let seed = node("seed", 0.8, "serp", SerpSource::AhrefsCached);
        let nodes = vec![seed.clone()];
        let result = emit(ArtifactInputs {
            seed: &seed,
            nodes: &nodes,
            edges: &[],
            clusters: &[],
            ranked: &[],
            modularity: 0.0,
            pass_ratio: 1.0,
            run: run_meta(seed.id.clone()),
            taxonomy_len: 99,
        });
        assert!(result.is_err());
    }
}
