//! Pure scoring kernel: overlaps, distances, composite synapse strength
//!
//! Every function here is side-effect-free, takes borrowed inputs, and is
//! deterministic. No I/O, no internal state.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::FinalScoreWeights;
use crate::types::{CanonicalConcept, ComponentBreakdown, Perspective};

/// Component weights of the composite synapse strength.
pub const W_SERP: f64 = 0.30;
pub const W_CONCEPT: f64 = 0.25;
pub const W_PERSPECTIVE: f64 = 0.15;
pub const W_ENTITY: f64 = 0.15;
pub const W_INTENT: f64 = 0.15;

/// Minimum URLs on each side for SERP overlap to be meaningful.
const MIN_SERP_URLS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct SerpOverlap {
    pub overlap: f64,
    pub shared: Vec<String>,
}

/// Jaccard over the union URL set. Either list below 3 URLs yields 0.
pub fn serp_overlap(urls_a: &[String], urls_b: &[String]) -> SerpOverlap {
    if urls_a.len() < MIN_SERP_URLS || urls_b.len() < MIN_SERP_URLS {
        return SerpOverlap { overlap: 0.0, shared: vec![] };
    }

    let set_a: BTreeSet<&str> = urls_a.iter().map(String::as_str).collect();
    let set_b: BTreeSet<&str> = urls_b.iter().map(String::as_str).collect();

    let shared: Vec<String> = set_a.intersection(&set_b).map(|u| u.to_string()).collect();
    let union = set_a.union(&set_b).count();

    let overlap = if union == 0 {
        0.0
    } else {
        shared.len() as f64 / union as f64
    };

    SerpOverlap { overlap, shared }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConceptOverlap {
    pub overlap: f64,
    pub shared: Vec<String>,
    pub only_a: Vec<String>,
    pub only_b: Vec<String>,
}

/// Weighted Jaccard: Σ min(wA, wB) over shared tokens divided by
/// Σ max(wA, wB) over the union. Duplicate tokens keep their max weight.
pub fn concept_overlap(a: &[CanonicalConcept], b: &[CanonicalConcept]) -> ConceptOverlap {
    let weights_a = max_weight_by_token(a);
    let weights_b = max_weight_by_token(b);

    let mut shared = Vec::new();
    let mut only_a = Vec::new();
    let mut only_b = Vec::new();
    let mut numerator = 0.0;
    let mut denominator = 0.0;

    for (token, wa) in &weights_a {
        match weights_b.get(token) {
            Some(wb) => {
                numerator += wa.min(*wb);
                denominator += wa.max(*wb);
                shared.push(token.clone());
            }
            None => {
                denominator += wa;
                only_a.push(token.clone());
            }
        }
    }
    for (token, wb) in &weights_b {
        if !weights_a.contains_key(token) {
            denominator += wb;
            only_b.push(token.clone());
        }
    }

    let overlap = if denominator <= 0.0 {
        0.0
    } else {
        numerator / denominator
    };

    ConceptOverlap { overlap, shared, only_a, only_b }
}

fn max_weight_by_token(concepts: &[CanonicalConcept]) -> BTreeMap<String, f64> {
    let mut map: BTreeMap<String, f64> = BTreeMap::new();
    for c in concepts {
        let entry = map.entry(c.token.clone()).or_insert(0.0);
        if c.weight > *entry {
            *entry = c.weight;
        }
    }
    map
}

/// Jaccard over the surface entities (lowercased source terms) behind
/// two concept sets.
pub fn entity_overlap(a: &[CanonicalConcept], b: &[CanonicalConcept]) -> f64 {
    let ents_a = entities(a);
    let ents_b = entities(b);
    if ents_a.is_empty() || ents_b.is_empty() {
        return 0.0;
    }
    let shared = ents_a.intersection(&ents_b).count();
    let union = ents_a.union(&ents_b).count();
    shared as f64 / union as f64
}

fn entities(concepts: &[CanonicalConcept]) -> BTreeSet<String> {
    concepts
        .iter()
        .flat_map(|c| c.source_terms.iter())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Absolute distance between two intent gradient values.
pub fn intent_distance(a: f64, b: f64) -> f64 {
    (a - b).abs()
}

/// Proximity is the complement of distance.
pub fn intent_proximity(a: f64, b: f64) -> f64 {
    1.0 - intent_distance(a, b)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerspectiveAlignment {
    pub alignment: f64,
    /// True iff the unordered pair is exactly {seeker, provider}.
    pub inversion: bool,
}

/// Symmetric 6×6 alignment table over perspectives.
/// Row/column order follows `Perspective::ordinal`.
const ALIGNMENT: [[f64; 6]; 6] = [
    // seeker advisor provider educator regulator neutral
    [1.0, 0.7, 0.1, 0.6, 0.3, 0.5], // seeker
    [0.7, 1.0, 0.4, 0.8, 0.5, 0.6], // advisor
    [0.1, 0.4, 1.0, 0.4, 0.4, 0.5], // provider
    [0.6, 0.8, 0.4, 1.0, 0.6, 0.6], // educator
    [0.3, 0.5, 0.4, 0.6, 1.0, 0.5], // regulator
    [0.5, 0.6, 0.5, 0.6, 0.5, 1.0], // neutral
];

pub fn perspective_alignment(a: Perspective, b: Perspective) -> PerspectiveAlignment {
    let alignment = ALIGNMENT[a.ordinal()][b.ordinal()];
    let inversion = matches!(
        (a, b),
        (Perspective::Seeker, Perspective::Provider) | (Perspective::Provider, Perspective::Seeker)
    );
    PerspectiveAlignment { alignment, inversion }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynapseStrength {
    pub strength: f64,
    pub signals_present: usize,
    /// Sum of weights of the present components; the ceiling the
    /// composite could reach with perfect component scores.
    pub max_possible: f64,
    pub contradiction: bool,
}

/// Composite synapse strength over the component breakdown.
///
/// An absent component contributes 0 to both the weighted sum and the
/// max-possible score. The contradiction flag fires on high topical
/// overlap with inverted stance and distant intent.
pub fn synapse_strength(
    components: &ComponentBreakdown,
    perspective_inversion: bool,
) -> SynapseStrength {
    let mut strength = 0.0;
    let mut max_possible = 0.0;
    let mut signals_present = 0;

    let mut add = |value: Option<f64>, weight: f64| {
        if let Some(v) = value {
            strength += weight * v.clamp(0.0, 1.0);
            max_possible += weight;
            signals_present += 1;
        }
    };
    add(components.serp_overlap, W_SERP);
    add(components.concept_overlap, W_CONCEPT);
    add(components.perspective_alignment, W_PERSPECTIVE);
    add(components.entity_overlap, W_ENTITY);
    add(components.intent_proximity, W_INTENT);

    let concept = components.concept_overlap.unwrap_or(0.0);
    let intent_dist = components.intent_proximity.map(|p| 1.0 - p).unwrap_or(0.0);
    let contradiction = concept > 0.6 && perspective_inversion && intent_dist > 0.4;

    SynapseStrength {
        strength: strength.clamp(0.0, 1.0),
        signals_present,
        max_possible,
        contradiction,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub vector_similarity: f64,
    pub serp_overlap: f64,
    pub intent_match: f64,
    pub concept_overlap: f64,
}

/// Seed-relative relevance: weighted sum of the four components.
pub fn final_score(weights: &FinalScoreWeights, breakdown: &ScoreBreakdown) -> f64 {
    let score = weights.vector_similarity * breakdown.vector_similarity
        + weights.serp_overlap * breakdown.serp_overlap
        + weights.intent_match * breakdown.intent_match
        + weights.concept_overlap * breakdown.concept_overlap;
    score.clamp(0.0, 1.0)
}

/// Cosine similarity over two fingerprints of equal length.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

/// Aggregate signature of a node group: weighted mean fingerprint,
/// perspective mode, and mean intent gradient.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSignature {
    pub fingerprint: Vec<f64>,
    pub perspective: Perspective,
    pub intent_mean: f64,
}

/// Weighted mean of fingerprints (weights are per-node, typically the
/// overall signature confidence), mode of perspective with ties broken
/// by ordinal, and plain mean of the intent gradient.
pub fn group_signature(
    fingerprints: &[(&[f64], f64)],
    perspectives: &[Perspective],
    gradients: &[f64],
) -> GroupSignature {
    let dims = fingerprints.first().map(|(fp, _)| fp.len()).unwrap_or(0);
    let mut fingerprint = vec![0.0; dims];
    let mut weight_total = 0.0;
    for (fp, weight) in fingerprints {
        let w = weight.max(1e-9);
        weight_total += w;
        for (slot, value) in fp.iter().enumerate() {
            if slot < dims {
                fingerprint[slot] += w * value;
            }
        }
    }
    if weight_total > 0.0 {
        for value in &mut fingerprint {
            *value /= weight_total;
        }
    }

    let mut counts = [0usize; 6];
    for p in perspectives {
        counts[p.ordinal()] += 1;
    }
    let mode_ordinal = counts
        .iter()
        .enumerate()
        .max_by(|(ia, ca), (ib, cb)| ca.cmp(cb).then_with(|| ib.cmp(ia)))
        .map(|(i, _)| i)
        .unwrap_or(Perspective::Neutral.ordinal());
    let perspective = Perspective::ALL[mode_ordinal];

    let intent_mean = if gradients.is_empty() {
        0.0
    } else {
        gradients.iter().sum::<f64>() / gradients.len() as f64
    };

    GroupSignature { fingerprint, perspective, intent_mean }
}
