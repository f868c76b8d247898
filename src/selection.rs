//! MMR-based selection with facet and near-duplicate diversity constraints

use crate::scoring::cosine_similarity;
use crate::types::PhraseId;

/// One candidate entering MMR selection.
#[derive(Debug, Clone)]
pub struct MmrCandidate {
    pub id: PhraseId,
    pub phrase: String,
    pub relevance: f64,
    pub fingerprint: Vec<f64>,
    /// Dominant facet token, when the node has one.
    pub facet: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct MmrParams {
    pub k: usize,
    pub lambda: f64,
    pub max_same_per_facet: usize,
    pub max_near_duplicate: usize,
    pub near_duplicate_threshold: f64,
}

/// A selected candidate with its selection-time scores.
#[derive(Debug, Clone)]
pub struct MmrSelection {
    pub candidate: MmrCandidate,
    pub mmr_score: f64,
    /// Max similarity to previously selected items at selection time.
    pub max_similarity: f64,
}

/// Greedy MMR: at each step pick the candidate maximising
/// `lambda * relevance - (1 - lambda) * max_similarity_to_selected`.
///
/// Ties break by higher relevance, then lexicographic phrase order.
/// Diversity constraints: at most `max_same_per_facet` selections per
/// dominant facet and at most `max_near_duplicate` selections whose
/// similarity to an earlier pick exceeds the near-duplicate threshold.
/// Candidates blocked by a constraint leave the pool.
pub fn select_with_mmr(mut candidates: Vec<MmrCandidate>, params: &MmrParams) -> Vec<MmrSelection> {
    let mut selected: Vec<MmrSelection> = Vec::new();
    let mut facet_counts: std::collections::BTreeMap<String, usize> = std::collections::BTreeMap::new();
    let mut near_duplicates = 0usize;

    while selected.len() < params.k && !candidates.is_empty() {
        let (best_idx, mmr_score, max_similarity) = find_best(&candidates, &selected, params.lambda);
        let candidate = candidates.remove(best_idx);

        if let Some(facet) = &candidate.facet {
            if facet_counts.get(facet).copied().unwrap_or(0) >= params.max_same_per_facet {
                tracing::debug!("  SKIP: facet cap reached for {}", facet);
                continue;
            }
        }

        let is_near_duplicate = max_similarity > params.near_duplicate_threshold;
        if is_near_duplicate && near_duplicates >= params.max_near_duplicate {
            tracing::debug!("  SKIP: near-duplicate cap ({:.2})", max_similarity);
            continue;
        }

        if let Some(facet) = &candidate.facet {
            *facet_counts.entry(facet.clone()).or_insert(0) += 1;
        }
        if is_near_duplicate {
            near_duplicates += 1;
        }

        selected.push(MmrSelection { candidate, mmr_score, max_similarity });
    }

    selected
}

/// Index, MMR score, and max-similarity of the best remaining candidate.
fn find_best(
    candidates: &[MmrCandidate],
    selected: &[MmrSelection],
    lambda: f64,
) -> (usize, f64, f64) {
    let mut best_idx = 0;
    let mut best_mmr = f64::MIN;
    let mut best_sim = 0.0;

    for (idx, cand) in candidates.iter().enumerate() {
        let max_sim = selected
            .iter()
            .map(|s| cosine_similarity(&cand.fingerprint, &s.candidate.fingerprint))
            .fold(0.0f64, f64::max);

        let mmr = lambda * cand.relevance - (1.0 - lambda) * max_sim;

        let is_better = if (mmr - best_mmr).abs() < 1e-12 {
            let current = &candidates[best_idx];
            match cand.relevance.partial_cmp(&current.relevance) {
                Some(std::cmp::Ordering::Greater) => true,
                Some(std::cmp::Ordering::Less) => false,
                _ => cand.phrase < current.phrase,
            }
        } else {
            mmr > best_mmr
        };

        if is_better {
            best_idx = idx;
            best_mmr = mmr;
            best_sim = max_sim;
        }
    }

    (best_idx, best_mmr, best_sim)
}
