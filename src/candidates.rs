//! Candidate generation: expand the seed into a deduplicated pool
//!
//! Each configured keyword-data operation contributes up to the per-source
//! limit; a failed source degrades to a warning, never a stage failure.
//! When every source fails, an LLM-only facet expansion round produces
//! `edge_seeding` candidates and the run is marked degraded.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::adapters::{KeywordDataAdapter, KeywordRecord, SerpMetadataSource};
use crate::config::EngineConfig;
use crate::error::{AdapterResult, RunWarning, Stage};
use crate::llm::LlmClient;
use crate::types::{Candidate, CandidateSource, Phrase, PhraseId};

/// Outcome of the CANDIDATES stage.
#[derive(Debug)]
pub struct CandidatePool {
    /// Deduplicated, ordered by best-available volume then phrase.
    /// Includes the seed itself tagged `seed`.
    pub candidates: Vec<Candidate>,
    /// True when the keyword-data path failed entirely and the pool came
    /// from the LLM fallback; downstream confidence is capped.
    pub degraded: bool,
    pub warnings: Vec<RunWarning>,
    pub adapter_calls: u32,
    pub llm_tokens: u64,
}

pub struct CandidateGenerator<'a> {
    pub keyword: Option<&'a dyn KeywordDataAdapter>,
    pub serp_meta: Option<&'a dyn SerpMetadataSource>,
    pub llm: &'a LlmClient,
    pub config: &'a EngineConfig,
}

impl CandidateGenerator<'_> {
    /// Expand the seed into the candidate pool.
    pub async fn generate(&self, seed: &Phrase) -> CandidatePool {
        let mut pool = Merge::new(seed);
        let mut warnings = Vec::new();
        let mut adapter_calls = 0u32;
        let mut llm_tokens = 0u64;
        let limit = self.config.per_source_limit;
        let timeout = Duration::from_millis(self.config.adapter_timeout_ms);

        let mut any_source_succeeded = false;

        if let Some(keyword) = self.keyword {
            let ops: [(&str, CandidateSource); 4] = [
                ("organic_keywords", CandidateSource::AhrefsAlsoRank),
                ("related_terms", CandidateSource::AhrefsRelated),
                ("matching_terms", CandidateSource::AhrefsMatching),
                ("search_suggestions", CandidateSource::AhrefsSuggestions),
            ];

            // The list operations and the seed overview are independent;
            // dispatch them together and merge in fixed order.
            let (overview, organic, related, matching, suggestions) = tokio::join!(
                with_timeout(timeout, keyword.keywords_explorer_overview(seed)),
                with_timeout(timeout, keyword.organic_keywords(seed, limit)),
                with_timeout(timeout, keyword.related_terms(seed, limit)),
                with_timeout(timeout, keyword.matching_terms(seed, limit)),
                with_timeout(timeout, keyword.search_suggestions(seed, limit)),
            );
            adapter_calls += 5;

            match overview {
                Ok(metrics) => pool.set_seed_volume(metrics.volume),
                Err(err) => {
                    tracing::debug!("keywords_explorer_overview failed: {err}");
                }
            }

            for ((op, source), result) in
                ops.into_iter().zip([organic, related, matching, suggestions])
            {
                match result {
                    Ok(rows) => {
                        if !rows.is_empty() {
                            any_source_succeeded = true;
                        }
                        pool.absorb(rows, source, seed);
                    }
                    Err(err) => {
                        tracing::warn!("keyword-data {op} failed: {err}");
                        warnings.push(RunWarning::item(Stage::Candidates, op, err.to_string()));
                    }
                }
            }
        }

        if let Some(meta) = self.serp_meta {
            adapter_calls += 1;
            match with_timeout(timeout, meta.serp_profile(seed)).await {
                Ok(overview) => {
                    let rows: Vec<KeywordRecord> = overview
                        .related_queries
                        .iter()
                        .map(|p| KeywordRecord { phrase: p.clone(), volume: None })
                        .collect();
                    if !rows.is_empty() {
                        any_source_succeeded = true;
                    }
                    pool.absorb(rows, CandidateSource::SerpMetadata, seed);
                }
                Err(err) => {
                    tracing::warn!("serp metadata source failed: {err}");
                    warnings.push(RunWarning::item(
                        Stage::Candidates,
                        "serp_metadata",
                        err.to_string(),
                    ));
                }
            }
        }

        let mut degraded = false;
        if !any_source_succeeded {
            // LLM-only fallback: facet expansion with edge_seeding provenance.
            degraded = true;
            warnings.push(RunWarning::stage_level(
                Stage::Candidates,
                "all keyword-data sources failed; falling back to edge seeding",
            ));
            match self.llm.facet_expansion(seed, limit.min(50)).await {
                Ok(outcome) => {
                    llm_tokens += outcome.tokens_estimate;
                    let rows: Vec<KeywordRecord> = outcome
                        .value
                        .into_iter()
                        .map(|p| KeywordRecord { phrase: p, volume: None })
                        .collect();
                    pool.absorb(rows, CandidateSource::EdgeSeeding, seed);
                }
                Err(err) => {
                    tracing::warn!("facet expansion fallback failed: {err}");
                    warnings.push(RunWarning::item(
                        Stage::Candidates,
                        "facet_expansion",
                        err.to_string(),
                    ));
                }
            }
        }

        let candidates = pool.finish(self.config.candidate_pool_max);
        tracing::info!(
            "candidate pool: {} phrases ({} warnings, degraded={})",
            candidates.len(),
            warnings.len(),
            degraded
        );

        CandidatePool {
            candidates,
            degraded,
            warnings,
            adapter_calls,
            llm_tokens,
        }
    }
}

async fn with_timeout<T>(
    timeout: Duration,
    call: impl std::future::Future<Output = AdapterResult<T>>,
) -> AdapterResult<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(crate::error::AdapterError::Timeout {
            after_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Dedup-by-identity merge keeping the union of source tags and the
/// best available volume.
struct Merge {
    seed_id: PhraseId,
    by_id: BTreeMap<PhraseId, Candidate>,
}

impl Merge {
    fn new(seed: &Phrase) -> Self {
        let seed_candidate = Candidate {
            phrase: seed.clone(),
            sources: vec![CandidateSource::Seed],
            volume: None,
            tags: vec![],
        };
        let seed_id = seed.id();
        let mut by_id = BTreeMap::new();
        by_id.insert(seed_id.clone(), seed_candidate);
        Self { seed_id, by_id }
    }

    fn set_seed_volume(&mut self, volume: Option<u64>) {
        if let Some(seed) = self.by_id.get_mut(&self.seed_id) {
            seed.volume = volume;
        }
    }

    fn absorb(&mut self, rows: Vec<KeywordRecord>, source: CandidateSource, seed: &Phrase) {
        for row in rows {
            let phrase = Phrase::new(&row.phrase, &seed.language, &seed.market);
            if phrase.text.is_empty() {
                continue;
            }
            let id = phrase.id();
            if id == self.seed_id {
                continue; // the seed keeps its `seed` tag only
            }
            let entry = self.by_id.entry(id).or_insert_with(|| Candidate {
                phrase,
                sources: vec![],
                volume: None,
                tags: vec![],
            });
            if !entry.sources.contains(&source) {
                entry.sources.push(source);
                entry.sources.sort();
            }
            entry.volume = match (entry.volume, row.volume) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
        }
    }

    /// Order by descending volume (absent last), then phrase; cap the
    /// pool size. The seed always survives the cap.
    fn finish(self, pool_max: usize) -> Vec<Candidate> {
        let seed_id = self.seed_id;
        let mut seed = None;
        let mut rest: Vec<Candidate> = Vec::new();
        for (id, candidate) in self.by_id {
            if id == seed_id {
                seed = Some(candidate);
            } else {
                rest.push(candidate);
            }
        }
        rest.sort_by(|a, b| {
            b.volume
                .unwrap_or(0)
                .cmp(&a.volume.unwrap_or(0))
                .then_with(|| a.phrase.text.cmp(&b.phrase.text))
        });
        rest.truncate(pool_max.saturating_sub(1));

        let mut out = Vec::with_capacity(rest.len() + 1);
        if let Some(seed) = seed {
            out.push(seed);
        }
        out.extend(rest);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ScriptedChatModel, StaticKeywordData, UnavailableKeywordData};
    use std::sync::Arc;

    fn llm(responses: Vec<String>) -> LlmClient {
        LlmClient::new(
            Arc::new(ScriptedChatModel::new("test-model", responses)),
            3,
            Duration::from_secs(5),
        )
    }

    fn record(phrase: &str, volume: Option<u64>) -> KeywordRecord {
        KeywordRecord { phrase: phrase.into(), volume }
    }

    #[tokio::test]
    async fn merges_sources_and_orders_by_volume() {
        let seed = Phrase::new("mäklare stockholm", "sv", "se");
        let mut keyword = StaticKeywordData::default();
        keyword.related.insert(
            seed.text.clone(),
            vec![record("bästa mäklare stockholm", Some(500)), record("mäklare arvode", Some(900))],
        );
        keyword.suggestions.insert(
            seed.text.clone(),
            vec![record("Bästa  Mäklare Stockholm", Some(450))], // same phrase after normalization
        );

        let client = llm(vec![]);
        let config = EngineConfig::default();
        let generator = CandidateGenerator {
            keyword: Some(&keyword),
            serp_meta: None,
            llm: &client,
            config: &config,
        };

        let pool = generator.generate(&seed).await;
        assert!(!pool.degraded);

        // seed first, then by volume
        assert_eq!(pool.candidates[0].sources, vec![CandidateSource::Seed]);
        assert_eq!(pool.candidates[1].phrase.text, "mäklare arvode");

        let merged = pool
            .candidates
            .iter()
            .find(|c| c.phrase.text == "bästa mäklare stockholm")
            .unwrap();
        assert_eq!(
            merged.sources,
            vec![CandidateSource::AhrefsRelated, CandidateSource::AhrefsSuggestions]
        );
        assert_eq!(merged.volume, Some(500));
    }

    #[tokio::test]
    async fn falls_back_to_edge_seeding_when_all_sources_fail() {
        let seed = Phrase::new("mäklare stockholm", "sv", "se");
        let client = llm(vec![
            r#"{"phrases": ["mäklare arvode", "sälja lägenhet stockholm"]}"#.into(),
        ]);
        let config = EngineConfig::default();
        let generator = CandidateGenerator {
            keyword: Some(&UnavailableKeywordData),
            serp_meta: None,
            llm: &client,
            config: &config,
        };

        let pool = generator.generate(&seed).await;
        assert!(pool.degraded);
        assert_eq!(pool.candidates.len(), 3); // seed + 2
        assert!(pool
            .candidates
            .iter()
            .skip(1)
            .all(|c| c.edge_seeded_only()));
        assert!(pool
            .warnings
            .iter()
            .any(|w| w.entity.is_none() && w.stage == Stage::Candidates));
    }

    #[tokio::test]
    async fn serp_metadata_related_queries_join_the_pool() {
        use crate::adapters::{SerpOverview, StaticSerpMetadata};
        use crate::types::SerpSource;

        let seed = Phrase::new("mäklare stockholm", "sv", "se");
        let mut meta = StaticSerpMetadata::default();
        meta.overviews.insert(
            seed.text.clone(),
            SerpOverview {
                phrase: seed.text.clone(),
                market: "se".into(),
                fetched_at: 0,
                source: SerpSource::Live,
                entries: vec![],
                related_queries: vec!["mäklare stockholm omdöme".into()],
            },
        );

        let client = llm(vec![]);
        let config = EngineConfig::default();
        let generator = CandidateGenerator {
            keyword: None,
            serp_meta: Some(&meta),
            llm: &client,
            config: &config,
        };

        let pool = generator.generate(&seed).await;
        assert!(!pool.degraded);
        let candidate = pool
            .candidates
            .iter()
            .find(|c| c.phrase.text == "mäklare stockholm omdöme")
            .unwrap();
        assert_eq!(candidate.sources, vec![CandidateSource::SerpMetadata]);
    }

    #[tokio::test]
    async fn pool_cap_keeps_the_seed() {
        let seed = Phrase::new("seed phrase", "en", "us");
        let mut keyword = StaticKeywordData::default();
        let rows: Vec<KeywordRecord> = (0..20)
            .map(|i| record(&format!("candidate {i:02}"), Some(1000 - i)))
            .collect();
        keyword.related.insert(seed.text.clone(), rows);

        let client = llm(vec![]);
        let config = EngineConfig {
            candidate_pool_max: 5,
            ..EngineConfig::default()
        };
        let generator = CandidateGenerator {
            keyword: Some(&keyword),
            serp_meta: None,
            llm: &client,
            config: &config,
        };

        let pool = generator.generate(&seed).await;
        assert_eq!(pool.candidates.len(), 5);
        assert_eq!(pool.candidates[0].sources, vec![CandidateSource::Seed]);
    }
}
