//! Intent extraction: per-candidate SERP profile + LLM signature
//!
//! SERP evidence resolves through a fallback chain: keyword-data SERP
//! endpoint, then web-scrape search, then an offline synthetic profile.
//! Nodes whose evidence chain lacks a real SERP get their confidences
//! capped and `no_serp` recorded in `evidence_used`.

use std::time::Duration;

use crate::adapters::{KeywordDataAdapter, WebScrapeAdapter};
use crate::config::EngineConfig;
use crate::error::{AdapterResult, RunWarning, Stage};
use crate::llm::LlmClient;
use crate::serp;
use crate::taxonomy::Taxonomy;
use crate::types::{Candidate, Node, Provenance};

/// Ceiling applied to every confidence whose evidence chain includes
/// `no_serp`.
pub const NO_SERP_CONFIDENCE_CAP: f64 = 0.55;

/// Outcome of extracting one candidate. `node` is `None` when the
/// candidate was dropped (recoverable-per-item).
#[derive(Debug)]
pub struct ExtractionOutcome {
    pub node: Option<Node>,
    pub adapter_calls: u32,
    pub llm_tokens: u64,
    pub warnings: Vec<RunWarning>,
}

/// Shared dependencies for the EXTRACT stage.
pub struct Extractor<'a> {
    pub keyword: Option<&'a dyn KeywordDataAdapter>,
    pub scrape: Option<&'a dyn WebScrapeAdapter>,
    pub llm: &'a LlmClient,
    pub taxonomy: &'a Taxonomy,
    pub config: &'a EngineConfig,
    pub now: i64,
    /// Stage-degraded run: cap confidences regardless of SERP evidence.
    pub degraded: bool,
}

impl Extractor<'_> {
    /// Build the SERP profile and intent signature for one candidate.
    pub async fn extract(&self, candidate: &Candidate) -> ExtractionOutcome {
        let phrase = &candidate.phrase;
        let mut warnings = Vec::new();
        let mut adapter_calls = 0u32;
        let mut llm_tokens = 0u64;
        let timeout = Duration::from_millis(self.config.adapter_timeout_ms);

        // 1. SERP profile with fallback chain.
        let mut profile = None;

        if let Some(keyword) = self.keyword {
            adapter_calls += 1;
            match with_timeout(timeout, keyword.serp_overview(phrase)).await {
                Ok(overview) => {
                    profile = Some(serp::profile_from_overview(&overview, self.taxonomy));
                }
                Err(err) => {
                    tracing::debug!("serp_overview failed for '{}': {err}", phrase.text);
                    warnings.push(RunWarning::item(Stage::Extract, phrase.text.clone(), format!("serp fetch failed: {err}")));
                }
            }
        }

        if profile.is_none() {
            if let Some(scrape) = self.scrape {
                adapter_calls += 1;
                match with_timeout(timeout, scrape.search(phrase, 10)).await {
                    Ok(entries) if !entries.is_empty() => {
                        profile = Some(serp::profile_from_scrape(
                            phrase,
                            &entries,
                            self.now,
                            self.taxonomy,
                        ));
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::debug!("scrape search failed for '{}': {err}", phrase.text);
                        warnings.push(RunWarning::item(Stage::Extract, phrase.text.clone(), format!("scrape fallback failed: {err}")));
                    }
                }
            }
        }

        let profile = profile.unwrap_or_else(|| serp::synthetic_profile(phrase, self.now));

        // 2. LLM extraction against the active taxonomy.
        let outcome = match self
            .llm
            .intent_extraction(phrase, self.taxonomy, Some(&profile))
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                // Recoverable-per-item: the candidate is excluded.
                warnings.push(RunWarning::item(
                    Stage::Extract,
                    phrase.text.clone(),
                    format!("intent extraction failed: {err}"),
                ));
                return ExtractionOutcome { node: None, adapter_calls, llm_tokens, warnings };
            }
        };
        llm_tokens += outcome.tokens_estimate;
        let mut signature = outcome.value;

        // 3. Provenance-driven confidence discipline.
        let no_serp = profile.is_synthetic() || candidate.edge_seeded_only();
        signature.evidence_used = if no_serp {
            vec!["no_serp".to_string()]
        } else {
            vec!["serp".to_string()]
        };
        if no_serp || self.degraded {
            signature.confidence_by_field =
                signature.confidence_by_field.capped(NO_SERP_CONFIDENCE_CAP);
            signature.perspective.confidence =
                signature.perspective.confidence.min(NO_SERP_CONFIDENCE_CAP);
            signature.intent_gradient.confidence =
                signature.intent_gradient.confidence.min(NO_SERP_CONFIDENCE_CAP);
        }

        let node = Node {
            id: phrase.id(),
            phrase: phrase.clone(),
            sources: candidate.sources.clone(),
            signature,
            serp: profile,
            provenance: Provenance {
                source: format!("llm+{}", outcome.prompt_version),
                observed_at: self.now,
                model: Some(self.llm.model_id()),
            },
        };

        ExtractionOutcome { node: Some(node), adapter_calls, llm_tokens, warnings }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{RawSerpEntry, ScriptedChatModel, SerpOverview, StaticKeywordData, StaticScrape};
    use crate::types::{CandidateSource, Phrase, SerpSource};
    use std::sync::Arc;

    const SIGNATURE_JSON: &str = r#"{
        "canonical_concepts": [
            {"token": "AGENT", "weight": 0.9, "evidence": "head term", "source_terms": ["mäklare"], "confidence": 0.9},
            {"token": "LOCATION", "weight": 0.8, "evidence": "city", "source_terms": ["stockholm"], "confidence": 0.9}
        ],
        "perspective": {"primary": "seeker", "confidence": 0.9, "evidence": "wants an agent"},
        "intent_gradient": {"value": 0.55, "label": "commercial_investigation", "confidence": 0.9},
        "confidence_by_field": {"concepts": 0.9, "promises": 0.8, "perspective": 0.9, "intent": 0.9, "elements": 0.8, "overall": 0.88}
    }"#;

    fn candidate(text: &str, sources: Vec<CandidateSource>) -> Candidate {
        Candidate {
            phrase: Phrase::new(text, "sv", "se"),
            sources,
            volume: None,
            tags: vec![],
        }
    }

    fn serp_overview(phrase: &str) -> SerpOverview {
        SerpOverview {
            phrase: phrase.into(),
            market: "se".into(),
            fetched_at: 1_700_000_000,
            source: SerpSource::AhrefsCached,
            entries: (1..=5)
                .map(|rank| RawSerpEntry {
                    rank,
                    url: format!("https://site{rank}.se/"),
                    title: format!("Mäklare i Stockholm {rank}"),
                    description: String::new(),
                })
                .collect(),
            related_queries: vec![],
        }
    }

    fn llm() -> LlmClient {
        LlmClient::new(
            Arc::new(ScriptedChatModel::new("test-model", vec![SIGNATURE_JSON.into()])),
            3,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn real_serp_keeps_confidences_uncapped() {
        let cand = candidate("mäklare stockholm", vec![CandidateSource::AhrefsRelated]);
        let mut keyword = StaticKeywordData::default();
        keyword.serps.insert(cand.phrase.text.clone(), serp_overview(&cand.phrase.text));

        let client = llm();
        let taxonomy = Taxonomy::default_for_market("se");
        let config = EngineConfig::default();
        let extractor = Extractor {
            keyword: Some(&keyword),
            scrape: None,
            llm: &client,
            taxonomy: &taxonomy,
            config: &config,
            now: 1_700_000_000,
            degraded: false,
        };

        let outcome = extractor.extract(&cand).await;
        let node = outcome.node.unwrap();
        assert_eq!(node.serp.source, SerpSource::AhrefsCached);
        assert_eq!(node.signature.evidence_used, vec!["serp"]);
        assert!(node.signature.confidence_by_field.overall > 0.55);
        assert_eq!(node.signature.vector_fingerprint.len(), taxonomy.len());
    }

    #[tokio::test]
    async fn synthetic_serp_caps_confidence_and_tags_no_serp() {
        let cand = candidate("mäklare stockholm", vec![CandidateSource::AhrefsRelated]);
        let client = llm();
        let taxonomy = Taxonomy::default_for_market("se");
        let config = EngineConfig::default();
        let extractor = Extractor {
            keyword: None,
            scrape: None,
            llm: &client,
            taxonomy: &taxonomy,
            config: &config,
            now: 0,
            degraded: false,
        };

        let outcome = extractor.extract(&cand).await;
        let node = outcome.node.unwrap();
        assert!(node.serp.is_synthetic());
        assert_eq!(node.signature.evidence_used, vec!["no_serp"]);
        assert!(node.signature.confidence_by_field.overall <= NO_SERP_CONFIDENCE_CAP);
        assert!(node.signature.confidence_by_field.concepts <= NO_SERP_CONFIDENCE_CAP);
    }

    #[tokio::test]
    async fn edge_seeded_candidate_is_capped_even_with_scraped_serp() {
        let cand = candidate("mäklare stockholm", vec![CandidateSource::EdgeSeeding]);
        let mut scrape = StaticScrape::default();
        scrape.searches.insert(
            cand.phrase.text.clone(),
            (1..=4)
                .map(|rank| RawSerpEntry {
                    rank,
                    url: format!("https://s{rank}.se/"),
                    title: "Mäklare".into(),
                    description: String::new(),
                })
                .collect(),
        );

        let client = llm();
        let taxonomy = Taxonomy::default_for_market("se");
        let config = EngineConfig::default();
        let extractor = Extractor {
            keyword: None,
            scrape: Some(&scrape),
            llm: &client,
            taxonomy: &taxonomy,
            config: &config,
            now: 0,
            degraded: false,
        };

        let outcome = extractor.extract(&cand).await;
        let node = outcome.node.unwrap();
        assert_eq!(node.serp.source, SerpSource::Scraped);
        assert_eq!(node.signature.evidence_used, vec!["no_serp"]);
        assert!(node.signature.confidence_by_field.overall <= NO_SERP_CONFIDENCE_CAP);
    }

    #[tokio::test]
    async fn unparseable_extraction_drops_the_candidate_with_warning() {
        let cand = candidate("mäklare stockholm", vec![CandidateSource::AhrefsRelated]);
        let client = LlmClient::new(
            Arc::new(ScriptedChatModel::new(
                "test-model",
                vec!["garbage".into(), "garbage".into(), "garbage".into()],
            )),
            3,
            Duration::from_secs(5),
        );
        let taxonomy = Taxonomy::default_for_market("se");
        let config = EngineConfig::default();
        let extractor = Extractor {
            keyword: None,
            scrape: None,
            llm: &client,
            taxonomy: &taxonomy,
            config: &config,
            now: 0,
            degraded: false,
        };

        let outcome = extractor.extract(&cand).await;
        assert!(outcome.node.is_none());
        assert!(outcome
            .warnings
            .iter()
            .any(|w| w.entity.as_deref() == Some("mäklare stockholm")));
    }
}
