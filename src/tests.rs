//! End-to-end scenario tests for SynapseEngine

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::adapters::{
    ChatModel, KeywordRecord, RawSerpEntry, SerpOverview, StaticKeywordData, StaticScrape,
    UnavailableKeywordData,
};
use crate::engine::{CancelToken, RunRequest, SynapseEngine};
use crate::error::{AdapterError, AdapterResult, Stage};
use crate::types::*;
use crate::EngineConfig;

const NOW: i64 = 1_700_000_000;

/// Chat model that routes on the operation and looks intents up by phrase.
struct TestModel {
    intents: BTreeMap<String, String>,
    default_intent: Option<String>,
    classification: Option<String>,
    facets: Option<String>,
    intent_calls: AtomicUsize,
    classification_calls: AtomicUsize,
    /// Cancel the token once this many intent extractions have served.
    cancel_after: Mutex<Option<(CancelToken, usize)>>,
}

impl TestModel {
    fn new() -> Self {
        Self {
            intents: BTreeMap::new(),
            default_intent: None,
            classification: None,
            facets: None,
            intent_calls: AtomicUsize::new(0),
            classification_calls: AtomicUsize::new(0),
            cancel_after: Mutex::new(None),
        }
    }

    fn classification_calls(&self) -> usize {
        self.classification_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for TestModel {
    fn model_id(&self) -> &str {
        "test-model"
    }

    async fn complete(&self, system: &str, user: &str) -> AdapterResult<String> {
        if system.contains("intent signature") {
            let served = self.intent_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((token, after)) = self.cancel_after.lock().unwrap().as_ref() {
                if served >= *after {
                    token.cancel();
                }
            }
            let phrase = user
                .lines()
                .next()
                .and_then(|l| l.strip_prefix("Phrase: "))
                .unwrap_or("");
            return self
                .intents
                .get(phrase)
                .or(self.default_intent.as_ref())
                .cloned()
                .ok_or_else(|| AdapterError::unavailable(format!("no intent for '{phrase}'")));
        }
        if system.contains("synapse") {
            self.classification_calls.fetch_add(1, Ordering::SeqCst);
            return self
                .classification
                .clone()
                .ok_or_else(|| AdapterError::unavailable("no classification scripted"));
        }
        if system.contains("name a cluster") {
            return Ok(r#"{"label": "Test cluster"}"#.to_string());
        }
        // facet expansion
        Ok(self.facets.clone().unwrap_or_else(|| "{}".to_string()))
    }
}

fn intent_json(
    concepts: &[(&str, f64, &str)],
    perspective: &str,
    gradient: f64,
    confidence: f64,
) -> String {
    let concept_json: Vec<String> = concepts
        .iter()
        .map(|(token, weight, term)| {
            format!(
                r#"{{"token": "{token}", "weight": {weight}, "evidence": "from phrase", "source_terms": ["{term}"], "confidence": {confidence}}}"#
            )
        })
        .collect();
    format!(
        r#"{{
            "canonical_concepts": [{}],
            "perspective": {{"primary": "{perspective}", "confidence": {confidence}, "evidence": "test"}},
            "intent_gradient": {{"value": {gradient}, "label": "commercial_investigation", "confidence": {confidence}}},
            "format": "listing",
            "confidence_by_field": {{"concepts": {confidence}, "promises": {confidence}, "perspective": {confidence}, "intent": {confidence}, "elements": {confidence}, "overall": {confidence}}}
        }}"#,
        concept_json.join(", ")
    )
}

const EXPANSION_CLASSIFICATION: &str = r#"{
    "family": "EXPANSION",
    "subtype": "attribute_expansion",
    "explanation": "The candidate narrows the seed with a quality attribute.",
    "actionable_insight": "Treat the candidate as a section of the seed's hub page.",
    "contradiction": false
}"#;

fn serp(phrase: &str, urls: &[&str]) -> SerpOverview {
    SerpOverview {
        phrase: phrase.to_string(),
        market: "se".to_string(),
        fetched_at: NOW,
        source: SerpSource::AhrefsCached,
        entries: urls
            .iter()
            .enumerate()
            .map(|(i, url)| RawSerpEntry {
                rank: i + 1,
                url: (*url).to_string(),
                title: format!("{phrase} resultat {}", i + 1),
                description: String::new(),
            })
            .collect(),
        related_queries: vec![],
    }
}

fn record(phrase: &str, volume: u64) -> KeywordRecord {
    KeywordRecord { phrase: phrase.into(), volume: Some(volume) }
}

fn request(seed: &str) -> RunRequest {
    RunRequest {
        seed: seed.to_string(),
        language: "sv".to_string(),
        market: "se".to_string(),
        cancel: None,
        now: Some(NOW),
    }
}

/// S1 fixture: seed plus agent/location variants, shared SERP for the
/// top variant, seeker intents at gradient 0.55 throughout.
fn maklare_fixture() -> (StaticKeywordData, TestModel) {
    let seed = "mäklare stockholm";
    let urls = [
        "https://hemnet.se/maklare",
        "https://maklarstatistik.se/",
        "https://booli.se/maklare",
        "https://maklarhuset.se/",
        "https://fastighetsbyran.se/",
    ];

    let mut keyword = StaticKeywordData::default();
    keyword.related.insert(
        seed.to_string(),
        vec![
            record("bästa mäklare stockholm", 1400),
            record("billig mäklare stockholm", 900),
            record("mäklare stockholm tips", 700),
            record("erfaren mäklare stockholm", 500),
        ],
    );
    keyword.serps.insert(seed.to_string(), serp(seed, &urls));
    keyword
        .serps
        .insert("bästa mäklare stockholm".to_string(), serp("bästa mäklare stockholm", &urls));

    let mut model = TestModel::new();
    model.default_intent = Some(intent_json(
        &[("AGENT", 0.9, "mäklare"), ("LOCATION", 0.8, "stockholm")],
        "seeker",
        0.55,
        0.8,
    ));
    model.classification = Some(EXPANSION_CLASSIFICATION.to_string());

    (keyword, model)
}

#[tokio::test]
async fn s1_expansion_edge_from_seed_to_top_variant() {
    let (keyword, model) = maklare_fixture();
    let engine = SynapseEngine::new(
        Some(Arc::new(keyword)),
        None,
        None,
        Arc::new(model),
        EngineConfig::default(),
    );

    let output = engine.run(request("mäklare stockholm")).await.unwrap();

    let top_phrases: Vec<&str> = output
        .related
        .items
        .iter()
        .map(|i| i.phrase.as_str())
        .collect();
    assert!(top_phrases.contains(&"bästa mäklare stockholm"));

    let variant_id = Phrase::new("bästa mäklare stockholm", "sv", "se").id();
    let edge = output
        .graph
        .edges
        .iter()
        .find(|e| e.source == output.graph.seed && e.target == variant_id)
        .expect("seed edge to the top variant");

    assert_eq!(edge.family, SynapseFamily::Expansion);
    assert_eq!(edge.subtype, SynapseSubtype::AttributeExpansion);
    assert!(edge.strength >= 0.6, "strength was {}", edge.strength);
    assert!(!edge.contradiction);
}

#[tokio::test]
async fn s2_inverted_perspective_pair_raises_contradiction() {
    let seed = "privatlån upp till 800 000";
    let candidate = "jag har ett lån på 800 000 jag ska betala av";

    let mut keyword = StaticKeywordData::default();
    keyword
        .related
        .insert(seed.to_string(), vec![record(candidate, 100)]);

    let mut model = TestModel::new();
    model.intents.insert(
        seed.to_string(),
        intent_json(
            &[("AMOUNT", 0.9, "800 000"), ("COST", 0.8, "privatlån")],
            "provider",
            0.9,
            0.8,
        ),
    );
    model.intents.insert(
        candidate.to_string(),
        intent_json(
            &[("AMOUNT", 0.9, "800 000"), ("COST", 0.8, "lån")],
            "seeker",
            0.2,
            0.8,
        ),
    );
    // Even a non-contradictory LLM verdict cannot clear the kernel flag.
    model.classification = Some(EXPANSION_CLASSIFICATION.to_string());

    let engine = SynapseEngine::new(
        Some(Arc::new(keyword)),
        None,
        None,
        Arc::new(model),
        EngineConfig::default(),
    );

    let output = engine.run(request(seed)).await.unwrap();

    assert_eq!(output.graph.edges.len(), 1);
    let edge = &output.graph.edges[0];
    assert!(edge.components.concept_overlap.unwrap() >= 0.6);
    assert!(edge.contradiction);
    assert!((edge.strength - edge.effective_strength() - 0.2).abs() < 1e-9);
}

#[tokio::test]
async fn s3_full_provider_outage_degrades_to_edge_seeding() {
    let seed = "mäklare stockholm";

    // Web scrape succeeds for the seed SERP only.
    let mut scrape = StaticScrape::default();
    scrape.searches.insert(
        seed.to_string(),
        (1..=4)
            .map(|rank| RawSerpEntry {
                rank,
                url: format!("https://scraped{rank}.se/"),
                title: format!("{seed} {rank}"),
                description: String::new(),
            })
            .collect(),
    );

    let mut model = TestModel::new();
    model.default_intent = Some(intent_json(
        &[("AGENT", 0.9, "mäklare")],
        "seeker",
        0.5,
        0.8,
    ));
    model.facets = Some(
        r#"{"phrases": ["bästa mäklare stockholm", "mäklare stockholm arvode"]}"#.to_string(),
    );
    model.classification = Some(EXPANSION_CLASSIFICATION.to_string());

    let engine = SynapseEngine::new(
        Some(Arc::new(UnavailableKeywordData)),
        Some(Arc::new(scrape)),
        None,
        Arc::new(model),
        EngineConfig::default(),
    );

    let output = engine.run(request(seed)).await.unwrap();

    // Run finalized despite the outage, with a stage-level warning.
    assert!(output
        .graph
        .run
        .warnings
        .iter()
        .any(|w| w.stage == Stage::Candidates && w.entity.is_none()));
    assert!(output.graph.run.flags.low_confidence);

    // Non-seed nodes came from edge seeding; everything is capped.
    for node in &output.graph.nodes {
        assert!(
            node.signature.confidence_by_field.overall <= 0.55,
            "{} exceeded the cap",
            node.phrase
        );
    }
    let non_seed: Vec<_> = output
        .graph
        .nodes
        .iter()
        .filter(|n| n.id != output.graph.seed)
        .collect();
    assert_eq!(non_seed.len(), 2);
    for node in non_seed {
        assert!(node.signature.evidence_used.contains(&"no_serp".to_string()));
    }

    // The seed used the scraped SERP.
    let seed_node = &output.graph.nodes[0];
    assert_eq!(seed_node.serp_source, "scraped");
}

#[tokio::test]
async fn s4_zero_classification_budget_infers_families() {
    let (keyword, model) = maklare_fixture();
    let model = Arc::new(model);
    let config = EngineConfig {
        classification_budget: 0,
        ..EngineConfig::default()
    };
    let engine = SynapseEngine::new(Some(Arc::new(keyword)), None, None, model.clone(), config);

    let output = engine.run(request("mäklare stockholm")).await.unwrap();

    assert!(output.graph.run.flags.classification_truncated);
    assert!(!output.graph.edges.is_empty());
    for edge in &output.graph.edges {
        assert_eq!(edge.classified_by, ClassificationOrigin::Inferred);
        // identical gradients + high concept overlap → EXPANSION per table
        assert_eq!(edge.family, SynapseFamily::Expansion);
    }
    assert_eq!(model.classification_calls(), 0);
    assert!(output
        .graph
        .run
        .provenance
        .iter()
        .all(|e| e.operation != "synapse_classification"));
}

#[tokio::test]
async fn s5_two_survivors_one_cluster() {
    let seed = "mäklare stockholm";
    let mut keyword = StaticKeywordData::default();
    keyword.related.insert(
        seed.to_string(),
        vec![
            record("bästa mäklare stockholm", 500),
            record("billig mäklare stockholm", 300),
        ],
    );

    let mut model = TestModel::new();
    model.default_intent = Some(intent_json(
        &[("AGENT", 0.9, "mäklare"), ("LOCATION", 0.7, "stockholm")],
        "seeker",
        0.5,
        0.8,
    ));
    model.classification = Some(EXPANSION_CLASSIFICATION.to_string());

    let engine = SynapseEngine::new(
        Some(Arc::new(keyword)),
        None,
        None,
        Arc::new(model),
        EngineConfig::default(),
    );

    let output = engine.run(request(seed)).await.unwrap();

    assert!(output.related.items.len() <= 2);
    assert_eq!(output.graph.clusters.len(), 1);
    assert_eq!(output.graph.clusters[0].node_ids.len(), 2);
}

#[tokio::test]
async fn s6_cancellation_mid_extract_emits_partial_artifacts() {
    let seed = "mäklare stockholm";
    let mut keyword = StaticKeywordData::default();
    let rows: Vec<KeywordRecord> = (0..49)
        .map(|i| record(&format!("mäklare stockholm variant {i:02}"), 1000 - i))
        .collect();
    keyword.related.insert(seed.to_string(), rows);

    let mut model = TestModel::new();
    model.default_intent = Some(intent_json(
        &[("AGENT", 0.9, "mäklare")],
        "seeker",
        0.5,
        0.8,
    ));
    model.classification = Some(EXPANSION_CLASSIFICATION.to_string());

    let cancel = CancelToken::new();
    *model.cancel_after.lock().unwrap() = Some((cancel.clone(), 10));
    let model = Arc::new(model);

    let engine = SynapseEngine::new(
        Some(Arc::new(keyword)),
        None,
        None,
        model.clone(),
        EngineConfig::default(),
    );

    let mut req = request(seed);
    req.cancel = Some(cancel);
    let output = engine.run(req).await.unwrap();

    assert!(output.graph.run.flags.cancelled);
    // only the batches before the cancellation checkpoint were extracted
    assert!(output.graph.nodes.len() < 50);
    assert!(!output.graph.nodes.is_empty());
    // no classification calls after the checkpoint
    assert_eq!(model.classification_calls(), 0);
    assert!(output
        .graph
        .run
        .provenance
        .iter()
        .all(|e| e.operation != "synapse_classification"));
}

#[tokio::test]
async fn exhausted_adapter_budget_truncates_but_finalizes() {
    let (keyword, model) = maklare_fixture();
    let mut config = EngineConfig::default();
    config.budgets.max_adapter_calls = Some(1);
    let engine = SynapseEngine::new(Some(Arc::new(keyword)), None, None, Arc::new(model), config);

    let output = engine.run(request("mäklare stockholm")).await.unwrap();

    let flags = &output.graph.run.flags;
    assert!(flags.truncated);
    assert_eq!(
        flags.truncation_reason.as_deref(),
        Some("adapter call budget exhausted")
    );
    assert!(flags.classification_truncated);
    assert!(!flags.cancelled);
    for edge in &output.graph.edges {
        assert_eq!(edge.classified_by, ClassificationOrigin::Inferred);
    }
}

#[tokio::test]
async fn empty_candidate_pool_still_emits_seed_only_graph() {
    let seed = "mäklare stockholm";
    // All operations succeed but return nothing, and the facet fallback
    // has nothing to offer either.
    let keyword = StaticKeywordData {
        serps: {
            let mut serps = BTreeMap::new();
            serps.insert(
                seed.to_string(),
                serp(seed, &["https://a.se/", "https://b.se/", "https://c.se/"]),
            );
            serps
        },
        ..Default::default()
    };

    let mut model = TestModel::new();
    model.default_intent = Some(intent_json(
        &[("AGENT", 0.9, "mäklare")],
        "seeker",
        0.5,
        0.9,
    ));

    let engine = SynapseEngine::new(
        Some(Arc::new(keyword)),
        None,
        None,
        Arc::new(model),
        EngineConfig::default(),
    );

    let output = engine.run(request(seed)).await.unwrap();

    assert!(output.related.items.is_empty());
    assert_eq!(output.graph.nodes.len(), 1);
    assert_eq!(output.graph.nodes[0].id, output.graph.seed);
    assert!(output.graph.edges.is_empty());
}

#[tokio::test]
async fn identical_inputs_yield_byte_identical_artifacts() {
    let (keyword, model) = maklare_fixture();
    let engine = SynapseEngine::new(
        Some(Arc::new(keyword)),
        None,
        None,
        Arc::new(model),
        EngineConfig::default(),
    );

    let first = engine.run(request("mäklare stockholm")).await.unwrap();
    let second = engine.run(request("mäklare stockholm")).await.unwrap();

    assert_eq!(
        serde_json::to_string(&first.graph).unwrap(),
        serde_json::to_string(&second.graph).unwrap()
    );
    assert_eq!(
        serde_json::to_string(&first.related).unwrap(),
        serde_json::to_string(&second.related).unwrap()
    );
}

#[tokio::test]
async fn empty_seed_fails_at_intake() {
    let model = TestModel::new();
    let engine = SynapseEngine::new_simple(Arc::new(model), EngineConfig::default());
    let failure = engine.run(request("   ")).await.unwrap_err();
    assert_eq!(failure.stage, Stage::Intake);
}
