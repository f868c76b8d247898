//! Synapse engine HTTP server binary

use async_trait::async_trait;
use std::sync::Arc;

use synapse_engine::adapters::{
    ChatModel, KeywordRecord, RawSerpEntry, SerpOverview, StaticKeywordData,
};
use synapse_engine::error::AdapterResult;
use synapse_engine::http_keyword::HttpKeywordData;
use synapse_engine::http_llm::HttpChatModel;
use synapse_engine::server;
use synapse_engine::types::SerpSource;
use synapse_engine::{EngineConfig, SynapseEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    println!("Synapse Engine");
    println!("  Version: {}", env!("CARGO_PKG_VERSION"));
    println!();

    let use_real = std::env::args().any(|arg| arg == "--use-real");
    let config = EngineConfig::default();

    let engine = if use_real {
        println!("Mode: REAL providers");
        let llm_url = std::env::var("SYNAPSE_LLM_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let llm_model =
            std::env::var("SYNAPSE_LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let llm_key = std::env::var("SYNAPSE_LLM_API_KEY").ok();
        let keyword_url = std::env::var("SYNAPSE_KEYWORD_API_URL").ok();
        let keyword_key = std::env::var("SYNAPSE_KEYWORD_API_KEY").ok();

        println!("  LLM endpoint: {llm_url} ({llm_model})");

        let keyword = match keyword_url {
            Some(url) => {
                let client = HttpKeywordData::new(url.clone(), keyword_key);
                match client.health_check().await {
                    Ok(true) => println!("  Keyword-data API healthy: {url}"),
                    Ok(false) => eprintln!("  WARNING: keyword-data API unhealthy: {url}"),
                    Err(e) => eprintln!("  WARNING: keyword-data API unreachable: {e}"),
                }
                Some(Arc::new(client) as Arc<dyn synapse_engine::adapters::KeywordDataAdapter>)
            }
            None => {
                println!("  No SYNAPSE_KEYWORD_API_URL set; running LLM-only (edge seeding)");
                None
            }
        };

        let chat = Arc::new(HttpChatModel::new(llm_url, llm_model, llm_key));
        SynapseEngine::new(keyword, None, None, chat, config)
    } else {
        println!("Mode: MOCK providers");
        println!("  (use --use-real to call real endpoints)");
        let keyword: Arc<dyn synapse_engine::adapters::KeywordDataAdapter> =
            Arc::new(mock_keyword_data());
        let chat = Arc::new(MockChatModel);
        SynapseEngine::new(Some(keyword), None, None, chat, config)
    };

    println!("Engine initialized; starting HTTP server on port 8082");
    println!();

    server::run_server(engine, 8082).await?;

    Ok(())
}

/// Deterministic chat model for mock mode: routes on the system prompt.
struct MockChatModel;

#[async_trait]
impl ChatModel for MockChatModel {
    fn model_id(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, system: &str, _user: &str) -> AdapterResult<String> {
        let response = if system.contains("intent signature") {
            r#"{
                "canonical_concepts": [
                    {"token": "AGENT", "weight": 0.9, "evidence": "head term names an agent", "source_terms": [], "confidence": 0.85},
                    {"token": "LOCATION", "weight": 0.7, "evidence": "geographic modifier", "source_terms": [], "confidence": 0.8}
                ],
                "action_verbs": ["hitta"],
                "perspective": {"primary": "seeker", "confidence": 0.8, "evidence": "searcher wants a service"},
                "intent_gradient": {"value": 0.55, "label": "commercial_investigation", "confidence": 0.8},
                "required_elements": ["comparison table", "local coverage"],
                "format": "listing",
                "emergent_meaning": "Searcher is evaluating local service providers.",
                "confidence_by_field": {"concepts": 0.85, "promises": 0.6, "perspective": 0.8, "intent": 0.8, "elements": 0.7, "overall": 0.78}
            }"#
        } else if system.contains("synapse") {
            r#"{
                "family": "EXPANSION",
                "subtype": "attribute_expansion",
                "explanation": "The second phrase narrows the first with a qualifier.",
                "actionable_insight": "Serve both phrases from one hub page with an anchored section.",
                "contradiction": false
            }"#
        } else if system.contains("name a cluster") {
            r#"{"label": "Local providers"}"#
        } else {
            r#"{"phrases": ["bästa mäklare stockholm", "mäklare arvode", "sälja lägenhet stockholm"]}"#
        };
        Ok(response.to_string())
    }
}

/// Sample keyword-data tables for mock mode.
fn mock_keyword_data() -> StaticKeywordData {
    let seed = "mäklare stockholm";
    let related = [
        ("bästa mäklare stockholm", 1400),
        ("mäklare arvode", 2100),
        ("mäklare stockholm omdöme", 480),
        ("billig mäklare stockholm", 390),
        ("sälja lägenhet stockholm", 1900),
    ];

    let mut adapter = StaticKeywordData::default();
    adapter.related.insert(
        seed.to_string(),
        related
            .iter()
            .map(|(phrase, volume)| KeywordRecord {
                phrase: (*phrase).to_string(),
                volume: Some(*volume),
            })
            .collect(),
    );

    let mut serps = vec![(seed.to_string(), serp_for(seed))];
    for (phrase, _) in related {
        serps.push((phrase.to_string(), serp_for(phrase)));
    }
    adapter.serps.extend(serps);

    adapter
}

fn serp_for(phrase: &str) -> SerpOverview {
    SerpOverview {
        phrase: phrase.to_string(),
        market: "se".to_string(),
        fetched_at: 1_700_000_000,
        source: SerpSource::AhrefsCached,
        entries: (1..=6)
            .map(|rank| RawSerpEntry {
                rank,
                url: format!("https://maklarsajt{rank}.se/{}", phrase.replace(' ', "-")),
                title: format!("{phrase} — jämför och hitta rätt"),
                description: "Jämför mäklare, arvoden och omdömen.".to_string(),
            })
            .collect(),
        related_queries: vec![],
    }
}
