//! SerpProfile construction: enrichment of raw SERP entries and the
//! derived top-5 distributions
//!
//! Per-result page type, perspective, and intent are derived from cheap
//! deterministic cues in the URL, title, and description. The LLM never
//! sees or produces these rows directly.

use std::collections::BTreeMap;

use crate::adapters::{RawSerpEntry, SerpOverview};
use crate::taxonomy::{self, Taxonomy};
use crate::types::{
    IntentLabel, PageFormat, Perspective, Phrase, SerpProfile, SerpResult, SerpSource,
};

/// How many results feed the distribution maps.
const DISTRIBUTION_TOP_N: usize = 5;

/// Enrich a provider SERP snapshot into a full profile.
pub fn profile_from_overview(overview: &SerpOverview, taxonomy: &Taxonomy) -> SerpProfile {
    let mut results: Vec<SerpResult> = overview
        .entries
        .iter()
        .map(|entry| enrich(entry, taxonomy))
        .collect();
    results.sort_by_key(|r| r.rank);

    let mut profile = SerpProfile {
        query: overview.phrase.clone(),
        market: overview.market.clone(),
        fetched_at: overview.fetched_at,
        source: overview.source,
        results,
        intent_distribution: BTreeMap::new(),
        perspective_distribution: BTreeMap::new(),
        page_type_distribution: BTreeMap::new(),
    };
    compute_distributions(&mut profile);
    profile
}

/// Profile from web-scrape search results.
pub fn profile_from_scrape(
    phrase: &Phrase,
    entries: &[RawSerpEntry],
    fetched_at: i64,
    taxonomy: &Taxonomy,
) -> SerpProfile {
    let overview = SerpOverview {
        phrase: phrase.text.clone(),
        market: phrase.market.clone(),
        fetched_at,
        source: SerpSource::Scraped,
        entries: entries.to_vec(),
        related_queries: vec![],
    };
    profile_from_overview(&overview, taxonomy)
}

/// Offline synthetic profile: no results, no distributions. Downstream
/// confidence is capped whenever this source appears in a node's chain.
pub fn synthetic_profile(phrase: &Phrase, fetched_at: i64) -> SerpProfile {
    SerpProfile {
        query: phrase.text.clone(),
        market: phrase.market.clone(),
        fetched_at,
        source: SerpSource::OfflineSynthetic,
        results: vec![],
        intent_distribution: BTreeMap::new(),
        perspective_distribution: BTreeMap::new(),
        page_type_distribution: BTreeMap::new(),
    }
}

fn enrich(entry: &RawSerpEntry, taxonomy: &Taxonomy) -> SerpResult {
    let haystack = format!(
        "{} {} {}",
        entry.url.to_lowercase(),
        entry.title.to_lowercase(),
        entry.description.to_lowercase()
    );

    let key_concepts = key_concepts(&entry.title, taxonomy);

    SerpResult {
        rank: entry.rank,
        url: entry.url.clone(),
        title: entry.title.clone(),
        description: entry.description.clone(),
        page_type: classify_page_type(&haystack),
        perspective: classify_perspective(&haystack),
        intent: classify_intent(&haystack),
        key_concepts,
    }
}

/// Taxonomy tokens surfaced by the result title.
fn key_concepts(title: &str, taxonomy: &Taxonomy) -> Vec<String> {
    let mut concepts = Vec::new();
    for token in taxonomy::tokens(&taxonomy::normalize_phrase(title)) {
        let mapped = taxonomy.map_concept(&token);
        if mapped.known && !concepts.contains(&mapped.token) {
            concepts.push(mapped.token);
        }
    }
    concepts
}

fn classify_page_type(haystack: &str) -> PageFormat {
    const RULES: &[(&str, PageFormat)] = &[
        ("/forum", PageFormat::Forum),
        ("reddit.", PageFormat::Forum),
        ("flashback.", PageFormat::Forum),
        ("faq", PageFormat::Faq),
        ("kalkyl", PageFormat::Calculator),
        ("calculator", PageFormat::Calculator),
        ("jämför", PageFormat::ComparisonPage),
        ("compare", PageFormat::ComparisonPage),
        (" vs ", PageFormat::ComparisonPage),
        ("/category", PageFormat::CategoryPage),
        ("/kategori", PageFormat::CategoryPage),
        ("/product", PageFormat::ProductPage),
        ("/produkt", PageFormat::ProductPage),
        ("topp", PageFormat::Listing),
        ("top 10", PageFormat::Listing),
        ("bästa", PageFormat::Listing),
        ("best ", PageFormat::Listing),
        ("guide", PageFormat::Guide),
        ("hur ", PageFormat::Guide),
        ("how to", PageFormat::Guide),
        ("nyheter", PageFormat::News),
        ("/news", PageFormat::News),
    ];
    for (needle, format) in RULES {
        if haystack.contains(needle) {
            return *format;
        }
    }
    PageFormat::Article
}

fn classify_perspective(haystack: &str) -> Perspective {
    const RULES: &[(&str, Perspective)] = &[
        ("myndighet", Perspective::Regulator),
        ("skatteverket", Perspective::Regulator),
        ("konsumentverket", Perspective::Regulator),
        (".gov", Perspective::Regulator),
        ("lär dig", Perspective::Educator),
        ("learn", Perspective::Educator),
        ("vad är", Perspective::Educator),
        ("what is", Perspective::Educator),
        ("vi erbjuder", Perspective::Provider),
        ("we offer", Perspective::Provider),
        ("ansök", Perspective::Provider),
        ("köp ", Perspective::Provider),
        ("boka", Perspective::Provider),
        ("tips", Perspective::Advisor),
        ("råd", Perspective::Advisor),
        ("recension", Perspective::Advisor),
        ("review", Perspective::Advisor),
        ("jag ", Perspective::Seeker),
        ("hjälp", Perspective::Seeker),
    ];
    for (needle, perspective) in RULES {
        if haystack.contains(needle) {
            return *perspective;
        }
    }
    Perspective::Neutral
}

fn classify_intent(haystack: &str) -> IntentLabel {
    const RULES: &[(&str, IntentLabel)] = &[
        ("köp", IntentLabel::Transactional),
        ("ansök", IntentLabel::Transactional),
        ("buy", IntentLabel::Transactional),
        ("pris", IntentLabel::CommercialInvestigation),
        ("price", IntentLabel::CommercialInvestigation),
        ("kostnad", IntentLabel::CommercialInvestigation),
        ("jämför", IntentLabel::Comparison),
        ("compare", IntentLabel::Comparison),
        (" vs ", IntentLabel::Comparison),
        ("bästa", IntentLabel::CommercialInvestigation),
        ("best ", IntentLabel::CommercialInvestigation),
        ("logga in", IntentLabel::Navigational),
        ("login", IntentLabel::Navigational),
        ("hur ", IntentLabel::Educational),
        ("how to", IntentLabel::Educational),
        ("guide", IntentLabel::Educational),
        ("vad är", IntentLabel::Informational),
        ("what is", IntentLabel::Informational),
    ];
    for (needle, intent) in RULES {
        if haystack.contains(needle) {
            return *intent;
        }
    }
    IntentLabel::Informational
}

/// Fill the three distribution maps from the top-5 results.
fn compute_distributions(profile: &mut SerpProfile) {
    let top: Vec<&SerpResult> = profile.results.iter().take(DISTRIBUTION_TOP_N).collect();
    if top.is_empty() {
        return;
    }
    let total = top.len() as f64;

    let mut intents: BTreeMap<String, f64> = BTreeMap::new();
    let mut perspectives: BTreeMap<String, f64> = BTreeMap::new();
    let mut page_types: BTreeMap<String, f64> = BTreeMap::new();
    for result in &top {
        *intents.entry(result.intent.as_str().to_string()).or_insert(0.0) += 1.0;
        *perspectives
            .entry(result.perspective.as_str().to_string())
            .or_insert(0.0) += 1.0;
        *page_types
            .entry(result.page_type.as_str().to_string())
            .or_insert(0.0) += 1.0;
    }
    for map in [&mut intents, &mut perspectives, &mut page_types] {
        for value in map.values_mut() {
            *value /= total;
        }
    }

    profile.intent_distribution = intents;
    profile.perspective_distribution = perspectives;
    profile.page_type_distribution = page_types;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(rank: usize, url: &str, title: &str, description: &str) -> RawSerpEntry {
        RawSerpEntry {
            rank,
            url: url.to_string(),
            title: title.to_string(),
            description: description.to_string(),
        }
    }

    fn overview(entries: Vec<RawSerpEntry>) -> SerpOverview {
        SerpOverview {
            phrase: "mäklare stockholm".into(),
            market: "se".into(),
            fetched_at: 1_700_000_000,
            source: SerpSource::AhrefsCached,
            entries,
            related_queries: vec![],
        }
    }

    #[test]
    fn distributions_cover_top_five_and_sum_to_one() {
        let tax = Taxonomy::default_for_market("se");
        let entries: Vec<RawSerpEntry> = (1..=8)
            .map(|rank| {
                entry(
                    rank,
                    &format!("https://example{rank}.se/"),
                    "Bästa mäklare i Stockholm",
                    "",
                )
            })
            .collect();
        let profile = profile_from_overview(&overview(entries), &tax);

        assert_eq!(profile.results.len(), 8);
        let sum: f64 = profile.intent_distribution.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        // "bästa" marks commercial investigation and a listing page
        assert!(profile.intent_distribution.contains_key("commercial_investigation"));
        assert!(profile.page_type_distribution.contains_key("listing"));
    }

    #[test]
    fn key_concepts_come_from_the_taxonomy_only() {
        let tax = Taxonomy::default_for_market("se");
        let profile = profile_from_overview(
            &overview(vec![entry(
                1,
                "https://a.se/",
                "Bästa mäklare — pris och omdöme",
                "",
            )]),
            &tax,
        );
        let concepts = &profile.results[0].key_concepts;
        assert!(concepts.contains(&"CHOICE".to_string()));
        assert!(concepts.contains(&"AGENT".to_string()));
        assert!(concepts.contains(&"COST".to_string()));
        assert!(concepts.iter().all(|c| !c.starts_with("NEW:")));
    }

    #[test]
    fn synthetic_profile_is_empty_and_tagged() {
        let phrase = Phrase::new("mäklare", "sv", "se");
        let profile = synthetic_profile(&phrase, 42);
        assert!(profile.is_synthetic());
        assert!(profile.results.is_empty());
        assert!(profile.intent_distribution.is_empty());
        assert_eq!(profile.fetched_at, 42);
    }
}
