//! Capability-typed adapter contracts for the upstream providers
//!
//! The core never embeds HTTP details; adapters are injected. Retries are
//! the adapter's concern; the core observes a single success-or-failure
//! per call. Static in-memory implementations for tests and mock mode
//! live alongside the traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{AdapterError, AdapterResult};
use crate::types::{Phrase, SerpSource};

/// One keyword row from a keyword-data operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordRecord {
    pub phrase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u64>,
}

/// Seed-level metrics from the keywords explorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordOverview {
    pub phrase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<f64>,
}

/// Raw ranked SERP entry before enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSerpEntry {
    pub rank: usize,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// SERP snapshot as returned by a provider, before profile enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerpOverview {
    pub phrase: String,
    pub market: String,
    pub fetched_at: i64,
    pub source: SerpSource,
    pub entries: Vec<RawSerpEntry>,
    /// Related-search metadata carried on the SERP page, when present.
    #[serde(default)]
    pub related_queries: Vec<String>,
}

/// Scraped page content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedPage {
    pub url: String,
    pub title: String,
    pub content: String,
}

/// Gateway to the keyword-data provider: six named operations.
#[async_trait]
pub trait KeywordDataAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn serp_overview(&self, phrase: &Phrase) -> AdapterResult<SerpOverview>;

    async fn keywords_explorer_overview(&self, phrase: &Phrase) -> AdapterResult<KeywordOverview>;

    async fn organic_keywords(&self, phrase: &Phrase, limit: usize)
        -> AdapterResult<Vec<KeywordRecord>>;

    async fn related_terms(&self, phrase: &Phrase, limit: usize)
        -> AdapterResult<Vec<KeywordRecord>>;

    async fn matching_terms(&self, phrase: &Phrase, limit: usize)
        -> AdapterResult<Vec<KeywordRecord>>;

    async fn search_suggestions(&self, phrase: &Phrase, limit: usize)
        -> AdapterResult<Vec<KeywordRecord>>;
}

/// Gateway to the web-scrape provider; used only when the keyword-data
/// SERP endpoint is unavailable or incomplete.
#[async_trait]
pub trait WebScrapeAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(&self, query: &Phrase, limit: usize) -> AdapterResult<Vec<RawSerpEntry>>;

    async fn scrape(&self, url: &str) -> AdapterResult<ScrapedPage>;

    async fn batch_scrape(&self, urls: &[String]) -> AdapterResult<Vec<ScrapedPage>>;
}

/// Minimal chat-completion surface the strict-JSON layer drives.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_id(&self) -> &str;

    async fn complete(&self, system: &str, user: &str) -> AdapterResult<String>;
}

/// Optional SERP metadata source: one operation returning a
/// SerpProfile-shaped record for a phrase.
#[async_trait]
pub trait SerpMetadataSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn serp_profile(&self, phrase: &Phrase) -> AdapterResult<SerpOverview>;
}

// ---------------------------------------------------------------------------
// Static implementations for tests and mock mode

/// Keyword-data adapter backed by fixed in-memory tables.
#[derive(Default)]
pub struct StaticKeywordData {
    pub serps: BTreeMap<String, SerpOverview>,
    pub overviews: BTreeMap<String, KeywordOverview>,
    pub organic: BTreeMap<String, Vec<KeywordRecord>>,
    pub related: BTreeMap<String, Vec<KeywordRecord>>,
    pub matching: BTreeMap<String, Vec<KeywordRecord>>,
    pub suggestions: BTreeMap<String, Vec<KeywordRecord>>,
}

impl StaticKeywordData {
    fn rows(
        table: &BTreeMap<String, Vec<KeywordRecord>>,
        phrase: &Phrase,
        limit: usize,
    ) -> Vec<KeywordRecord> {
        table
            .get(&phrase.text)
            .map(|rows| rows.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl KeywordDataAdapter for StaticKeywordData {
    fn name(&self) -> &'static str {
        "static_keyword_data"
    }

    async fn serp_overview(&self, phrase: &Phrase) -> AdapterResult<SerpOverview> {
        self.serps
            .get(&phrase.text)
            .cloned()
            .ok_or_else(|| AdapterError::unavailable(format!("no SERP for '{}'", phrase.text)))
    }

    async fn keywords_explorer_overview(&self, phrase: &Phrase) -> AdapterResult<KeywordOverview> {
        self.overviews
            .get(&phrase.text)
            .cloned()
            .ok_or_else(|| AdapterError::unavailable(format!("no overview for '{}'", phrase.text)))
    }

    async fn organic_keywords(
        &self,
        phrase: &Phrase,
        limit: usize,
    ) -> AdapterResult<Vec<KeywordRecord>> {
        Ok(Self::rows(&self.organic, phrase, limit))
    }

    async fn related_terms(
        &self,
        phrase: &Phrase,
        limit: usize,
    ) -> AdapterResult<Vec<KeywordRecord>> {
        Ok(Self::rows(&self.related, phrase, limit))
    }

    async fn matching_terms(
        &self,
        phrase: &Phrase,
        limit: usize,
    ) -> AdapterResult<Vec<KeywordRecord>> {
        Ok(Self::rows(&self.matching, phrase, limit))
    }

    async fn search_suggestions(
        &self,
        phrase: &Phrase,
        limit: usize,
    ) -> AdapterResult<Vec<KeywordRecord>> {
        Ok(Self::rows(&self.suggestions, phrase, limit))
    }
}

/// Keyword-data adapter whose every operation fails with the given category.
pub struct UnavailableKeywordData;

#[async_trait]
impl KeywordDataAdapter for UnavailableKeywordData {
    fn name(&self) -> &'static str {
        "unavailable_keyword_data"
    }

    async fn serp_overview(&self, _phrase: &Phrase) -> AdapterResult<SerpOverview> {
        Err(AdapterError::unavailable("provider down"))
    }

    async fn keywords_explorer_overview(&self, _phrase: &Phrase) -> AdapterResult<KeywordOverview> {
        Err(AdapterError::unavailable("provider down"))
    }

    async fn organic_keywords(
        &self,
        _phrase: &Phrase,
        _limit: usize,
    ) -> AdapterResult<Vec<KeywordRecord>> {
        Err(AdapterError::unavailable("provider down"))
    }

    async fn related_terms(
        &self,
        _phrase: &Phrase,
        _limit: usize,
    ) -> AdapterResult<Vec<KeywordRecord>> {
        Err(AdapterError::unavailable("provider down"))
    }

    async fn matching_terms(
        &self,
        _phrase: &Phrase,
        _limit: usize,
    ) -> AdapterResult<Vec<KeywordRecord>> {
        Err(AdapterError::unavailable("provider down"))
    }

    async fn search_suggestions(
        &self,
        _phrase: &Phrase,
        _limit: usize,
    ) -> AdapterResult<Vec<KeywordRecord>> {
        Err(AdapterError::unavailable("provider down"))
    }
}

/// SERP metadata source backed by fixed in-memory overviews.
#[derive(Default)]
pub struct StaticSerpMetadata {
    pub overviews: BTreeMap<String, SerpOverview>,
}

#[async_trait]
impl SerpMetadataSource for StaticSerpMetadata {
    fn name(&self) -> &'static str {
        "static_serp_metadata"
    }

    async fn serp_profile(&self, phrase: &Phrase) -> AdapterResult<SerpOverview> {
        self.overviews
            .get(&phrase.text)
            .cloned()
            .ok_or_else(|| AdapterError::unavailable(format!("no metadata for '{}'", phrase.text)))
    }
}

/// Web-scrape adapter backed by fixed in-memory search results.
#[derive(Default)]
pub struct StaticScrape {
    pub searches: BTreeMap<String, Vec<RawSerpEntry>>,
}

#[async_trait]
impl WebScrapeAdapter for StaticScrape {
    fn name(&self) -> &'static str {
        "static_scrape"
    }

    async fn search(&self, query: &Phrase, limit: usize) -> AdapterResult<Vec<RawSerpEntry>> {
        match self.searches.get(&query.text) {
            Some(entries) => Ok(entries.iter().take(limit).cloned().collect()),
            None => Err(AdapterError::unavailable(format!(
                "no scrape results for '{}'",
                query.text
            ))),
        }
    }

    async fn scrape(&self, url: &str) -> AdapterResult<ScrapedPage> {
        Err(AdapterError::unavailable(format!("no page for {url}")))
    }

    async fn batch_scrape(&self, _urls: &[String]) -> AdapterResult<Vec<ScrapedPage>> {
        Ok(vec![])
    }
}

/// Chat model that replays a scripted queue of responses and records
/// every prompt it receives.
pub struct ScriptedChatModel {
    model: String,
    responses: Mutex<std::collections::VecDeque<String>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedChatModel {
    pub fn new(model: impl Into<String>, responses: Vec<String>) -> Self {
        Self {
            model: model.into(),
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Number of completions served so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Recorded (system, user) prompt pairs.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> AdapterResult<String> {
        self.calls
            .lock()
            .unwrap()
            .push((system.to_string(), user.to_string()));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AdapterError::unavailable("scripted responses exhausted"))
    }
}

/// Chat model that answers every request with the same response.
pub struct RepeatingChatModel {
    model: String,
    response: String,
    calls: Mutex<usize>,
}

impl RepeatingChatModel {
    pub fn new(model: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            response: response.into(),
            calls: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ChatModel for RepeatingChatModel {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, _system: &str, _user: &str) -> AdapterResult<String> {
        *self.calls.lock().unwrap() += 1;
        Ok(self.response.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_keyword_data_serves_tables_and_misses() {
        let phrase = Phrase::new("mäklare stockholm", "sv", "se");
        let mut adapter = StaticKeywordData::default();
        adapter.related.insert(
            phrase.text.clone(),
            vec![KeywordRecord { phrase: "bästa mäklare".into(), volume: Some(100) }],
        );

        let rows = adapter.related_terms(&phrase, 10).await.unwrap();
        assert_eq!(rows.len(), 1);

        let missing = adapter.serp_overview(&phrase).await;
        assert!(matches!(missing, Err(AdapterError::ProviderUnavailable { .. })));
    }

    #[tokio::test]
    async fn scripted_chat_model_replays_and_records() {
        let model = ScriptedChatModel::new("test-model", vec!["one".into(), "two".into()]);
        assert_eq!(model.complete("sys", "usr").await.unwrap(), "one");
        assert_eq!(model.complete("sys", "usr2").await.unwrap(), "two");
        assert!(model.complete("sys", "usr3").await.is_err());
        assert_eq!(model.call_count(), 3);
    }
}
