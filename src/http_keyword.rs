//! HTTP client for a keyword-metrics API exposing the six operations

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::adapters::{
    KeywordDataAdapter, KeywordOverview, KeywordRecord, RawSerpEntry, SerpOverview,
};
use crate::error::{AdapterError, AdapterResult};
use crate::types::{Phrase, SerpSource};

#[derive(Debug, Clone)]
pub struct HttpKeywordData {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SerpOverviewResponse {
    #[serde(default)]
    fetched_at: Option<i64>,
    #[serde(default)]
    cached: bool,
    results: Vec<SerpRow>,
    #[serde(default)]
    related_queries: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SerpRow {
    rank: usize,
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct OverviewResponse {
    #[serde(default)]
    volume: Option<u64>,
    #[serde(default)]
    difficulty: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct KeywordRows {
    keywords: Vec<KeywordRow>,
}

#[derive(Debug, Deserialize)]
struct KeywordRow {
    phrase: String,
    #[serde(default)]
    volume: Option<u64>,
}

impl HttpKeywordData {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> AdapterResult<T> {
        debug!("keyword-data GET {url}");
        let mut builder = self.client.get(url);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AdapterError::unavailable(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => AdapterError::AuthMissing { message: format!("{status}: {body}") },
                429 => AdapterError::RateLimited { message: format!("{status}: {body}") },
                _ => AdapterError::unavailable(format!("{status}: {body}")),
            });
        }

        response
            .json()
            .await
            .map_err(|e| AdapterError::malformed(format!("response body: {e}")))
    }

    fn list_url(&self, endpoint: &str, phrase: &Phrase, limit: usize) -> String {
        format!(
            "{}/{}?phrase={}&market={}&limit={}",
            self.base_url,
            endpoint,
            urlencoding::encode(&phrase.text),
            phrase.market,
            limit
        )
    }

    async fn keyword_list(
        &self,
        endpoint: &str,
        phrase: &Phrase,
        limit: usize,
    ) -> AdapterResult<Vec<KeywordRecord>> {
        let rows: KeywordRows = self.get_json(&self.list_url(endpoint, phrase, limit)).await?;
        Ok(rows
            .keywords
            .into_iter()
            .map(|r| KeywordRecord { phrase: r.phrase, volume: r.volume })
            .collect())
    }

    /// Health check
    pub async fn health_check(&self) -> AdapterResult<bool> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AdapterError::unavailable(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

#[async_trait]
impl KeywordDataAdapter for HttpKeywordData {
    fn name(&self) -> &'static str {
        "http_keyword_data"
    }

    async fn serp_overview(&self, phrase: &Phrase) -> AdapterResult<SerpOverview> {
        let url = format!(
            "{}/serp-overview?phrase={}&market={}",
            self.base_url,
            urlencoding::encode(&phrase.text),
            phrase.market
        );
        let response: SerpOverviewResponse = self.get_json(&url).await?;

        Ok(SerpOverview {
            phrase: phrase.text.clone(),
            market: phrase.market.clone(),
            fetched_at: response.fetched_at.unwrap_or(0),
            source: if response.cached {
                SerpSource::AhrefsCached
            } else {
                SerpSource::Live
            },
            entries: response
                .results
                .into_iter()
                .map(|r| RawSerpEntry {
                    rank: r.rank,
                    url: r.url,
                    title: r.title,
                    description: r.description,
                })
                .collect(),
            related_queries: response.related_queries,
        })
    }

    async fn keywords_explorer_overview(&self, phrase: &Phrase) -> AdapterResult<KeywordOverview> {
        let url = format!(
            "{}/keywords-explorer-overview?phrase={}&market={}",
            self.base_url,
            urlencoding::encode(&phrase.text),
            phrase.market
        );
        let response: OverviewResponse = self.get_json(&url).await?;
        Ok(KeywordOverview {
            phrase: phrase.text.clone(),
            volume: response.volume,
            difficulty: response.difficulty,
        })
    }

    async fn organic_keywords(
        &self,
        phrase: &Phrase,
        limit: usize,
    ) -> AdapterResult<Vec<KeywordRecord>> {
        self.keyword_list("organic-keywords", phrase, limit).await
    }

    async fn related_terms(
        &self,
        phrase: &Phrase,
        limit: usize,
    ) -> AdapterResult<Vec<KeywordRecord>> {
        self.keyword_list("related-terms", phrase, limit).await
    }

    async fn matching_terms(
        &self,
        phrase: &Phrase,
        limit: usize,
    ) -> AdapterResult<Vec<KeywordRecord>> {
        self.keyword_list("matching-terms", phrase, limit).await
    }

    async fn search_suggestions(
        &self,
        phrase: &Phrase,
        limit: usize,
    ) -> AdapterResult<Vec<KeywordRecord>> {
        self.keyword_list("search-suggestions", phrase, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires a running keyword-metrics API
    async fn health_check_integration() {
        let client = HttpKeywordData::new("http://127.0.0.1:8090", None);
        let health = client.health_check().await;
        assert!(health.is_ok());
    }
}
