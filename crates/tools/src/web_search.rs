//! Web search client backed by a Brave-Search-compatible JSON endpoint.
//!
//! Results are trimmed to title + snippet pairs. Any failure is reported as
//! a `SearchError`; the chat core degrades it to "no context".

use std::time::Duration;

use async_trait::async_trait;
use kaputa_core::error::SearchError;
use kaputa_core::retrieval::{SearchClient, SearchHit};
use serde::Deserialize;
use tracing::debug;

use crate::markup::strip_tags;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

pub struct WebSearchClient {
    api_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl WebSearchClient {
    pub fn new(api_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key,
            client: Self::build_client(DEFAULT_TIMEOUT),
        }
    }

    /// Replace the HTTP client timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = Self::build_client(timeout);
        self
    }

    fn build_client(timeout: Duration) -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default()
    }

    fn parse_results(body: &str, limit: usize) -> Result<Vec<SearchHit>, SearchError> {
        let parsed: ApiSearchResponse =
            serde_json::from_str(body).map_err(|e| SearchError::Parse(e.to_string()))?;

        Ok(parsed
            .web
            .map(|w| w.results)
            .unwrap_or_default()
            .into_iter()
            .filter(|r| !r.title.trim().is_empty() || !r.description.trim().is_empty())
            .take(limit)
            .map(|r| SearchHit {
                title: strip_markup(&r.title),
                snippet: strip_markup(&r.description),
                url: r.url,
            })
            .collect())
    }
}

#[async_trait]
impl SearchClient for WebSearchClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, SearchError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(SearchError::NotConfigured("no search API key".into()));
        };

        debug!(query = %query, limit, "Running web search");

        let response = self
            .client
            .get(&self.api_url)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", api_key)
            .query(&[("q", query), ("count", &limit.to_string())])
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(SearchError::Status(status));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        Self::parse_results(&body, limit)
    }
}

/// Drop highlight tags and decode the entities the API escapes.
fn strip_markup(s: &str) -> String {
    strip_tags(s)
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
}

#[derive(Debug, Deserialize)]
struct ApiSearchResponse {
    #[serde(default)]
    web: Option<ApiWebResults>,
}

#[derive(Debug, Deserialize)]
struct ApiWebResults {
    #[serde(default)]
    results: Vec<ApiWebResult>,
}

#[derive(Debug, Deserialize)]
struct ApiWebResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    url: Option<String>,
}
