//! Search backend seam and the Bocha web-search client.

use serde::{Deserialize, Serialize};
use va_domain::config::{Freshness, SearchConfig};
use va_domain::error::{Error, Result};
use va_providers::from_reqwest;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A fully-defaulted search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// Never blank.
    pub query: String,
    pub freshness: Freshness,
    /// Always positive.
    pub result_count: u32,
    pub want_summary: bool,
}

/// One search result, in the order the backend ranked it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub published_at: String,
}

/// Something that can run a web search.
#[async_trait::async_trait]
pub trait SearchBackend: Send + Sync {
    /// Run one search. An empty vec is a valid answer.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bocha client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Serialize)]
struct BochaRequest<'a> {
    query: &'a str,
    freshness: Freshness,
    summary: bool,
    count: u32,
}

#[derive(Debug, Deserialize)]
struct BochaResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<BochaData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BochaData {
    #[serde(default)]
    web_pages: Option<BochaWebPages>,
}

#[derive(Debug, Default, Deserialize)]
struct BochaWebPages {
    #[serde(default)]
    value: Vec<BochaPage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BochaPage {
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    date_published: Option<String>,
}

impl From<BochaPage> for SearchHit {
    fn from(p: BochaPage) -> Self {
        let snippet = if p.snippet.trim().is_empty() {
            p.summary.unwrap_or_default()
        } else {
            p.snippet
        };
        SearchHit {
            title: p.name,
            url: p.url,
            snippet,
            published_at: p.date_published.unwrap_or_default(),
        }
    }
}

/// Client for the Bocha web-search API.
pub struct BochaClient {
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl BochaClient {
    pub fn from_config(cfg: &SearchConfig) -> Result<Self> {
        let api_key = if cfg.auth.is_configured() {
            Some(cfg.auth.resolve()?)
        } else {
            None
        };

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_sec))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            url: cfg.base_url.clone(),
            api_key,
            client,
        })
    }
}

#[async_trait::async_trait]
impl SearchBackend for BochaClient {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| Error::Auth("search API key is not configured".into()))?;

        let body = BochaRequest {
            query: &query.query,
            freshness: query.freshness,
            summary: query.want_summary,
            count: query.result_count,
        };

        tracing::debug!(url = %self.url, query = %query.query, count = query.result_count, "bocha search request");

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(Error::Search(format!("HTTP {} - {}", status.as_u16(), text)));
        }

        let parsed: BochaResponse = serde_json::from_str(&text)
            .map_err(|e| Error::Search(format!("decoding response: {e}")))?;

        if parsed.code != 200 {
            return Err(Error::Search(format!(
                "business error code={} msg={}",
                parsed.code,
                parsed.msg.unwrap_or_default()
            )));
        }

        Ok(parsed
            .data
            .and_then(|d| d.web_pages)
            .map(|w| w.value)
            .unwrap_or_default()
            .into_iter()
            .map(SearchHit::from)
            .collect())
    }
}
