//! Serper (Google Search API) implementation of [`SearchProvider`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use schoolintel_shared::{Result, SchoolIntelError, SearchConfig, UsageCounters};

use crate::{HitKind, SearchHit, SearchOutcome, SearchProvider};

/// Default timeout in seconds for one search request.
const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// User-Agent string for search requests.
const USER_AGENT: &str = concat!("SchoolIntel/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Connection settings for [`SerperSearch`].
#[derive(Debug, Clone)]
pub struct SerperOptions {
    /// API root, e.g. `https://google.serper.dev`.
    pub base_url: String,
    /// Country code passed as `gl`.
    pub country: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Dollars charged per request.
    pub cost_per_search: f64,
}

impl Default for SerperOptions {
    fn default() -> Self {
        Self::from(&SearchConfig::default())
    }
}

impl From<&SearchConfig> for SerperOptions {
    fn from(config: &SearchConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            country: config.country.clone(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            cost_per_search: config.cost_per_search,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    num: usize,
    gl: &'a str,
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default, rename = "knowledgeGraph")]
    knowledge_graph: Option<KnowledgeGraph>,
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
struct KnowledgeGraph {
    #[serde(default)]
    title: String,
    #[serde(default)]
    website: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    attributes: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    title: String,
    link: String,
    #[serde(default)]
    snippet: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Serper API client.
pub struct SerperSearch {
    client: Client,
    api_key: String,
    options: SerperOptions,
    usage: Arc<UsageCounters>,
}

impl SerperSearch {
    /// Create a client with an explicit API key.
    pub fn new(api_key: String, options: SerperOptions, usage: Arc<UsageCounters>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(options.timeout)
            .build()
            .map_err(|e| SchoolIntelError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            options,
            usage,
        })
    }

    /// Create a client reading the API key from the env var named in config.
    pub fn from_config(config: &SearchConfig, usage: Arc<UsageCounters>) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            SchoolIntelError::config(format!("{} is not set", config.api_key_env))
        })?;
        Self::new(api_key, SerperOptions::from(config), usage)
    }

    async fn request(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let url = format!("{}/search", self.options.base_url);
        let body = SerperRequest {
            q: query,
            num: max_results,
            gl: &self.options.country,
        };

        let response = self
            .client
            .post(&url)
            .header("X-API-KEY", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SchoolIntelError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SchoolIntelError::Network(format!("{url}: HTTP {status}")));
        }

        let parsed: SerperResponse = response
            .json()
            .await
            .map_err(|e| SchoolIntelError::parse(format!("{url}: invalid response body: {e}")))?;

        Ok(to_hits(parsed, max_results))
    }
}

/// Map the wire response to ranked hits, panel first.
fn to_hits(response: SerperResponse, max_results: usize) -> Vec<SearchHit> {
    let mut hits = Vec::with_capacity(max_results + 1);

    if let Some(panel) = response.knowledge_graph {
        let mut parts: Vec<String> = panel.description.into_iter().collect();
        parts.extend(panel.attributes.iter().map(|(k, v)| match v {
            serde_json::Value::String(s) => format!("{k}: {s}"),
            other => format!("{k}: {other}"),
        }));
        hits.push(SearchHit {
            title: panel.title,
            url: panel.website.unwrap_or_default(),
            snippet: parts.join("; "),
            rank: 0,
            kind: HitKind::KnowledgePanel,
        });
    }

    hits.extend(
        response
            .organic
            .into_iter()
            .take(max_results)
            .enumerate()
            .map(|(i, r)| SearchHit {
                title: r.title,
                url: r.link,
                snippet: r.snippet,
                rank: i as u32 + 1,
                kind: HitKind::Organic,
            }),
    );

    hits
}

#[async_trait]
impl SearchProvider for SerperSearch {
    fn name(&self) -> &str {
        "serper"
    }

    async fn search(&self, query: &str, max_results: usize) -> SearchOutcome {
        self.usage.record_search(self.options.cost_per_search);

        match self.request(query, max_results).await {
            Ok(hits) if hits.is_empty() => {
                debug!(query, "search returned no results");
                SearchOutcome::NotFound
            }
            Ok(hits) => {
                debug!(query, results = hits.len(), "search complete");
                SearchOutcome::Found(hits)
            }
            Err(e) => {
                warn!(query, error = %e, "search failed, continuing with no results");
                SearchOutcome::ProviderError(e.to_string())
            }
        }
    }
}
