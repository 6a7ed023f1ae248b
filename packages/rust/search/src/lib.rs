//! Web search adapter.
//!
//! A [`SearchProvider`] turns a query into ranked result snippets. Providers
//! never fail outward: upstream errors and timeouts come back as
//! [`SearchOutcome::ProviderError`], which fan-out callers treat as an empty
//! list so the rest of a research burst can proceed with partial data.
//!
//! Providers take `&self` and keep no per-call mutable state, so one instance
//! can serve many simultaneous searches. Shared usage accounting goes through
//! [`schoolintel_shared::UsageCounters`].

mod serper;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use serper::{SerperOptions, SerperSearch};

/// Distinguishes the optional leading summary panel from ordinary results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitKind {
    KnowledgePanel,
    Organic,
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// 1-based position; the knowledge panel, when present, is rank 0.
    pub rank: u32,
    pub kind: HitKind,
}

impl SearchHit {
    /// Compact text form used when building extraction prompts.
    pub fn to_prompt_line(&self) -> String {
        format!("- {} ({})\n  {}", self.title, self.url, self.snippet)
    }
}

/// Result of one search call.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// At least one result.
    Found(Vec<SearchHit>),
    /// The provider answered but had nothing.
    NotFound,
    /// Transport failure, timeout, non-2xx, or undecodable payload.
    ProviderError(String),
}

impl SearchOutcome {
    /// The results, or an empty list for `NotFound` / `ProviderError`.
    pub fn into_hits(self) -> Vec<SearchHit> {
        match self {
            Self::Found(hits) => hits,
            Self::NotFound | Self::ProviderError(_) => Vec::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::ProviderError(_))
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Found(_) => "found",
            Self::NotFound => "not_found",
            Self::ProviderError(_) => "provider_error",
        }
    }
}

/// A web search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Run `query`, returning at most `max_results` organic results
    /// (optionally preceded by a single knowledge-panel hit).
    async fn search(&self, query: &str, max_results: usize) -> SearchOutcome;
}
