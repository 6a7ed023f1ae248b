//! Search/token/cost accounting shared by concurrently running provider calls.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Monotonic usage counters. One instance per researcher, shared by `Arc`
/// into every provider adapter; all updates are single atomic increments.
#[derive(Debug, Default)]
pub struct UsageCounters {
    searches: AtomicU64,
    extractions: AtomicU64,
    tokens_in: AtomicU64,
    tokens_out: AtomicU64,
    /// Running cost in micro-dollars.
    cost_micros: AtomicU64,
}

impl UsageCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one search request and its price.
    pub fn record_search(&self, cost_usd: f64) {
        self.searches.fetch_add(1, Ordering::Relaxed);
        self.add_cost(cost_usd);
    }

    /// Count one model call with its token usage and price.
    pub fn record_extraction(&self, tokens_in: u64, tokens_out: u64, cost_usd: f64) {
        self.extractions.fetch_add(1, Ordering::Relaxed);
        self.tokens_in.fetch_add(tokens_in, Ordering::Relaxed);
        self.tokens_out.fetch_add(tokens_out, Ordering::Relaxed);
        self.add_cost(cost_usd);
    }

    fn add_cost(&self, cost_usd: f64) {
        if cost_usd > 0.0 {
            let micros = (cost_usd * 1_000_000.0).round() as u64;
            self.cost_micros.fetch_add(micros, Ordering::Relaxed);
        }
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            searches: self.searches.load(Ordering::Relaxed),
            extractions: self.extractions.load(Ordering::Relaxed),
            tokens_in: self.tokens_in.load(Ordering::Relaxed),
            tokens_out: self.tokens_out.load(Ordering::Relaxed),
            cost_micros: self.cost_micros.load(Ordering::Relaxed),
        }
    }
}

/// Plain-data view of [`UsageCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub searches: u64,
    pub extractions: u64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_micros: u64,
}

impl UsageSnapshot {
    /// Usage accrued between `earlier` and `self`.
    pub fn since(&self, earlier: &UsageSnapshot) -> UsageSnapshot {
        UsageSnapshot {
            searches: self.searches.saturating_sub(earlier.searches),
            extractions: self.extractions.saturating_sub(earlier.extractions),
            tokens_in: self.tokens_in.saturating_sub(earlier.tokens_in),
            tokens_out: self.tokens_out.saturating_sub(earlier.tokens_out),
            cost_micros: self.cost_micros.saturating_sub(earlier.cost_micros),
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.tokens_in + self.tokens_out
    }

    pub fn cost_usd(&self) -> f64 {
        self.cost_micros as f64 / 1_000_000.0
    }
}
