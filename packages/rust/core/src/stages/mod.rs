//! Enrichment stages.
//!
//! A stage reads an immutable snapshot of the record and returns a
//! [`RecordDelta`]. Stages never see each other's output; the orchestrator
//! merges their deltas afterwards.

pub mod financial;
pub mod inspection;
pub mod vacancy;

use std::sync::Arc;

use async_trait::async_trait;

use schoolintel_crawler::PageFetcher;
use schoolintel_extraction::ExtractionProvider;
use schoolintel_search::{SearchHit, SearchProvider};
use schoolintel_shared::{ExecutionMode, RecordDelta, Result, SchoolRecord, StagesConfig};

pub use financial::FinancialStage;
pub use inspection::InspectionStage;
pub use vacancy::VacancyStage;

/// The enrichment stages, in merge order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageKind {
    Financial,
    Inspection,
    Vacancy,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [Self::Financial, Self::Inspection, Self::Vacancy];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Financial => "financial",
            Self::Inspection => "inspection",
            Self::Vacancy => "vacancy",
        }
    }

    pub fn is_enabled(&self, config: &StagesConfig) -> bool {
        match self {
            Self::Financial => config.financial,
            Self::Inspection => config.inspection,
            Self::Vacancy => config.vacancy,
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider handles shared by basic research and every stage.
#[derive(Clone)]
pub struct StageContext {
    pub search: Arc<dyn SearchProvider>,
    pub extractor: Arc<dyn ExtractionProvider>,
    pub fetcher: Arc<dyn PageFetcher>,
    /// Scheduling for a stage's own independent searches.
    pub mode: ExecutionMode,
}

/// One independently failing enrichment step.
#[async_trait]
pub trait EnrichmentStage: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Produce this stage's contribution for `record`.
    ///
    /// Internal fallbacks are the stage's own business; an `Err` means the
    /// stage has nothing to contribute.
    async fn run(&self, record: &SchoolRecord, ctx: &StageContext) -> Result<RecordDelta>;
}

/// The built-in stages enabled in `config`, in merge order.
pub fn standard_stages(config: &StagesConfig) -> Vec<Arc<dyn EnrichmentStage>> {
    StageKind::ALL
        .into_iter()
        .filter(|kind| kind.is_enabled(config))
        .map(|kind| -> Arc<dyn EnrichmentStage> {
            match kind {
                StageKind::Financial => Arc::new(FinancialStage),
                StageKind::Inspection => Arc::new(InspectionStage),
                StageKind::Vacancy => Arc::new(VacancyStage),
            }
        })
        .collect()
}

/// Search results as prompt lines, one per hit.
pub(crate) fn hits_text(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(SearchHit::to_prompt_line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Non-empty hit URLs in rank order.
pub(crate) fn hit_urls(hits: &[SearchHit]) -> impl Iterator<Item = String> + '_ {
    hits.iter()
        .filter(|h| !h.url.is_empty())
        .map(|h| h.url.clone())
}

/// Whole pounds with thousands separators, e.g. `£48,250`.
pub(crate) fn format_gbp(amount: f64) -> String {
    let whole = amount.round().abs() as u64;
    let digits = whole.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 2);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if amount < 0.0 {
        format!("-£{out}")
    } else {
        format!("£{out}")
    }
}
