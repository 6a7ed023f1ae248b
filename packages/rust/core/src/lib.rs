//! School research pipeline for SchoolIntel.
//!
//! This crate ties the search, extraction, crawler and storage crates into
//! end-to-end research: five basic searches and a profile extraction, then
//! the enrichment stages run side by side on one snapshot and merge in a
//! fixed order, with the result cached per school.

pub mod fanout;
pub mod orchestrator;
pub mod pipeline;
pub mod research;
pub mod stages;

#[cfg(test)]
mod testing;

pub use orchestrator::{Orchestrator, StageOutcome, StageReport};
pub use pipeline::{ProgressReporter, SchoolQuery, SchoolResearcher, SilentProgress};
pub use research::{QueryCategory, basic_research};
pub use stages::{EnrichmentStage, StageContext, StageKind, standard_stages};
