//! Shared types, error model, and configuration for SchoolIntel.
//!
//! This crate is the foundation depended on by all other SchoolIntel crates.
//! It provides:
//! - [`SchoolIntelError`], the unified error type
//! - Domain types ([`SchoolRecord`], [`Contact`], [`ConversationStarter`], …)
//! - The [`RecordDelta`] merge rules and the data-quality score
//! - [`UsageCounters`] for search/token/cost accounting
//! - Configuration ([`AppConfig`], [`ResearchConfig`], config loading)

pub mod config;
pub mod delta;
pub mod error;
pub mod quality;
pub mod types;
pub mod usage;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CacheConfig, DefaultsConfig, OpenRouterConfig, ResearchConfig, SearchConfig,
    StagesConfig, config_dir, config_file_path, expand_home, init_config, load_config,
    load_config_from, validate_api_keys,
};
pub use delta::RecordDelta;
pub use error::{Result, SchoolIntelError};
pub use quality::data_quality_score;
pub use types::{
    CompetitorPresence, Contact, ContactRole, ConversationStarter, ExecutionMode, FinancialData,
    ImprovementArea, InspectionAnalysis, NOT_FOUND, OfstedRating, PresenceType, ProcessingMeta,
    RecordId, SchoolRecord, Vacancy, VacancyData, present, website_url,
};
pub use usage::{UsageCounters, UsageSnapshot};
