//! Application configuration for SchoolIntel.
//!
//! User config lives at `~/.schoolintel/schoolintel.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchoolIntelError};
use crate::types::ExecutionMode;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "schoolintel.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".schoolintel";

// ---------------------------------------------------------------------------
// Config structs (matching schoolintel.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Search provider settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// OpenRouter (extraction model) settings.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Result cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Which enrichment stages run after basic research.
    #[serde(default)]
    pub stages: StagesConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Location hint appended to every query (e.g. a town or local authority).
    #[serde(default)]
    pub location: String,

    /// Fan-out strategy: "concurrent" or "sequential".
    #[serde(default = "default_mode")]
    pub mode: ExecutionMode,

    /// Overall deadline for researching one school, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Number of schools researched at once by `batch`.
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            location: String::new(),
            mode: default_mode(),
            request_timeout_secs: default_request_timeout(),
            batch_concurrency: default_batch_concurrency(),
        }
    }
}

fn default_mode() -> ExecutionMode {
    ExecutionMode::Concurrent
}
fn default_request_timeout() -> u64 {
    120
}
fn default_batch_concurrency() -> u32 {
    3
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Name of the env var holding the search API key (never store the key itself).
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    /// Search API base URL.
    #[serde(default = "default_search_base_url")]
    pub base_url: String,

    /// Country code used to localise results.
    #[serde(default = "default_country")]
    pub country: String,

    /// Cost charged per search request, in dollars.
    #[serde(default = "default_cost_per_search")]
    pub cost_per_search: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_search_key_env(),
            base_url: default_search_base_url(),
            country: default_country(),
            cost_per_search: default_cost_per_search(),
        }
    }
}

fn default_search_key_env() -> String {
    "SERPER_API_KEY".into()
}
fn default_search_base_url() -> String {
    "https://google.serper.dev".into()
}
fn default_country() -> String {
    "uk".into()
}
fn default_cost_per_search() -> f64 {
    0.001
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Chat-completions API base URL.
    #[serde(default = "default_openrouter_base_url")]
    pub base_url: String,

    /// Default model to use for extraction.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Sampling temperature; kept low for deterministic-leaning extraction.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Upper bound on completion tokens per extraction.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Blended price per 1000 tokens, in dollars.
    #[serde(default = "default_cost_per_1k_tokens")]
    pub cost_per_1k_tokens: f64,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_openrouter_base_url(),
            default_model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            cost_per_1k_tokens: default_cost_per_1k_tokens(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_openrouter_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_tokens() -> u32 {
    2000
}
fn default_cost_per_1k_tokens() -> f64 {
    0.0006
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether lookups and writes are performed at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Time-to-live for new entries, in hours.
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u32,

    /// Database file path (`~` is expanded).
    #[serde(default = "default_cache_path")]
    pub path: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_hours: default_ttl_hours(),
            path: default_cache_path(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_ttl_hours() -> u32 {
    24
}
fn default_cache_path() -> String {
    "~/.schoolintel/cache.db".into()
}

/// `[stages]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagesConfig {
    #[serde(default = "default_true")]
    pub financial: bool,
    #[serde(default = "default_true")]
    pub inspection: bool,
    #[serde(default = "default_true")]
    pub vacancy: bool,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            financial: true,
            inspection: true,
            vacancy: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Research config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime research configuration, merged from the config file and CLI flags.
#[derive(Debug, Clone)]
pub struct ResearchConfig {
    /// Default location hint when a request does not carry one.
    pub location: Option<String>,
    /// Fan-out strategy for searches and stages.
    pub mode: ExecutionMode,
    /// Overall deadline for one school, measured from the start of basic
    /// research; enrichment stages still running at it are abandoned.
    pub request_timeout: Option<Duration>,
    /// Schools researched at once in a batch.
    pub batch_concurrency: usize,
    /// Skip the cache lookup (results are still written).
    pub force_refresh: bool,
    /// Enabled enrichment stages.
    pub stages: StagesConfig,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for ResearchConfig {
    fn from(config: &AppConfig) -> Self {
        let location = config.defaults.location.trim();
        Self {
            location: (!location.is_empty()).then(|| location.to_string()),
            mode: config.defaults.mode,
            request_timeout: (config.defaults.request_timeout_secs > 0)
                .then(|| Duration::from_secs(config.defaults.request_timeout_secs)),
            batch_concurrency: config.defaults.batch_concurrency.max(1) as usize,
            force_refresh: false,
            stages: config.stages.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.schoolintel/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| SchoolIntelError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.schoolintel/schoolintel.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| SchoolIntelError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SchoolIntelError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| SchoolIntelError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SchoolIntelError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SchoolIntelError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SchoolIntelError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that both provider API key env vars are set and non-empty.
///
/// Missing credentials are the only condition that aborts a run.
pub fn validate_api_keys(config: &AppConfig) -> Result<()> {
    let required = [
        (&config.search.api_key_env, "Search", "https://serper.dev"),
        (&config.openrouter.api_key_env, "OpenRouter", "https://openrouter.ai/keys"),
    ];

    for (var_name, provider, signup) in required {
        match std::env::var(var_name) {
            Ok(val) if !val.is_empty() => {}
            _ => {
                return Err(SchoolIntelError::config(format!(
                    "{provider} API key not found. Set the {var_name} environment variable.\n\
                     Get a key at {signup}"
                )));
            }
        }
    }
    Ok(())
}
