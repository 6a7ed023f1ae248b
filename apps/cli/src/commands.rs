//! CLI command definitions, routing, and tracing setup.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use schoolintel_core::{
    ProgressReporter, SchoolQuery, SchoolResearcher, StageContext, StageReport,
};
use schoolintel_crawler::{FetcherOptions, HttpFetcher};
use schoolintel_extraction::OpenRouterExtractor;
use schoolintel_search::SerperSearch;
use schoolintel_shared::{
    AppConfig, ExecutionMode, ResearchConfig, SchoolRecord, UsageCounters, expand_home,
    init_config, load_config, validate_api_keys,
};
use schoolintel_storage::Cache;
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// SchoolIntel: sales-intelligence dossiers for UK schools.
#[derive(Parser)]
#[command(
    name = "schoolintel",
    version,
    about = "Build sales-intelligence dossiers on UK schools from web search and model extraction.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Flags shared by `research` and `batch`.
#[derive(clap::Args)]
pub(crate) struct ResearchArgs {
    /// Ignore cached dossiers (the fresh result is still cached).
    #[arg(long)]
    pub force: bool,

    /// Run searches and stages one at a time.
    #[arg(long)]
    pub sequential: bool,

    /// Do not read or write the cache.
    #[arg(long)]
    pub no_cache: bool,

    /// Print the full record(s) as JSON instead of a summary.
    #[arg(long)]
    pub json: bool,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Research one school.
    Research {
        /// School name, e.g. "Example Primary School".
        name: String,

        /// Town or local authority to narrow the searches.
        #[arg(short, long)]
        location: Option<String>,

        #[command(flatten)]
        args: ResearchArgs,
    },

    /// Research every school listed in a file.
    ///
    /// One school per line, optionally followed by `| location`. Blank lines
    /// and lines starting with `#` are ignored.
    Batch {
        /// Input file.
        file: String,

        #[command(flatten)]
        args: ResearchArgs,
    },

    /// Cache management.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// Show hit/miss counters and stored entries.
    Stats,
    /// Delete expired entries.
    ClearExpired,
    /// Delete every entry for one school.
    Invalidate {
        /// School name.
        name: String,
    },
    /// Delete everything.
    Clear,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "schoolintel=info",
        1 => "schoolintel=debug",
        _ => "schoolintel=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Research {
            name,
            location,
            args,
        } => cmd_research(&name, location.as_deref(), &args).await,
        Command::Batch { file, args } => cmd_batch(&file, &args).await,
        Command::Cache { action } => match action {
            CacheAction::Stats => cmd_cache_stats().await,
            CacheAction::ClearExpired => cmd_cache_clear_expired().await,
            CacheAction::Invalidate { name } => cmd_cache_invalidate(&name).await,
            CacheAction::Clear => cmd_cache_clear().await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Research
// ---------------------------------------------------------------------------

/// Wire the providers, fetcher and (optional) cache from config.
async fn build_researcher(config: &AppConfig, args: &ResearchArgs) -> Result<SchoolResearcher> {
    validate_api_keys(config)?;

    let usage = Arc::new(UsageCounters::new());
    let search = SerperSearch::from_config(&config.search, Arc::clone(&usage))?;
    let extractor = OpenRouterExtractor::from_config(&config.openrouter, Arc::clone(&usage))?;
    let fetcher = HttpFetcher::new(FetcherOptions::default())?;

    let mut research = ResearchConfig::from(config);
    research.force_refresh = args.force;
    if args.sequential {
        research.mode = ExecutionMode::Sequential;
    }

    info!(
        model = extractor.model(),
        mode = %research.mode,
        stages = ?research.stages,
        "researcher ready"
    );

    let ctx = StageContext {
        search: Arc::new(search),
        extractor: Arc::new(extractor),
        fetcher: Arc::new(fetcher),
        mode: research.mode,
    };
    let researcher = SchoolResearcher::new(ctx, usage, research);

    if args.no_cache || !config.cache.enabled {
        return Ok(researcher);
    }
    let cache = open_cache(config).await?;
    Ok(researcher.with_cache(Arc::new(cache)))
}

async fn cmd_research(name: &str, location: Option<&str>, args: &ResearchArgs) -> Result<()> {
    let config = load_config()?;
    let researcher = build_researcher(&config, args).await?;

    info!(school = name, location, "researching school");

    let reporter = CliProgress::new();
    let record = researcher.research(name, location, &reporter).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        print_summary(&record);
    }
    Ok(())
}

async fn cmd_batch(file: &str, args: &ResearchArgs) -> Result<()> {
    let content = std::fs::read_to_string(file).map_err(|e| eyre!("cannot read '{file}': {e}"))?;
    let queries = parse_batch(&content);
    if queries.is_empty() {
        return Err(eyre!("no schools listed in '{file}'"));
    }

    let config = load_config()?;
    let researcher = build_researcher(&config, args).await?;

    info!(schools = queries.len(), concurrency = researcher.config().batch_concurrency, "starting batch");

    let reporter = CliProgress::new();
    let results = researcher.research_batch(&queries, &reporter).await;
    reporter.finish();

    let mut records = Vec::new();
    for (query, result) in queries.iter().zip(results) {
        match result {
            Ok(record) => records.push(record),
            Err(e) => eprintln!("  {}: {e}", query.name),
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        for record in &records {
            print_summary(record);
        }
        let usage = researcher.usage();
        println!(
            "  {} of {} schools researched; {} searches, {} tokens, ${:.4}",
            records.len(),
            queries.len(),
            usage.searches,
            usage.total_tokens(),
            usage.cost_usd()
        );
        println!();
    }
    Ok(())
}

/// One school per line with an optional `| location` suffix.
fn parse_batch(content: &str) -> Vec<SchoolQuery> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (name, location) = match line.split_once('|') {
                Some((name, location)) => (name.trim(), Some(location.trim())),
                None => (line, None),
            };
            let location = location.filter(|l| !l.is_empty()).map(str::to_string);
            (!name.is_empty()).then(|| SchoolQuery::new(name, location))
        })
        .collect()
}

fn print_summary(record: &SchoolRecord) {
    let or_dash = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".into());

    println!();
    println!("  {}", record.search_label());
    println!("  Website:    {}", or_dash(&record.website));
    println!("  Phone:      {}", or_dash(&record.phone));
    println!("  Email:      {}", or_dash(&record.email));
    println!("  Head:       {}", or_dash(&record.head_teacher));
    println!(
        "  Ofsted:     {}",
        record
            .ofsted_rating
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".into())
    );
    println!("  Quality:    {:.0}%", record.data_quality_score * 100.0);

    if !record.contacts.is_empty() {
        println!("  Contacts:");
        for contact in &record.contacts {
            println!(
                "    {} ({}, {:.0}%)",
                contact.full_name,
                contact.role.label(),
                contact.confidence * 100.0
            );
        }
    }
    if let Some(financial) = &record.financial {
        let supply: f64 = [financial.supply_staff_costs, financial.agency_supply_costs]
            .into_iter()
            .flatten()
            .sum();
        println!("  Supply:     £{supply:.0} ({})", financial.financial_year);
    }
    if let Some(vacancies) = &record.vacancies {
        println!(
            "  Vacancies:  {} ({})",
            vacancies.vacancies.len(),
            vacancies.urgency_label
        );
    }
    if !record.competitors.is_empty() {
        let agencies: Vec<&str> = record.competitors.iter().map(|c| c.agency_name.as_str()).collect();
        println!("  Agencies:   {}", agencies.join(", "));
    }
    if !record.conversation_starters.is_empty() {
        println!("  Starters:");
        for starter in record.conversation_starters.iter().take(5) {
            println!("    - {}: {}", starter.topic, starter.detail);
        }
    }

    let processing = &record.processing;
    if processing.from_cache {
        println!("  (from cache)");
    } else {
        println!(
            "  {} sources, {} searches, {} tokens, ${:.4}, {:.1}s",
            processing.sources_consulted,
            processing.usage.searches,
            processing.usage.total_tokens(),
            processing.usage.cost_usd(),
            processing.duration_ms as f64 / 1000.0
        );
        if !processing.stages_failed.is_empty() {
            println!("  Stages failed: {}", processing.stages_failed.join(", "));
        }
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, school: &str, name: &str) {
        self.spinner.set_message(format!("{school}: {name}"));
    }

    fn stage_finished(&self, school: &str, report: &StageReport) {
        let status = if report.succeeded() { "done" } else { report.outcome.label() };
        self.spinner.println(format!(
            "  {school}: {} {status} in {:.1}s",
            report.kind,
            report.elapsed.as_secs_f64()
        ));
    }

    fn done(&self, record: &SchoolRecord) {
        self.spinner.set_message(format!("{}: done", record.name));
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

async fn open_cache(config: &AppConfig) -> Result<Cache> {
    let path = expand_home(&config.cache.path)?;
    Ok(Cache::open(&path, &config.cache).await?)
}

async fn cmd_cache_stats() -> Result<()> {
    let config = load_config()?;
    let cache = open_cache(&config).await?;
    let stats = cache.stats().await?;

    println!();
    println!("  Cache:    {}", expand_home(&config.cache.path)?.display());
    println!("  Enabled:  {}", cache.is_enabled());
    println!("  TTL:      {}h", cache.ttl_hours());
    println!("  Active:   {}", stats.active);
    println!("  Expired:  {}", stats.expired);
    println!("  Size:     {} bytes", stats.size_bytes);
    println!();
    Ok(())
}

async fn cmd_cache_clear_expired() -> Result<()> {
    let cache = open_cache(&load_config()?).await?;
    let removed = cache.clear_expired().await?;
    println!("Removed {removed} expired entries");
    Ok(())
}

async fn cmd_cache_invalidate(name: &str) -> Result<()> {
    let cache = open_cache(&load_config()?).await?;
    let removed = cache.invalidate_entity(name).await?;
    println!("Removed {removed} entries for '{name}'");
    Ok(())
}

async fn cmd_cache_clear() -> Result<()> {
    let cache = open_cache(&load_config()?).await?;
    let removed = cache.clear().await?;
    println!("Removed {removed} entries");
    Ok(())
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
