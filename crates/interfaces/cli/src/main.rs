mod cache;
mod export;
mod render;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use vidrank_analyzer::{
    AnalysisSettings, Analyzer, CandidateItem, RateLimiter, ResponseLog, ScoredResult,
};
use vidrank_config::{AppConfig, ProviderKind};
use vidrank_llm::{ClientSettings, GEMINI_API_KEY_VAR, Provider};

use cache::{CacheKey, ResultCache};
use export::ExportFormat;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Parser)]
#[command(
    name = "vidrank",
    version,
    about = "Rank video search results with a language model"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Score a JSON file of candidate videos against a query.
    Analyze(AnalyzeArgs),
    /// Print the effective configuration.
    Doctor,
    /// Inspect or prune the result cache.
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Debug, Args)]
struct AnalyzeArgs {
    /// JSON array of candidate records.
    #[arg(long, short)]
    input: PathBuf,
    #[arg(long, short)]
    query: String,
    /// Number of ranked results to display (defaults to `output.max_results`).
    #[arg(long)]
    results: Option<usize>,
    #[arg(long, value_enum)]
    save: Option<ExportFormat>,
    #[arg(long)]
    show_description: bool,
    /// Neither read nor write the result cache.
    #[arg(long)]
    no_cache: bool,
    /// Ignore cached results but store the fresh ones.
    #[arg(long)]
    force_refresh: bool,
}

#[derive(Debug, Subcommand)]
enum CacheCommands {
    /// Delete expired entries and shrink the cache to its size budget.
    Clean,
    /// Print the cache directory.
    Path,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;
    let _log_guard = init_logging(&config.telemetry.log_level);

    match cli.command {
        Commands::Analyze(args) => run_analyze(&config, args)?,
        Commands::Doctor => run_doctor(&config, &cli.config),
        Commands::Cache { command } => {
            let cache = ResultCache::from_config(&config.cache);
            match command {
                CacheCommands::Clean => {
                    let report = cache.clean()?;
                    println!(
                        "cache cleaned: {} expired, {} evicted",
                        report.expired, report.evicted
                    );
                }
                CacheCommands::Path => println!("{}", cache.dir().display()),
            }
        }
    }

    Ok(())
}

fn init_logging(default_level: &str) -> WorkerGuard {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .init();
    guard
}

fn run_analyze(config: &AppConfig, args: AnalyzeArgs) -> Result<()> {
    let raw = fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let mut items: Vec<CandidateItem> = serde_json::from_slice(&raw).with_context(|| {
        format!(
            "{} is not a JSON array of candidates",
            args.input.display()
        )
    })?;
    items.truncate(config.analysis.max_candidates);
    info!(candidates = items.len(), query = %args.query, "loaded candidates");

    let cache = ResultCache::from_config(&config.cache);
    if config.cache.enabled {
        prune_cache(&cache);
    }
    let use_cache = config.cache.enabled && !args.no_cache;
    let key = CacheKey {
        query: &args.query,
        input_path: &args.input,
        input: &raw,
        limit: items.len(),
        model: config.active_model(),
    }
    .digest();

    let cached = if use_cache && !args.force_refresh {
        cache.load(&key)
    } else {
        None
    };
    let results = match cached {
        Some(results) => results,
        None => {
            let mut analyzer = build_analyzer(config);
            let store = use_cache.then_some((&cache, key.as_str()));
            analyze_and_cache(&mut analyzer, &items, &args.query, store)?
        }
    };

    if results.is_empty() {
        println!("{}", render::NO_RESULTS);
        return Ok(());
    }

    let shown = args.results.unwrap_or(config.output.max_results).max(1);
    let shown = &results[..results.len().min(shown)];
    print_report(config, &results, shown, args.show_description);

    if let Some(format) = args.save {
        let path = export::save(
            shown,
            &args.query,
            format,
            Path::new(&config.output.export_dir),
        )?;
        println!("Results saved to {}", path.display());
    }
    Ok(())
}

fn prune_cache(cache: &ResultCache) {
    match cache.clean() {
        Ok(report) => debug!(
            expired = report.expired,
            evicted = report.evicted,
            "cache pruned"
        ),
        Err(err) => warn!(?err, "cache cleanup failed"),
    }
}

/// Run the model; only its own verdicts are cached, never neutral scores.
fn analyze_and_cache(
    analyzer: &mut Analyzer,
    items: &[CandidateItem],
    query: &str,
    store: Option<(&ResultCache, &str)>,
) -> Result<Vec<ScoredResult>> {
    let analysis = analyzer.evaluate(items, query)?;
    if let Some((cache, key)) = store {
        if analysis.is_ranked() {
            cache.store(key, &analysis.results);
        } else {
            info!(outcome = ?analysis.outcome, "not caching neutral scores");
        }
    }
    Ok(analysis.results)
}

fn print_report(
    config: &AppConfig,
    results: &[ScoredResult],
    shown: &[ScoredResult],
    show_description: bool,
) {
    if let Some(best) = results.first() {
        println!();
        println!("{}", render::render_best_pick(best));
    }

    println!();
    println!(
        "Found {} videos matching your criteria. Showing top {}:",
        results.len(),
        shown.len()
    );
    println!(
        "{}",
        render::render_table(
            shown,
            show_description || config.output.show_description,
            render::terminal_width()
        )
    );
}

fn run_doctor(config: &AppConfig, config_path: &Path) {
    let settings = client_settings(config);
    println!("vidrank doctor");
    println!(
        "- config path: {}{}",
        config_path.display(),
        if config_path.exists() { "" } else { " (missing, using defaults)" }
    );
    println!("- provider: {}", settings.provider.label());
    println!("- model: {}", settings.model);
    println!("- endpoint: {}", settings.base_url);
    if settings.provider == Provider::Gemini {
        let key_set = std::env::var(GEMINI_API_KEY_VAR)
            .map(|key| !key.trim().is_empty())
            .unwrap_or(false);
        println!(
            "- {GEMINI_API_KEY_VAR}: {}",
            if key_set { "set" } else { "missing" }
        );
    }
    println!(
        "- response log: {}",
        if config.analysis.response_log_path.is_empty() {
            "disabled"
        } else {
            config.analysis.response_log_path.as_str()
        }
    );
    println!(
        "- cache: {} ({})",
        config.cache.dir,
        if config.cache.enabled { "enabled" } else { "disabled" }
    );
}

fn client_settings(config: &AppConfig) -> ClientSettings {
    ClientSettings {
        provider: match config.llm.provider {
            ProviderKind::Gemini => Provider::Gemini,
            ProviderKind::Ollama => Provider::Ollama,
        },
        model: config.active_model().to_string(),
        base_url: config.active_base_url().to_string(),
        timeout: Duration::from_secs(config.llm.request_timeout_secs),
    }
}

fn response_log(config: &AppConfig) -> ResponseLog {
    let path = config.analysis.response_log_path.trim();
    if path.is_empty() {
        ResponseLog::disabled()
    } else {
        ResponseLog::new(path, config.analysis.response_log_char_cap)
    }
}

fn build_analyzer(config: &AppConfig) -> Analyzer {
    let settings = client_settings(config);
    Analyzer::new(
        AnalysisSettings::from(&config.analysis),
        RateLimiter::new(Duration::from_millis(config.analysis.rate_limit_ms)),
        response_log(config),
        move || vidrank_llm::connect(&settings),
    )
}
