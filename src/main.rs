use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use postura::cache::ResourceCache;
use postura::check::{CheckContext, CheckRegistry};
use postura::config::Config;
use postura::engine::{Report, Scheduler, SchedulerConfig};
use postura::region::RegionResolver;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the log filter
const LOG_ENV: &str = "POSTURA_LOG";

/// Cloud security-posture scanner
#[derive(Parser, Debug)]
#[command(name = "postura", version = postura::VERSION, about, long_about = None)]
struct Args {
    /// Collected API cache (JSON, or YAML with a .yaml/.yml extension)
    #[arg(short, long)]
    cache: Option<PathBuf>,

    /// Scan a government cloud realm
    #[arg(long)]
    govcloud: bool,

    /// Tenancy home region
    #[arg(long)]
    home_region: Option<String>,

    /// Only run these checks (repeatable)
    #[arg(long = "check")]
    checks: Vec<String>,

    /// Never run these checks (repeatable)
    #[arg(long = "skip")]
    skip: Vec<String>,

    /// Only run checks in these categories (repeatable)
    #[arg(long = "category")]
    categories: Vec<String>,

    /// Checks running at the same time
    #[arg(long)]
    max_parallel: Option<usize>,

    /// Regions processed at the same time inside one check
    #[arg(long)]
    region_parallel: Option<usize>,

    /// Per-check timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Write the report here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// List registered checks and exit
    #[arg(long)]
    list: bool,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let env_filter = EnvFilter::try_from_env(LOG_ENV).ok();
    let tracing_level = match (level.to_tracing_level(), &env_filter) {
        (Some(level), _) => level,
        // POSTURA_LOG alone turns logging on
        (None, Some(_)) => Level::TRACE,
        (None, None) => return Ok(None),
    };

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    let filter = env_filter.unwrap_or_else(|| EnvFilter::new(tracing_level.as_str().to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("postura {} started with log level: {:?}", postura::VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("postura").join("postura.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".postura").join("postura.log");
    }
    PathBuf::from("postura.log")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level)?;

    let mut config = Config::load();
    apply_overrides(&mut config, &args);

    let registry = CheckRegistry::builtin()?;

    if args.list {
        print_checks(&registry);
        return Ok(());
    }

    let cache_path = args
        .cache
        .clone()
        .or_else(|| config.last_cache.clone())
        .context("No cache file given. Use --cache <file>")?;

    let mut skip = config.skip_checks.clone();
    skip.extend(args.skip.iter().cloned());
    let selected = registry.select(&args.checks, &skip, &args.categories)?;

    let cache = ResourceCache::load(&cache_path)?;
    // Persist only the cache path, not this run's flag overrides
    if let Err(e) = Config::load().set_last_cache(&cache_path) {
        tracing::warn!("Failed to save config: {}", e);
    }

    let settings = config.scan_settings();
    let resolver = RegionResolver::new(&settings);
    tracing::info!(
        "Scanning with {} checks, home region {}",
        selected.len(),
        resolver.home_region()
    );
    let ctx = CheckContext::new(cache, settings).with_resolver(resolver);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing running checks");
            let _ = shutdown_tx.send(true);
        }
    });

    let scheduler = Scheduler::new(SchedulerConfig {
        max_parallel: config.max_parallel.max(1),
        check_timeout: config.check_timeout(),
    })
    .with_shutdown(shutdown_rx);

    let report = scheduler.scan(&selected, &ctx).await;

    write_report(&report, args.output.as_deref())?;

    eprintln!(
        "{} checks: {} pass, {} warn, {} fail, {} error",
        report.check_count(),
        report.summary.pass,
        report.summary.warning,
        report.summary.fail,
        report.summary.error
    );

    Ok(())
}

/// CLI flags win over the config file
fn apply_overrides(config: &mut Config, args: &Args) {
    if args.govcloud {
        config.govcloud = true;
    }
    if let Some(region) = &args.home_region {
        config.home_region = Some(region.clone());
    }
    if let Some(n) = args.max_parallel {
        config.max_parallel = n;
    }
    if let Some(n) = args.region_parallel {
        config.region_parallel = n;
    }
    if let Some(secs) = args.timeout {
        config.timeout_secs = secs;
    }
}

fn print_checks(registry: &CheckRegistry) {
    for meta in registry.metadata() {
        println!("{:<32} {:<12} {}", meta.id, meta.category, meta.title);
    }
}

fn write_report(report: &Report, output: Option<&Path>) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("Failed to serialize report")?;

    match output {
        Some(path) => std::fs::write(path, content)
            .with_context(|| format!("Failed to write report to {}", path.display()))?,
        None => println!("{}", content),
    }
    Ok(())
}
