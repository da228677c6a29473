//! chartscan command-line runner: one scan pass over the configured assets.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chartscan::{
    config::Config,
    scanner::{RetryPolicy, Retrying, Scanner},
    sinks::{JsonFileSource, JsonlAlertStore, LogNotifier},
};

#[derive(Parser)]
#[command(name = "chartscan")]
#[command(about = "Chart pattern scanner", long_about = None)]
#[command(version)]
struct Cli {
    /// Scanner configuration (YAML)
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Directory holding `<SYMBOL>_<tf>.json` price windows
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// JSON-lines alert log
    #[arg(long, default_value = "alerts.jsonl")]
    alerts: PathBuf,

    /// Override scanner.min_confidence
    #[arg(long)]
    min_confidence: Option<f64>,

    /// Override scanner.min_rr
    #[arg(long)]
    min_rr: Option<f64>,

    /// Scan asset/timeframe jobs in parallel
    #[arg(long)]
    parallel: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_logging(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs)?;

    let config = Config::load(&cli.config)
        .and_then(|c| c.with_overrides(cli.min_confidence, cli.min_rr, cli.parallel))
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let engine = config.build_engine().context("building detectors")?;
    let jobs = config.jobs();

    let source = Retrying::new(JsonFileSource::new(&cli.data_dir), RetryPolicy::default());
    let store = JsonlAlertStore::open(&cli.alerts)
        .with_context(|| format!("opening alert log {}", cli.alerts.display()))?;
    let store = Retrying::new(store, RetryPolicy::default());

    let scanner = Scanner::new(engine, source, store, LogNotifier, config.settings());
    let report = scanner.run(&jobs);

    println!(
        "scanned {} jobs in {:.1}s: {} detections, {} above threshold, {} alerts, {} failed jobs",
        report.jobs.len(),
        report.elapsed.as_secs_f64(),
        report.detections().count(),
        report.above_threshold(scanner.settings().min_confidence),
        report.alerts(),
        report.failed_jobs(),
    );
    Ok(())
}
