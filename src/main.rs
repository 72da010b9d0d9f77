// jewel-scraper: resumable configurator scrape runs from the command line
//
// Reads work items from a CSV, skips keys already completed in the output
// file, and drives a small pool of Chrome sessions through the rest.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jewel_scraper::{
    ChromeDriverFactory, ConfiguredExecutor, CsvSink, Ledger, Orchestrator, TaskExecutor,
    load_work_items, load_yaml_config,
};

#[derive(Parser, Debug)]
#[command(name = "jewel-scraper", version, about)]
struct Cli {
    /// YAML config file (default: ./jewel_scraper.yaml if present)
    #[arg(short, long, env = "JEWEL_SCRAPER_CONFIG")]
    config: Option<PathBuf>,

    /// Input CSV of work items
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output CSV (appended to, and read back for resume)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of concurrent browser sessions
    #[arg(short, long)]
    workers: Option<usize>,

    /// Show the browser windows
    #[arg(long)]
    headed: bool,

    /// Stop each item after this many attempts instead of retrying forever
    #[arg(long, value_name = "MAX_ATTEMPTS")]
    bounded: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = load_yaml_config(cli.config.as_deref()).context("Loading config")?;
    if let Some(input) = cli.input {
        config.input_path = input;
    }
    if let Some(output) = cli.output {
        config.output_path = output;
    }
    if let Some(workers) = cli.workers {
        config.pool_size = workers;
    }
    if cli.headed {
        config.browser.headless = false;
    }
    if let Some(max_attempts) = cli.bounded {
        config.unlimited_retry = false;
        config.max_attempts = max_attempts;
    }
    config.validate()?;
    let config = Arc::new(config);

    let items = load_work_items(&config.input_path, &config.key_column)
        .with_context(|| format!("Loading work items from {}", config.input_path.display()))?;
    let ledger = Ledger::load(&config.output_path, &config.key_column, config.resume_policy);

    let run_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(
        "Run {}: {} input item(s), output {}",
        run_id,
        items.len(),
        config.output_path.display()
    );

    let executor = Arc::new(ConfiguredExecutor::new(config.task.clone()));
    let sink = Arc::new(CsvSink::new(
        config.output_path.clone(),
        &config.key_column,
        &executor.output_columns(),
        run_id,
    ));
    let factory = Arc::new(ChromeDriverFactory::new(
        config.browser.clone(),
        config.navigation_timeout(),
    ));

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling run");
            interrupt.cancel();
        }
    });

    let orchestrator =
        Orchestrator::new(Arc::clone(&config), factory, executor, sink).with_cancellation(cancel);
    let summary = orchestrator.run(items, &ledger).await;

    tracing::info!(
        "Done: {}/{} completed ({} succeeded, {} failed), {} skipped, {} interrupted, {} not dispatched{}",
        summary.completed(),
        summary.pending,
        summary.succeeded,
        summary.failed,
        summary.skipped,
        summary.interrupted,
        summary.not_dispatched,
        if summary.cancelled { " [cancelled]" } else { "" }
    );
    tracing::info!(
        "Results: {}  Screenshots: {}",
        config.output_path.display(),
        config.screenshot_dir.display()
    );

    Ok(())
}
