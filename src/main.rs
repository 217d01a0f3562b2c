//! Suite Runner - test suite execution engine
//!
//! Executes suites of UI (browser) and API test cases, sequentially or over
//! bounded per-kind worker pools, and records one result per case.
//!
//! ## Features
//!
//! - UI cases through any W3C WebDriver endpoint, API cases over HTTP
//! - Parallel execution with separate UI and API pools
//! - Retrying request dispatcher with a JSON-lines dead-letter file
//! - Pass-rate summaries, daily trends and flaky-test detection
//!
//! ## Usage
//!
//! ```bash
//! # Import a suite definition
//! suite-runner import checkout.yaml --user qa
//!
//! # Execute suite 1 with four threads
//! suite-runner run --suite 1 --threads 4
//!
//! # Process queued requests
//! suite-runner worker --input requests.jsonl
//!
//! # Flaky tests of suite 1
//! suite-runner analytics flaky --suite 1
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

mod analytics;
mod cli;
mod config;
mod dispatch;
mod driver;
mod executor;
mod import;
mod models;
mod output;
mod store;
mod utils;

use cli::{Args, Command};
use config::AppConfig;
use dispatch::{Dispatcher, JsonLinesDeadLetters};
use driver::{HttpApiDriver, WebDriverClient};
use executor::{CaseRunner, SuiteEngine, WorkerPools};
use models::TestRun;
use output::{OutputFormat, ResultFormatter, RunOverview};
use store::{MemoryStore, ResultStore, RunStore, StoreSnapshot, SuiteStore};
use utils::logger::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        LogLevel::Debug
    } else {
        LogLevel::from_str(&args.log_level).unwrap_or(LogLevel::Info)
    };
    init_logger(level);

    let mut config = AppConfig::resolve(args.config.as_deref())?;
    if let Some(store) = &args.store {
        config.storage.store_path = Some(store.clone());
    }

    let format = OutputFormat::from_str(&args.format)
        .ok_or_else(|| anyhow::anyhow!("Unknown output format: {}", args.format))?;
    let mut formatter = ResultFormatter::new(format);
    if args.no_color {
        formatter = formatter.no_color();
    }

    match args.command {
        Command::Import(import_args) => {
            import_suite(&config, import_args).await?;
        }
        Command::Run(run_args) => {
            run_suite(&config, run_args, &formatter).await?;
        }
        Command::Worker(worker_args) => {
            run_worker(&config, worker_args, &formatter).await?;
        }
        Command::DeadLetters(dead_letter_args) => {
            show_dead_letters(&config, dead_letter_args, &formatter)?;
        }
        Command::Status(status_args) => {
            show_status(&config, status_args, &formatter).await?;
        }
        Command::Delete(delete_args) => {
            delete_suite(&config, delete_args).await?;
        }
        Command::Analytics(analytics_args) => {
            show_analytics(&config, analytics_args, &formatter).await?;
        }
        Command::Config(config_args) => {
            manage_config(&config, config_args, format)?;
        }
    }

    Ok(())
}

fn open_store(config: &AppConfig) -> Result<Arc<MemoryStore>> {
    let path = config.store_path();
    let snapshot = StoreSnapshot::load_or_default(&path)?;
    Ok(Arc::new(MemoryStore::from_snapshot(snapshot)))
}

fn persist(config: &AppConfig, store: &MemoryStore) -> Result<()> {
    store.snapshot().save(&config.store_path())
}

fn build_engine(config: &AppConfig, store: Arc<MemoryStore>) -> Result<SuiteEngine> {
    let ui = Arc::new(WebDriverClient::new(config.driver.webdriver_settings())?);
    let api = Arc::new(HttpApiDriver::with_timeout(
        config.driver.http_timeout_secs,
        config.driver.accept_invalid_certs,
    )?);

    let runner = CaseRunner::new(store, ui, api)
        .with_strict_expectations(config.execution.strict_expectations);
    let pools = Arc::new(WorkerPools::new(
        config.ui_pool.clone(),
        config.api_pool.clone(),
    ));

    Ok(SuiteEngine::new(runner, pools).with_unit_timeout(config.execution.unit_timeout()))
}

async fn import_suite(config: &AppConfig, args: cli::ImportArgs) -> Result<()> {
    let definition = import::SuiteDefinition::load(&args.file)?;
    let store = open_store(config)?;

    let (suite, count) =
        import::import_suite(&*store, &definition, args.user.as_deref()).await?;
    persist(config, &store)?;

    println!(
        "✓ Imported suite {} '{}' with {} case(s)",
        suite.id, suite.name, count
    );
    Ok(())
}

async fn run_suite(
    config: &AppConfig,
    args: cli::RunArgs,
    formatter: &ResultFormatter,
) -> Result<()> {
    let store = open_store(config)?;
    let suite = store::require_suite(&*store, args.suite).await?;

    let run = match args.run {
        Some(run_id) => store::require_run(&*store, run_id).await?,
        None => {
            let name = args.name.clone().unwrap_or_else(|| {
                format!("{} {}", suite.name, Utc::now().format("%Y-%m-%d %H:%M"))
            });
            let mut run = TestRun::new(name);
            if let Some(user) = &args.user {
                run = run.with_user(user);
            }
            store.save_run(run).await?
        }
    };

    info!(
        "Executing suite {} '{}' as run {} ({} thread(s) requested)",
        suite.id, suite.name, run.id, args.threads
    );
    let engine = build_engine(config, store.clone())?;
    let outcome = engine
        .run(suite.id, run.id, args.threads, args.user.as_deref())
        .await;
    if !engine.pools().shutdown().await {
        warn!("Worker pools did not drain cleanly");
    }
    persist(config, &store)?;

    let summary = outcome?;
    let results = store.find_by_run(run.id).await?;
    println!("{}", formatter.format_execution(&summary, &results));
    Ok(())
}

async fn run_worker(
    config: &AppConfig,
    args: cli::WorkerArgs,
    formatter: &ResultFormatter,
) -> Result<()> {
    let store = open_store(config)?;
    let engine = Arc::new(build_engine(config, store.clone())?);

    let dead_letter_path = args
        .dead_letters
        .clone()
        .unwrap_or_else(|| config.dead_letter_path());
    let sink = Arc::new(JsonLinesDeadLetters::new(dead_letter_path));
    info!("Dead letters go to {}", sink.path().display());
    let dispatcher = Arc::new(Dispatcher::new(engine.clone(), config.retry.clone(), sink));

    let (tx, rx) = mpsc::channel(args.buffer.max(1));
    let consumer = tokio::spawn(dispatch::consume(dispatcher, rx));

    let fed = match &args.input {
        Some(path) => match tokio::fs::File::open(path).await {
            Ok(file) => dispatch::feed_lines(tokio::io::BufReader::new(file), tx)
                .await
                .map_err(anyhow::Error::from),
            Err(e) => {
                drop(tx);
                Err(anyhow::Error::from(e)
                    .context(format!("Failed to open request file: {}", path.display())))
            }
        },
        None => dispatch::feed_lines(tokio::io::BufReader::new(tokio::io::stdin()), tx)
            .await
            .map_err(anyhow::Error::from),
    };

    let stats = consumer.await.context("Request consumer failed")?;
    if !engine.pools().shutdown().await {
        warn!("Worker pools did not drain cleanly");
    }
    persist(config, &store)?;

    let sent = fed?;
    info!("Forwarded {} line(s) to the dispatcher", sent);
    println!("{}", formatter.format_consumer_stats(&stats));
    Ok(())
}

fn show_dead_letters(
    config: &AppConfig,
    args: cli::DeadLetterArgs,
    formatter: &ResultFormatter,
) -> Result<()> {
    let path = args.file.unwrap_or_else(|| config.dead_letter_path());
    let letters = JsonLinesDeadLetters::read_all(&path)
        .with_context(|| format!("Failed to read dead letters: {}", path.display()))?;
    println!("{}", formatter.format_dead_letters(&letters));
    Ok(())
}

async fn show_status(
    config: &AppConfig,
    args: cli::StatusArgs,
    formatter: &ResultFormatter,
) -> Result<()> {
    let store = open_store(config)?;

    if let Some(run_id) = args.run {
        let run = store::require_run(&*store, run_id).await?;
        let has_results = store.has_results(run.id).await?;
        println!("{}", formatter.format_runs(&[RunOverview { run, has_results }]));
        let results = match &args.test {
            Some(name) => store.find_by_run_and_name(run_id, name).await?,
            None => store.find_by_run(run_id).await?,
        };
        println!("{}", formatter.format_results(&results));
        return Ok(());
    }

    let suites = match args.suite {
        Some(suite_id) => vec![store::require_suite(&*store, suite_id).await?],
        None => store.find_suites().await?,
    };
    println!("{}", formatter.format_suites(&suites));

    let runs = match args.suite {
        Some(_) => {
            let mut runs = Vec::new();
            for run_id in suites.iter().filter_map(|s| s.run_id) {
                if let Some(run) = store.find_run(run_id).await? {
                    runs.push(run);
                }
            }
            runs
        }
        None => store.find_runs().await?,
    };
    let mut overviews = Vec::with_capacity(runs.len());
    for run in runs {
        let has_results = store.has_results(run.id).await?;
        overviews.push(RunOverview { run, has_results });
    }
    println!("{}", formatter.format_runs(&overviews));

    if let Some(suite_id) = args.suite {
        let results = store.find_by_suite(suite_id).await?;
        println!("{}", formatter.format_results(&results));
    }
    Ok(())
}

async fn delete_suite(config: &AppConfig, args: cli::DeleteArgs) -> Result<()> {
    let store = open_store(config)?;
    let suite = store::require_suite(&*store, args.suite).await?;
    store.delete_suite(suite.id).await?;
    persist(config, &store)?;

    println!("✓ Deleted suite {} '{}'", suite.id, suite.name);
    Ok(())
}

async fn show_analytics(
    config: &AppConfig,
    args: cli::AnalyticsArgs,
    formatter: &ResultFormatter,
) -> Result<()> {
    let store = open_store(config)?;
    let results = store.find_results().await?;

    match args.action {
        cli::AnalyticsAction::Summary { suite } => {
            let summary = match suite {
                Some(suite_id) => analytics::suite_summary(&results, suite_id),
                None => analytics::summary(&results),
            };
            println!("{}", formatter.format_summary(&summary));
        }
        cli::AnalyticsAction::Trends { suite, days } => {
            let now = Utc::now();
            let points = match suite {
                Some(suite_id) => analytics::suite_trends(&results, suite_id, days, now),
                None => analytics::trends(&results, days, now),
            };
            println!("{}", formatter.format_trends(&points));
        }
        cli::AnalyticsAction::Flaky { suite, limit } => {
            let mut flaky = match suite {
                Some(suite_id) => analytics::suite_flaky_tests(&results, suite_id),
                None => analytics::flaky_tests(&results),
            };
            if let Some(limit) = limit {
                flaky.truncate(limit);
            }
            println!("{}", formatter.format_flaky(&flaky));
        }
    }
    Ok(())
}

fn manage_config(config: &AppConfig, args: cli::ConfigArgs, format: OutputFormat) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { output, force } => {
            if output.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    output.display()
                );
            }
            AppConfig::default().save(&output)?;
            println!("✓ Configuration file created: {}", output.display());
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Show { env } => {
            if env {
                config::env::print_env_help();
            } else {
                let output = match format {
                    OutputFormat::Table => serde_yaml::to_string(config)?,
                    OutputFormat::Json => serde_json::to_string(config)?,
                    OutputFormat::JsonPretty => serde_json::to_string_pretty(config)?,
                };
                println!("{output}");
                if format != OutputFormat::Table {
                    return Ok(());
                }
                if let Some(path) = AppConfig::find() {
                    println!("# loaded from {}", display_path(&path));
                }
            }
        }
    }
    Ok(())
}

fn display_path(path: &Path) -> String {
    path.canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}
