//! Index lifecycle management for tracing storage indices.
//!
//! `init`/`rollover`/`lookback` manage the write and read aliases of each index
//! family; `clean` deletes indices that have aged past a retention window.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use common::cli::{CommonArgs, CommonCommands, LegacyOverrides, utils};
use common::config::Configuration;
use common::naming::Classifier;
use common::store::{IndexStore, elasticsearch};
use lifecycle::{
    CleanerSettings, InitOutcome, RetentionCleaner, RolloverConditions, RolloverEngine,
    RolloverOutcome,
};

#[derive(Parser, Debug)]
#[command(name = "index-lifecycle", author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    overrides: LegacyOverrides,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone, Default)]
struct StoreTarget {
    /// Admin API address of the cluster, e.g. http://localhost:9200
    #[arg(value_name = "URL")]
    url: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the first index and the write/read aliases of each family
    Init(StoreTarget),
    /// Move each family's write alias to a new index when the conditions hold
    Rollover {
        #[command(flatten)]
        target: StoreTarget,
        /// Conditions as JSON, e.g. {"max_age":"1d"}
        #[arg(long, env = "CONDITIONS")]
        conditions: Option<String>,
    },
    /// Detach old rollover indices from each family's read alias
    Lookback {
        #[command(flatten)]
        target: StoreTarget,
        /// Keep indices younger than this readable, e.g. "7d"
        #[arg(long, value_parser = humantime::parse_duration)]
        max_age: Option<Duration>,
        /// Unit of the lookback window (days, hours, ...)
        #[arg(long, env = "UNIT")]
        unit: Option<String>,
        /// Number of units in the lookback window
        #[arg(long, env = "UNIT_COUNT")]
        unit_count: Option<u64>,
    },
    /// Delete indices older than the retention window
    Clean {
        /// Retention window in days
        #[arg(value_name = "DAYS")]
        days: u32,
        #[command(flatten)]
        target: StoreTarget,
        /// Also delete rollover indices of the main families
        #[arg(
            long,
            env = "ROLLOVER",
            num_args = 0..=1,
            default_missing_value = "true",
            value_parser = clap::builder::BoolishValueParser::new()
        )]
        rollover: Option<bool>,
        /// Log deletion candidates without deleting
        #[arg(long)]
        dry_run: bool,
        /// Upper bound on deletions in flight
        #[arg(long)]
        max_concurrent_deletes: Option<usize>,
    },
    #[command(flatten)]
    Common(CommonCommands),
}

impl Command {
    /// Fold command-line values into the loaded configuration.
    fn apply(&self, config: &mut Configuration) {
        let target = match self {
            Command::Init(target) => target,
            Command::Rollover { target, conditions } => {
                if let Some(conditions) = conditions {
                    config.rollover.conditions = conditions.clone();
                }
                target
            }
            Command::Lookback { target, .. } => target,
            Command::Clean {
                target,
                rollover,
                dry_run,
                max_concurrent_deletes,
                ..
            } => {
                if let Some(rollover) = rollover {
                    config.cleaner.include_rollover = *rollover;
                }
                if *dry_run {
                    config.cleaner.dry_run = true;
                }
                if let Some(workers) = max_concurrent_deletes {
                    config.cleaner.max_concurrent_deletes = *workers;
                }
                target
            }
            Command::Common(_) => return,
        };

        if let Some(url) = &target.url {
            config.store.url = url.clone();
        }
    }
}

/// Resolve the lookback window: `--max-age`, then `UNIT`/`UNIT_COUNT`, then configuration.
fn lookback_window(
    max_age: Option<Duration>,
    unit: Option<&str>,
    unit_count: Option<u64>,
    config: &Configuration,
) -> Result<Duration> {
    if let Some(max_age) = max_age {
        return Ok(max_age);
    }
    match (unit, unit_count) {
        (None, None) => Ok(config.rollover.lookback),
        (unit, count) => {
            let unit = unit.unwrap_or("days");
            let count = count.unwrap_or(1);
            humantime::parse_duration(&format!("{count}{unit}"))
                .with_context(|| format!("Invalid lookback window: {count} {unit}"))
        }
    }
}

/// Waits for a shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => log::info!("Received SIGINT"),
            _ = sigterm.recv() => log::info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        log::info!("Received Ctrl+C");
    }

    Ok(())
}

async fn run_init(store: Arc<dyn IndexStore>, config: &Configuration) -> Result<()> {
    let engine = RolloverEngine::new(store, config.index_prefix.clone(), config.store.timeout);
    let outcomes = engine
        .init_all(config.archive)
        .await
        .context("Failed to initialize rollover aliases")?;

    for (family, outcome) in outcomes {
        match outcome {
            InitOutcome::AlreadyInitialized { target } => {
                log::info!("{family}: already initialized, writing to {target}");
            }
            InitOutcome::Created { index, adopted } => {
                let how = if adopted { "adopted" } else { "created" };
                log::info!("{family}: {how} {index}");
            }
        }
    }
    Ok(())
}

async fn run_rollover(store: Arc<dyn IndexStore>, config: &Configuration) -> Result<()> {
    let conditions = RolloverConditions::parse(&config.rollover.conditions)?;
    let engine = RolloverEngine::new(store, config.index_prefix.clone(), config.store.timeout);
    let outcomes = engine
        .rollover_all(config.archive, &conditions)
        .await
        .context("Failed to roll over write aliases")?;

    for (family, outcome) in outcomes {
        match outcome {
            RolloverOutcome::NotMet { target } => {
                log::info!("{family}: conditions not met, still writing to {target}");
            }
            RolloverOutcome::RolledOver { previous, current } => {
                log::info!("{family}: rolled over from {previous} to {current}");
            }
        }
    }
    Ok(())
}

async fn run_lookback(
    store: Arc<dyn IndexStore>,
    config: &Configuration,
    max_age: Duration,
) -> Result<()> {
    let engine = RolloverEngine::new(store, config.index_prefix.clone(), config.store.timeout);
    let outcomes = engine
        .lookback_all(config.archive, max_age)
        .await
        .context("Failed to apply lookback to read aliases")?;

    for (family, outcome) in outcomes {
        log::info!(
            "{family}: detached {} indices from the read alias, {} remain",
            outcome.detached.len(),
            outcome.retained.len()
        );
    }
    Ok(())
}

async fn run_clean(store: Arc<dyn IndexStore>, config: &Configuration, days: u32) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_task = tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(()) => {
                log::info!("Shutdown requested, no further indices will be deleted");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => log::warn!("Shutdown signal unavailable: {e:#}"),
        }
    });

    let classifier = Classifier::new(config.index_prefix.clone(), config.date_separator.clone());
    let settings = CleanerSettings::from_config(config, days);
    let cleaner = RetentionCleaner::new(store, classifier, settings, config.store.timeout)?
        .with_shutdown(shutdown_rx);

    let result = cleaner.clean().await;
    signal_task.abort();
    let report = result?;

    if report.dry_run {
        log::info!(
            "Dry run: {} of {} indices would be deleted",
            report.candidates.len(),
            report.evaluated
        );
        return Ok(());
    }

    log::info!(
        "Deleted {} of {} indices ({} eligible)",
        report.deleted_count(),
        report.evaluated,
        report.candidates.len()
    );
    for (index, reason) in &report.failed {
        log::error!("Failed to delete {index}: {reason}");
    }

    if report.has_failures() {
        anyhow::bail!("{} indices could not be deleted", report.failed.len());
    }
    if report.was_interrupted() {
        anyhow::bail!(
            "Cleaning interrupted, {} indices were not attempted",
            report.skipped.len()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    utils::init_logging(&cli.common);

    let mut config = utils::load_config(cli.common.config.as_ref())?;
    cli.overrides.apply(&mut config);
    cli.command.apply(&mut config);

    if let Command::Common(command) = &cli.command {
        return utils::handle_common_command(command, &config);
    }

    utils::validate_config(&config)?;

    let store = elasticsearch::connect(&config.store)
        .await
        .with_context(|| format!("Failed to connect to index store at {}", config.store.url))?;

    match &cli.command {
        Command::Init(_) => run_init(store, &config).await,
        Command::Rollover { .. } => run_rollover(store, &config).await,
        Command::Lookback {
            max_age,
            unit,
            unit_count,
            ..
        } => {
            let max_age = lookback_window(*max_age, unit.as_deref(), *unit_count, &config)?;
            run_lookback(store, &config, max_age).await
        }
        Command::Clean { days, .. } => run_clean(store, &config, *days).await,
        Command::Common(_) => Ok(()),
    }
}
