use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Configuration;
use crate::naming::IndexPrefix;

/// Common CLI arguments shared across all subcommands
#[derive(Parser, Debug, Clone, Default)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

/// Overrides read from the flat environment names the packaged images use.
///
/// Anything set here wins over the configuration file and `INDEX_LIFECYCLE__*`.
#[derive(Args, Debug, Clone, Default)]
pub struct LegacyOverrides {
    #[arg(long, global = true, env = "INDEX_PREFIX", help = "Index prefix (tenant scope)")]
    pub index_prefix: Option<String>,

    #[arg(
        long,
        global = true,
        env = "ARCHIVE",
        value_parser = clap::builder::BoolishValueParser::new(),
        help = "Operate on the span-archive family"
    )]
    pub archive: Option<bool>,

    #[arg(
        long,
        global = true,
        env = "INDEX_DATE_SEPARATOR",
        help = "Separator used in daily index dates"
    )]
    pub date_separator: Option<String>,

    #[arg(long, global = true, env = "ES_USERNAME", help = "Basic auth user")]
    pub username: Option<String>,

    #[arg(
        long,
        global = true,
        env = "ES_PASSWORD",
        hide_env_values = true,
        help = "Basic auth password"
    )]
    pub password: Option<String>,

    #[arg(long, global = true, env = "TIMEOUT", help = "Store call timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, global = true, env = "SHARDS", help = "Primary shards for new indices")]
    pub shards: Option<u32>,

    #[arg(long, global = true, env = "REPLICAS", help = "Replicas for new indices")]
    pub replicas: Option<u32>,
}

impl LegacyOverrides {
    pub fn apply(&self, config: &mut Configuration) {
        if let Some(prefix) = &self.index_prefix {
            config.index_prefix = IndexPrefix::new(prefix.as_str());
        }
        if let Some(archive) = self.archive {
            config.archive = archive;
        }
        if let Some(separator) = &self.date_separator {
            config.date_separator = separator.clone();
        }
        if let Some(username) = &self.username {
            config.store.username = Some(username.clone());
        }
        if let Some(password) = &self.password {
            config.store.password = Some(password.clone());
        }
        if let Some(timeout) = self.timeout {
            config.store.timeout = std::time::Duration::from_secs(timeout);
        }
        if let Some(shards) = self.shards {
            config.store.shards = shards;
        }
        if let Some(replicas) = self.replicas {
            config.store.replicas = replicas;
        }
    }
}

/// Subcommands that only inspect configuration
#[derive(Subcommand, Debug, Clone)]
pub enum CommonCommands {
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
    /// Show version information and exit
    Version,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Initialize logging based on CLI arguments.
    ///
    /// `--verbose` and `--quiet` pin the level; otherwise `RUST_LOG` applies, defaulting to info.
    pub fn init_logging(args: &CommonArgs) {
        let filter = if args.quiet {
            EnvFilter::new("warn")
        } else if args.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
        };

        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        let mut shown = config.clone();
        if shown.store.password.is_some() {
            shown.store.password = Some("********".to_string());
        }

        if json {
            let json = serde_json::to_string_pretty(&shown)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            println!("Index Lifecycle Configuration:");
            println!("==============================");
            println!("Index prefix: {}", shown.index_prefix);
            println!("Archive mode: {}", shown.archive);
            println!("Date separator: {:?}", shown.date_separator);
            println!("Store URL: {}", shown.store.url);
            match &shown.store.username {
                Some(username) => println!("Store user: {username}"),
                None => println!("Store user: <anonymous>"),
            }
            println!("Store timeout: {:?}", shown.store.timeout);
            println!(
                "Index settings: {} shards, {} replicas",
                shown.store.shards, shown.store.replicas
            );
            println!("Rollover conditions: {}", shown.rollover.conditions);
            println!("Lookback: {:?}", shown.rollover.lookback);
            println!("Clean rollover indices: {}", shown.cleaner.include_rollover);
            println!("Dry run: {}", shown.cleaner.dry_run);
            println!(
                "Max concurrent deletes: {}",
                shown.cleaner.max_concurrent_deletes
            );
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        log::info!("Validating configuration...");
        config.validate().context("Configuration is invalid")?;
        log::info!("✅ Configuration validation passed");
        Ok(())
    }

    /// Handle commands that don't touch the index store
    pub fn handle_common_command(command: &CommonCommands, config: &Configuration) -> Result<()> {
        match command {
            CommonCommands::Config { json } => display_config(config, *json),
            CommonCommands::Validate => validate_config(config),
            CommonCommands::Version => {
                println!("{}", version_info());
                Ok(())
            }
        }
    }

    /// Standard version information
    pub fn version_info() -> String {
        format!(
            "{} {} ({})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_RUST_VERSION")
        )
    }
}
