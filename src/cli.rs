//! Command-line interface and binary bootstrap helpers.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for the snapvault binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "snapvault")]
#[command(about = "GFS retention for Btrfs snapshots and Borg archive repositories")]
#[command(version)]
pub struct Cli {
    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(
        short = 'n',
        long,
        help = "Skip mutating btrfs and borg commands; queries still run"
    )]
    pub dry_run: bool,

    #[arg(
        short = 's',
        long,
        help = "Do not make a new snapshot, only reconcile archives"
    )]
    pub skip_snapshot: bool,

    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

/// Subcommands beyond the default retention run.
#[derive(Subcommand, Debug, Clone, Default)]
pub enum CliCommand {
    /// Run the snapshot and archive phases (default behavior)
    #[default]
    Run,
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};

    /// Initialize logging based on CLI arguments
    pub fn init_logging(cli: &Cli) {
        let level = if cli.quiet {
            "warn"
        } else if cli.verbose {
            "debug"
        } else {
            "info"
        };

        // SAFETY: Setting RUST_LOG environment variable is safe for logging configuration
        unsafe {
            std::env::set_var("RUST_LOG", level);
        }
        tracing_subscriber::fmt::init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                tracing::info!(path = %path.display(), "loading configuration");
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            println!("snapvault configuration:");
            println!("========================");
            println!("Rules: {}", config.rules.len());
            for rule in &config.rules {
                println!(
                    "  every {} keep {}{}",
                    humantime::format_duration(rule.interval),
                    rule.amount,
                    if rule.backup { " (backup)" } else { "" }
                );
            }
            println!("Snapshot source: {}", config.snapshots.source_path);
            println!("Snapshot mount dir: {}", config.snapshots.mount_dir);
            println!("Snapshot prefix: {}", config.snapshots.prefix);
            println!("Archive prefix: {}", config.archive.prefix);
            println!("Repositories: {}", config.archive.repositories.len());
            for repository in &config.archive.repositories {
                println!("  {}", repository.url);
            }
            println!("Archive paths: {}", config.archive.paths.join(", "));
            println!("Instant format: {}", config.instant_format);
            println!("Time origin: {}", config.time_origin);
        }
        Ok(())
    }
}
