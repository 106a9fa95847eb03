//! cachegraph - build cache provenance export
//!
//! CLI entry point that dispatches to subcommands.

use cachegraph::cli::{Cli, Commands};
use cachegraph::config::ConfigManager;
use cachegraph::error::CacheGraphResult;
use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> CacheGraphResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    // Initialize logging: 0 = warn, 1 = info, 2+ = debug
    let verbosity = if config.general.verbose {
        cli.verbose.max(1)
    } else {
        cli.verbose
    };
    let filter = match verbosity {
        0 => EnvFilter::new("cachegraph=warn"),
        1 => EnvFilter::new("cachegraph=info"),
        _ => EnvFilter::new("cachegraph=debug"),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if config.general.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.without_time().init();
    }

    debug!("Using config {}", config_manager.path().display());

    // Dispatch to command
    match cli.command {
        Commands::Export(args) => cachegraph::cli::commands::export(args, &config).await,
        Commands::Inspect(args) => cachegraph::cli::commands::inspect(args).await,
        Commands::Config(args) => {
            cachegraph::cli::commands::config(args, &config, &config_manager).await
        }
    }
}
