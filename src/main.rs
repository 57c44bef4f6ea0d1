//! CLI entry point for citefetch.

use std::io::{self, IsTerminal};

use anyhow::Result;
use clap::Parser;
use tracing::debug;

mod cli;
mod commands;
mod progress;

use cli::{Cli, Command};
use commands::{run_harvest_command, run_retry_command, run_seeds_command, run_status_command};

#[tokio::main]
async fn main() -> Result<()> {
    // A local .env may carry SCOPUS_API_KEY; load it before clap reads the environment.
    let dotenv = dotenvy::dotenv();

    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match &dotenv {
        Ok(path) => debug!(path = %path.display(), "loaded .env"),
        Err(error) if error.not_found() => {}
        Err(error) => debug!(%error, "ignoring unreadable .env"),
    }
    debug!(command = ?cli.command, "CLI arguments parsed");

    let show_progress = !cli.quiet && io::stderr().is_terminal();
    let config_path = cli.config.as_deref();

    match &cli.command {
        Command::Seeds(args) => run_seeds_command(args, config_path, show_progress).await,
        Command::Harvest(args) => run_harvest_command(args, config_path, show_progress).await,
        Command::Retry(args) => run_retry_command(args, config_path, show_progress).await,
        Command::Status(args) => run_status_command(args, config_path),
    }
}
