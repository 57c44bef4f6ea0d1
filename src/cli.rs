//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use citefetch_core::config::API_KEY_ENV;

/// Find works citing a set of data papers and fetch their fulltext XML.
///
/// Seeds are discovered with a Scopus query, their citing works are crawled
/// page by page, and each work's fulltext is cached by DOI. Every outcome is
/// recorded in a CSV ledger that later runs update in place.
#[derive(Parser, Debug)]
#[command(name = "citefetch")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output and progress bars
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/citefetch/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Discover seed data papers and write the seed table
    Seeds(SeedsArgs),
    /// Crawl citing works for the seed table and fetch their fulltext
    Harvest(HarvestArgs),
    /// Retry every failed row in an existing ledger
    Retry(RetryArgs),
    /// Summarize the ledger
    Status(StatusArgs),
}

/// API credentials and endpoints.
#[derive(Args, Debug, Default)]
pub struct ApiArgs {
    /// Elsevier API key
    #[arg(long, env = API_KEY_ENV, hide_env_values = true)]
    pub api_key: Option<String>,

    /// Search endpoint override
    #[arg(long, value_name = "URL")]
    pub search_url: Option<String>,

    /// Fulltext endpoint base override
    #[arg(long, value_name = "URL")]
    pub fulltext_url: Option<String>,

    /// Per-request timeout in seconds (1-3600)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout: Option<u64>,
}

/// Fetch tuning shared by `harvest` and `retry`.
#[derive(Args, Debug, Default)]
pub struct FetchArgs {
    /// Fulltext cache directory
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Ledger CSV
    #[arg(long, value_name = "PATH")]
    pub ledger: Option<PathBuf>,

    /// Maximum attempts per fulltext request (1-20)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_retries: Option<u32>,
}

/// `seeds` arguments.
#[derive(Args, Debug)]
pub struct SeedsArgs {
    #[command(flatten)]
    pub api: ApiArgs,

    /// Seed discovery query
    #[arg(long)]
    pub query: Option<String>,

    /// Where to write the seed table
    #[arg(long, value_name = "PATH")]
    pub seeds: Option<PathBuf>,

    /// Pause between search pages in milliseconds (0-60000)
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=60_000))]
    pub page_delay: Option<u64>,
}

/// `harvest` arguments.
#[derive(Args, Debug)]
pub struct HarvestArgs {
    #[command(flatten)]
    pub api: ApiArgs,

    #[command(flatten)]
    pub fetch: FetchArgs,

    /// Seed table CSV
    #[arg(long, value_name = "PATH")]
    pub seeds: Option<PathBuf>,

    /// Minimum citation count for a seed to be crawled
    #[arg(short = 'm', long)]
    pub min_citations: Option<u64>,

    /// Maximum concurrent fulltext requests (1-100)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u16).range(1..=100))]
    pub concurrency: Option<u16>,

    /// Pause between search pages in milliseconds (0-60000)
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=60_000))]
    pub page_delay: Option<u64>,

    /// Skip the retry pass over failures
    #[arg(long)]
    pub no_retry: bool,
}

/// `retry` arguments.
#[derive(Args, Debug)]
pub struct RetryArgs {
    #[command(flatten)]
    pub api: ApiArgs,

    #[command(flatten)]
    pub fetch: FetchArgs,

    /// Maximum concurrent fulltext requests (1-100; default: half the harvest concurrency)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u16).range(1..=100))]
    pub concurrency: Option<u16>,
}

/// `status` arguments.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Ledger CSV
    #[arg(long, value_name = "PATH")]
    pub ledger: Option<PathBuf>,
}
