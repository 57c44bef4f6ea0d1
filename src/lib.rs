//! Citefetch Core Library
//!
//! This library discovers scholarly works that cite a known set of data papers
//! through the Scopus Search API and fetches their fulltext XML into a local,
//! content-addressed cache, recording every outcome in a mergeable CSV ledger.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - API client, retry policy, and the concurrent fetch engine
//! - [`crawler`] - Cursor-paginated search for seed papers and citing works
//! - [`cache`] - DOI-addressed fulltext cache on disk
//! - [`ledger`] - Durable per-DOI outcome table with idempotent merge
//! - [`coordinator`] - Second-pass retry over ledger failures
//! - [`seeds`] - Seed paper table loading, filtering, and saving
//! - [`pipeline`] - End-to-end harvest orchestration
//! - [`config`] - Explicit configuration values and file config loading

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod crawler;
pub mod download;
pub mod ledger;
pub mod model;
pub mod pipeline;
pub mod seeds;
mod user_agent;

// Re-export commonly used types
pub use cache::{CacheUsage, ContentCache, sanitize_doi};
pub use config::{ApiConfig, ConfigError, FileConfig, HarvestConfig};
pub use coordinator::{RetryCoordinator, RetrySummary};
pub use crawler::{CrawlError, SearchCrawler};
pub use download::{
    ApiClient, DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, DownloadError, DownloadStatus,
    EngineError, FailureType, FetchEngine, FetchReport, FetchStats, HttpOutcome, RateLimiter,
    RetryDecision, RetryPolicy, StatusHistogram,
};
pub use ledger::{Ledger, LedgerError, LedgerRow, ResultLedger, RowUpdate};
pub use model::{CitingTask, FetchOutcome, SeedPaper};
pub use pipeline::{HarvestSummary, Harvester};
pub use seeds::{SeedError, filter_seeds, load_seed_papers, save_seed_papers};
