//! HTTP access to the search and fulltext APIs and the concurrent fetch engine.
//!
//! # Features
//!
//! - One pooled client per run with explicit endpoints, key and timeouts
//! - Typed [`HttpOutcome`] (success / rate-limited / transient / permanent)
//! - Exponential backoff with jitter for 429 and transient failures
//! - Semaphore-bounded fetch engine writing into the DOI-addressed cache
//! - Closed [`DownloadStatus`] vocabulary persisted in the ledger
//!
//! # Example
//!
//! ```no_run
//! use citefetch_core::download::{ApiClient, HttpOutcome};
//! use citefetch_core::ApiConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ApiClient::new(&ApiConfig::new("my-key"))?;
//! match client.fetch_fulltext("10.1016/j.dib.2020.105000").await {
//!     HttpOutcome::Success(xml) => println!("{} bytes", xml.len()),
//!     other => println!("failed: {:?}", other.failure_type()),
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod engine;
mod error;
pub mod rate_limiter;
mod retry;
mod status;

pub use client::{ApiClient, HttpOutcome};
pub use engine::{
    DEFAULT_CONCURRENCY, EngineError, FetchEngine, FetchReport, FetchStats, ProgressHook,
};
pub use error::{DownloadError, redact_url};
pub use rate_limiter::{DEFAULT_PAGE_DELAY, RateLimiter, extract_host};
pub use retry::{DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error};
pub use status::{DownloadStatus, StatusHistogram};
