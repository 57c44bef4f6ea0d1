//! Fetch engine for concurrent fulltext retrieval with retry support.
//!
//! The [`FetchEngine`] runs a batch of [`CitingTask`]s against the fulltext
//! API, bounded by a semaphore, writing each body into the [`ContentCache`].
//! Every task ends in exactly one [`DownloadStatus`]; failures are data, not
//! errors, so one bad DOI never aborts the batch.
//!
//! # Example
//!
//! ```no_run
//! use citefetch_core::{ApiClient, ApiConfig, CitingTask, ContentCache, FetchEngine, RetryPolicy};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ApiClient::new(&ApiConfig::new("my-key"))?;
//! let cache = ContentCache::new("data/raw/fulltext");
//! let engine = FetchEngine::new(10, RetryPolicy::default())?;
//!
//! let report = engine
//!     .run(vec![CitingTask::from_doi("10.1016/j.dib.2020.105000")], &client, &cache)
//!     .await?;
//! println!("{}", report.histogram());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::client::{ApiClient, HttpOutcome};
use super::retry::{FailureType, RetryDecision, RetryPolicy};
use super::status::{DownloadStatus, StatusHistogram};
use crate::cache::ContentCache;
use crate::model::{CitingTask, FetchOutcome};

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 100;

/// Default concurrency if not specified.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Callback invoked once per finished task.
pub type ProgressHook = Arc<dyn Fn(&FetchOutcome) + Send + Sync>;

/// Error type for fetch engine setup and scheduling.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Counters from one batch run, updated concurrently by worker tasks.
#[derive(Debug, Default)]
pub struct FetchStats {
    downloaded: AtomicUsize,
    cached: AtomicUsize,
    failed: AtomicUsize,
    backoffs: AtomicUsize,
}

impl FetchStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks that downloaded a new artifact.
    #[must_use]
    pub fn downloaded(&self) -> usize {
        self.downloaded.load(Ordering::SeqCst)
    }

    /// Tasks satisfied from the cache.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cached.load(Ordering::SeqCst)
    }

    /// Tasks that ended in a failed status.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Backoff sleeps taken across all tasks.
    #[must_use]
    pub fn backoffs(&self) -> usize {
        self.backoffs.load(Ordering::SeqCst)
    }

    /// Total finished tasks.
    #[must_use]
    pub fn total(&self) -> usize {
        self.downloaded() + self.cached() + self.failed()
    }

    fn record(&self, status: &DownloadStatus) {
        let counter = match status {
            DownloadStatus::Cached => &self.cached,
            DownloadStatus::Downloaded { .. } => &self.downloaded,
            _ => &self.failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_backoffs(&self) {
        self.backoffs.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot(&self) -> Self {
        Self {
            downloaded: AtomicUsize::new(self.downloaded()),
            cached: AtomicUsize::new(self.cached()),
            failed: AtomicUsize::new(self.failed()),
            backoffs: AtomicUsize::new(self.backoffs()),
        }
    }
}

/// Everything a batch produced: one outcome per input task, in input order.
#[derive(Debug)]
pub struct FetchReport {
    /// Outcomes aligned with the input tasks.
    pub outcomes: Vec<FetchOutcome>,
    /// Batch counters.
    pub stats: FetchStats,
}

impl FetchReport {
    /// Status histogram over all outcomes.
    #[must_use]
    pub fn histogram(&self) -> StatusHistogram {
        self.outcomes.iter().map(|outcome| &outcome.status).collect()
    }
}

/// Bounded-concurrency fulltext fetcher.
///
/// # Concurrency Model
///
/// - Each distinct DOI runs in its own Tokio task; later tasks repeating a
///   DOI share the first one's outcome
/// - A semaphore permit is acquired before spawning, released when the task ends
/// - Tasks share only atomic counters; their cache paths are DOI-disjoint
///
/// # Retry Behavior
///
/// - 429 and transient failures back off and retry up to the policy's attempt limit
/// - Any other HTTP status fails the task immediately
/// - No sleep follows the final attempt
pub struct FetchEngine {
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    retry_policy: RetryPolicy,
    progress: Option<ProgressHook>,
}

impl fmt::Debug for FetchEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchEngine")
            .field("concurrency", &self.concurrency)
            .field("retry_policy", &self.retry_policy)
            .field("progress", &self.progress.is_some())
            .finish_non_exhaustive()
    }
}

impl FetchEngine {
    /// Creates an engine allowing `concurrency` in-flight tasks.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if the value is outside
    /// the valid range (1-100).
    #[instrument(level = "debug", skip(retry_policy))]
    pub fn new(concurrency: usize, retry_policy: RetryPolicy) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency { value: concurrency });
        }

        debug!(
            concurrency,
            max_attempts = retry_policy.max_attempts(),
            "creating fetch engine"
        );

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            retry_policy,
            progress: None,
        })
    }

    /// Registers a callback invoked once per finished task.
    #[must_use]
    pub fn with_progress(mut self, hook: ProgressHook) -> Self {
        self.progress = Some(hook);
        self
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Returns the configured retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Fetches every task and returns one outcome per task, in input order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SemaphoreClosed`] if the semaphore is closed.
    /// Individual task failures never surface here; they are recorded in the
    /// returned outcomes.
    #[instrument(skip(self, tasks, client, cache), fields(tasks = tasks.len(), cache = %cache.root().display()))]
    pub async fn run(
        &self,
        tasks: Vec<CitingTask>,
        client: &ApiClient,
        cache: &ContentCache,
    ) -> Result<FetchReport, EngineError> {
        info!(concurrency = self.concurrency, "starting fetch batch");

        if let Err(error) = cache.ensure_root() {
            warn!(error = %error, "could not create cache directory");
        }
        warn_on_collisions(&tasks, cache);

        let stats = Arc::new(FetchStats::new());
        let total = tasks.len();
        let mut first_by_doi: HashMap<String, usize> = HashMap::new();
        let mut repeats = Vec::new();
        let mut handles = Vec::with_capacity(total);

        for (index, task) in tasks.into_iter().enumerate() {
            if let Some(doi) = &task.doi {
                if let Some(&first) = first_by_doi.get(doi) {
                    debug!(doi = %doi, "DOI repeated in batch, sharing first outcome");
                    repeats.push((index, first, task));
                    continue;
                }
                first_by_doi.insert(doi.clone(), index);
            }

            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| EngineError::SemaphoreClosed)?;

            let fallback = task.clone();
            let client = client.clone();
            let cache = cache.clone();
            let stats = Arc::clone(&stats);
            let policy = self.retry_policy.clone();
            let progress = self.progress.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;

                let outcome = fetch_with_retry(task, &client, &cache, &policy, &stats).await;
                stats.record(&outcome.status);
                if let Some(hook) = progress {
                    hook(&outcome);
                }
                outcome
            });
            handles.push((index, handle, fallback));
        }

        debug!(task_count = handles.len(), repeats = repeats.len(), "waiting for fetch tasks");

        let mut slots: Vec<Option<FetchOutcome>> = vec![None; total];
        for (index, handle, fallback) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(error) => {
                    warn!(doi = ?fallback.doi, error = %error, "fetch task panicked");
                    let status = DownloadStatus::RetriesExhausted;
                    stats.record(&status);
                    FetchOutcome::failed(fallback, status)
                }
            };
            slots[index] = Some(outcome);
        }

        for (index, first, task) in repeats {
            let Some(shared) = slots[first].as_ref() else {
                continue;
            };
            let outcome = FetchOutcome {
                task,
                fulltext_path: shared.fulltext_path.clone(),
                status: shared.status.clone(),
            };
            stats.record(&outcome.status);
            if let Some(hook) = &self.progress {
                hook(&outcome);
            }
            slots[index] = Some(outcome);
        }

        let outcomes: Vec<FetchOutcome> = slots.into_iter().flatten().collect();

        let report = FetchReport {
            outcomes,
            stats: stats.snapshot(),
        };
        log_batch_summary(&report, cache);
        Ok(report)
    }
}

/// Runs one task to its terminal status.
#[instrument(skip_all, fields(doi = ?task.doi))]
async fn fetch_with_retry(
    task: CitingTask,
    client: &ApiClient,
    cache: &ContentCache,
    policy: &RetryPolicy,
    stats: &FetchStats,
) -> FetchOutcome {
    let Some(doi) = task.doi.clone() else {
        debug!(eid = %task.eid, "no DOI, skipping");
        return FetchOutcome::failed(task, DownloadStatus::MissingDoi);
    };

    if cache.exists(&doi) {
        debug!("cache hit");
        let path = cache.path_for(&doi);
        return FetchOutcome::success(task, path, DownloadStatus::Cached);
    }

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        debug!(attempt, "requesting fulltext");

        let (error, failure_type) = match client.fetch_fulltext(&doi).await {
            HttpOutcome::Success(body) => match cache.store(&doi, body).await {
                Ok(path) => {
                    debug!(attempt, path = %path.display(), "fulltext downloaded");
                    return FetchOutcome::success(
                        task,
                        path,
                        DownloadStatus::Downloaded { attempt },
                    );
                }
                Err(error) => (error, FailureType::Transient),
            },
            HttpOutcome::RateLimited(error) => (error, FailureType::RateLimited),
            HttpOutcome::Transient(error) => (error, FailureType::Transient),
            HttpOutcome::Permanent(error) => (error, FailureType::Permanent),
        };

        match policy.should_retry(failure_type, attempt) {
            RetryDecision::Retry {
                delay,
                attempt: next_attempt,
            } => {
                info!(
                    doi = %doi,
                    attempt = next_attempt,
                    max_attempts = policy.max_attempts(),
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "backing off before retry"
                );
                stats.increment_backoffs();
                tokio::time::sleep(delay).await;
            }
            RetryDecision::DoNotRetry { reason } => {
                let status = match (failure_type, error.http_status_code()) {
                    (FailureType::Permanent, Some(status)) => DownloadStatus::HttpStatus { status },
                    _ => DownloadStatus::RetriesExhausted,
                };
                warn!(doi = %doi, attempts = attempt, error = %error, %reason, %status, "fetch failed");
                return FetchOutcome::failed(task, status);
            }
        }
    }
}

fn warn_on_collisions(tasks: &[CitingTask], cache: &ContentCache) {
    let dois = tasks.iter().filter_map(|task| task.doi.as_deref());
    for (path, dois) in cache.collisions(dois) {
        warn!(
            path = %path.display(),
            dois = ?dois,
            "distinct DOIs share one cache file; only the first fetched is kept"
        );
    }
}

fn log_batch_summary(report: &FetchReport, cache: &ContentCache) {
    let stats = &report.stats;
    info!(
        downloaded = stats.downloaded(),
        cached = stats.cached(),
        failed = stats.failed(),
        backoffs = stats.backoffs(),
        total = stats.total(),
        "fetch batch complete"
    );
    for (status, count) in report.histogram().iter() {
        info!(%status, count, "status count");
    }
    match cache.usage() {
        Ok(usage) => info!(entries = usage.entries, bytes = usage.bytes, "cache usage"),
        Err(error) => warn!(error = %error, "could not measure cache usage"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_new_valid_concurrency() {
        for value in [1, DEFAULT_CONCURRENCY, 100] {
            let engine = FetchEngine::new(value, RetryPolicy::default()).unwrap();
            assert_eq!(engine.concurrency(), value);
        }
    }

    #[test]
    fn test_engine_new_invalid_concurrency() {
        assert!(matches!(
            FetchEngine::new(0, RetryPolicy::default()),
            Err(EngineError::InvalidConcurrency { value: 0 })
        ));
        assert!(matches!(
            FetchEngine::new(101, RetryPolicy::default()),
            Err(EngineError::InvalidConcurrency { value: 101 })
        ));
    }

    #[test]
    fn test_engine_stores_retry_policy() {
        let engine = FetchEngine::new(4, RetryPolicy::with_max_attempts(5)).unwrap();
        assert_eq!(engine.retry_policy().max_attempts(), 5);
    }

    #[test]
    fn test_engine_error_display() {
        let msg = EngineError::InvalidConcurrency { value: 0 }.to_string();
        assert!(msg.contains("invalid concurrency"));
        assert!(msg.contains("100"));
    }

    #[test]
    fn test_stats_record_by_status() {
        let stats = FetchStats::new();
        stats.record(&DownloadStatus::Cached);
        stats.record(&DownloadStatus::Downloaded { attempt: 2 });
        stats.record(&DownloadStatus::MissingDoi);
        stats.record(&DownloadStatus::HttpStatus { status: 404 });
        stats.increment_backoffs();

        assert_eq!(stats.cached(), 1);
        assert_eq!(stats.downloaded(), 1);
        assert_eq!(stats.failed(), 2);
        assert_eq!(stats.backoffs(), 1);
        assert_eq!(stats.total(), 4);

        let copy = stats.snapshot();
        assert_eq!(copy.total(), 4);
    }

    #[test]
    fn test_stats_thread_safe() {
        let stats = Arc::new(FetchStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        stats.record(&DownloadStatus::Cached);
                        stats.increment_backoffs();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.cached(), 400);
        assert_eq!(stats.backoffs(), 400);
    }

    #[test]
    fn test_report_histogram() {
        let report = FetchReport {
            outcomes: vec![
                FetchOutcome::failed(CitingTask::new("e", None, "", "", ""), DownloadStatus::MissingDoi),
                FetchOutcome::failed(CitingTask::from_doi("10.1/x"), DownloadStatus::RetriesExhausted),
            ],
            stats: FetchStats::new(),
        };
        let histogram = report.histogram();
        assert_eq!(histogram.count("failed (DOI is missing)"), 1);
        assert_eq!(histogram.total(), 2);
    }

    #[tokio::test]
    async fn test_missing_doi_and_cache_hit_need_no_server() {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = ContentCache::new(dir.path());
        cache.store("10.1/cached", "<x/>".to_string()).await.unwrap();

        // Nothing listens here; any request would fail.
        let config = crate::config::ApiConfig::new("k")
            .with_fulltext_base_url("http://127.0.0.1:9/doi");
        let client = ApiClient::new(&config).unwrap();
        let engine = FetchEngine::new(2, RetryPolicy::without_delay(1)).unwrap();

        let tasks = vec![
            CitingTask::new("e1", Some(" "), "t", "2021", "seed"),
            CitingTask::from_doi("10.1/cached"),
        ];
        let report = engine.run(tasks, &client, &cache).await.unwrap();

        assert_eq!(report.outcomes[0].status, DownloadStatus::MissingDoi);
        assert_eq!(report.outcomes[0].fulltext_path, None);
        assert_eq!(report.outcomes[1].status, DownloadStatus::Cached);
        assert_eq!(
            report.outcomes[1].fulltext_path,
            Some(cache.path_for("10.1/cached"))
        );
        assert_eq!(report.stats.backoffs(), 0);
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn test_colliding_dois_warn_and_share_cache_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = ContentCache::new(dir.path());
        cache.store("10.1/a", "<x/>".to_string()).await.unwrap();

        let config = crate::config::ApiConfig::new("k")
            .with_fulltext_base_url("http://127.0.0.1:9/doi");
        let client = ApiClient::new(&config).unwrap();
        let engine = FetchEngine::new(2, RetryPolicy::without_delay(1)).unwrap();

        let tasks = vec![
            CitingTask::from_doi("10.1/a"),
            CitingTask::from_doi("10.1:a"),
        ];
        let report = engine.run(tasks, &client, &cache).await.unwrap();

        assert!(logs_contain("distinct DOIs share one cache file"));
        assert!(report.outcomes.iter().all(|o| o.status == DownloadStatus::Cached));
        assert_eq!(report.outcomes[0].fulltext_path, report.outcomes[1].fulltext_path);
    }
}
