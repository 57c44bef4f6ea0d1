//! Second-pass retry over ledger failures.
//!
//! The coordinator reloads the ledger, re-runs every row whose status
//! contains `failed` through a fetch engine with reduced concurrency, and
//! merges the new outcomes back by DOI. There is no ceiling across runs: each
//! invocation retries whatever is still failed.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::cache::ContentCache;
use crate::download::{ApiClient, FetchEngine, ProgressHook, RetryPolicy, StatusHistogram};
use crate::ledger::{ResultLedger, RowUpdate};
use crate::model::CitingTask;

/// What a retry pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrySummary {
    /// Failed rows selected for retry.
    pub attempted: usize,
    /// Of those, rows that now carry a success status.
    pub recovered: usize,
    /// Rows skipped because they have no DOI.
    pub skipped_without_doi: usize,
    /// Statuses produced by this pass.
    pub histogram: StatusHistogram,
}

/// Retries failed ledger rows.
pub struct RetryCoordinator {
    ledger: ResultLedger,
    cache: ContentCache,
    concurrency: usize,
    retry_policy: RetryPolicy,
    progress: Option<ProgressHook>,
}

impl fmt::Debug for RetryCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryCoordinator")
            .field("ledger", &self.ledger)
            .field("cache", &self.cache)
            .field("concurrency", &self.concurrency)
            .field("retry_policy", &self.retry_policy)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl RetryCoordinator {
    /// Creates a coordinator for the ledger at `ledger_path`.
    #[must_use]
    pub fn new(
        ledger_path: &Path,
        cache: ContentCache,
        concurrency: usize,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            ledger: ResultLedger::new(ledger_path),
            cache,
            concurrency: concurrency.max(1),
            retry_policy,
            progress: None,
        }
    }

    /// Registers a per-task progress callback for the fetch engine.
    #[must_use]
    pub fn with_progress(mut self, hook: ProgressHook) -> Self {
        self.progress = Some(hook);
        self
    }

    /// Runs one retry pass.
    ///
    /// With no failed rows this returns immediately: no requests are sent and
    /// the ledger file is not rewritten. DOI-less failures are counted but
    /// never fetched, since they would fail again without a request.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read or written, or the
    /// engine cannot be built for the configured concurrency.
    #[instrument(skip(self, client), fields(ledger = %self.ledger.path().display()))]
    pub async fn run(&self, client: &ApiClient) -> Result<RetrySummary> {
        let ledger = self
            .ledger
            .load()
            .with_context(|| format!("loading ledger {}", self.ledger.path().display()))?;

        let failed: Vec<CitingTask> = ledger.failed_rows().map(|row| row.to_task()).collect();
        let (tasks, doi_less): (Vec<CitingTask>, Vec<CitingTask>) =
            failed.into_iter().partition(|task| task.doi.is_some());

        if tasks.is_empty() {
            info!(
                skipped_without_doi = doi_less.len(),
                "no failed rows to retry"
            );
            return Ok(RetrySummary {
                skipped_without_doi: doi_less.len(),
                ..RetrySummary::default()
            });
        }

        info!(
            retrying = tasks.len(),
            skipped_without_doi = doi_less.len(),
            concurrency = self.concurrency,
            "starting retry pass"
        );

        let mut engine = FetchEngine::new(self.concurrency, self.retry_policy.clone())
            .context("building retry engine")?;
        if let Some(hook) = &self.progress {
            engine = engine.with_progress(hook.clone());
        }

        let attempted = tasks.len();
        let report = engine
            .run(tasks, client, &self.cache)
            .await
            .context("running retry pass")?;

        let recovered = report
            .outcomes
            .iter()
            .filter(|outcome| outcome.status.is_success())
            .count();
        let histogram = report.histogram();

        self.ledger
            .merge(report.outcomes.iter().filter_map(RowUpdate::from_outcome))
            .with_context(|| format!("updating ledger {}", self.ledger.path().display()))?;

        info!(attempted, recovered, "retry pass complete");
        Ok(RetrySummary {
            attempted,
            recovered,
            skipped_without_doi: doi_less.len(),
            histogram,
        })
    }
}
