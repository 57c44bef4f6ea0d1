//! End-to-end harvest: seeds → crawl → fetch → ledger → optional retry pass.
//!
//! [`Harvester`] owns the configuration and the API client. Each stage is a
//! public method so the binary can drive progress display between them;
//! [`Harvester::harvest`] runs them all in order.

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::cache::ContentCache;
use crate::config::HarvestConfig;
use crate::coordinator::{RetryCoordinator, RetrySummary};
use crate::crawler::SearchCrawler;
use crate::download::{
    ApiClient, FetchEngine, FetchReport, ProgressHook, RateLimiter, StatusHistogram,
};
use crate::ledger::{Ledger, LedgerRow, ResultLedger};
use crate::model::{CitingTask, SeedPaper};
use crate::seeds::{filter_seeds, load_seed_papers, save_seed_papers};

/// Counts from one harvest run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestSummary {
    /// Seeds read from the seed table.
    pub seeds_loaded: usize,
    /// Seeds at or above the citation threshold.
    pub seeds_crawled: usize,
    /// Citing works discovered.
    pub tasks: usize,
    /// Statuses from the first fetch pass.
    pub first_pass: StatusHistogram,
    /// Rows in the ledger after the run.
    pub ledger_rows: usize,
    /// Retry pass results, when one ran.
    pub retry: Option<RetrySummary>,
}

/// Runs harvest stages against one configuration.
#[derive(Debug)]
pub struct Harvester {
    config: HarvestConfig,
    client: ApiClient,
}

impl Harvester {
    /// Builds the API client for `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if an endpoint URL is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: HarvestConfig) -> Result<Self> {
        let client = ApiClient::new(&config.api).context("building API client")?;
        Ok(Self { config, client })
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// The shared API client.
    #[must_use]
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Crawler configured with this run's page size, page delay and retries.
    #[must_use]
    pub fn crawler(&self) -> SearchCrawler {
        SearchCrawler::new(self.client.clone())
            .with_pacer(RateLimiter::new(self.config.page_delay))
            .with_retry_policy(self.config.retry_policy())
            .with_page_size(self.config.page_size)
    }

    /// Cache at the configured directory.
    #[must_use]
    pub fn cache(&self) -> ContentCache {
        ContentCache::new(&self.config.cache_dir)
    }

    /// Ledger at the configured path.
    #[must_use]
    pub fn ledger(&self) -> ResultLedger {
        ResultLedger::new(&self.config.ledger_path)
    }

    /// Discovers seed papers with the configured query and writes the seed table.
    ///
    /// # Errors
    ///
    /// Returns an error if the seed table cannot be written.
    #[instrument(skip(self), fields(query = %self.config.seed_query))]
    pub async fn discover_seeds(&self) -> Result<Vec<SeedPaper>> {
        let crawler = self.crawler();
        let advertised = crawler.count_results(&self.config.seed_query).await;
        info!(advertised, "seed query result count");

        let seeds = crawler.collect_seed_papers(&self.config.seed_query).await;
        save_seed_papers(&self.config.seeds_path, &seeds).with_context(|| {
            format!("writing seed table {}", self.config.seeds_path.display())
        })?;
        info!(seeds = seeds.len(), path = %self.config.seeds_path.display(), "seed table written");
        Ok(seeds)
    }

    /// Loads the seed table and applies the citation threshold.
    ///
    /// Returns `(loaded, kept)` counts alongside the kept seeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the seed table cannot be read.
    pub fn load_seeds(&self) -> Result<(usize, Vec<SeedPaper>)> {
        let seeds = load_seed_papers(&self.config.seeds_path).with_context(|| {
            format!("reading seed table {}", self.config.seeds_path.display())
        })?;
        let loaded = seeds.len();
        Ok((loaded, filter_seeds(seeds, self.config.min_citations)))
    }

    /// Crawls citing works for `seeds`.
    pub async fn crawl(&self, seeds: &[SeedPaper]) -> Vec<CitingTask> {
        self.crawler().crawl(seeds).await
    }

    /// Fetches `tasks` with the first-pass concurrency.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the configured concurrency.
    pub async fn fetch(
        &self,
        tasks: Vec<CitingTask>,
        progress: Option<ProgressHook>,
    ) -> Result<FetchReport> {
        let mut engine = FetchEngine::new(self.config.concurrency, self.config.retry_policy())
            .context("building fetch engine")?;
        if let Some(hook) = progress {
            engine = engine.with_progress(hook);
        }
        engine
            .run(tasks, &self.client, &self.cache())
            .await
            .context("running fetch batch")
    }

    /// Upserts a batch's outcomes into the ledger file.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read or written.
    pub fn record(&self, report: &FetchReport) -> Result<Ledger> {
        let ledger = self.ledger();
        ledger
            .save(report.outcomes.iter().map(LedgerRow::from_outcome))
            .with_context(|| format!("saving ledger {}", ledger.path().display()))
    }

    /// Runs a retry pass over failed ledger rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read or written.
    pub async fn retry_failed(&self, progress: Option<ProgressHook>) -> Result<RetrySummary> {
        let mut coordinator = RetryCoordinator::new(
            &self.config.ledger_path,
            self.cache(),
            self.config.effective_retry_concurrency(),
            self.config.retry_policy(),
        );
        if let Some(hook) = progress {
            coordinator = coordinator.with_progress(hook);
        }
        coordinator.run(&self.client).await
    }

    /// Seeds from the table → crawl → fetch → ledger, then a retry pass if `retry`.
    ///
    /// # Errors
    ///
    /// Returns an error if the seed table or ledger cannot be accessed.
    #[instrument(skip(self))]
    pub async fn harvest(&self, retry: bool) -> Result<HarvestSummary> {
        let (seeds_loaded, seeds) = self.load_seeds()?;
        let mut summary = self.harvest_seeds(&seeds, retry).await?;
        summary.seeds_loaded = seeds_loaded;
        Ok(summary)
    }

    /// Like [`Harvester::harvest`], for seeds already filtered by the caller.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be accessed.
    pub async fn harvest_seeds(&self, seeds: &[SeedPaper], retry: bool) -> Result<HarvestSummary> {
        let tasks = self.crawl(seeds).await;
        let task_count = tasks.len();

        let report = self.fetch(tasks, None).await?;
        let mut ledger = self.record(&report)?;

        let retry_summary = if retry {
            let summary = self.retry_failed(None).await?;
            if summary.attempted > 0 {
                ledger = self.ledger().load().context("reloading ledger")?;
            }
            Some(summary)
        } else {
            None
        };

        let summary = HarvestSummary {
            seeds_loaded: seeds.len(),
            seeds_crawled: seeds.len(),
            tasks: task_count,
            first_pass: report.histogram(),
            ledger_rows: ledger.len(),
            retry: retry_summary,
        };
        info!(
            seeds = summary.seeds_crawled,
            tasks = summary.tasks,
            ledger_rows = summary.ledger_rows,
            "harvest complete"
        );
        Ok(summary)
    }
}
