//! Cursor-paginated search crawler.
//!
//! For each seed paper the crawler queries `REF(<eid>)` starting from cursor
//! `*` and follows the `next` link until a page comes back empty or carries no
//! usable cursor. Seeds are walked one after another; a terminal error for one
//! seed is logged and that seed keeps whatever it already collected.

mod response;

use tracing::{debug, info, instrument, warn};

use crate::config::DEFAULT_PAGE_SIZE;
use crate::download::{ApiClient, DownloadError, RateLimiter, RetryDecision, RetryPolicy};
use crate::model::{CitingTask, SeedPaper};
use response::{SearchEntry, SearchPage, parse_page};

/// Cursor value that starts a new result walk.
const INITIAL_CURSOR: &str = "*";

/// A search walk that ended before the last page.
#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    /// A page request failed terminally (after any retries).
    #[error("search `{query}` failed on page {page}: {source}")]
    Search {
        /// The search query.
        query: String,
        /// 1-indexed page that failed.
        page: usize,
        /// The final request error.
        #[source]
        source: DownloadError,
    },
}

/// Entries gathered by one query walk, plus the error that cut it short.
#[derive(Debug, Default)]
struct Walk {
    entries: Vec<SearchEntry>,
    total_results: Option<u64>,
    error: Option<CrawlError>,
}

/// Sequential crawler over the search API.
#[derive(Debug)]
pub struct SearchCrawler {
    client: ApiClient,
    pacer: RateLimiter,
    retry_policy: RetryPolicy,
    page_size: u32,
}

impl SearchCrawler {
    /// Creates a crawler with a 1 s page delay, default retries and 25 results per page.
    #[must_use]
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            pacer: RateLimiter::default(),
            retry_policy: RetryPolicy::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Replaces the inter-page pacer.
    #[must_use]
    pub fn with_pacer(mut self, pacer: RateLimiter) -> Self {
        self.pacer = pacer;
        self
    }

    /// Replaces the retry policy used for 429 and transient page failures.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Sets the page size (at least 1).
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Collects citing works for every seed, in seed order then API order.
    ///
    /// Works citing more than one seed appear once per seed.
    #[instrument(skip_all, fields(seeds = seeds.len()))]
    pub async fn crawl(&self, seeds: &[SeedPaper]) -> Vec<CitingTask> {
        let mut tasks = Vec::new();

        for (index, seed) in seeds.iter().enumerate() {
            let walk = self.walk(&seed_query(seed)).await;
            let found = walk.entries.len();
            if let Some(error) = &walk.error {
                warn!(
                    eid = %seed.eid,
                    kept = found,
                    error = %error,
                    "seed crawl aborted"
                );
            }
            debug!(
                seed = index + 1,
                of = seeds.len(),
                eid = %seed.eid,
                found,
                "seed crawled"
            );
            tasks.extend(
                walk.entries
                    .into_iter()
                    .map(|entry| entry.into_task(&seed.title)),
            );
        }

        info!(tasks = tasks.len(), "crawl complete");
        tasks
    }

    /// Collects citing works for one seed.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError`] if a page fails terminally. Use
    /// [`SearchCrawler::crawl`] to keep partial results instead.
    pub async fn crawl_seed(&self, seed: &SeedPaper) -> Result<Vec<CitingTask>, CrawlError> {
        let walk = self.walk(&seed_query(seed)).await;
        if let Some(error) = walk.error {
            return Err(error);
        }
        Ok(walk
            .entries
            .into_iter()
            .map(|entry| entry.into_task(&seed.title))
            .collect())
    }

    /// Walks `query` and maps hits to seed papers, dropping hits without an EID.
    ///
    /// A terminal error keeps the seeds collected so far; a shortfall against
    /// the advertised total is logged.
    #[instrument(skip(self))]
    pub async fn collect_seed_papers(&self, query: &str) -> Vec<SeedPaper> {
        let walk = self.walk(query).await;
        if let Some(error) = &walk.error {
            warn!(error = %error, kept = walk.entries.len(), "seed discovery aborted");
        }

        let fetched = walk.entries.len();
        let seeds: Vec<SeedPaper> = walk
            .entries
            .into_iter()
            .filter_map(SearchEntry::into_seed)
            .collect();

        if let Some(total) = walk.total_results
            && u64::try_from(fetched).unwrap_or(u64::MAX) < total
        {
            warn!(total, fetched, "fewer results collected than the API advertised");
        }
        info!(seeds = seeds.len(), "seed discovery complete");
        seeds
    }

    /// Total hit count for `query`; 0 on any error.
    #[instrument(skip(self))]
    pub async fn count_results(&self, query: &str) -> u64 {
        match self.fetch_page(query, INITIAL_CURSOR, 1).await {
            Ok(page) => page.total_results.unwrap_or(0),
            Err(error) => {
                warn!(error = %error, "could not count results");
                0
            }
        }
    }

    async fn walk(&self, query: &str) -> Walk {
        let mut walk = Walk::default();
        let mut cursor = INITIAL_CURSOR.to_string();
        let mut page_number = 0usize;

        loop {
            page_number += 1;
            let page = match self.fetch_page(query, &cursor, self.page_size).await {
                Ok(page) => page,
                Err(source) => {
                    walk.error = Some(CrawlError::Search {
                        query: query.to_string(),
                        page: page_number,
                        source,
                    });
                    break;
                }
            };

            if walk.total_results.is_none() {
                walk.total_results = page.total_results;
            }
            if page.entries.is_empty() {
                debug!(query, page = page_number, "empty page, done");
                break;
            }
            walk.entries.extend(page.entries);

            match page.next_cursor {
                Some(next) if next != cursor => cursor = next,
                _ => {
                    debug!(query, page = page_number, "no next cursor, done");
                    break;
                }
            }
        }

        walk
    }

    /// One page, with backoff on 429 and transient failures.
    async fn fetch_page(
        &self,
        query: &str,
        cursor: &str,
        count: u32,
    ) -> Result<SearchPage, DownloadError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.pacer.acquire(self.client.search_url().as_str()).await;

            let (error, failure_type) =
                match self.client.search(query, cursor, count).await.into_classified() {
                    Ok(body) => {
                        return parse_page(&body).map_err(|e| {
                            DownloadError::decode(self.client.search_url().as_str(), e)
                        });
                    }
                    Err(failure) => failure,
                };

            match self.retry_policy.should_retry(failure_type, attempt) {
                RetryDecision::Retry { delay, attempt: next } => {
                    warn!(
                        query,
                        attempt = next,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "search request failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { .. } => return Err(error),
            }
        }
    }
}

fn seed_query(seed: &SeedPaper) -> String {
    format!("REF({})", seed.eid)
}
