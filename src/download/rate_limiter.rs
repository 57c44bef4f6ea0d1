//! Per-host courtesy pacing for search requests.
//!
//! The search API is paged with a cursor, and consecutive page requests to the
//! same host are spaced by a minimum interval. Requests to different hosts do
//! not wait on each other. Server-side throttling (HTTP 429) is handled by the
//! retry policy, not here.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use citefetch_core::download::RateLimiter;
//!
//! # async fn example() {
//! let limiter = RateLimiter::new(Duration::from_secs(1));
//!
//! // First request proceeds immediately
//! limiter.acquire("https://api.elsevier.com/content/search/scopus").await;
//!
//! // The next one to the same host waits out the interval
//! limiter.acquire("https://api.elsevier.com/content/search/scopus").await;
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Pause between consecutive search pages.
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_secs(1);

/// Cumulative pacing per host after which a warning is logged.
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(300);

/// Per-host request pacer.
///
/// Shared behind `&` or `Arc`; per-host state lives in a `DashMap`, and the
/// `Arc` around each entry lets the map shard lock drop before awaiting.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    disabled: bool,
    hosts: DashMap<String, Arc<HostState>>,
}

#[derive(Debug)]
struct HostState {
    /// `None` until the first request to this host.
    last_request: Mutex<Option<Instant>>,
    waited_ms: AtomicU64,
}

impl HostState {
    fn new() -> Self {
        Self {
            last_request: Mutex::new(None),
            waited_ms: AtomicU64::new(0),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_wait(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let total = self.waited_ms.fetch_add(delay_ms, Ordering::SeqCst) + delay_ms;
        Duration::from_millis(total)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_DELAY)
    }
}

impl RateLimiter {
    /// Creates a pacer enforcing `interval` between requests to one host.
    #[must_use]
    #[instrument(skip_all, fields(interval_ms = interval.as_millis()))]
    pub fn new(interval: Duration) -> Self {
        debug!("creating request pacer");
        Self {
            interval,
            disabled: interval.is_zero(),
            hosts: DashMap::new(),
        }
    }

    /// Creates a pacer that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Returns whether pacing is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the configured interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Waits until a request to `url`'s host is allowed, then records it.
    #[instrument(skip(self), fields(host))]
    pub async fn acquire(&self, url: &str) {
        if self.disabled {
            return;
        }

        let host = extract_host(url);
        tracing::Span::current().record("host", host.as_str());

        let state = self
            .hosts
            .entry(host.clone())
            .or_insert_with(|| Arc::new(HostState::new()))
            .clone();

        let mut last_request = state.last_request.lock().await;

        if let Some(previous) = *last_request {
            let elapsed = previous.elapsed();
            if elapsed < self.interval {
                let delay = self.interval.saturating_sub(elapsed);
                let cumulative = state.add_wait(delay);

                debug!(
                    host = %host,
                    delay_ms = delay.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "pacing request"
                );

                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD
                    && cumulative.saturating_sub(delay) < CUMULATIVE_DELAY_WARNING_THRESHOLD
                {
                    warn!(
                        host = %host,
                        cumulative_delay_secs = cumulative.as_secs(),
                        "search pacing has accumulated a long wait"
                    );
                }

                tokio::time::sleep(delay).await;
            }
        }

        *last_request = Some(Instant::now());
    }
}

/// Lowercased host of `url`, or `"unknown"` when it cannot be parsed.
#[must_use]
pub fn extract_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_interval_is_disabled() {
        assert!(RateLimiter::disabled().is_disabled());
        assert!(RateLimiter::new(Duration::ZERO).is_disabled());
        assert!(!RateLimiter::default().is_disabled());
        assert_eq!(RateLimiter::default().interval(), DEFAULT_PAGE_DELAY);
    }

    #[tokio::test]
    async fn test_disabled_pacer_never_waits() {
        tokio::time::pause();
        let limiter = RateLimiter::disabled();
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire("https://api.example.com/search").await;
        }

        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_same_host_is_spaced() {
        tokio::time::pause();
        let limiter = RateLimiter::new(Duration::from_secs(1));
        let start = Instant::now();

        limiter.acquire("https://api.example.com/search?cursor=*").await;
        assert!(start.elapsed() < Duration::from_millis(10));

        limiter.acquire("https://api.example.com/search?cursor=abc").await;
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(start.elapsed() < Duration::from_millis(1100));
    }

    #[tokio::test]
    async fn test_hosts_are_independent() {
        tokio::time::pause();
        let limiter = RateLimiter::new(Duration::from_secs(1));

        limiter.acquire("https://a.example.com/1").await;
        let start = Instant::now();
        limiter.acquire("https://b.example.com/1").await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[test]
    fn test_extract_host() {
        assert_eq!(
            extract_host("https://API.Elsevier.com/content/search/scopus"),
            "api.elsevier.com"
        );
        assert_eq!(extract_host("http://127.0.0.1:8080/x"), "127.0.0.1");
        assert_eq!(extract_host("not a url"), "unknown");
    }
}
