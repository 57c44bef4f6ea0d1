//! Retry logic with exponential backoff for rate-limited and transient failures.
//!
//! Every failed request is classified into a [`FailureType`]:
//! - [`FailureType::RateLimited`] - HTTP 429; retried after a backoff sleep
//! - [`FailureType::Transient`] - send/timeout/body-read/cache-write errors; retried
//! - [`FailureType::Permanent`] - any other HTTP status or a malformed request; never retried
//!
//! The [`RetryPolicy`] then decides whether another attempt is allowed and how
//! long to sleep first. With the defaults the sleep before attempt `n + 1` is
//! `2^(n - 1)` seconds plus up to one second of jitter.
//!
//! # Example
//!
//! ```
//! use citefetch_core::download::{
//!     DownloadError, RetryPolicy, RetryDecision, classify_error
//! };
//!
//! let policy = RetryPolicy::default();
//! let error = DownloadError::http_status("https://api.example.com/article", 429);
//!
//! match policy.should_retry(classify_error(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {delay:?} (attempt {attempt})");
//!     }
//!     RetryDecision::DoNotRetry { reason } => println!("Not retrying: {reason}"),
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::DownloadError;

/// Default maximum attempts per fetch task (including the first).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff (1 second).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap before jitter.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(64);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Default upper bound of the uniform jitter added to each delay.
const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(1000);

/// Classification of request failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: connection refused, timeout, truncated body, cache write error.
    Transient,

    /// Failure that won't succeed regardless of retries.
    ///
    /// Examples: 404 Not Found, 401 Unauthorized, 500 from the fulltext API.
    Permanent,

    /// Server rate limiting (HTTP 429).
    RateLimited,
}

/// Decision on whether to retry a failed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Default Values
///
/// - `max_attempts`: 3
/// - `base_delay`: 1 second
/// - `max_delay`: 64 seconds
/// - `backoff_multiplier`: 2.0
/// - `max_jitter`: 1 second
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt - 1), max_delay) + U(0, max_jitter)
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Delay before the second attempt, excluding jitter.
    base_delay: Duration,

    /// Maximum delay cap.
    max_delay: Duration,

    /// Multiplier applied each attempt.
    backoff_multiplier: f32,

    /// Upper bound of the random jitter.
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    ///
    /// `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
        max_jitter: Duration,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
            max_jitter,
        }
    }

    /// Creates a policy with a custom `max_attempts`, using defaults for other settings.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Creates a policy that retries without sleeping.
    ///
    /// Useful for tests and for callers that pace requests elsewhere.
    #[must_use]
    pub fn without_delay(max_attempts: u32) -> Self {
        Self::new(
            max_attempts,
            Duration::ZERO,
            Duration::ZERO,
            DEFAULT_BACKOFF_MULTIPLIER,
            Duration::ZERO,
        )
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Determines whether to retry after `attempt` (1-indexed) failed.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Calculates the delay after a failed attempt.
    ///
    /// Formula: `min(base_delay * multiplier^(attempt - 1), max_delay) + jitter`
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * multiplier.powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + self.calculate_jitter()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=max_ms);
        Duration::from_millis(jitter_ms)
    }
}

/// Classifies a request error into a failure type for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | HTTP 429 | `RateLimited` |
/// | any other HTTP status | `Permanent` |
/// | Timeout | `Transient` |
/// | Network | `Transient` |
/// | IO (body persisted to cache) | `Transient` |
/// | Decode, `InvalidUrl`, `ClientBuild` | `Permanent` |
#[instrument]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::HttpStatus { status, .. } => classify_http_status(*status),
        DownloadError::Timeout { .. } | DownloadError::Network { .. } | DownloadError::Io { .. } => {
            FailureType::Transient
        }
        DownloadError::Decode { .. }
        | DownloadError::InvalidUrl { .. }
        | DownloadError::ClientBuild { .. } => FailureType::Permanent,
    }
}

/// 429 is the only retryable status.
fn classify_http_status(status: u16) -> FailureType {
    if status == 429 {
        FailureType::RateLimited
    } else {
        FailureType::Permanent
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_default_policy_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
    }

    #[test]
    fn test_max_attempts_is_clamped_to_one() {
        assert_eq!(RetryPolicy::with_max_attempts(0).max_attempts(), 1);
        assert_eq!(RetryPolicy::without_delay(0).max_attempts(), 1);
    }

    #[test]
    fn test_permanent_failure_is_never_retried() {
        let policy = RetryPolicy::default();
        let decision = policy.should_retry(FailureType::Permanent, 1);
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
    }

    #[test]
    fn test_rate_limited_retries_until_exhausted() {
        let policy = RetryPolicy::without_delay(3);
        assert_eq!(
            policy.should_retry(FailureType::RateLimited, 1),
            RetryDecision::Retry {
                delay: Duration::ZERO,
                attempt: 2
            }
        );
        assert!(matches!(
            policy.should_retry(FailureType::RateLimited, 2),
            RetryDecision::Retry { attempt: 3, .. }
        ));
        match policy.should_retry(FailureType::RateLimited, 3) {
            RetryDecision::DoNotRetry { reason } => assert!(reason.contains("exhausted")),
            RetryDecision::Retry { .. } => panic!("should not retry after final attempt"),
        }
    }

    #[test]
    fn test_single_attempt_policy_never_sleeps() {
        let policy = RetryPolicy::with_max_attempts(1);
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_delay_doubles_with_bounded_jitter() {
        let policy = RetryPolicy::default();
        for _ in 0..20 {
            let first = policy.calculate_delay(1);
            assert!(first >= Duration::from_secs(1) && first <= Duration::from_secs(2));
            let second = policy.calculate_delay(2);
            assert!(second >= Duration::from_secs(2) && second <= Duration::from_secs(3));
            let third = policy.calculate_delay(3);
            assert!(third >= Duration::from_secs(4) && third <= Duration::from_secs(5));
        }
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::new(
            10,
            Duration::from_secs(1),
            Duration::from_secs(3),
            2.0,
            Duration::ZERO,
        );
        assert_eq!(policy.calculate_delay(8), Duration::from_secs(3));
    }

    #[test]
    fn test_classify_http_statuses() {
        let rate_limited = DownloadError::http_status("u", 429);
        assert_eq!(classify_error(&rate_limited), FailureType::RateLimited);

        for status in [400, 401, 403, 404, 500, 503] {
            let error = DownloadError::http_status("u", status);
            assert_eq!(classify_error(&error), FailureType::Permanent, "{status}");
        }
    }

    #[test]
    fn test_classify_non_http_errors() {
        assert_eq!(
            classify_error(&DownloadError::timeout("u")),
            FailureType::Transient
        );
        let io = std::io::Error::other("disk full");
        assert_eq!(
            classify_error(&DownloadError::io(PathBuf::from("/tmp/x"), io)),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&DownloadError::invalid_url("::")),
            FailureType::Permanent
        );
        let decode = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(
            classify_error(&DownloadError::decode("u", decode)),
            FailureType::Permanent
        );
    }
}
