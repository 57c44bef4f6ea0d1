//! Download status vocabulary and batch histograms.
//!
//! Every fetch ends in exactly one [`DownloadStatus`]. The `Display` output is
//! the string persisted in the ledger's `download_status` column, and
//! downstream tooling matches on its `success`/`failed` prefix, so the
//! rendered text is part of the on-disk contract.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Terminal outcome of one fetch task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DownloadStatus {
    /// The artifact was already in the cache; no request was made.
    Cached,
    /// The artifact was downloaded on the given (1-indexed) attempt.
    Downloaded {
        /// Attempt that succeeded.
        attempt: u32,
    },
    /// The task had no DOI, so it could not be fetched.
    MissingDoi,
    /// The server answered with a non-retryable status.
    HttpStatus {
        /// HTTP status code returned by the fulltext API.
        status: u16,
    },
    /// Every attempt hit a retryable failure.
    RetriesExhausted,
    /// A status string this version does not recognize (read from a ledger).
    Other(String),
}

impl DownloadStatus {
    /// Returns true for statuses the ledger treats as successful.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.to_string().starts_with("success")
    }

    /// Returns true for statuses eligible for a retry pass.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.to_string().contains("failed")
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cached => f.write_str("success (cached)"),
            Self::Downloaded { attempt } => write!(f, "success (downloaded, attempt {attempt})"),
            Self::MissingDoi => f.write_str("failed (DOI is missing)"),
            Self::HttpStatus { status } => write!(f, "failed (Status: {status})"),
            Self::RetriesExhausted => f.write_str("failed (retries exhausted)"),
            Self::Other(raw) => f.write_str(raw),
        }
    }
}

impl FromStr for DownloadStatus {
    type Err = Infallible;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let value = raw.trim();
        let parsed = match value {
            "success (cached)" => Self::Cached,
            "failed (DOI is missing)" => Self::MissingDoi,
            "failed (retries exhausted)" => Self::RetriesExhausted,
            _ => {
                if let Some(attempt) = value
                    .strip_prefix("success (downloaded, attempt ")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .and_then(|n| n.parse().ok())
                {
                    Self::Downloaded { attempt }
                } else if let Some(status) = value
                    .strip_prefix("failed (Status: ")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .and_then(|n| n.parse().ok())
                {
                    Self::HttpStatus { status }
                } else {
                    Self::Other(value.to_string())
                }
            }
        };
        Ok(parsed)
    }
}

impl From<&str> for DownloadStatus {
    fn from(raw: &str) -> Self {
        match raw.parse() {
            Ok(status) => status,
            Err(never) => match never {},
        }
    }
}

/// Count of outcomes per rendered status string.
///
/// Ordered by label so log and CLI output are stable between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusHistogram {
    counts: BTreeMap<String, usize>,
}

impl StatusHistogram {
    /// Creates an empty histogram.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one occurrence of `status`.
    pub fn record(&mut self, status: &DownloadStatus) {
        self.record_label(&status.to_string());
    }

    /// Records one occurrence of a raw status label.
    pub fn record_label(&mut self, label: &str) {
        *self.counts.entry(label.to_string()).or_insert(0) += 1;
    }

    /// Returns the count recorded for `label`.
    #[must_use]
    pub fn count(&self, label: &str) -> usize {
        self.counts.get(label).copied().unwrap_or(0)
    }

    /// Total number of recorded outcomes.
    #[must_use]
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// Returns true when nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Iterates `(label, count)` pairs in label order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.counts.iter().map(|(label, count)| (label.as_str(), *count))
    }
}

impl<'a> FromIterator<&'a DownloadStatus> for StatusHistogram {
    fn from_iter<I: IntoIterator<Item = &'a DownloadStatus>>(iter: I) -> Self {
        let mut histogram = Self::new();
        for status in iter {
            histogram.record(status);
        }
        histogram
    }
}

impl fmt::Display for StatusHistogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (label, count) in self.iter() {
            writeln!(f, "{count:>8}  {label}")?;
        }
        Ok(())
    }
}
