//! Core records flowing through the harvest: seeds, citing tasks, and fetch outcomes.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::download::DownloadStatus;

/// A data paper whose citing works should be discovered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedPaper {
    /// Scopus EID of the data paper (the `REF(...)` search key).
    pub eid: String,
    /// DOI of the data paper, when Scopus reports one.
    pub doi: Option<String>,
    /// Title, copied onto every citing task found under this seed.
    pub title: String,
    /// Four-digit publication year, possibly empty.
    pub publication_year: String,
    /// Number of works citing this paper according to Scopus.
    pub citedby_count: u64,
}

/// One discovered citing work, ready to be fetched.
///
/// The DOI is normalized at construction: blank strings become `None`, so
/// every later stage can rely on `doi.is_some()` meaning "fetchable".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitingTask {
    /// Scopus EID of the citing work.
    pub eid: String,
    /// DOI of the citing work; the ledger and cache key.
    pub doi: Option<String>,
    /// Title of the citing work.
    pub title: String,
    /// Publication year (first four characters of the cover date).
    pub year: String,
    /// Title of the seed paper this work was found under.
    pub cited_data_paper_title: String,
}

impl CitingTask {
    /// Creates a task, trimming the DOI and dropping it when blank.
    #[must_use]
    pub fn new(
        eid: impl Into<String>,
        doi: Option<&str>,
        title: impl Into<String>,
        year: impl Into<String>,
        cited_data_paper_title: impl Into<String>,
    ) -> Self {
        Self {
            eid: eid.into(),
            doi: normalize_doi(doi),
            title: title.into(),
            year: year.into(),
            cited_data_paper_title: cited_data_paper_title.into(),
        }
    }

    /// Creates a task that only carries a DOI (used by tests and ad-hoc fetches).
    #[must_use]
    pub fn from_doi(doi: &str) -> Self {
        Self::new("", Some(doi), "", "", "")
    }
}

/// Trims a raw DOI value, mapping empty strings to `None`.
#[must_use]
pub fn normalize_doi(doi: Option<&str>) -> Option<String> {
    doi.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

/// The result of running one [`CitingTask`] through the fetch engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    /// The task that was executed.
    pub task: CitingTask,
    /// Cache path of the fulltext artifact; set only on success.
    pub fulltext_path: Option<PathBuf>,
    /// Terminal status for this pass.
    pub status: DownloadStatus,
}

impl FetchOutcome {
    pub(crate) fn success(task: CitingTask, path: PathBuf, status: DownloadStatus) -> Self {
        Self {
            task,
            fulltext_path: Some(path),
            status,
        }
    }

    pub(crate) fn failed(task: CitingTask, status: DownloadStatus) -> Self {
        Self {
            task,
            fulltext_path: None,
            status,
        }
    }
}
