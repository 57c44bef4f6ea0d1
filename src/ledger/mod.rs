//! Per-DOI outcome table.
//!
//! [`Ledger`] is the in-memory table: rows in insertion order plus a DOI
//! index, so each DOI has at most one row. Rows without a DOI are keyed by
//! citing EID and seed title instead, so re-running a crawl replaces them. [`ResultLedger`] is the CSV file
//! behind it; serialization happens only at its `load`/`write` boundary.
//!
//! Two update modes exist:
//! - [`Ledger::upsert`] replaces a row's core columns wholesale (first pass)
//! - [`Ledger::merge`] overwrites only the columns an update carries (retry pass)

mod store;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::download::{DownloadStatus, StatusHistogram};
use crate::model::{CitingTask, FetchOutcome, normalize_doi};

pub use store::{COLUMNS, ResultLedger};

/// Errors at the ledger's file boundary.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// File system failure.
    #[error("ledger IO error at {path}: {source}")]
    Io {
        /// Ledger or temp file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Malformed CSV.
    #[error("ledger CSV error in {path}: {source}")]
    Csv {
        /// Ledger path.
        path: PathBuf,
        /// Underlying CSV error.
        #[source]
        source: csv::Error,
    },

    /// A required column is absent from the header.
    #[error("ledger {path} has no `{column}` column")]
    MissingColumn {
        /// Ledger path.
        path: PathBuf,
        /// Missing column name.
        column: &'static str,
    },
}

impl LedgerError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a CSV error.
    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }
}

/// One persisted outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRow {
    /// Scopus EID of the citing work.
    pub citing_paper_eid: String,
    /// DOI; the row key. `None` for works Scopus lists without one.
    pub citing_paper_doi: Option<String>,
    /// Title of the citing work.
    pub citing_paper_title: String,
    /// Publication year.
    pub citing_paper_year: String,
    /// Title of the seed paper it cites.
    pub cited_data_paper_title: String,
    /// Cache path of the artifact; set on success.
    pub fulltext_xml_path: Option<PathBuf>,
    /// Outcome of the most recent pass.
    pub download_status: DownloadStatus,
    /// Columns added by other tools, keyed by header name.
    pub extra: BTreeMap<String, String>,
}

impl LedgerRow {
    /// Projection of a fetch outcome.
    #[must_use]
    pub fn from_outcome(outcome: &FetchOutcome) -> Self {
        let task = &outcome.task;
        Self {
            citing_paper_eid: task.eid.clone(),
            citing_paper_doi: task.doi.clone(),
            citing_paper_title: task.title.clone(),
            citing_paper_year: task.year.clone(),
            cited_data_paper_title: task.cited_data_paper_title.clone(),
            fulltext_xml_path: outcome.fulltext_path.clone(),
            download_status: outcome.status.clone(),
            extra: BTreeMap::new(),
        }
    }

    /// Rebuilds the task that produced this row.
    #[must_use]
    pub fn to_task(&self) -> CitingTask {
        CitingTask::new(
            self.citing_paper_eid.clone(),
            self.citing_paper_doi.as_deref(),
            self.citing_paper_title.clone(),
            self.citing_paper_year.clone(),
            self.cited_data_paper_title.clone(),
        )
    }

    /// True when the status starts with `success`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.download_status.is_success()
    }

    /// True when the status contains `failed`.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.download_status.is_failed()
    }
}

/// Partial row keyed by DOI; `None` fields leave the stored value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowUpdate {
    /// DOI of the row to update.
    pub doi: String,
    /// New EID.
    pub citing_paper_eid: Option<String>,
    /// New title.
    pub citing_paper_title: Option<String>,
    /// New year.
    pub citing_paper_year: Option<String>,
    /// New seed title.
    pub cited_data_paper_title: Option<String>,
    /// New artifact path.
    pub fulltext_xml_path: Option<PathBuf>,
    /// New status.
    pub download_status: Option<DownloadStatus>,
}

impl RowUpdate {
    /// Update carrying a fetch outcome's status, path and non-empty metadata.
    ///
    /// Returns `None` for DOI-less outcomes, which cannot address a row.
    #[must_use]
    pub fn from_outcome(outcome: &FetchOutcome) -> Option<Self> {
        let task = &outcome.task;
        let doi = task.doi.clone()?;
        Some(Self {
            doi,
            citing_paper_eid: non_empty(&task.eid),
            citing_paper_title: non_empty(&task.title),
            citing_paper_year: non_empty(&task.year),
            cited_data_paper_title: non_empty(&task.cited_data_paper_title),
            fulltext_xml_path: outcome.fulltext_path.clone(),
            download_status: Some(outcome.status.clone()),
        })
    }

    fn apply(&self, row: &mut LedgerRow) {
        if let Some(eid) = &self.citing_paper_eid {
            row.citing_paper_eid.clone_from(eid);
        }
        if let Some(title) = &self.citing_paper_title {
            row.citing_paper_title.clone_from(title);
        }
        if let Some(year) = &self.citing_paper_year {
            row.citing_paper_year.clone_from(year);
        }
        if let Some(title) = &self.cited_data_paper_title {
            row.cited_data_paper_title.clone_from(title);
        }
        if let Some(path) = &self.fulltext_xml_path {
            row.fulltext_xml_path = Some(path.clone());
        }
        if let Some(status) = &self.download_status {
            row.download_status = status.clone();
        }
    }
}

fn fallback_key(row: &LedgerRow) -> Option<(String, String)> {
    let eid = row.citing_paper_eid.trim();
    (!eid.is_empty()).then(|| (eid.to_string(), row.cited_data_paper_title.clone()))
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// In-memory ledger: ordered rows with at most one row per DOI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    rows: Vec<LedgerRow>,
    index: HashMap<String, usize>,
    doi_less: HashMap<(String, String), usize>,
    extra_columns: Vec<String>,
}

impl Ledger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a ledger by upserting `rows` in order.
    #[must_use]
    pub fn from_rows(rows: impl IntoIterator<Item = LedgerRow>) -> Self {
        let mut ledger = Self::new();
        for row in rows {
            ledger.upsert(row);
        }
        ledger
    }

    /// Rows in table order.
    #[must_use]
    pub fn rows(&self) -> &[LedgerRow] {
        &self.rows
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row for `doi`, if present.
    #[must_use]
    pub fn get(&self, doi: &str) -> Option<&LedgerRow> {
        self.index.get(doi.trim()).map(|&i| &self.rows[i])
    }

    /// Header names beyond the core columns, in first-seen order.
    #[must_use]
    pub fn extra_columns(&self) -> &[String] {
        &self.extra_columns
    }

    /// Inserts `row`, or replaces the core columns of the row with the same key.
    ///
    /// The key is the DOI, or `(citing_paper_eid, cited_data_paper_title)`
    /// for rows without one. Extra columns of a replaced row survive unless
    /// `row` sets them. Rows with neither a DOI nor an EID are appended.
    pub fn upsert(&mut self, mut row: LedgerRow) {
        row.citing_paper_doi = normalize_doi(row.citing_paper_doi.as_deref());
        self.note_extra_columns(&row);

        let existing = match &row.citing_paper_doi {
            Some(doi) => self.index.get(doi).copied(),
            None => fallback_key(&row).and_then(|key| self.doi_less.get(&key).copied()),
        };

        if let Some(i) = existing {
            let stored = &mut self.rows[i];
            let mut extra = std::mem::take(&mut stored.extra);
            extra.append(&mut row.extra);
            row.extra = extra;
            *stored = row;
            return;
        }

        let position = self.rows.len();
        match &row.citing_paper_doi {
            Some(doi) => {
                self.index.insert(doi.clone(), position);
            }
            None => {
                if let Some(key) = fallback_key(&row) {
                    self.doi_less.insert(key, position);
                }
            }
        }
        self.rows.push(row);
    }

    /// Applies `updates` to rows with matching DOIs; unknown DOIs are ignored.
    ///
    /// Returns how many updates matched a row. Applying the same updates
    /// twice leaves the ledger as it was after the first application.
    pub fn merge(&mut self, updates: impl IntoIterator<Item = RowUpdate>) -> usize {
        let mut applied = 0;
        for update in updates {
            if let Some(&i) = self.index.get(update.doi.trim()) {
                update.apply(&mut self.rows[i]);
                applied += 1;
            }
        }
        applied
    }

    /// Rows whose status contains `failed`.
    pub fn failed_rows(&self) -> impl Iterator<Item = &LedgerRow> {
        self.rows.iter().filter(|row| row.is_failed())
    }

    /// Rows whose status starts with `success`.
    pub fn successful_rows(&self) -> impl Iterator<Item = &LedgerRow> {
        self.rows.iter().filter(|row| row.is_success())
    }

    /// Success rows whose artifact is not on disk (or has no path at all).
    #[must_use]
    pub fn missing_artifacts(&self) -> Vec<&LedgerRow> {
        self.successful_rows()
            .filter(|row| {
                row.fulltext_xml_path
                    .as_deref()
                    .is_none_or(|path| !Path::new(path).is_file())
            })
            .collect()
    }

    /// Status histogram over all rows.
    #[must_use]
    pub fn histogram(&self) -> StatusHistogram {
        self.rows.iter().map(|row| &row.download_status).collect()
    }

    fn note_extra_columns(&mut self, row: &LedgerRow) {
        for column in row.extra.keys() {
            if !self.extra_columns.contains(column) {
                self.extra_columns.push(column.clone());
            }
        }
    }

    pub(crate) fn set_extra_columns(&mut self, columns: Vec<String>) {
        self.extra_columns = columns;
    }
}
