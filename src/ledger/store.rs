//! CSV persistence for the ledger.
//!
//! Files are UTF-8 with a byte-order mark (spreadsheet tools expect one);
//! a BOM is accepted but not required on read. Writes go to a temp file in
//! the target directory and are renamed into place.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

use super::{Ledger, LedgerError, LedgerRow, RowUpdate};
use crate::download::DownloadStatus;
use crate::model::normalize_doi;

/// Core header, in file order.
pub const COLUMNS: [&str; 7] = [
    "citing_paper_eid",
    "citing_paper_doi",
    "citing_paper_title",
    "citing_paper_year",
    "cited_data_paper_title",
    "fulltext_xml_path",
    "download_status",
];

const DOI_COLUMN: &str = "citing_paper_doi";
const STATUS_COLUMN: &str = "download_status";
const BOM: &str = "\u{feff}";

/// Ledger CSV at a fixed path.
#[derive(Debug, Clone)]
pub struct ResultLedger {
    path: PathBuf,
}

impl ResultLedger {
    /// Ledger backed by `path`; the file need not exist yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the table. A missing file is an empty ledger; duplicate keys
    /// collapse to their last row.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on IO failure, malformed CSV, or a header
    /// lacking the DOI or status column.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn load(&self) -> Result<Ledger, LedgerError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no ledger yet");
                return Ok(Ledger::new());
            }
            Err(e) => return Err(LedgerError::io(&self.path, e)),
        };
        let content = content.strip_prefix(BOM).unwrap_or(&content);
        if content.trim().is_empty() {
            return Ok(Ledger::new());
        }

        let mut reader = csv::ReaderBuilder::new().from_reader(content.as_bytes());
        let headers = reader
            .headers()
            .map_err(|e| LedgerError::csv(&self.path, e))?
            .clone();
        let layout = Layout::from_headers(&headers, &self.path)?;

        let mut ledger = Ledger::new();
        ledger.set_extra_columns(layout.extra.iter().map(|(_, name)| name.clone()).collect());
        for record in reader.records() {
            let record = record.map_err(|e| LedgerError::csv(&self.path, e))?;
            ledger.upsert(layout.row(&record));
        }

        debug!(rows = ledger.len(), "ledger loaded");
        Ok(ledger)
    }

    /// Writes `ledger` atomically, replacing the file.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the temp file cannot be written or renamed.
    #[instrument(skip(self, ledger), fields(path = %self.path.display(), rows = ledger.len()))]
    pub fn write(&self, ledger: &Ledger) -> Result<(), LedgerError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| LedgerError::io(&dir, e))?;

        let mut temp = NamedTempFile::new_in(&dir).map_err(|e| LedgerError::io(&dir, e))?;
        temp.write_all(BOM.as_bytes())
            .map_err(|e| LedgerError::io(temp.path(), e))?;
        {
            let mut writer = csv::Writer::from_writer(temp.as_file_mut());
            let header = COLUMNS
                .iter()
                .copied()
                .chain(ledger.extra_columns().iter().map(String::as_str));
            writer
                .write_record(header)
                .map_err(|e| LedgerError::csv(&self.path, e))?;
            for row in ledger.rows() {
                writer
                    .write_record(render_row(row, ledger.extra_columns()))
                    .map_err(|e| LedgerError::csv(&self.path, e))?;
            }
            writer.flush().map_err(|e| LedgerError::io(&self.path, e))?;
        }
        temp.persist(&self.path)
            .map_err(|e| LedgerError::io(&self.path, e.error))?;

        debug!("ledger written");
        Ok(())
    }

    /// Upserts `rows` into the stored table (creating it if needed) and writes it back.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] from the underlying load or write.
    pub fn save(&self, rows: impl IntoIterator<Item = LedgerRow>) -> Result<Ledger, LedgerError> {
        let mut ledger = self.load()?;
        let before = ledger.len();
        for row in rows {
            ledger.upsert(row);
        }
        self.write(&ledger)?;
        info!(
            path = %self.path.display(),
            rows = ledger.len(),
            added = ledger.len() - before,
            "ledger saved"
        );
        Ok(ledger)
    }

    /// Merges `updates` into the stored table and writes it back.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] from the underlying load or write.
    pub fn merge(&self, updates: impl IntoIterator<Item = RowUpdate>) -> Result<Ledger, LedgerError> {
        let mut ledger = self.load()?;
        let applied = ledger.merge(updates);
        self.write(&ledger)?;
        info!(path = %self.path.display(), applied, "ledger merged");
        Ok(ledger)
    }
}

/// Column positions resolved from a header row.
struct Layout {
    core: [Option<usize>; COLUMNS.len()],
    extra: Vec<(usize, String)>,
}

impl Layout {
    fn from_headers(headers: &StringRecord, path: &Path) -> Result<Self, LedgerError> {
        let mut core = [None; COLUMNS.len()];
        let mut extra = Vec::new();
        for (position, name) in headers.iter().enumerate() {
            match COLUMNS.iter().position(|column| *column == name) {
                Some(slot) => core[slot] = Some(position),
                None => extra.push((position, name.to_string())),
            }
        }

        for required in [DOI_COLUMN, STATUS_COLUMN] {
            let slot = COLUMNS.iter().position(|c| *c == required);
            if slot.and_then(|s| core[s]).is_none() {
                return Err(LedgerError::MissingColumn {
                    path: path.to_path_buf(),
                    column: required,
                });
            }
        }

        Ok(Self { core, extra })
    }

    fn field<'r>(&self, record: &'r StringRecord, slot: usize) -> &'r str {
        self.core[slot]
            .and_then(|position| record.get(position))
            .unwrap_or("")
    }

    fn row(&self, record: &StringRecord) -> LedgerRow {
        let path = self.field(record, 5).trim();
        let extra: BTreeMap<String, String> = self
            .extra
            .iter()
            .map(|(position, name)| {
                (
                    name.clone(),
                    record.get(*position).unwrap_or("").to_string(),
                )
            })
            .collect();

        LedgerRow {
            citing_paper_eid: self.field(record, 0).to_string(),
            citing_paper_doi: normalize_doi(Some(self.field(record, 1))),
            citing_paper_title: self.field(record, 2).to_string(),
            citing_paper_year: self.field(record, 3).to_string(),
            cited_data_paper_title: self.field(record, 4).to_string(),
            fulltext_xml_path: (!path.is_empty()).then(|| PathBuf::from(path)),
            download_status: DownloadStatus::from(self.field(record, 6)),
            extra,
        }
    }
}

fn render_row(row: &LedgerRow, extra_columns: &[String]) -> Vec<String> {
    let mut fields = vec![
        row.citing_paper_eid.clone(),
        row.citing_paper_doi.clone().unwrap_or_default(),
        row.citing_paper_title.clone(),
        row.citing_paper_year.clone(),
        row.cited_data_paper_title.clone(),
        row.fulltext_xml_path
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_default(),
        row.download_status.to_string(),
    ];
    fields.extend(
        extra_columns
            .iter()
            .map(|column| row.extra.get(column).cloned().unwrap_or_default()),
    );
    fields
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    const HEADER: &str = "citing_paper_eid,citing_paper_doi,citing_paper_title,citing_paper_year,cited_data_paper_title,fulltext_xml_path,download_status";

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let ledger = ResultLedger::new(dir.path().join("none.csv")).load().unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_load_with_and_without_bom() {
        let dir = TempDir::new().unwrap();
        let body = format!("{HEADER}\ne1,10.1/a,T,2020,S,/c/10.1_a.xml,success (cached)\n");

        let plain = dir.path().join("plain.csv");
        std::fs::write(&plain, &body).unwrap();
        let with_bom = dir.path().join("bom.csv");
        std::fs::write(&with_bom, format!("{BOM}{body}")).unwrap();

        let a = ResultLedger::new(&plain).load().unwrap();
        let b = ResultLedger::new(&with_bom).load().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.get("10.1/a").unwrap().download_status, DownloadStatus::Cached);
    }

    #[test]
    fn test_load_collapses_duplicate_dois_to_last() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dup.csv");
        std::fs::write(
            &path,
            format!(
                "{HEADER}\ne1,10.1/a,T,2020,S,,failed (retries exhausted)\ne1,10.1/a,T,2020,S,/c/a.xml,\"success (downloaded, attempt 2)\"\n"
            ),
        )
        .unwrap();

        let ledger = ResultLedger::new(&path).load().unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(
            ledger.get("10.1/a").unwrap().download_status,
            DownloadStatus::Downloaded { attempt: 2 }
        );
    }

    #[test]
    fn test_load_rejects_missing_doi_column() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "eid,download_status\ne1,success (cached)\n").unwrap();
        assert!(matches!(
            ResultLedger::new(&path).load(),
            Err(LedgerError::MissingColumn {
                column: "citing_paper_doi",
                ..
            })
        ));
    }

    #[test]
    fn test_write_starts_with_bom_and_header() {
        let dir = TempDir::new().unwrap();
        let store = ResultLedger::new(dir.path().join("nested").join("ledger.csv"));
        store.write(&Ledger::new()).unwrap();

        let written = std::fs::read_to_string(store.path()).unwrap();
        assert!(written.starts_with(BOM));
        assert_eq!(written.trim_start_matches(BOM).trim_end(), HEADER);
    }

    #[test]
    fn test_extra_columns_survive_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.csv");
        std::fs::write(
            &path,
            format!("{HEADER},label\ne1,10.1/a,T,2020,S,,failed (Status: 404),reuse\n"),
        )
        .unwrap();

        let store = ResultLedger::new(&path);
        let ledger = store.load().unwrap();
        store.write(&ledger).unwrap();

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.extra_columns(), ["label".to_string()]);
        assert_eq!(reloaded.get("10.1/a").unwrap().extra.get("label").unwrap(), "reuse");
        assert_eq!(reloaded, ledger);
    }
}
