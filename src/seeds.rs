//! Seed paper table: loading, threshold filtering and saving.
//!
//! The file is a CSV with `eid,doi,title,publication_year,citedby_count`.
//! Loading is forgiving: rows without an EID are dropped and a citation count
//! that is not a number loads as 0.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::model::{SeedPaper, normalize_doi};

const BOM: &str = "\u{feff}";

/// Errors reading or writing the seed table.
#[derive(Debug, Error)]
pub enum SeedError {
    /// File system failure.
    #[error("seed file IO error at {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Malformed CSV.
    #[error("seed file CSV error in {path}: {source}")]
    Csv {
        /// File path.
        path: PathBuf,
        /// Underlying CSV error.
        #[source]
        source: csv::Error,
    },
}

#[derive(Debug, Deserialize)]
struct RawSeed {
    #[serde(default)]
    eid: Option<String>,
    #[serde(default)]
    doi: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    publication_year: Option<String>,
    #[serde(default)]
    citedby_count: Option<String>,
}

impl RawSeed {
    fn into_seed(self) -> Option<SeedPaper> {
        let eid = self.eid.map(|e| e.trim().to_string()).filter(|e| !e.is_empty())?;
        Some(SeedPaper {
            eid,
            doi: normalize_doi(self.doi.as_deref()),
            title: self.title.unwrap_or_default(),
            publication_year: self.publication_year.unwrap_or_default(),
            citedby_count: self
                .citedby_count
                .as_deref()
                .and_then(parse_count)
                .unwrap_or(0),
        })
    }
}

/// Accepts integers and float renderings such as `"15.0"` or `"15.5"`,
/// rounding fractions down.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn parse_count(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    raw.parse().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|value| value.is_finite() && *value >= 0.0)
            .map(|value| value.floor() as u64)
    })
}

/// Reads the seed table.
///
/// # Errors
///
/// Returns [`SeedError`] if the file cannot be read or is not valid CSV.
#[instrument(fields(path = %path.display()))]
pub fn load_seed_papers(path: &Path) -> Result<Vec<SeedPaper>, SeedError> {
    let content = std::fs::read_to_string(path).map_err(|source| SeedError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let content = content.strip_prefix(BOM).unwrap_or(&content);

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(content.as_bytes());
    let mut seeds = Vec::new();
    let mut dropped = 0usize;
    for record in reader.deserialize::<RawSeed>() {
        let raw = record.map_err(|source| SeedError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        match raw.into_seed() {
            Some(seed) => seeds.push(seed),
            None => dropped += 1,
        }
    }

    debug!(seeds = seeds.len(), dropped, "seed table loaded");
    Ok(seeds)
}

/// Keeps seeds with at least `min_citations` citations, most-cited first.
///
/// Ties keep their input order.
#[must_use]
pub fn filter_seeds(seeds: Vec<SeedPaper>, min_citations: u64) -> Vec<SeedPaper> {
    let total = seeds.len();
    let mut kept: Vec<SeedPaper> = seeds
        .into_iter()
        .filter(|seed| seed.citedby_count >= min_citations)
        .collect();
    kept.sort_by(|a, b| b.citedby_count.cmp(&a.citedby_count));
    info!(total, kept = kept.len(), min_citations, "seeds filtered");
    kept
}

/// Writes the seed table atomically.
///
/// # Errors
///
/// Returns [`SeedError`] if the file cannot be written.
#[instrument(skip(seeds), fields(path = %path.display(), seeds = seeds.len()))]
pub fn save_seed_papers(path: &Path, seeds: &[SeedPaper]) -> Result<(), SeedError> {
    let io_error = |source| SeedError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(io_error)?;

    let mut temp = NamedTempFile::new_in(dir).map_err(io_error)?;
    temp.write_all(BOM.as_bytes()).map_err(io_error)?;
    {
        let mut writer = csv::Writer::from_writer(temp.as_file_mut());
        for seed in seeds {
            writer.serialize(seed).map_err(|source| SeedError::Csv {
                path: path.to_path_buf(),
                source,
            })?;
        }
        writer.flush().map_err(io_error)?;
    }
    temp.persist(path).map_err(|e| io_error(e.error))?;
    Ok(())
}
