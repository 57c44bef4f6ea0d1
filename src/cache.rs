//! DOI-addressed fulltext cache.
//!
//! Each artifact lives at `<root>/<sanitize_doi(doi)>.xml`. The fetch engine is
//! the only writer; everyone else only checks existence or reads paths out of
//! the ledger. Nothing here ever deletes an entry.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, instrument};

use crate::download::DownloadError;

/// Characters that cannot appear in a cache file name.
const RESERVED_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const ARTIFACT_EXTENSION: &str = "xml";

/// Maps each of `<>:"/\|?*` in `doi` to `_`, leaving every other character alone.
///
/// ```
/// use citefetch_core::sanitize_doi;
///
/// assert_eq!(sanitize_doi("10.1016/j.x:1"), "10.1016_j.x_1");
/// ```
#[must_use]
pub fn sanitize_doi(doi: &str) -> String {
    doi.chars()
        .map(|c| if RESERVED_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Entry count and total size of a cache directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheUsage {
    /// Number of `.xml` artifacts.
    pub entries: usize,
    /// Sum of their sizes in bytes.
    pub bytes: u64,
}

/// Fulltext artifact store rooted at one directory.
#[derive(Debug, Clone)]
pub struct ContentCache {
    root: PathBuf,
}

impl ContentCache {
    /// Creates a cache rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path where the artifact for `doi` lives (whether or not it exists yet).
    #[must_use]
    pub fn path_for(&self, doi: &str) -> PathBuf {
        self.root
            .join(format!("{}.{ARTIFACT_EXTENSION}", sanitize_doi(doi)))
    }

    /// Returns true when an artifact for `doi` is already on disk.
    #[must_use]
    pub fn exists(&self, doi: &str) -> bool {
        self.path_for(doi).is_file()
    }

    /// Creates the cache root if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Io`] if the directory cannot be created.
    pub fn ensure_root(&self) -> Result<(), DownloadError> {
        std::fs::create_dir_all(&self.root).map_err(|e| DownloadError::io(&self.root, e))
    }

    /// Writes `body` as the artifact for `doi` and returns its path.
    ///
    /// The body goes to a temporary file inside the cache root and is renamed
    /// into place, so readers never observe a partial artifact.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Io`] on any file system failure.
    #[instrument(skip(self, body), fields(doi = %doi, bytes = body.len()))]
    pub async fn store(&self, doi: &str, body: String) -> Result<PathBuf, DownloadError> {
        let root = self.root.clone();
        let target = self.path_for(doi);

        let written = tokio::task::spawn_blocking(move || write_atomically(&root, &target, &body))
            .await
            .map_err(|join| DownloadError::io(self.path_for(doi), std::io::Error::other(join)))??;

        debug!(path = %written.display(), "artifact stored");
        Ok(written)
    }

    /// Counts artifacts and their total size. A missing root counts as empty.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Io`] if the root exists but cannot be listed.
    pub fn usage(&self) -> Result<CacheUsage, DownloadError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CacheUsage::default());
            }
            Err(e) => return Err(DownloadError::io(&self.root, e)),
        };

        let mut usage = CacheUsage::default();
        for entry in entries {
            let entry = entry.map_err(|e| DownloadError::io(&self.root, e))?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == ARTIFACT_EXTENSION) {
                let metadata = entry.metadata().map_err(|e| DownloadError::io(&path, e))?;
                if metadata.is_file() {
                    usage.entries += 1;
                    usage.bytes += metadata.len();
                }
            }
        }
        Ok(usage)
    }

    /// Cache paths claimed by more than one distinct DOI.
    ///
    /// Sanitization is lossy (`10.1/a` and `10.1:a` share a file), so two
    /// different works can map onto one artifact.
    #[must_use]
    pub fn collisions<'a, I>(&self, dois: I) -> Vec<(PathBuf, Vec<String>)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut by_path: BTreeMap<PathBuf, BTreeSet<&'a str>> = BTreeMap::new();
        for doi in dois {
            by_path.entry(self.path_for(doi)).or_default().insert(doi);
        }
        by_path
            .into_iter()
            .filter(|(_, dois)| dois.len() > 1)
            .map(|(path, dois)| (path, dois.into_iter().map(str::to_string).collect()))
            .collect()
    }
}

fn write_atomically(root: &Path, target: &Path, body: &str) -> Result<PathBuf, DownloadError> {
    std::fs::create_dir_all(root).map_err(|e| DownloadError::io(root, e))?;

    let mut temp = NamedTempFile::new_in(root).map_err(|e| DownloadError::io(root, e))?;
    temp.write_all(body.as_bytes())
        .and_then(|()| temp.flush())
        .map_err(|e| DownloadError::io(temp.path(), e))?;
    temp.persist(target)
        .map_err(|e| DownloadError::io(target, e.error))?;

    Ok(target.to_path_buf())
}
