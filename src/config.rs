//! Configuration values passed explicitly into every component.
//!
//! Nothing in the library reads globals: [`ApiConfig`] and [`HarvestConfig`]
//! are built once (by the binary, from flags, environment and an optional
//! TOML file) and handed to constructors. [`FileConfig`] is the on-disk
//! TOML shape; all of its fields are optional so partial files work.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::download::{DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, DEFAULT_PAGE_DELAY, RetryPolicy};

/// Scopus Search API endpoint.
pub const DEFAULT_SEARCH_URL: &str = "https://api.elsevier.com/content/search/scopus";

/// Article Retrieval API base; the DOI is appended as path segments.
pub const DEFAULT_FULLTEXT_BASE_URL: &str = "https://api.elsevier.com/content/article/doi";

/// Query used to discover seed data papers.
pub const DEFAULT_SEED_QUERY: &str = "DOCTYPE(dp)";

/// Default seed table location.
pub const DEFAULT_SEEDS_FILE: &str = "data/processed/data_papers.csv";

/// Default ledger location.
pub const DEFAULT_LEDGER_FILE: &str = "data/processed/citing_papers_with_paths.csv";

/// Default fulltext cache directory.
pub const DEFAULT_CACHE_DIR: &str = "data/raw/fulltext";

/// Seeds need at least this many citations to be crawled.
pub const DEFAULT_MIN_CITATIONS: u64 = 10;

/// Search results per page.
pub const DEFAULT_PAGE_SIZE: u32 = 25;

/// Connect timeout for both endpoints.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Whole-request timeout for both endpoints.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "SCOPUS_API_KEY";

const APP_DIR: &str = "citefetch";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("could not read config file {path}: {source}")]
    Io {
        /// Config file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`FileConfig`].
    #[error("could not parse config file {path}: {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is outside its accepted range.
    #[error("invalid config value for `{field}`: {value}. Expected range: {expected}")]
    Invalid {
        /// Field name as written in the file.
        field: &'static str,
        /// Offending value.
        value: String,
        /// Accepted range, human readable.
        expected: &'static str,
    },

    /// No API key was supplied by any source.
    #[error("no API key: pass --api-key, set {API_KEY_ENV}, or add `api_key` to the config file")]
    MissingApiKey,
}

/// Endpoint, credential and timeout settings for [`crate::ApiClient`].
#[derive(Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Elsevier API key, sent as the `apiKey` query parameter.
    pub api_key: String,
    /// Search endpoint.
    pub search_url: String,
    /// Fulltext endpoint base.
    pub fulltext_base_url: String,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout.
    pub request_timeout: Duration,
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("api_key", &"***")
            .field("search_url", &self.search_url)
            .field("fulltext_base_url", &self.fulltext_base_url)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl ApiConfig {
    /// Default endpoints and timeouts with the given key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            search_url: DEFAULT_SEARCH_URL.to_string(),
            fulltext_base_url: DEFAULT_FULLTEXT_BASE_URL.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Overrides the search endpoint.
    #[must_use]
    pub fn with_search_url(mut self, url: impl Into<String>) -> Self {
        self.search_url = url.into();
        self
    }

    /// Overrides the fulltext endpoint base.
    #[must_use]
    pub fn with_fulltext_base_url(mut self, url: impl Into<String>) -> Self {
        self.fulltext_base_url = url.into();
        self
    }

    /// Overrides the whole-request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Overrides the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Everything a harvest run needs besides the network.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// API client settings.
    pub api: ApiConfig,
    /// Seed table CSV.
    pub seeds_path: PathBuf,
    /// Result ledger CSV.
    pub ledger_path: PathBuf,
    /// Fulltext cache directory.
    pub cache_dir: PathBuf,
    /// Query used by seed discovery.
    pub seed_query: String,
    /// Minimum `citedby_count` for a seed to be crawled.
    pub min_citations: u64,
    /// In-flight fetch limit for the first pass.
    pub concurrency: usize,
    /// In-flight fetch limit for the retry pass; `None` means half of `concurrency`.
    pub retry_concurrency: Option<usize>,
    /// Attempts per fetch task (clamped to at least 1 by the retry policy).
    pub max_retries: u32,
    /// Search results per page.
    pub page_size: u32,
    /// Pause between consecutive search pages.
    pub page_delay: Duration,
}

impl HarvestConfig {
    /// Defaults for everything except the API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api: ApiConfig::new(api_key),
            seeds_path: PathBuf::from(DEFAULT_SEEDS_FILE),
            ledger_path: PathBuf::from(DEFAULT_LEDGER_FILE),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            seed_query: DEFAULT_SEED_QUERY.to_string(),
            min_citations: DEFAULT_MIN_CITATIONS,
            concurrency: DEFAULT_CONCURRENCY,
            retry_concurrency: None,
            max_retries: DEFAULT_MAX_RETRIES,
            page_size: DEFAULT_PAGE_SIZE,
            page_delay: DEFAULT_PAGE_DELAY,
        }
    }

    /// Concurrency for the retry pass: explicit value, else `max(1, concurrency / 2)`.
    #[must_use]
    pub fn effective_retry_concurrency(&self) -> usize {
        self.retry_concurrency
            .unwrap_or(self.concurrency / 2)
            .max(1)
    }

    /// Backoff policy for both fetch and search retries.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_max_attempts(self.max_retries)
    }

    /// Fills every field the file sets; fields it leaves out keep their value.
    #[must_use]
    pub fn with_file_config(mut self, file: &FileConfig) -> Self {
        if let Some(api_key) = &file.api_key
            && self.api.api_key.is_empty()
        {
            self.api.api_key.clone_from(api_key);
        }
        if let Some(url) = &file.search_url {
            self.api.search_url.clone_from(url);
        }
        if let Some(url) = &file.fulltext_base_url {
            self.api.fulltext_base_url.clone_from(url);
        }
        if let Some(secs) = file.connect_timeout_secs {
            self.api.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.request_timeout_secs {
            self.api.request_timeout = Duration::from_secs(secs);
        }
        if let Some(path) = &file.seeds_file {
            self.seeds_path.clone_from(path);
        }
        if let Some(path) = &file.ledger_file {
            self.ledger_path.clone_from(path);
        }
        if let Some(path) = &file.cache_dir {
            self.cache_dir.clone_from(path);
        }
        if let Some(query) = &file.seed_query {
            self.seed_query.clone_from(query);
        }
        if let Some(min) = file.min_citations {
            self.min_citations = min;
        }
        if let Some(concurrency) = file.concurrency {
            self.concurrency = concurrency;
        }
        if let Some(concurrency) = file.retry_concurrency {
            self.retry_concurrency = Some(concurrency);
        }
        if let Some(max_retries) = file.max_retries {
            self.max_retries = max_retries;
        }
        if let Some(page_size) = file.page_size {
            self.page_size = page_size;
        }
        if let Some(ms) = file.page_delay_ms {
            self.page_delay = Duration::from_millis(ms);
        }
        self
    }
}

/// TOML-backed file configuration.
///
/// ```toml
/// api_key = "..."
/// cache_dir = "data/raw/fulltext"
/// concurrency = 8
/// max_retries = 4
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// API key; lowest priority source.
    pub api_key: Option<String>,
    /// Search endpoint override.
    pub search_url: Option<String>,
    /// Fulltext endpoint base override.
    pub fulltext_base_url: Option<String>,
    /// Seed discovery query.
    pub seed_query: Option<String>,
    /// Seed table CSV.
    pub seeds_file: Option<PathBuf>,
    /// Result ledger CSV.
    pub ledger_file: Option<PathBuf>,
    /// Fulltext cache directory.
    pub cache_dir: Option<PathBuf>,
    /// Seed citation threshold.
    pub min_citations: Option<u64>,
    /// First-pass fetch concurrency (1..=100).
    pub concurrency: Option<usize>,
    /// Retry-pass fetch concurrency (1..=100).
    pub retry_concurrency: Option<usize>,
    /// Attempts per fetch (1..=20).
    pub max_retries: Option<u32>,
    /// Search page size (1..=200).
    pub page_size: Option<u32>,
    /// Pause between search pages in milliseconds (0..=60000).
    pub page_delay_ms: Option<u64>,
    /// Connect timeout in seconds (1..=3600).
    pub connect_timeout_secs: Option<u64>,
    /// Request timeout in seconds (1..=3600).
    pub request_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Reads, parses and validates a config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`], [`ConfigError::Parse`] or
    /// [`ConfigError::Invalid`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`FileConfig::load`], but a missing file yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Same as [`FileConfig::load`] for files that exist.
    pub fn load_optional(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        Self::load(path).map(Some)
    }

    /// Validates values against the same ranges the CLI enforces.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first out-of-range value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("concurrency", self.concurrency, 1, 100, "1..=100")?;
        check_range("retry_concurrency", self.retry_concurrency, 1, 100, "1..=100")?;
        check_range("max_retries", self.max_retries, 1, 20, "1..=20")?;
        check_range("page_size", self.page_size, 1, 200, "1..=200")?;
        check_range("page_delay_ms", self.page_delay_ms, 0, 60_000, "0..=60000")?;
        check_range(
            "connect_timeout_secs",
            self.connect_timeout_secs,
            1,
            3600,
            "1..=3600",
        )?;
        check_range(
            "request_timeout_secs",
            self.request_timeout_secs,
            1,
            3600,
            "1..=3600",
        )?;
        Ok(())
    }
}

fn check_range<T>(
    field: &'static str,
    value: Option<T>,
    min: T,
    max: T,
    expected: &'static str,
) -> Result<(), ConfigError>
where
    T: PartialOrd + fmt::Display,
{
    match value {
        Some(value) if value < min || value > max => Err(ConfigError::Invalid {
            field,
            value: value.to_string(),
            expected,
        }),
        _ => Ok(()),
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/citefetch/config.toml`
/// 2. `$HOME/.config/citefetch/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(xdg).join(APP_DIR).join(CONFIG_FILE_NAME));
    }
    env::var_os("HOME")
        .filter(|v| !v.is_empty())
        .map(|home| {
            PathBuf::from(home)
                .join(".config")
                .join(APP_DIR)
                .join(CONFIG_FILE_NAME)
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_harvest_defaults() {
        let config = HarvestConfig::new("k");
        assert_eq!(config.api.search_url, DEFAULT_SEARCH_URL);
        assert_eq!(config.api.request_timeout, Duration::from_secs(60));
        assert_eq!(config.min_citations, 10);
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.page_size, 25);
        assert_eq!(config.seed_query, "DOCTYPE(dp)");
        assert_eq!(config.cache_dir, PathBuf::from("data/raw/fulltext"));
    }

    #[test]
    fn test_retry_concurrency_defaults_to_half() {
        let mut config = HarvestConfig::new("k");
        assert_eq!(config.effective_retry_concurrency(), 5);
        config.concurrency = 1;
        assert_eq!(config.effective_retry_concurrency(), 1);
        config.retry_concurrency = Some(7);
        assert_eq!(config.effective_retry_concurrency(), 7);
    }

    #[test]
    fn test_retry_policy_clamps_zero_attempts() {
        let mut config = HarvestConfig::new("k");
        config.max_retries = 0;
        assert_eq!(config.retry_policy().max_attempts(), 1);
    }

    #[test]
    fn test_api_config_debug_hides_key() {
        let rendered = format!("{:?}", ApiConfig::new("TOPSECRET"));
        assert!(!rendered.contains("TOPSECRET"));
    }

    #[test]
    fn test_file_config_load_and_apply() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "api_key = \"file-key\"\nconcurrency = 4\npage_delay_ms = 0\ncache_dir = \"/tmp/ft\"\n",
        )
        .unwrap();

        let file = FileConfig::load(&path).unwrap();
        let config = HarvestConfig::new("").with_file_config(&file);
        assert_eq!(config.api.api_key, "file-key");
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.page_delay, Duration::ZERO);
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/ft"));
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn test_file_key_does_not_override_existing_key() {
        let file = FileConfig {
            api_key: Some("file-key".to_string()),
            ..FileConfig::default()
        };
        let config = HarvestConfig::new("cli-key").with_file_config(&file);
        assert_eq!(config.api.api_key, "cli-key");
    }

    #[test]
    fn test_file_config_rejects_out_of_range() {
        let file = FileConfig {
            concurrency: Some(0),
            ..FileConfig::default()
        };
        let error = file.validate().unwrap_err();
        assert!(error.to_string().contains("concurrency"));

        let file = FileConfig {
            max_retries: Some(50),
            ..FileConfig::default()
        };
        assert!(matches!(
            file.validate(),
            Err(ConfigError::Invalid {
                field: "max_retries",
                ..
            })
        ));
    }

    #[test]
    fn test_file_config_rejects_unknown_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "workers = 3\n").unwrap();
        assert!(matches!(
            FileConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_optional_missing_file() {
        let dir = TempDir::new().unwrap();
        let loaded = FileConfig::load_optional(&dir.path().join("absent.toml")).unwrap();
        assert!(loaded.is_none());
    }
}
