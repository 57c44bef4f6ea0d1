//! CLI command handlers.
//!
//! Configuration is layered once here: defaults, then the TOML file, then
//! flags (clap has already folded `SCOPUS_API_KEY` into `--api-key`).

mod harvest;
mod retry;
mod seeds;
mod status;

use std::path::Path;
use std::time::Duration;

use citefetch_core::config::resolve_default_config_path;
use citefetch_core::{ConfigError, FileConfig, HarvestConfig};
use tracing::debug;

use crate::cli::{ApiArgs, FetchArgs};

pub use harvest::run_harvest_command;
pub use retry::run_retry_command;
pub use seeds::run_seeds_command;
pub use status::run_status_command;

/// Loads the file config: an explicit `--config` must exist, the default
/// location is optional.
fn load_file_config(explicit: Option<&Path>) -> Result<Option<FileConfig>, ConfigError> {
    if let Some(path) = explicit {
        return FileConfig::load(path).map(Some);
    }
    match resolve_default_config_path() {
        Some(path) => {
            let loaded = FileConfig::load_optional(&path)?;
            if loaded.is_some() {
                debug!(path = %path.display(), "loaded default config file");
            }
            Ok(loaded)
        }
        None => Ok(None),
    }
}

/// Builds the run configuration from the file and API flags.
///
/// The key is not checked here; see [`require_api_key`].
pub(crate) fn resolve_config(
    config_path: Option<&Path>,
    api: &ApiArgs,
) -> Result<HarvestConfig, ConfigError> {
    let api_key = api
        .api_key
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    let mut config = HarvestConfig::new(api_key);
    if let Some(file) = load_file_config(config_path)? {
        config = config.with_file_config(&file);
    }

    if let Some(url) = &api.search_url {
        config.api.search_url.clone_from(url);
    }
    if let Some(url) = &api.fulltext_url {
        config.api.fulltext_base_url.clone_from(url);
    }
    if let Some(secs) = api.timeout {
        config.api.request_timeout = Duration::from_secs(secs);
    }
    Ok(config)
}

/// Applies `harvest`/`retry` fetch flags.
pub(crate) fn apply_fetch_args(config: &mut HarvestConfig, fetch: &FetchArgs) {
    if let Some(dir) = &fetch.cache_dir {
        config.cache_dir.clone_from(dir);
    }
    if let Some(path) = &fetch.ledger {
        config.ledger_path.clone_from(path);
    }
    if let Some(max_retries) = fetch.max_retries {
        config.max_retries = max_retries;
    }
}

/// Fails with [`ConfigError::MissingApiKey`] when no source supplied a key.
pub(crate) fn require_api_key(config: &HarvestConfig) -> Result<(), ConfigError> {
    if config.api.api_key.trim().is_empty() {
        return Err(ConfigError::MissingApiKey);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use tempfile::TempDir;

    use super::*;

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_flag_key_beats_file_key() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "api_key = \"from-file\"\nconcurrency = 3\n");
        let api = ApiArgs {
            api_key: Some("from-flag".to_string()),
            ..ApiArgs::default()
        };

        let config = resolve_config(Some(&path), &api).unwrap();
        assert_eq!(config.api.api_key, "from-flag");
        assert_eq!(config.concurrency, 3);
    }

    #[test]
    fn test_file_key_used_when_flag_absent() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "api_key = \"from-file\"\n");
        let config = resolve_config(Some(&path), &ApiArgs::default()).unwrap();
        assert_eq!(config.api.api_key, "from-file");
        assert!(require_api_key(&config).is_ok());
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            resolve_config(Some(&missing), &ApiArgs::default()),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_blank_key_is_missing() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "");
        let api = ApiArgs {
            api_key: Some("   ".to_string()),
            ..ApiArgs::default()
        };
        let config = resolve_config(Some(&path), &api).unwrap();
        assert!(matches!(
            require_api_key(&config),
            Err(ConfigError::MissingApiKey)
        ));
    }

    #[test]
    fn test_flags_override_file_endpoints_and_fetch_settings() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "search_url = \"http://file/search\"\nmax_retries = 2\ncache_dir = \"file-cache\"\n",
        );
        let api = ApiArgs {
            search_url: Some("http://flag/search".to_string()),
            timeout: Some(5),
            ..ApiArgs::default()
        };
        let mut config = resolve_config(Some(&path), &api).unwrap();
        apply_fetch_args(
            &mut config,
            &FetchArgs {
                cache_dir: Some(PathBuf::from("flag-cache")),
                ledger: None,
                max_retries: None,
            },
        );

        assert_eq!(config.api.search_url, "http://flag/search");
        assert_eq!(config.api.request_timeout, Duration::from_secs(5));
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.cache_dir, PathBuf::from("flag-cache"));
    }
}
