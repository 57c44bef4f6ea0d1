//! Error types for the download module.
//!
//! This module defines structured errors for all API requests, providing
//! context-rich error messages for logs. URLs stored in errors never carry the
//! API key; callers pass them through [`redact_url`] first.

use std::path::PathBuf;

use thiserror::Error;
use url::Url;

/// Query parameter that carries the API key on every Elsevier request.
pub(crate) const API_KEY_PARAM: &str = "apiKey";

/// Errors that can occur while talking to the search or fulltext API.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The (redacted) URL that failed.
        url: String,
        /// The underlying network error, stripped of its URL.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The (redacted) URL that timed out.
        url: String,
    },

    /// Non-success HTTP response.
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        /// The (redacted) URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// File system error while persisting a response.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A configured endpoint is malformed or cannot carry path segments.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The response body could not be decoded.
    #[error("could not decode response from {url}: {source}")]
    Decode {
        /// The (redacted) URL whose body failed to decode.
        url: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    ClientBuild {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    ///
    /// The URL embedded in the reqwest error is dropped because it contains
    /// the API key.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source: source.without_url(),
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a decode error.
    pub fn decode(url: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            url: url.into(),
            source,
        }
    }

    /// Returns the HTTP status code carried by this error, if any.
    #[must_use]
    pub fn http_status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Renders `url` with the API key value masked.
#[must_use]
pub fn redact_url(url: &Url) -> String {
    if !url.query_pairs().any(|(key, _)| key == API_KEY_PARAM) {
        return url.to_string();
    }
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if key == API_KEY_PARAM {
                "***".to_string()
            } else {
                value.into_owned()
            };
            (key.into_owned(), value)
        })
        .collect();
    let mut redacted = url.clone();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_download_error_timeout_display() {
        let error = DownloadError::timeout("https://api.example.com/article/doi/10.1/a");
        assert!(error.to_string().contains("timeout"));
        assert!(error.to_string().contains("10.1/a"));
    }

    #[test]
    fn test_download_error_http_status_display() {
        let error = DownloadError::http_status("https://api.example.com/x", 404);
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected '404' in: {msg}");
        assert_eq!(error.http_status_code(), Some(404));
    }

    #[test]
    fn test_download_error_io_display() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let error = DownloadError::io(PathBuf::from("/tmp/cache/10.1_a.xml"), io_error);
        let msg = error.to_string();
        assert!(msg.contains("/tmp/cache/10.1_a.xml"), "Expected path in: {msg}");
        assert_eq!(error.http_status_code(), None);
    }

    #[test]
    fn test_download_error_decode_display() {
        let source = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error = DownloadError::decode("https://api.example.com/search", source);
        assert!(error.to_string().contains("could not decode"));
    }

    #[test]
    fn test_redact_url_masks_api_key() {
        let url = Url::parse("https://api.example.com/search?apiKey=SECRET&query=REF(1)").unwrap();
        let redacted = redact_url(&url);
        assert!(!redacted.contains("SECRET"), "key leaked: {redacted}");
        assert!(redacted.contains("apiKey=***") || redacted.contains("apiKey=%2A%2A%2A"));
        assert!(redacted.contains("query=REF"));
    }

    #[test]
    fn test_redact_url_without_key_is_unchanged() {
        let url = Url::parse("https://api.example.com/search?query=x").unwrap();
        assert_eq!(redact_url(&url), url.to_string());
    }
}
