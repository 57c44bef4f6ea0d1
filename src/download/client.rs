//! HTTP client wrapper for the Scopus Search and Article Retrieval APIs.
//!
//! [`ApiClient`] owns one pooled `reqwest::Client` plus the endpoint URLs and
//! API key. Each call returns an [`HttpOutcome`] instead of a bare `Result`, so
//! callers drive their retry loop off an explicit rate-limited / transient /
//! permanent split rather than re-inspecting errors.

use std::fmt;

use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};
use url::Url;

use super::error::{API_KEY_PARAM, DownloadError, redact_url};
use super::retry::{FailureType, classify_error};
use crate::config::ApiConfig;
use crate::user_agent;

const ACCEPT_XML: &str = "application/xml";
const ACCEPT_JSON: &str = "application/json";

/// Result of one HTTP request, already classified for retry purposes.
#[derive(Debug)]
pub enum HttpOutcome<T> {
    /// HTTP 200 with its decoded body.
    Success(T),
    /// HTTP 429.
    RateLimited(DownloadError),
    /// Send, timeout or body-read failure.
    Transient(DownloadError),
    /// Any other status, or a request that cannot be built.
    Permanent(DownloadError),
}

impl<T> HttpOutcome<T> {
    /// Wraps `error` in the variant matching its [`FailureType`].
    #[must_use]
    pub fn from_error(error: DownloadError) -> Self {
        match classify_error(&error) {
            FailureType::RateLimited => Self::RateLimited(error),
            FailureType::Transient => Self::Transient(error),
            FailureType::Permanent => Self::Permanent(error),
        }
    }

    /// Failure classification, or `None` on success.
    #[must_use]
    pub fn failure_type(&self) -> Option<FailureType> {
        match self {
            Self::Success(_) => None,
            Self::RateLimited(_) => Some(FailureType::RateLimited),
            Self::Transient(_) => Some(FailureType::Transient),
            Self::Permanent(_) => Some(FailureType::Permanent),
        }
    }

    /// Converts into a `Result` whose error keeps the classification.
    ///
    /// # Errors
    ///
    /// Returns the carried error and its [`FailureType`] for every non-success variant.
    pub fn into_classified(self) -> Result<T, (DownloadError, FailureType)> {
        match self {
            Self::Success(value) => Ok(value),
            Self::RateLimited(error) => Err((error, FailureType::RateLimited)),
            Self::Transient(error) => Err((error, FailureType::Transient)),
            Self::Permanent(error) => Err((error, FailureType::Permanent)),
        }
    }

    /// Converts into a plain `Result`, dropping the classification.
    ///
    /// # Errors
    ///
    /// Returns the carried [`DownloadError`] for every non-success variant.
    pub fn into_result(self) -> Result<T, DownloadError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::RateLimited(error) | Self::Transient(error) | Self::Permanent(error) => {
                Err(error)
            }
        }
    }
}

/// Client for the search and fulltext endpoints.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    api_key: String,
    search_url: Url,
    fulltext_base: Url,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("api_key", &"***")
            .field("search_url", &self.search_url.as_str())
            .field("fulltext_base", &self.fulltext_base.as_str())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Builds a client from explicit API settings.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] when an endpoint does not parse or
    /// cannot carry path segments, and [`DownloadError::ClientBuild`] when the
    /// underlying HTTP client cannot be constructed.
    pub fn new(config: &ApiConfig) -> Result<Self, DownloadError> {
        let search_url = parse_endpoint(&config.search_url)?;
        let fulltext_base = parse_endpoint(&config.fulltext_base_url)?;

        let client = Client::builder()
            .user_agent(user_agent::default_user_agent())
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|source| DownloadError::ClientBuild { source })?;

        debug!(
            search_url = %search_url,
            fulltext_base = %fulltext_base,
            timeout_secs = config.request_timeout.as_secs(),
            "API client ready"
        );

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            search_url,
            fulltext_base,
        })
    }

    /// Search endpoint, without credentials.
    #[must_use]
    pub fn search_url(&self) -> &Url {
        &self.search_url
    }

    /// Requests one page of search results and returns the raw JSON body.
    #[instrument(skip(self), fields(query = %query, cursor = %cursor))]
    pub async fn search(&self, query: &str, cursor: &str, count: u32) -> HttpOutcome<String> {
        let url = self.search_page_url(query, cursor, count);
        self.get_text(url, ACCEPT_JSON).await
    }

    /// Requests the fulltext XML for `doi`.
    #[instrument(skip(self), fields(doi = %doi))]
    pub async fn fetch_fulltext(&self, doi: &str) -> HttpOutcome<String> {
        match self.fulltext_url(doi) {
            Ok(url) => self.get_text(url, ACCEPT_XML).await,
            Err(error) => HttpOutcome::from_error(error),
        }
    }

    /// Search endpoint URL for one page, including the API key.
    pub(crate) fn search_page_url(&self, query: &str, cursor: &str, count: u32) -> Url {
        let mut url = self.search_url.clone();
        url.query_pairs_mut()
            .append_pair(API_KEY_PARAM, &self.api_key)
            .append_pair("query", query)
            .append_pair("cursor", cursor)
            .append_pair("count", &count.to_string())
            .append_pair("view", "STANDARD");
        url
    }

    /// Fulltext URL for `doi`: one path segment per `/`-separated DOI part.
    pub(crate) fn fulltext_url(&self, doi: &str) -> Result<Url, DownloadError> {
        let mut url = self.fulltext_base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| DownloadError::invalid_url(self.fulltext_base.as_str()))?;
            segments.pop_if_empty();
            segments.extend(doi.split('/'));
        }
        url.query_pairs_mut().append_pair(API_KEY_PARAM, &self.api_key);
        Ok(url)
    }

    async fn get_text(&self, url: Url, accept: &str) -> HttpOutcome<String> {
        let shown = redact_url(&url);

        let response = match self.client.get(url).header(ACCEPT, accept).send().await {
            Ok(response) => response,
            Err(error) => return HttpOutcome::from_error(transport_error(&shown, error)),
        };

        let status = response.status();
        if status != StatusCode::OK {
            debug!(url = %shown, status = status.as_u16(), "non-200 response");
            return HttpOutcome::from_error(DownloadError::http_status(shown, status.as_u16()));
        }

        match response.text().await {
            Ok(body) => HttpOutcome::Success(body),
            Err(error) => HttpOutcome::from_error(transport_error(&shown, error)),
        }
    }
}

fn transport_error(url: &str, error: reqwest::Error) -> DownloadError {
    if error.is_timeout() {
        DownloadError::timeout(url)
    } else {
        DownloadError::network(url, error)
    }
}

fn parse_endpoint(raw: &str) -> Result<Url, DownloadError> {
    let url = Url::parse(raw).map_err(|_| DownloadError::invalid_url(raw))?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(DownloadError::invalid_url(raw));
    }
    Ok(url)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn test_client() -> ApiClient {
        let config = ApiConfig::new("SECRET")
            .with_search_url("https://api.example.com/content/search/scopus")
            .with_fulltext_base_url("https://api.example.com/content/article/doi");
        ApiClient::new(&config).unwrap()
    }

    #[test]
    fn test_search_page_url_carries_all_parameters() {
        let url = test_client().search_page_url("REF(2-s2.0-1)", "*", 25);
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("apiKey".to_string(), "SECRET".to_string()),
                ("query".to_string(), "REF(2-s2.0-1)".to_string()),
                ("cursor".to_string(), "*".to_string()),
                ("count".to_string(), "25".to_string()),
                ("view".to_string(), "STANDARD".to_string()),
            ]
        );
    }

    #[test]
    fn test_fulltext_url_splits_doi_into_segments() {
        let url = test_client().fulltext_url("10.1016/j.dib.2020.105000").unwrap();
        assert_eq!(url.path(), "/content/article/doi/10.1016/j.dib.2020.105000");
        assert_eq!(url.query(), Some("apiKey=SECRET"));
    }

    #[test]
    fn test_fulltext_url_with_trailing_slash_base() {
        let config = ApiConfig::new("k").with_fulltext_base_url("https://api.example.com/doi/");
        let client = ApiClient::new(&config).unwrap();
        let url = client.fulltext_url("10.1/a").unwrap();
        assert_eq!(url.path(), "/doi/10.1/a");
    }

    #[test]
    fn test_invalid_endpoint_is_rejected() {
        let config = ApiConfig::new("k").with_search_url("mailto:someone@example.com");
        let result = ApiClient::new(&config);
        assert!(matches!(result, Err(DownloadError::InvalidUrl { .. })));

        let config = ApiConfig::new("k").with_fulltext_base_url("not a url");
        assert!(ApiClient::new(&config).is_err());
    }

    #[test]
    fn test_debug_hides_api_key() {
        let rendered = format!("{:?}", test_client());
        assert!(!rendered.contains("SECRET"));
    }

    #[test]
    fn test_outcome_from_error_classification() {
        let outcome: HttpOutcome<String> =
            HttpOutcome::from_error(DownloadError::http_status("u", 429));
        assert_eq!(outcome.failure_type(), Some(FailureType::RateLimited));

        let outcome: HttpOutcome<String> =
            HttpOutcome::from_error(DownloadError::http_status("u", 404));
        assert_eq!(outcome.failure_type(), Some(FailureType::Permanent));

        let outcome: HttpOutcome<String> = HttpOutcome::from_error(DownloadError::timeout("u"));
        assert_eq!(outcome.failure_type(), Some(FailureType::Transient));

        let outcome = HttpOutcome::Success("body".to_string());
        assert_eq!(outcome.failure_type(), None);
        assert_eq!(outcome.into_result().unwrap(), "body");
    }
}
