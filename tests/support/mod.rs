//! Shared helpers for wiremock-backed integration tests.
//!
//! Socket-bound tests skip (with a message) when the sandbox cannot bind a
//! localhost port, unless `CITEFETCH_REQUIRE_SOCKET_TESTS` asks to fail fast.

#![allow(dead_code)]

use std::net::TcpListener;
use std::panic::Location;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use citefetch_core::{ApiClient, ApiConfig, RetryPolicy};
use serde_json::{Value, json};
use wiremock::{MockServer, Request, Respond, ResponseTemplate};

#[must_use]
pub fn socket_tests_required() -> bool {
    std::env::var("CITEFETCH_REQUIRE_SOCKET_TESTS")
        .ok()
        .is_some_and(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

#[track_caller]
#[must_use]
pub fn should_skip_socket_bound_test() -> bool {
    if TcpListener::bind("127.0.0.1:0").is_ok() {
        return false;
    }

    let location = Location::caller();
    let message = format!(
        "[socket-bound-test] cannot bind localhost socket at {}:{}; wiremock-based test cannot run in this environment",
        location.file(),
        location.line()
    );
    if socket_tests_required() {
        panic!("{message}. Set CITEFETCH_REQUIRE_SOCKET_TESTS=0 to allow local skip behavior.");
    }

    eprintln!(
        "{message}. Skipping test. Set CITEFETCH_REQUIRE_SOCKET_TESTS=1 to fail-fast instead."
    );
    true
}

pub async fn start_mock_server_or_skip() -> Option<MockServer> {
    if should_skip_socket_bound_test() {
        None
    } else {
        Some(MockServer::start().await)
    }
}

/// API settings pointing both endpoints at `server`: `/search` and `/doi/...`.
pub fn api_config(server: &MockServer) -> ApiConfig {
    ApiConfig::new("test-key")
        .with_search_url(format!("{}/search", server.uri()))
        .with_fulltext_base_url(format!("{}/doi", server.uri()))
}

pub fn api_client(server: &MockServer) -> ApiClient {
    ApiClient::new(&api_config(server)).unwrap()
}

/// Retry policy with millisecond backoff so retry tests stay fast.
pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_attempts,
        Duration::from_millis(5),
        Duration::from_millis(20),
        2.0,
        Duration::ZERO,
    )
}

/// One search hit in the API's wire shape.
pub fn entry(eid: &str, doi: Option<&str>, title: &str, cover_date: &str) -> Value {
    let mut entry = json!({
        "eid": eid,
        "dc:title": title,
        "prism:coverDate": cover_date,
    });
    if let Some(doi) = doi {
        entry["prism:doi"] = json!(doi);
    }
    entry
}

/// A search response page; `next_cursor` adds a `next` link.
pub fn search_page(entries: &[Value], next_cursor: Option<&str>, total: u64) -> Value {
    let mut links = vec![json!({"@ref": "self", "@href": "https://api.example.com/search?cursor=%2A"})];
    if let Some(cursor) = next_cursor {
        links.push(json!({
            "@ref": "next",
            "@href": format!("https://api.example.com/search?cursor={cursor}&count=25"),
        }));
    }
    json!({
        "search-results": {
            "opensearch:totalResults": total.to_string(),
            "link": links,
            "entry": entries,
        }
    })
}

/// The placeholder body the API returns for a query with no hits.
pub fn empty_search_page() -> Value {
    json!({
        "search-results": {
            "opensearch:totalResults": "0",
            "entry": [{"@_fa": "true", "error": "Result set was empty"}],
        }
    })
}

/// Minimal fulltext XML body.
pub fn fulltext_xml(doi: &str) -> String {
    format!("<full-text-retrieval-response><doi>{doi}</doi></full-text-retrieval-response>")
}

/// Answers with `statuses[n]` for the n-th request, repeating the last one.
pub struct SequenceResponder {
    statuses: Vec<u16>,
    body: String,
    hits: Arc<AtomicUsize>,
}

impl SequenceResponder {
    pub fn new(statuses: &[u16], body: impl Into<String>) -> (Self, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        (
            Self {
                statuses: statuses.to_vec(),
                body: body.into(),
                hits: Arc::clone(&hits),
            },
            hits,
        )
    }
}

impl Respond for SequenceResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.hits.fetch_add(1, Ordering::SeqCst);
        let status = self
            .statuses
            .get(n)
            .or_else(|| self.statuses.last())
            .copied()
            .unwrap_or(200);
        if status == 200 {
            ResponseTemplate::new(200).set_body_string(self.body.clone())
        } else {
            ResponseTemplate::new(status)
        }
    }
}
