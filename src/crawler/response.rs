//! Wire types for the Scopus Search API JSON response.

use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::model::{CitingTask, SeedPaper, normalize_doi};

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    #[serde(rename = "search-results")]
    results: SearchResults,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResults {
    #[serde(rename = "opensearch:totalResults", default)]
    total_results: Option<Value>,
    #[serde(default)]
    entry: Vec<SearchEntry>,
    #[serde(default)]
    link: Vec<SearchLink>,
}

#[derive(Debug, Deserialize)]
struct SearchLink {
    #[serde(rename = "@ref", default)]
    rel: String,
    #[serde(rename = "@href", default)]
    href: String,
}

/// One search hit. Every field is optional on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct SearchEntry {
    #[serde(default)]
    pub(crate) eid: Option<String>,
    #[serde(rename = "prism:doi", default)]
    pub(crate) doi: Option<String>,
    #[serde(rename = "dc:title", default)]
    pub(crate) title: Option<String>,
    #[serde(rename = "prism:coverDate", default)]
    pub(crate) cover_date: Option<String>,
    #[serde(rename = "citedby-count", default)]
    pub(crate) citedby_count: Option<Value>,
    /// Set on the placeholder entry returned for an empty result set.
    #[serde(default)]
    pub(crate) error: Option<String>,
}

impl SearchEntry {
    /// First four characters of the cover date.
    pub(crate) fn year(&self) -> String {
        self.cover_date
            .as_deref()
            .map(|date| date.chars().take(4).collect())
            .unwrap_or_default()
    }

    /// Citation count; anything non-numeric counts as zero.
    pub(crate) fn citations(&self) -> u64 {
        self.citedby_count.as_ref().map_or(0, value_as_u64)
    }

    pub(crate) fn into_task(self, cited_data_paper_title: &str) -> CitingTask {
        let year = self.year();
        CitingTask::new(
            self.eid.unwrap_or_default(),
            self.doi.as_deref(),
            self.title.unwrap_or_default(),
            year,
            cited_data_paper_title,
        )
    }

    /// Seed record for this entry, or `None` when it has no EID.
    pub(crate) fn into_seed(self) -> Option<SeedPaper> {
        let citedby_count = self.citations();
        let publication_year = self.year();
        let eid = self.eid.filter(|eid| !eid.trim().is_empty())?;
        Some(SeedPaper {
            eid,
            doi: normalize_doi(self.doi.as_deref()),
            title: self.title.unwrap_or_default(),
            publication_year,
            citedby_count,
        })
    }
}

/// One decoded page.
#[derive(Debug, Default)]
pub(crate) struct SearchPage {
    /// Real hits; the empty-result placeholder is filtered out.
    pub(crate) entries: Vec<SearchEntry>,
    /// `cursor` parameter of the `next` link, if any.
    pub(crate) next_cursor: Option<String>,
    pub(crate) total_results: Option<u64>,
}

pub(crate) fn parse_page(body: &str) -> Result<SearchPage, serde_json::Error> {
    let SearchEnvelope { results } = serde_json::from_str(body)?;

    let next_cursor = results
        .link
        .iter()
        .find(|link| link.rel == "next")
        .and_then(|link| cursor_from_href(&link.href));

    let entries = results
        .entry
        .into_iter()
        .filter(|entry| entry.error.is_none())
        .collect();

    Ok(SearchPage {
        entries,
        next_cursor,
        total_results: results.total_results.as_ref().map(value_as_u64),
    })
}

fn cursor_from_href(href: &str) -> Option<String> {
    let url = Url::parse(href).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "cursor")
        .map(|(_, value)| value.into_owned())
        .filter(|cursor| !cursor.is_empty())
}

fn value_as_u64(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}
