//! Metadata fetcher for the arXiv Atom feed
//!
//! One HTTP request per run: category query, capped result count, short
//! timeout. The whole-request failure modes (HTTP status, timeout,
//! unparseable feed) yield an empty record map plus one issue describing the
//! failure; a single malformed entry is skipped with a warning and the rest
//! of the feed still parses.

use chrono::Utc;
use feed_rs::model::Entry;
use lexigraph_common::config::FeedConfig;
use lexigraph_common::errors::Result;
use lexigraph_common::records::SourceRecord;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One problem encountered while fetching or parsing the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchIssue {
    pub kind: FetchIssueKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchIssueKind {
    /// Non-success HTTP status for the whole request
    HttpStatus(u16),
    /// Request timed out
    Timeout,
    /// Connection-level failure
    Transport,
    /// Response body was not a parseable feed
    Parse,
    /// One entry was missing required fields
    Entry,
}

impl FetchIssueKind {
    /// Whether this issue invalidates the whole request (as opposed to one
    /// entry).
    pub fn is_request_level(&self) -> bool {
        !matches!(self, FetchIssueKind::Entry)
    }
}

/// Fetches paper metadata for one category from the feed endpoint.
pub struct MetadataFetcher {
    http: reqwest::Client,
    endpoint: String,
    category: String,
    max_results: u32,
}

impl MetadataFetcher {
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            category: config.category.replace(' ', "+"),
            max_results: config.max_results,
        })
    }

    fn query_url(&self) -> String {
        format!(
            "{}?search_query=cat:{}&sortBy=submittedDate&max_results={}",
            self.endpoint, self.category, self.max_results
        )
    }

    /// Fetch and parse the feed.
    ///
    /// Always returns: request-level failures come back as an empty map plus
    /// one issue, so the caller decides whether that aborts the stage.
    pub async fn fetch(&self) -> (BTreeMap<u32, SourceRecord>, Vec<FetchIssue>) {
        let url = self.query_url();
        info!(category = %self.category, max_results = self.max_results, "Querying feed");

        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                let kind = if e.is_timeout() {
                    FetchIssueKind::Timeout
                } else {
                    FetchIssueKind::Transport
                };
                warn!(error = %e, "Feed request failed");
                return (
                    BTreeMap::new(),
                    vec![FetchIssue { kind, message: e.to_string() }],
                );
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Feed returned error status");
            return (
                BTreeMap::new(),
                vec![FetchIssue {
                    kind: FetchIssueKind::HttpStatus(status.as_u16()),
                    message: format!("feed returned HTTP {}", status.as_u16()),
                }],
            );
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                return (
                    BTreeMap::new(),
                    vec![FetchIssue {
                        kind: FetchIssueKind::Transport,
                        message: format!("failed to read feed body: {}", e),
                    }],
                );
            }
        };

        let feed = match feed_rs::parser::parse(&body[..]) {
            Ok(feed) => feed,
            Err(e) => {
                warn!(error = %e, "Feed body did not parse");
                return (
                    BTreeMap::new(),
                    vec![FetchIssue {
                        kind: FetchIssueKind::Parse,
                        message: format!("feed parse error: {}", e),
                    }],
                );
            }
        };

        let mut issues = Vec::new();
        let mut records = BTreeMap::new();
        let mut index: u32 = 0;

        for entry in feed.entries {
            match entry_to_record(index, &entry) {
                Some(record) => {
                    records.insert(index, record);
                    index += 1;
                }
                None => {
                    warn!(entry_id = %entry.id, "Skipping feed entry with missing fields");
                    issues.push(FetchIssue {
                        kind: FetchIssueKind::Entry,
                        message: format!("entry '{}' missing required fields", entry.id),
                    });
                }
            }
        }

        info!(count = records.len(), "Parsed feed entries");
        (records, issues)
    }
}

/// Map one feed entry to a record. Returns None when a required field
/// (title, summary) is absent; the PDF link is explicitly optional.
fn entry_to_record(index: u32, entry: &Entry) -> Option<SourceRecord> {
    let title = entry.title.as_ref().map(|t| t.content.trim().to_string())?;
    let abstract_text = entry.summary.as_ref().map(|s| s.content.trim().to_string())?;
    if title.is_empty() || abstract_text.is_empty() {
        return None;
    }

    let date_submitted = entry.published.map(|d| d.format("%Y-%m-%d").to_string());
    let tags: Vec<String> = entry.categories.iter().map(|c| c.term.clone()).collect();
    let authors: Vec<String> = entry.authors.iter().map(|a| a.name.clone()).collect();

    let document_url = entry
        .links
        .iter()
        .find(|l| {
            l.title.as_deref() == Some("pdf")
                || l.media_type.as_deref() == Some("application/pdf")
        })
        .map(|l| l.href.clone());

    let source_url = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref() == Some("alternate"))
        .map(|l| l.href.clone())
        .or_else(|| {
            if entry.id.starts_with("http") {
                Some(entry.id.clone())
            } else {
                None
            }
        });

    debug!(index, %title, has_pdf = document_url.is_some(), "Parsed entry");

    Some(SourceRecord {
        id: index,
        uuid: Uuid::new_v4().to_string(),
        title,
        date_submitted,
        date_fetched: Utc::now(),
        tags,
        authors,
        abstract_text,
        document_url,
        source_url,
        full_text: None,
        keywords: None,
        definitions: None,
    })
}
