//! Document retriever
//!
//! Downloads the primary-source PDF for each record that has a document URL
//! into the per-run directory. Idempotent: a file that already exists is
//! counted as satisfied and costs neither a delay nor a request. The
//! courtesy delay runs only before attempts that actually hit the network.

use lexigraph_common::config::FeedConfig;
use lexigraph_common::errors::{ErrorCategory, PipelineError, Result};
use lexigraph_common::metrics::PipelineMetrics;
use lexigraph_common::records::SourceRecord;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Derive the on-disk filename from a document URL: its last path segment
/// with a pdf extension. None when the URL has no usable segment.
pub fn filename_for_url(url: &str) -> Option<String> {
    let segment = url.rsplit('/').next().unwrap_or_default();
    if segment.is_empty() || segment.contains(':') {
        return None;
    }
    Some(format!("{}.pdf", segment))
}

/// Path where a record's document lands, if it has a document URL.
pub fn document_path(record: &SourceRecord, save_dir: &Path) -> Option<PathBuf> {
    let url = record.document_url.as_deref()?;
    Some(save_dir.join(filename_for_url(url)?))
}

/// Downloads documents for a batch of records.
pub struct DocumentRetriever {
    http: reqwest::Client,
    delay: Duration,
}

impl DocumentRetriever {
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.download_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            delay: Duration::from_secs(config.download_delay_secs),
        })
    }

    /// Download every record's document into `save_dir`, creating it first.
    ///
    /// Returns the number of satisfied records (fresh downloads plus files
    /// already present). A failure for one record is counted and recorded,
    /// never propagated.
    pub async fn download_all<'a, I>(
        &self,
        records: I,
        save_dir: &Path,
        metrics: &mut PipelineMetrics,
    ) -> Result<u64>
    where
        I: IntoIterator<Item = &'a SourceRecord>,
    {
        std::fs::create_dir_all(save_dir)?;

        let mut satisfied: u64 = 0;
        for record in records {
            let Some(url) = record.document_url.as_deref() else {
                debug!(record = record.id, "No document URL, skipping download");
                continue;
            };
            let Some(path) = document_path(record, save_dir) else {
                warn!(record = record.id, url, "Could not derive filename from URL");
                metrics.scrape.documents_failed += 1;
                metrics.record_error(
                    ErrorCategory::RetrievalError,
                    "Could not derive filename from document URL",
                    [("url", url.to_string()), ("record_id", record.id.to_string())],
                );
                continue;
            };

            if path.exists() {
                debug!(record = record.id, path = %path.display(), "Document already present");
                satisfied += 1;
                continue;
            }

            metrics.scrape.documents_attempted += 1;

            // Courtesy delay toward the upstream source, only when we are
            // about to make a real request.
            tokio::time::sleep(self.delay).await;

            match self.download_one(url, &path).await {
                Ok(bytes) => {
                    info!(record = record.id, bytes, path = %path.display(), "Downloaded document");
                    metrics.scrape.documents_downloaded += 1;
                    satisfied += 1;
                }
                Err(e) => {
                    warn!(record = record.id, url, error = %e, "Document download failed");
                    metrics.scrape.documents_failed += 1;
                    metrics.record_error(
                        e.category(),
                        &e.to_string(),
                        [("url", url.to_string()), ("record_id", record.id.to_string())],
                    );
                }
            }
        }

        Ok(satisfied)
    }

    async fn download_one(&self, url: &str, path: &Path) -> Result<usize> {
        let retrieval = |message: String| PipelineError::Retrieval {
            url: url.to_string(),
            message,
        };

        let response = self.http.get(url).send().await.map_err(|e| retrieval(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(retrieval(format!("HTTP {}", status.as_u16())));
        }
        let bytes = response.bytes().await.map_err(|e| retrieval(e.to_string()))?;
        tokio::fs::write(path, &bytes).await.map_err(|e| retrieval(e.to_string()))?;
        Ok(bytes.len())
    }
}
