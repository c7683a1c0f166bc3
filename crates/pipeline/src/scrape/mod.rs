//! Scrape stage: feed query, document download, text extraction
//!
//! Produces the run's record batch and writes it to the intermediate batch
//! file. Per-record problems (one failed download, one unreadable PDF) are
//! counted and recorded; only a whole-request feed failure aborts the stage.

pub mod arxiv;
pub mod download;
pub mod extract;

use arxiv::{FetchIssueKind, MetadataFetcher};
use download::DocumentRetriever;
use extract::ExtractionMethod;
use lexigraph_common::config::AppConfig;
use lexigraph_common::errors::{ErrorCategory, PipelineError, Result};
use lexigraph_common::metrics::PipelineMetrics;
use lexigraph_common::records::RecordBatch;
use tracing::{info, instrument};

/// Run the scrape stage for one run date and return the saved batch.
#[instrument(skip(config, metrics))]
pub async fn run(
    config: &AppConfig,
    metrics: &mut PipelineMetrics,
    run_date: &str,
) -> Result<RecordBatch> {
    metrics.scrape.papers_requested += config.feed.max_results as u64;

    let fetcher = MetadataFetcher::new(&config.feed)?;
    let (mut records, issues) = fetcher.fetch().await;

    for issue in &issues {
        metrics.record_error(
            ErrorCategory::FetchError,
            &format!("Feed error: {}", issue.message),
            [("kind", format!("{:?}", issue.kind))],
        );
    }

    // A transport-level failure invalidates the whole request and aborts
    // the stage; partial per-entry failures do not.
    if records.is_empty() {
        if let Some(issue) = issues.iter().find(|i| i.kind.is_request_level()) {
            return Err(match issue.kind {
                FetchIssueKind::HttpStatus(status) => {
                    PipelineError::FeedHttp { status, message: issue.message.clone() }
                }
                FetchIssueKind::Timeout => {
                    PipelineError::FeedTimeout { timeout_secs: config.feed.timeout_secs }
                }
                _ => PipelineError::FeedParse { message: issue.message.clone() },
            });
        }
    }

    metrics.scrape.metadata_fetched += records.len() as u64;
    info!(fetched = records.len(), issues = issues.len(), "Metadata fetched");

    let save_dir = config.documents_dir(run_date);
    let retriever = DocumentRetriever::new(&config.feed)?;
    let satisfied = retriever.download_all(records.values(), &save_dir, metrics).await?;
    info!(satisfied, total = records.len(), "Documents downloaded");

    let method = ExtractionMethod::from_config(&config.storage)?;
    extract::extract_batch(&mut records, &save_dir, method, metrics);
    let with_text = records.values().filter(|r| r.full_text.is_some()).count();
    info!(with_text, total = records.len(), "Text extraction complete");

    let batch = RecordBatch::from_records(records);
    let batch_path = config.batch_path(run_date);
    batch.save(&batch_path)?;
    info!(path = %batch_path.display(), records = batch.len(), "Batch file written");

    Ok(batch)
}
