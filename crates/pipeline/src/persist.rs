//! Persist stage
//!
//! Reads the enriched batch file and stores each record through the
//! repository. Every record gets its own transaction; a failure rolls back
//! and records that record only. Duplicates and zero-definition records are
//! expected outcomes with their own counters, not errors.

use lexigraph_common::config::AppConfig;
use lexigraph_common::db::{self, Repository, StoreOutcome};
use lexigraph_common::errors::{PipelineError, Result};
use lexigraph_common::metrics::PipelineMetrics;
use lexigraph_common::records::RecordBatch;
use std::path::Path;
use tracing::{info, instrument, warn};

/// Run the persist stage: open the store, bootstrap the schema, and store
/// the batch at `batch_path`.
#[instrument(skip(config, metrics))]
pub async fn run(config: &AppConfig, metrics: &mut PipelineMetrics, run_date: &str) -> Result<()> {
    let pool = db::connect(&config.database).await?;
    let repository = Repository::new(pool);
    repository.init_schema().await?;

    let batch_path = config.batch_path(run_date);
    store_batch(&repository, &batch_path, metrics).await
}

/// Store every record of the batch file through the repository.
pub async fn store_batch(
    repository: &Repository,
    batch_path: &Path,
    metrics: &mut PipelineMetrics,
) -> Result<()> {
    // An unreadable batch file aborts the stage; there is nothing to store.
    let batch = RecordBatch::load(batch_path)?;

    for record in batch.iter() {
        metrics.persist.papers_attempted += 1;

        match repository.store_record(record).await {
            Ok(StoreOutcome::Inserted { document_id, keywords_new, keywords_existing }) => {
                info!(uuid = %record.uuid, document_id, "Stored record");
                metrics.persist.papers_inserted += 1;
                metrics.persist.keywords_new += keywords_new;
                metrics.persist.keywords_existing += keywords_existing;
                metrics.persist.keywords_total += keywords_new + keywords_existing;
            }
            Ok(StoreOutcome::Duplicate) => {
                metrics.persist.papers_duplicate += 1;
            }
            Ok(StoreOutcome::NoDefinitions) => {
                metrics.persist.papers_no_definitions += 1;
            }
            Err(e) => {
                // The record's transaction has already rolled back; the
                // batch keeps going.
                warn!(uuid = %record.uuid, error = %e, "Failed to store record");
                metrics.persist.papers_error += 1;
                let e = PipelineError::Persistence {
                    uuid: record.uuid.clone(),
                    message: e.to_string(),
                };
                metrics.record_error(
                    e.category(),
                    &e.to_string(),
                    [("uuid", record.uuid.clone()), ("record_id", record.id.to_string())],
                );
            }
        }
    }

    info!(
        attempted = metrics.persist.papers_attempted,
        inserted = metrics.persist.papers_inserted,
        duplicates = metrics.persist.papers_duplicate,
        skipped = metrics.persist.papers_no_definitions,
        "Persist stage complete"
    );
    Ok(())
}
