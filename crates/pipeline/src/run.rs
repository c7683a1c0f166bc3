//! Pipeline controller
//!
//! Sequences the three stages (scrape, enrich, persist) plus the retention
//! sweep, isolating stage failures from metrics finalization: every run --
//! finished or aborted -- produces the summary block and the JSON export
//! line. Stage durations are recorded on the error path too.

use crate::{enrich, persist, retention, scrape};
use lexigraph_common::config::AppConfig;
use lexigraph_common::errors::Result;
use lexigraph_common::metrics::PipelineMetrics;
use tracing::{error, info, instrument};

/// Outcome of one pipeline run, for the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    Failed,
}

/// Execute one full pipeline run for today's date.
pub async fn run_once(config: &AppConfig) -> RunStatus {
    let run_date = chrono::Utc::now().format("%Y-%m-%d").to_string();
    run_for_date(config, &run_date).await
}

/// Execute one full pipeline run for a given run date.
#[instrument(skip(config))]
pub async fn run_for_date(config: &AppConfig, run_date: &str) -> RunStatus {
    info!(run_date, version = lexigraph_common::VERSION, "Pipeline run starting");
    let mut metrics = PipelineMetrics::new(run_date);

    let result = run_stages(config, &mut metrics, run_date).await;

    let status = match result {
        Ok(()) => {
            info!(run_date, "Pipeline run finished");
            RunStatus::Succeeded
        }
        Err(e) => {
            // Per-record problems were already recorded inside the stages;
            // this entry marks the aborted run itself, under the failing
            // error's own category.
            error!(run_date, error = %e, "Pipeline run failed");
            metrics.record_error(
                e.category(),
                &format!("Run aborted: {}", e),
                [("run_date", run_date.to_string())],
            );
            RunStatus::Failed
        }
    };

    finalize(config, &metrics, run_date);
    status
}

/// The stage sequence. Each stage's duration is recorded whether it returns
/// or errors; the `?` sits after `end_stage`.
async fn run_stages(
    config: &AppConfig,
    metrics: &mut PipelineMetrics,
    run_date: &str,
) -> Result<()> {
    metrics.start_stage("scrape");
    let scrape_result = scrape::run(config, metrics, run_date).await;
    metrics.end_stage("scrape");
    scrape_result?;

    metrics.start_stage("enrich");
    let enrich_result = enrich::run(config, metrics, run_date).await;
    metrics.end_stage("enrich");
    enrich_result?;

    metrics.start_stage("persist");
    let persist_result = persist::run(config, metrics, run_date).await;
    metrics.end_stage("persist");
    persist_result?;

    retention::sweep_documents(config, run_date);
    Ok(())
}

/// Print the summary and append the export line. Both happen for aborted
/// runs as well; an export failure must not mask the run outcome.
fn finalize(config: &AppConfig, metrics: &PipelineMetrics, run_date: &str) {
    println!("{}", metrics.summary());

    let export_path = config.metrics_path(run_date);
    if let Err(e) = metrics.append_export(&export_path) {
        error!(path = %export_path.display(), error = %e, "Failed to write metrics export");
    }
}
