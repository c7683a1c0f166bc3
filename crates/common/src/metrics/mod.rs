//! Pipeline metrics and structured error tracking
//!
//! One [`PipelineMetrics`] is created per run, threaded through every stage,
//! and finalized exactly once at the end of the run -- on the success path
//! and on the failure path alike. Finalizing produces a human-readable
//! summary block and appends one JSON line to the per-day metrics log.

use crate::errors::ErrorCategory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

/// Counters for the scrape stage (fetch, download, extract).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapeCounters {
    pub papers_requested: u64,
    pub metadata_fetched: u64,
    pub documents_attempted: u64,
    pub documents_downloaded: u64,
    pub documents_failed: u64,
    pub extraction_attempted: u64,
    pub extraction_succeeded: u64,
    /// Missing file or no usable text: excluded from enrichment, not a failure
    pub extraction_skipped: u64,
    pub extraction_failed: u64,
}

/// Counters for the enrichment stage (keyword + definition requests).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichCounters {
    pub papers_processed: u64,
    pub papers_skipped_no_text: u64,
    pub keywords_succeeded: u64,
    pub keywords_failed: u64,
    pub definitions_succeeded: u64,
    pub definitions_failed: u64,
    pub keywords_extracted: u64,
    pub definitions_extracted: u64,
    pub keywords_without_definition: u64,
}

/// Counters for the persist stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistCounters {
    pub papers_attempted: u64,
    pub papers_inserted: u64,
    pub papers_duplicate: u64,
    pub papers_no_definitions: u64,
    pub papers_error: u64,
    pub keywords_new: u64,
    pub keywords_existing: u64,
    pub keywords_total: u64,
}

/// One structured error, recorded without interrupting the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub category: ErrorCategory,
    pub message: String,
    pub context: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

/// Metrics for one pipeline run.
#[derive(Debug)]
pub struct PipelineMetrics {
    pub run_date: String,
    started: Instant,
    pub scrape: ScrapeCounters,
    pub enrich: EnrichCounters,
    pub persist: PersistCounters,
    /// Stage name -> elapsed seconds
    pub timing: BTreeMap<String, f64>,
    stage_starts: BTreeMap<String, Instant>,
    pub errors: Vec<ErrorRecord>,
}

/// Serialized form of a finished (or aborted) run.
#[derive(Debug, Serialize, Deserialize)]
pub struct MetricsExport {
    pub run_date: String,
    pub total_duration: f64,
    pub scrape: ScrapeCounters,
    pub enrich: EnrichCounters,
    pub persist: PersistCounters,
    pub timing: BTreeMap<String, f64>,
    pub errors: Vec<ErrorRecord>,
}

impl PipelineMetrics {
    pub fn new(run_date: &str) -> Self {
        Self {
            run_date: run_date.to_string(),
            started: Instant::now(),
            scrape: ScrapeCounters::default(),
            enrich: EnrichCounters::default(),
            persist: PersistCounters::default(),
            timing: BTreeMap::new(),
            stage_starts: BTreeMap::new(),
            errors: Vec::new(),
        }
    }

    /// Begin timing a stage.
    pub fn start_stage(&mut self, stage: &str) {
        self.stage_starts.insert(stage.to_string(), Instant::now());
    }

    /// Stop timing a stage and record its duration. Called on every exit
    /// path of a stage, including the error path; a stage that was never
    /// started records nothing.
    pub fn end_stage(&mut self, stage: &str) -> f64 {
        let duration = self
            .stage_starts
            .remove(stage)
            .map(|start| start.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        self.timing.insert(stage.to_string(), duration);
        duration
    }

    /// Record a structured error with context.
    pub fn record_error<I, K, V>(&mut self, category: ErrorCategory, message: &str, context: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.errors.push(ErrorRecord {
            category,
            message: message.to_string(),
            context: context.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            timestamp: Utc::now(),
        });
    }

    /// Seconds since the run started.
    pub fn total_duration(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Snapshot for the JSON export.
    pub fn export(&self) -> MetricsExport {
        MetricsExport {
            run_date: self.run_date.clone(),
            total_duration: self.total_duration(),
            scrape: self.scrape.clone(),
            enrich: self.enrich.clone(),
            persist: self.persist.clone(),
            timing: self.timing.clone(),
            errors: self.errors.clone(),
        }
    }

    /// Append the export as one JSON line to the per-day metrics log.
    /// A day with several invocations accumulates several lines.
    pub fn append_export(&self, path: &Path) -> crate::errors::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(&self.export())?;
        line.push('\n');
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Render the human-readable summary block.
    ///
    /// Must never panic, including on the all-zero state: every percentage
    /// with a zero denominator renders as "N/A".
    pub fn summary(&self) -> String {
        let total = self.total_duration();
        let mut lines: Vec<String> = Vec::new();

        lines.push("=".repeat(80));
        lines.push(format!("Lexigraph Pipeline Summary - {}", self.run_date));
        lines.push("=".repeat(80));
        lines.push(String::new());

        lines.push("SCRAPE:".to_string());
        lines.push(format!("  Papers requested:         {}", self.scrape.papers_requested));
        lines.push(format!(
            "  Metadata fetched:         {} ({})",
            self.scrape.metadata_fetched,
            percent(self.scrape.metadata_fetched, self.scrape.papers_requested)
        ));
        lines.push(format!(
            "  Documents downloaded:     {} ({})",
            self.scrape.documents_downloaded,
            percent(self.scrape.documents_downloaded, self.scrape.documents_attempted)
        ));
        lines.push(format!("  Documents failed:         {}", self.scrape.documents_failed));
        lines.push(format!(
            "  Text extracted:           {} ({})",
            self.scrape.extraction_succeeded,
            percent(self.scrape.extraction_succeeded, self.scrape.extraction_attempted)
        ));
        lines.push(format!("  Extraction skipped:       {}", self.scrape.extraction_skipped));
        if let Some(duration) = self.timing.get("scrape") {
            lines.push(format!("  Duration:                 {:.1}s", duration));
        }
        lines.push(String::new());

        lines.push("ENRICH:".to_string());
        lines.push(format!("  Papers processed:         {}", self.enrich.papers_processed));
        lines.push(format!(
            "  Papers skipped (no text): {}",
            self.enrich.papers_skipped_no_text
        ));
        lines.push(format!(
            "  Keyword extraction:       {} succeeded, {} failed ({})",
            self.enrich.keywords_succeeded,
            self.enrich.keywords_failed,
            percent(self.enrich.keywords_succeeded, self.enrich.papers_processed)
        ));
        lines.push(format!(
            "  Definition extraction:    {} succeeded, {} failed ({})",
            self.enrich.definitions_succeeded,
            self.enrich.definitions_failed,
            percent(self.enrich.definitions_succeeded, self.enrich.papers_processed)
        ));
        lines.push(format!("  Keywords extracted:       {}", self.enrich.keywords_extracted));
        lines.push(format!(
            "  Valid definitions:        {} ({})",
            self.enrich.definitions_extracted,
            percent(self.enrich.definitions_extracted, self.enrich.keywords_extracted)
        ));
        lines.push(format!(
            "  Keywords w/o definition:  {}",
            self.enrich.keywords_without_definition
        ));
        if let Some(duration) = self.timing.get("enrich") {
            let avg = duration / self.enrich.papers_processed.max(1) as f64;
            lines.push(format!(
                "  Duration:                 {:.1}s (avg {:.1}s per paper)",
                duration, avg
            ));
        }
        lines.push(String::new());

        lines.push("PERSIST:".to_string());
        lines.push(format!("  Papers attempted:         {}", self.persist.papers_attempted));
        lines.push(format!(
            "  Papers inserted:          {} ({})",
            self.persist.papers_inserted,
            percent(self.persist.papers_inserted, self.persist.papers_attempted)
        ));
        lines.push(format!("  Papers duplicate:         {}", self.persist.papers_duplicate));
        lines.push(format!(
            "  Papers no definitions:    {} ({})",
            self.persist.papers_no_definitions,
            percent(self.persist.papers_no_definitions, self.persist.papers_attempted)
        ));
        lines.push(format!("  Papers error:             {}", self.persist.papers_error));
        lines.push(format!("  New keywords:             {}", self.persist.keywords_new));
        lines.push(format!("  Existing keywords:        {}", self.persist.keywords_existing));
        lines.push(format!("  Total keywords:           {}", self.persist.keywords_total));
        if let Some(duration) = self.timing.get("persist") {
            lines.push(format!("  Duration:                 {:.1}s", duration));
        }
        lines.push(String::new());

        if !self.errors.is_empty() {
            lines.push(format!("ERRORS ({} total):", self.errors.len()));
            for error in &self.errors {
                lines.push(format!("  [{}] {}", error.category, error.message));
                if !error.context.is_empty() {
                    let context: Vec<String> =
                        error.context.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                    lines.push(format!("    Context: {}", context.join(", ")));
                }
            }
            lines.push(String::new());
        }

        if !self.timing.is_empty() {
            lines.push("TIMING:".to_string());
            for (stage, duration) in &self.timing {
                let share = if total > 0.0 { duration / total * 100.0 } else { 0.0 };
                lines.push(format!("  {:<20} {:6.1}s ({:5.1}%)", stage, duration, share));
            }
            lines.push(format!("  {:<20} {:6.1}s", "TOTAL", total));
        }

        lines.push("=".repeat(80));
        lines.join("\n")
    }
}

fn percent(numerator: u64, denominator: u64) -> String {
    if denominator == 0 {
        "N/A".to_string()
    } else {
        format!("{:.1}%", numerator as f64 / denominator as f64 * 100.0)
    }
}
