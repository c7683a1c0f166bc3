//! Retention job
//!
//! Deletes per-run document directories older than the retention window.
//! The batch files and metrics logs are small and kept; only the PDF
//! directories are swept.

use chrono::NaiveDate;
use lexigraph_common::config::AppConfig;
use std::path::Path;
use tracing::{debug, info, warn};

/// Remove `papers_<date>` directories older than the configured window,
/// measured against `run_date`. A missing base directory is a no-op, and a
/// directory that fails to delete is logged and left for the next run.
pub fn sweep_documents(config: &AppConfig, run_date: &str) {
    let base = config.storage.data_dir.join("pdfs");
    if !base.is_dir() {
        debug!(path = %base.display(), "No document directory to sweep");
        return;
    }

    let Ok(today) = NaiveDate::parse_from_str(run_date, "%Y-%m-%d") else {
        warn!(run_date, "Unparseable run date, skipping retention sweep");
        return;
    };

    let entries = match std::fs::read_dir(&base) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %base.display(), error = %e, "Could not read document directory");
            return;
        }
    };

    let mut removed = 0u32;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(date) = directory_date(&path) else {
            continue;
        };

        let age = today.signed_duration_since(date).num_days();
        if age > config.storage.retention_days as i64 {
            match std::fs::remove_dir_all(&path) {
                Ok(()) => {
                    info!(path = %path.display(), age_days = age, "Removed expired documents");
                    removed += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove expired directory");
                }
            }
        }
    }

    if removed > 0 {
        info!(removed, "Retention sweep complete");
    }
}

/// Parse the run date out of a `papers_YYYY-MM-DD` directory name.
fn directory_date(path: &Path) -> Option<NaiveDate> {
    let name = path.file_name()?.to_str()?;
    let date = name.strip_prefix("papers_")?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexigraph_common::config::AppConfig;

    fn config_at(dir: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.data_dir = dir.to_path_buf();
        config.storage.retention_days = 7;
        config
    }

    #[test]
    fn test_directory_date_parsing() {
        assert_eq!(
            directory_date(Path::new("/data/pdfs/papers_2026-01-15")),
            NaiveDate::from_ymd_opt(2026, 1, 15)
        );
        assert!(directory_date(Path::new("/data/pdfs/papers_latest")).is_none());
        assert!(directory_date(Path::new("/data/pdfs/other")).is_none());
    }

    #[test]
    fn test_sweep_removes_only_expired_directories() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("pdfs");
        let old = base.join("papers_2026-01-01");
        let fresh = base.join("papers_2026-01-30");
        let unrelated = base.join("notes");
        std::fs::create_dir_all(&old).unwrap();
        std::fs::create_dir_all(&fresh).unwrap();
        std::fs::create_dir_all(&unrelated).unwrap();
        std::fs::write(old.join("x.pdf"), b"%PDF").unwrap();

        sweep_documents(&config_at(dir.path()), "2026-02-01");

        assert!(!old.exists());
        assert!(fresh.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn test_sweep_is_noop_without_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        // No pdfs/ directory at all.
        sweep_documents(&config_at(dir.path()), "2026-02-01");
    }

    #[test]
    fn test_boundary_day_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("pdfs");
        let boundary = base.join("papers_2026-01-25");
        std::fs::create_dir_all(&boundary).unwrap();

        // Exactly 7 days old: kept, the window is strictly "older than".
        sweep_documents(&config_at(dir.path()), "2026-02-01");
        assert!(boundary.exists());
    }
}
