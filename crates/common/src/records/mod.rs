//! Source records and the intermediate batch file
//!
//! A [`SourceRecord`] is one paper flowing through the pipeline; a
//! [`RecordBatch`] is the full set produced by one run. The batch is the only
//! hand-off artifact between stages: it is serialized to disk after
//! scrape+extract and again after enrichment, and each stage reloads it
//! rather than relying on in-memory mutation from a previous stage.

use crate::errors::{PipelineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One fetched paper and its (progressively populated) enrichment state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Per-batch sequence key, 0-based
    pub id: u32,
    /// Globally unique id, assigned once at fetch time
    pub uuid: String,
    pub title: String,
    /// Submission date as YYYY-MM-DD, when the feed provided one
    pub date_submitted: Option<String>,
    /// Capture timestamp
    pub date_fetched: DateTime<Utc>,
    /// Category labels, in feed order
    pub tags: Vec<String>,
    /// Author names, in feed order
    pub authors: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    /// Link to the primary-source document; absent entries are kept
    pub document_url: Option<String>,
    /// Canonical landing page
    pub source_url: Option<String>,
    /// Set by the text extractor; None until extraction succeeds
    pub full_text: Option<String>,
    /// Set by the enrichment stage; never None after enrichment completes
    pub keywords: Option<Vec<String>>,
    /// Keyword -> definition, set by the enrichment stage
    pub definitions: Option<BTreeMap<String, String>>,
}

impl SourceRecord {
    /// Number of non-empty definitions; the gate for persistence.
    pub fn valid_definition_count(&self) -> usize {
        self.definitions
            .as_ref()
            .map(|defs| defs.values().filter(|v| !v.is_empty() && *v != "None").count())
            .unwrap_or(0)
    }
}

/// An ordered index -> record map, serialized with zero-based string keys
/// ("0", "1", ...) so the on-disk format is one flat JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordBatch {
    records: BTreeMap<String, SourceRecord>,
}

impl RecordBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a batch from records keyed by their sequence index.
    pub fn from_records(records: BTreeMap<u32, SourceRecord>) -> Self {
        Self {
            records: records.into_iter().map(|(i, r)| (i.to_string(), r)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate records in sequence order.
    ///
    /// String keys sort lexicographically, so iteration goes through the
    /// numeric index rather than the map order.
    pub fn iter(&self) -> impl Iterator<Item = &SourceRecord> {
        let mut ordered: Vec<&SourceRecord> = self.records.values().collect();
        ordered.sort_by_key(|r| r.id);
        ordered.into_iter()
    }

    /// Mutable iteration in sequence order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SourceRecord> {
        let mut ordered: Vec<&mut SourceRecord> = self.records.values_mut().collect();
        ordered.sort_by_key(|r| r.id);
        ordered.into_iter()
    }

    pub fn get(&self, id: u32) -> Option<&SourceRecord> {
        self.records.get(&id.to_string())
    }

    /// Write the batch file, creating parent directories as needed.
    /// Overwrites any previous batch for the same run date.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reload a batch file. A missing or unparseable file is a
    /// validation-level error that aborts the calling stage.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| PipelineError::BatchFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| PipelineError::BatchFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(id: u32, title: &str) -> SourceRecord {
        SourceRecord {
            id,
            uuid: format!("00000000-0000-0000-0000-{:012}", id),
            title: title.to_string(),
            date_submitted: Some("2026-02-01".to_string()),
            date_fetched: Utc::now(),
            tags: vec!["cs.AI".to_string(), "cs.LG".to_string()],
            authors: vec!["A. Author".to_string()],
            abstract_text: "An abstract.".to_string(),
            document_url: Some(format!("http://arxiv.org/pdf/2602.{:05}v1", id)),
            source_url: Some(format!("http://arxiv.org/abs/2602.{:05}v1", id)),
            full_text: None,
            keywords: None,
            definitions: None,
        }
    }

    #[test]
    fn test_batch_roundtrip_field_for_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata_2026-02-01.json");

        let mut records = BTreeMap::new();
        let mut enriched = sample_record(0, "First");
        enriched.full_text = Some("body text".to_string());
        enriched.keywords = Some(vec!["alpha".to_string()]);
        enriched.definitions =
            Some(BTreeMap::from([("alpha".to_string(), "a definition".to_string())]));
        records.insert(0, enriched);
        records.insert(1, sample_record(1, "Second"));

        let batch = RecordBatch::from_records(records);
        batch.save(&path).unwrap();
        let reloaded = RecordBatch::load(&path).unwrap();
        assert_eq!(batch, reloaded);
    }

    #[test]
    fn test_batch_uses_string_indices() {
        let mut records = BTreeMap::new();
        records.insert(0, sample_record(0, "Only"));
        let batch = RecordBatch::from_records(records);

        let json: serde_json::Value = serde_json::to_value(&batch).unwrap();
        assert!(json.get("0").is_some());
        assert_eq!(json["0"]["title"], "Only");
        assert!(json["0"]["full_text"].is_null());
    }

    #[test]
    fn test_iteration_is_numeric_order() {
        let mut records = BTreeMap::new();
        for id in 0..12 {
            records.insert(id, sample_record(id, "t"));
        }
        let batch = RecordBatch::from_records(records);
        let ids: Vec<u32> = batch.iter().map(|r| r.id).collect();
        assert_eq!(ids, (0..12).collect::<Vec<u32>>());
    }

    #[test]
    fn test_load_missing_file_is_batch_error() {
        let err = RecordBatch::load(Path::new("/nonexistent/batch.json")).unwrap_err();
        assert!(matches!(err, PipelineError::BatchFile { .. }));
    }

    #[test]
    fn test_valid_definition_count_filters_none() {
        let mut record = sample_record(0, "t");
        record.definitions = Some(BTreeMap::from([
            ("alpha".to_string(), "real definition".to_string()),
            ("beta".to_string(), "None".to_string()),
            ("gamma".to_string(), String::new()),
        ]));
        assert_eq!(record.valid_definition_count(), 1);

        record.definitions = None;
        assert_eq!(record.valid_definition_count(), 0);
    }
}
