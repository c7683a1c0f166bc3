//! Keyword row

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeSet;

/// One distinct keyword, global across all documents.
///
/// `definition` keeps the first-seen text and is never overwritten.
/// `document_references` is a JSON list of document id strings;
/// `reference_count` always equals the size of that set.
#[derive(Clone, Debug, PartialEq, FromRow, Serialize, Deserialize)]
pub struct KeywordRow {
    pub keyword: String,
    pub definition: String,
    pub reference_count: i64,
    /// JSON list text of document ids
    pub document_references: String,
}

impl KeywordRow {
    /// Decode the reference set. Malformed stored text decodes to an empty
    /// set rather than failing the surrounding transaction.
    pub fn reference_set(&self) -> BTreeSet<String> {
        serde_json::from_str::<Vec<String>>(&self.document_references)
            .map(|ids| ids.into_iter().collect())
            .unwrap_or_default()
    }
}
