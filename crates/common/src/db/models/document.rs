//! Document row

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One durably stored paper.
///
/// List-valued columns (`tags`, `authors`, `keywords`) are stored as JSON
/// text; SQLite has no array column type.
#[derive(Clone, Debug, PartialEq, FromRow, Serialize, Deserialize)]
pub struct DocumentRow {
    /// Assigned by the store on insert
    pub id: i64,
    pub uuid: String,
    pub title: String,
    pub date_submitted: Option<String>,
    pub date_scraped: Option<String>,
    /// JSON list text
    pub tags: String,
    /// JSON list text
    pub authors: String,
    #[sqlx(rename = "abstract")]
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub document_url: Option<String>,
    pub source_url: Option<String>,
    pub full_text: Option<String>,
    /// JSON list text
    pub keywords: String,
}

impl DocumentRow {
    /// Decode the JSON-serialized tag list.
    pub fn tag_list(&self) -> Vec<String> {
        serde_json::from_str(&self.tags).unwrap_or_default()
    }

    /// Decode the JSON-serialized author list.
    pub fn author_list(&self) -> Vec<String> {
        serde_json::from_str(&self.authors).unwrap_or_default()
    }

    /// Decode the JSON-serialized keyword list.
    pub fn keyword_list(&self) -> Vec<String> {
        serde_json::from_str(&self.keywords).unwrap_or_default()
    }
}
