//! Repository for the documents and keywords tables
//!
//! Every record is stored inside its own transaction: duplicate check,
//! document insert, and keyword aggregation either all commit together or
//! all roll back together. One malformed record can never abort the batch,
//! and two records never share a transaction.

use crate::db::models::{DocumentRow, KeywordRow};
use crate::errors::Result;
use crate::records::SourceRecord;
use sqlx::sqlite::SqlitePool;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Outcome of storing one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// Document row inserted and keywords aggregated.
    Inserted {
        document_id: i64,
        keywords_new: u64,
        keywords_existing: u64,
    },
    /// A row with the same title or uuid already exists. Not an error.
    Duplicate,
    /// The record had no valid definitions; no transaction was opened.
    NoDefinitions,
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository over the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create both tables if they do not exist. Safe to run before every
    /// batch.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY,
                uuid TEXT,
                title TEXT,
                date_submitted TEXT,
                date_scraped TEXT,
                tags TEXT,
                authors TEXT,
                abstract TEXT,
                document_url TEXT,
                source_url TEXT,
                full_text TEXT,
                keywords TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS keywords (
                keyword TEXT PRIMARY KEY,
                definition TEXT,
                reference_count INTEGER DEFAULT 1,
                document_references TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Store one enriched record.
    ///
    /// Records without a valid definition are skipped before any transaction
    /// is opened. Everything else happens inside a single per-record
    /// transaction; an error on any step rolls back only this record.
    pub async fn store_record(&self, record: &SourceRecord) -> Result<StoreOutcome> {
        let definitions = filtered_definitions(record);
        if definitions.is_empty() {
            return Ok(StoreOutcome::NoDefinitions);
        }

        let mut tx = self.pool.begin().await?;

        // Duplicate check by title OR uuid. A match is an expected skip,
        // not an error.
        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM documents WHERE title = ?1 OR uuid = ?2")
                .bind(&record.title)
                .bind(&record.uuid)
                .fetch_optional(&mut *tx)
                .await?;

        if existing.is_some() {
            debug!(uuid = %record.uuid, "Skipping duplicate record");
            tx.rollback().await?;
            return Ok(StoreOutcome::Duplicate);
        }

        let keywords = record.keywords.clone().unwrap_or_default();
        let inserted = sqlx::query(
            "INSERT INTO documents (
                uuid, title, date_submitted, date_scraped, tags, authors,
                abstract, document_url, source_url, full_text, keywords
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(record.uuid.trim())
        .bind(record.title.trim())
        .bind(&record.date_submitted)
        .bind(record.date_fetched.format("%Y-%m-%d").to_string())
        .bind(serde_json::to_string(&record.tags)?)
        .bind(serde_json::to_string(&record.authors)?)
        .bind(record.abstract_text.trim())
        .bind(&record.document_url)
        .bind(&record.source_url)
        .bind(&record.full_text)
        .bind(serde_json::to_string(&keywords)?)
        .execute(&mut *tx)
        .await?;

        let document_id = inserted.last_insert_rowid();

        let mut keywords_new = 0u64;
        let mut keywords_existing = 0u64;

        for (keyword, definition) in &definitions {
            let row: Option<KeywordRow> =
                sqlx::query_as("SELECT * FROM keywords WHERE keyword = ?1")
                    .bind(keyword)
                    .fetch_optional(&mut *tx)
                    .await?;

            match row {
                Some(row) => {
                    let mut references = row.reference_set();
                    // Re-referencing the same document is a no-op.
                    if references.insert(document_id.to_string()) {
                        sqlx::query(
                            "UPDATE keywords
                             SET reference_count = ?1, document_references = ?2
                             WHERE keyword = ?3",
                        )
                        .bind(references.len() as i64)
                        .bind(serde_json::to_string(
                            &references.iter().collect::<Vec<_>>(),
                        )?)
                        .bind(keyword)
                        .execute(&mut *tx)
                        .await?;
                    }
                    keywords_existing += 1;
                }
                None => {
                    sqlx::query(
                        "INSERT INTO keywords
                             (keyword, definition, reference_count, document_references)
                         VALUES (?1, ?2, 1, ?3)",
                    )
                    .bind(keyword)
                    .bind(definition)
                    .bind(serde_json::to_string(&[document_id.to_string()])?)
                    .execute(&mut *tx)
                    .await?;
                    keywords_new += 1;
                }
            }
        }

        tx.commit().await?;
        debug!(uuid = %record.uuid, document_id, "Committed record");

        Ok(StoreOutcome::Inserted { document_id, keywords_new, keywords_existing })
    }

    /// Fetch a document by its uuid.
    pub async fn find_document_by_uuid(&self, uuid: &str) -> Result<Option<DocumentRow>> {
        sqlx::query_as("SELECT * FROM documents WHERE uuid = ?1")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    /// Fetch a keyword row by exact keyword text.
    pub async fn find_keyword(&self, keyword: &str) -> Result<Option<KeywordRow>> {
        sqlx::query_as("SELECT * FROM keywords WHERE keyword = ?1")
            .bind(keyword)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    /// Total stored documents.
    pub async fn count_documents(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await
            .map_err(Into::into)
    }

    /// Total distinct keywords.
    pub async fn count_keywords(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM keywords")
            .fetch_one(&self.pool)
            .await
            .map_err(Into::into)
    }
}

/// The record's definitions with empty keys, empty values, and the literal
/// "None" placeholder removed, keyword text trimmed but case preserved.
fn filtered_definitions(record: &SourceRecord) -> BTreeMap<String, String> {
    let Some(definitions) = &record.definitions else {
        return BTreeMap::new();
    };
    let mut filtered = BTreeMap::new();
    for (keyword, definition) in definitions {
        let keyword = keyword.trim();
        let definition = definition.trim();
        if keyword.is_empty() {
            warn!("Dropping definition with empty keyword");
            continue;
        }
        if definition.is_empty() || definition == "None" {
            continue;
        }
        filtered.insert(keyword.to_string(), definition.to_string());
    }
    filtered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;
    use chrono::Utc;

    async fn repository() -> Repository {
        let pool = connect_in_memory().await.unwrap();
        let repo = Repository::new(pool);
        repo.init_schema().await.unwrap();
        repo
    }

    fn record(id: u32, title: &str, definitions: &[(&str, &str)]) -> SourceRecord {
        SourceRecord {
            id,
            uuid: format!("uuid-{}", id),
            title: title.to_string(),
            date_submitted: Some("2026-02-01".to_string()),
            date_fetched: Utc::now(),
            tags: vec!["cs.AI".to_string()],
            authors: vec!["A. Author".to_string()],
            abstract_text: "An abstract.".to_string(),
            document_url: None,
            source_url: None,
            full_text: Some("full text".to_string()),
            keywords: Some(definitions.iter().map(|(k, _)| k.to_string()).collect()),
            definitions: Some(
                definitions
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
        }
    }

    #[tokio::test]
    async fn test_init_schema_is_idempotent() {
        let repo = repository().await;
        repo.init_schema().await.unwrap();
        repo.init_schema().await.unwrap();
        assert_eq!(repo.count_documents().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_and_fetch_document() {
        let repo = repository().await;
        let outcome = repo
            .store_record(&record(0, "A Paper", &[("alpha", "first def")]))
            .await
            .unwrap();

        let StoreOutcome::Inserted { document_id, keywords_new, keywords_existing } = outcome
        else {
            panic!("expected insert, got {:?}", outcome);
        };
        assert_eq!(keywords_new, 1);
        assert_eq!(keywords_existing, 0);

        let row = repo.find_document_by_uuid("uuid-0").await.unwrap().unwrap();
        assert_eq!(row.id, document_id);
        assert_eq!(row.title, "A Paper");
        assert_eq!(row.tag_list(), vec!["cs.AI"]);
        assert_eq!(row.keyword_list(), vec!["alpha"]);
    }

    #[tokio::test]
    async fn test_duplicate_uuid_stores_one_row() {
        let repo = repository().await;
        let first = record(0, "A Paper", &[("alpha", "def")]);
        let mut second = record(1, "A Different Title", &[("beta", "def")]);
        second.uuid = first.uuid.clone();

        assert!(matches!(
            repo.store_record(&first).await.unwrap(),
            StoreOutcome::Inserted { .. }
        ));
        assert_eq!(repo.store_record(&second).await.unwrap(), StoreOutcome::Duplicate);
        assert_eq!(repo.count_documents().await.unwrap(), 1);
        // The duplicate's keywords never reached the table.
        assert!(repo.find_keyword("beta").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_title_stores_one_row() {
        let repo = repository().await;
        repo.store_record(&record(0, "Same Title", &[("alpha", "def")])).await.unwrap();
        let outcome =
            repo.store_record(&record(1, "Same Title", &[("alpha", "def")])).await.unwrap();
        assert_eq!(outcome, StoreOutcome::Duplicate);
        assert_eq!(repo.count_documents().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_no_definitions_is_skipped_without_insert() {
        let repo = repository().await;
        let empty = record(0, "No Defs", &[]);
        assert_eq!(repo.store_record(&empty).await.unwrap(), StoreOutcome::NoDefinitions);

        // Values of "None" or empty string do not count either.
        let placeholder = record(1, "Placeholder Defs", &[("alpha", "None"), ("beta", "")]);
        assert_eq!(
            repo.store_record(&placeholder).await.unwrap(),
            StoreOutcome::NoDefinitions
        );
        assert_eq!(repo.count_documents().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_keyword_aggregation_across_documents() {
        let repo = repository().await;

        let first = repo
            .store_record(&record(0, "First", &[("alpha", "the original definition")]))
            .await
            .unwrap();
        let second = repo
            .store_record(&record(1, "Second", &[("alpha", "a competing definition")]))
            .await
            .unwrap();

        let StoreOutcome::Inserted { document_id: first_id, .. } = first else { unreachable!() };
        let StoreOutcome::Inserted {
            document_id: second_id,
            keywords_new,
            keywords_existing,
        } = second
        else {
            unreachable!()
        };
        assert_eq!(keywords_new, 0);
        assert_eq!(keywords_existing, 1);

        let row = repo.find_keyword("alpha").await.unwrap().unwrap();
        assert_eq!(row.reference_count, 2);
        let references = row.reference_set();
        assert!(references.contains(&first_id.to_string()));
        assert!(references.contains(&second_id.to_string()));
        // First-seen definition wins.
        assert_eq!(row.definition, "the original definition");
        assert_eq!(row.reference_count as usize, references.len());
    }

    #[tokio::test]
    async fn test_keyword_text_is_trimmed_case_preserved() {
        let repo = repository().await;
        repo.store_record(&record(0, "Paper", &[("  Alpha Beta  ", "def")])).await.unwrap();
        let row = repo.find_keyword("Alpha Beta").await.unwrap().unwrap();
        assert_eq!(row.keyword, "Alpha Beta");
    }

    #[tokio::test]
    async fn test_mixed_batch_end_to_end() {
        // Record 0 valid, record 1 without definitions, record 2 duplicating
        // record 0's title: exactly one document stored, keyword table
        // reflects only record 0.
        let repo = repository().await;
        let batch = vec![
            record(0, "The Paper", &[("alpha", "def a"), ("beta", "def b")]),
            record(1, "Another Paper", &[]),
            record(2, "The Paper", &[("gamma", "def c")]),
        ];

        let mut inserted = 0;
        let mut duplicates = 0;
        let mut skipped = 0;
        for r in &batch {
            match repo.store_record(r).await.unwrap() {
                StoreOutcome::Inserted { .. } => inserted += 1,
                StoreOutcome::Duplicate => duplicates += 1,
                StoreOutcome::NoDefinitions => skipped += 1,
            }
        }

        assert_eq!((inserted, duplicates, skipped), (1, 1, 1));
        assert_eq!(repo.count_documents().await.unwrap(), 1);
        assert_eq!(repo.count_keywords().await.unwrap(), 2);
        assert!(repo.find_keyword("gamma").await.unwrap().is_none());
    }
}
