//! Enrichment stage
//!
//! For each record: ask the keyword model for a keyword list based on the
//! abstract, then -- when keywords parsed and the full text is available --
//! ask the definition model for a keyword -> definition mapping over the
//! full text. Model output is semi-structured prose; the tolerant parsers in
//! [`parse`] turn it into typed data, and a malformed response is an
//! ordinary per-record outcome, never a stage failure.
//!
//! Every record leaves this stage with `keywords` and `definitions` set
//! (empty on failure), so downstream stages never see a half-enriched
//! record.

pub mod llm;
pub mod parse;

use lexigraph_common::config::LlmConfig;
use lexigraph_common::errors::{ErrorCategory, Result};
use lexigraph_common::metrics::PipelineMetrics;
use lexigraph_common::records::{RecordBatch, SourceRecord};
use llm::{definition_generator, LocalGenerator, TextGenerator};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum raw-response length kept in error context for diagnosis.
const RAW_RESPONSE_LIMIT: usize = 500;

/// Run the enrichment stage: reload the batch file, enrich every record,
/// and write the batch back.
pub async fn run(
    config: &lexigraph_common::AppConfig,
    metrics: &mut PipelineMetrics,
    run_date: &str,
) -> Result<()> {
    let batch_path = config.batch_path(run_date);
    let mut batch = RecordBatch::load(&batch_path)?;

    let engine = EnrichmentEngine::new(&config.llm)?;
    engine.enrich_batch(&mut batch, metrics).await;

    batch.save(&batch_path)?;
    info!(path = %batch_path.display(), "Enriched batch written");
    Ok(())
}

/// Enrichment engine: keyword extraction then definition extraction.
pub struct EnrichmentEngine {
    keyword_client: Box<dyn TextGenerator>,
    definition_client: Box<dyn TextGenerator>,
    keyword_model: String,
    definition_model: String,
    keyword_prompt: String,
    definition_prompt: String,
}

impl EnrichmentEngine {
    /// Build the engine from configuration. The keyword model always runs on
    /// the local server; the definition provider is selectable.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let keyword_client = LocalGenerator::new(
            config.keyword_endpoint.as_deref().unwrap_or_default(),
            config.num_ctx,
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(Self {
            keyword_client: Box::new(keyword_client),
            definition_client: definition_generator(config)?,
            keyword_model: config.keyword_model.clone(),
            definition_model: config.definition_model.clone(),
            keyword_prompt: config.keyword_prompt.clone().unwrap_or_default(),
            definition_prompt: config.definition_prompt.clone().unwrap_or_default(),
        })
    }

    /// Engine with injected generators, used by tests.
    pub fn with_generators(
        keyword_client: Box<dyn TextGenerator>,
        definition_client: Box<dyn TextGenerator>,
        keyword_prompt: &str,
        definition_prompt: &str,
    ) -> Self {
        Self {
            keyword_client,
            definition_client,
            keyword_model: "keyword-model".to_string(),
            definition_model: "definition-model".to_string(),
            keyword_prompt: keyword_prompt.to_string(),
            definition_prompt: definition_prompt.to_string(),
        }
    }

    /// Enrich every record in the batch, in sequence order.
    pub async fn enrich_batch(&self, batch: &mut RecordBatch, metrics: &mut PipelineMetrics) {
        for record in batch.iter_mut() {
            self.enrich_record(record, metrics).await;
        }
        info!(
            processed = metrics.enrich.papers_processed,
            keywords_ok = metrics.enrich.keywords_succeeded,
            definitions_ok = metrics.enrich.definitions_succeeded,
            "Enrichment complete"
        );
    }

    /// Run the keyword -> definition sequence for one record.
    ///
    /// Terminal states: no usable abstract, keyword failure, definition
    /// failure, or definitions parsed. All of them leave `keywords` and
    /// `definitions` non-null.
    pub async fn enrich_record(&self, record: &mut SourceRecord, metrics: &mut PipelineMetrics) {
        metrics.enrich.papers_processed += 1;

        // Nothing to send: the keyword request works off the abstract.
        if record.abstract_text.trim().is_empty() {
            metrics.enrich.papers_skipped_no_text += 1;
            record.keywords = Some(Vec::new());
            record.definitions = Some(BTreeMap::new());
            return;
        }

        let keywords = match self.request_keywords(record, metrics).await {
            Some(keywords) => keywords,
            None => {
                record.keywords = Some(Vec::new());
                record.definitions = Some(BTreeMap::new());
                return;
            }
        };

        metrics.enrich.keywords_succeeded += 1;
        metrics.enrich.keywords_extracted += keywords.len() as u64;
        record.keywords = Some(keywords.clone());

        // Definitions need the full text; abstract-only records keep their
        // keywords but end with an empty mapping. This is a skip, not a
        // failure.
        let Some(full_text) = record.full_text.clone() else {
            metrics.enrich.papers_skipped_no_text += 1;
            metrics.enrich.keywords_without_definition += keywords.len() as u64;
            record.definitions = Some(BTreeMap::new());
            return;
        };

        let definitions = self.request_definitions(record, &keywords, &full_text, metrics).await;
        let definitions = definitions.unwrap_or_default();

        let valid = definitions.len() as u64;
        metrics.enrich.definitions_extracted += valid;
        metrics.enrich.keywords_without_definition +=
            (keywords.len() as u64).saturating_sub(valid);
        record.definitions = Some(definitions);
    }

    /// Keyword request + tolerant parse. None means failure (already
    /// counted and recorded).
    async fn request_keywords(
        &self,
        record: &SourceRecord,
        metrics: &mut PipelineMetrics,
    ) -> Option<Vec<String>> {
        let prompt = format!("{}{}", self.keyword_prompt, record.abstract_text);
        let response = match self.keyword_client.generate(&self.keyword_model, &prompt).await {
            Ok(response) => response,
            Err(e) => {
                warn!(record = record.id, error = %e, "Keyword request failed");
                metrics.enrich.keywords_failed += 1;
                metrics.record_error(
                    ErrorCategory::LlmError,
                    &format!("Keyword request failed: {}", e),
                    [("record_id", record.id.to_string()), ("uuid", record.uuid.clone())],
                );
                return None;
            }
        };

        match parse::parse_keyword_list(&response) {
            Some(keywords) if !keywords.is_empty() => {
                debug!(record = record.id, count = keywords.len(), "Keywords parsed");
                Some(keywords)
            }
            _ => {
                metrics.enrich.keywords_failed += 1;
                metrics.record_error(
                    ErrorCategory::LlmError,
                    "Keyword response contained no parseable list",
                    [
                        ("record_id", record.id.to_string()),
                        ("uuid", record.uuid.clone()),
                        ("raw_response", truncate(&response, RAW_RESPONSE_LIMIT)),
                    ],
                );
                None
            }
        }
    }

    /// Definition request + tolerant parse + placeholder filtering. None
    /// means failure (already counted and recorded).
    async fn request_definitions(
        &self,
        record: &SourceRecord,
        keywords: &[String],
        full_text: &str,
        metrics: &mut PipelineMetrics,
    ) -> Option<BTreeMap<String, String>> {
        let prompt = format!(
            "{}: {}{}",
            format_keyword_list(keywords),
            self.definition_prompt,
            full_text
        );
        let response =
            match self.definition_client.generate(&self.definition_model, &prompt).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(record = record.id, error = %e, "Definition request failed");
                    metrics.enrich.definitions_failed += 1;
                    metrics.record_error(
                        ErrorCategory::LlmError,
                        &format!("Definition request failed: {}", e),
                        [("record_id", record.id.to_string()), ("uuid", record.uuid.clone())],
                    );
                    return None;
                }
            };

        match parse::parse_definition_map(&response) {
            Some(definitions) => {
                metrics.enrich.definitions_succeeded += 1;
                Some(filter_definitions(definitions))
            }
            None => {
                metrics.enrich.definitions_failed += 1;
                metrics.record_error(
                    ErrorCategory::LlmError,
                    "Definition response contained no parseable mapping",
                    [
                        ("record_id", record.id.to_string()),
                        ("uuid", record.uuid.clone()),
                        ("raw_response", truncate(&response, RAW_RESPONSE_LIMIT)),
                    ],
                );
                None
            }
        }
    }
}

/// Drop entries whose definition is empty or the literal "None" placeholder.
pub fn filter_definitions(definitions: BTreeMap<String, String>) -> BTreeMap<String, String> {
    definitions
        .into_iter()
        .filter(|(_, v)| !v.trim().is_empty() && v.trim() != "None")
        .collect()
}

/// Render keywords the way the definition prompt expects: a bracketed,
/// quoted list.
fn format_keyword_list(keywords: &[String]) -> String {
    let quoted: Vec<String> = keywords.iter().map(|k| format!("'{}'", k)).collect();
    format!("[{}]", quoted.join(", "))
}

/// Truncate to at most `limit` characters on a char boundary.
fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use lexigraph_common::errors::PipelineError;
    use std::sync::{Arc, Mutex};

    /// Generator returning canned responses (or errors) in call order.
    struct ScriptedGenerator {
        responses: Mutex<Vec<std::result::Result<String, String>>>,
        prompts: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedGenerator {
        fn new(responses: Vec<std::result::Result<String, String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                prompts: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn boxed(responses: Vec<std::result::Result<String, String>>) -> Box<Self> {
            Box::new(Self::new(responses))
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, _model: &str, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                panic!("unexpected extra generate call");
            }
            responses
                .remove(0)
                .map_err(|message| PipelineError::LlmRequest { message })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn record_with_text() -> SourceRecord {
        SourceRecord {
            id: 0,
            uuid: "uuid-0".into(),
            title: "A Paper".into(),
            date_submitted: None,
            date_fetched: Utc::now(),
            tags: vec![],
            authors: vec![],
            abstract_text: "This paper studies widgets.".into(),
            document_url: None,
            source_url: None,
            full_text: Some("Full body about widgets.".into()),
            keywords: None,
            definitions: None,
        }
    }

    #[tokio::test]
    async fn test_successful_enrichment() {
        let engine = EnrichmentEngine::with_generators(
            ScriptedGenerator::boxed(vec![Ok("Keywords: ['widget', 'gadget']".into())]),
            ScriptedGenerator::boxed(vec![Ok(
                "{'widget': 'a small device', 'gadget': 'None'}".into()
            )]),
            "kw: ",
            "defs: ",
        );

        let mut record = record_with_text();
        let mut metrics = PipelineMetrics::new("2026-02-01");
        engine.enrich_record(&mut record, &mut metrics).await;

        assert_eq!(record.keywords.as_deref().unwrap(), ["widget", "gadget"]);
        let definitions = record.definitions.unwrap();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions["widget"], "a small device");

        assert_eq!(metrics.enrich.keywords_succeeded, 1);
        assert_eq!(metrics.enrich.keywords_extracted, 2);
        assert_eq!(metrics.enrich.definitions_succeeded, 1);
        assert_eq!(metrics.enrich.definitions_extracted, 1);
        assert_eq!(metrics.enrich.keywords_without_definition, 1);
        assert!(metrics.errors.is_empty());
    }

    #[tokio::test]
    async fn test_keyword_failure_is_terminal_with_empty_enrichment() {
        let engine = EnrichmentEngine::with_generators(
            ScriptedGenerator::boxed(vec![Ok("I have no list for you.".into())]),
            // Must not be called.
            ScriptedGenerator::boxed(vec![]),
            "kw: ",
            "defs: ",
        );

        let mut record = record_with_text();
        let mut metrics = PipelineMetrics::new("2026-02-01");
        engine.enrich_record(&mut record, &mut metrics).await;

        assert_eq!(record.keywords, Some(Vec::new()));
        assert_eq!(record.definitions, Some(BTreeMap::new()));
        assert_eq!(metrics.enrich.keywords_failed, 1);
        assert_eq!(metrics.errors.len(), 1);
        assert_eq!(metrics.errors[0].category, ErrorCategory::LlmError);
        assert!(metrics.errors[0].context.contains_key("raw_response"));
    }

    #[tokio::test]
    async fn test_keyword_request_error_records_llm_error() {
        let engine = EnrichmentEngine::with_generators(
            ScriptedGenerator::boxed(vec![Err("connection refused".into())]),
            ScriptedGenerator::boxed(vec![]),
            "kw: ",
            "defs: ",
        );

        let mut record = record_with_text();
        let mut metrics = PipelineMetrics::new("2026-02-01");
        engine.enrich_record(&mut record, &mut metrics).await;

        assert_eq!(metrics.enrich.keywords_failed, 1);
        assert_eq!(metrics.errors[0].category, ErrorCategory::LlmError);
        assert_eq!(record.keywords, Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_no_full_text_keeps_keywords_skips_definitions() {
        let engine = EnrichmentEngine::with_generators(
            ScriptedGenerator::boxed(vec![Ok("['widget']".into())]),
            // Must not be called.
            ScriptedGenerator::boxed(vec![]),
            "kw: ",
            "defs: ",
        );

        let mut record = record_with_text();
        record.full_text = None;
        let mut metrics = PipelineMetrics::new("2026-02-01");
        engine.enrich_record(&mut record, &mut metrics).await;

        assert_eq!(record.keywords.as_deref().unwrap(), ["widget"]);
        assert_eq!(record.definitions, Some(BTreeMap::new()));
        assert_eq!(metrics.enrich.papers_skipped_no_text, 1);
        assert_eq!(metrics.enrich.definitions_failed, 0);
        assert!(metrics.errors.is_empty());
    }

    #[tokio::test]
    async fn test_definition_parse_failure_keeps_keywords() {
        let engine = EnrichmentEngine::with_generators(
            ScriptedGenerator::boxed(vec![Ok("['widget']".into())]),
            ScriptedGenerator::boxed(vec![Ok("{'widget': 'unterminated".into())]),
            "kw: ",
            "defs: ",
        );

        let mut record = record_with_text();
        let mut metrics = PipelineMetrics::new("2026-02-01");
        engine.enrich_record(&mut record, &mut metrics).await;

        assert_eq!(record.keywords.as_deref().unwrap(), ["widget"]);
        assert_eq!(record.definitions, Some(BTreeMap::new()));
        assert_eq!(metrics.enrich.definitions_failed, 1);
        assert_eq!(metrics.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_abstract_is_skipped_without_requests() {
        let engine = EnrichmentEngine::with_generators(
            ScriptedGenerator::boxed(vec![]),
            ScriptedGenerator::boxed(vec![]),
            "kw: ",
            "defs: ",
        );

        let mut record = record_with_text();
        record.abstract_text = "   ".into();
        let mut metrics = PipelineMetrics::new("2026-02-01");
        engine.enrich_record(&mut record, &mut metrics).await;

        assert_eq!(metrics.enrich.papers_skipped_no_text, 1);
        assert_eq!(record.keywords, Some(Vec::new()));
        assert_eq!(record.definitions, Some(BTreeMap::new()));
    }

    #[tokio::test]
    async fn test_definition_prompt_carries_keywords_and_full_text() {
        let definition_client = ScriptedGenerator::boxed(vec![Ok("{'widget': 'a thing'}".into())]);
        let prompts_handle = Arc::clone(&definition_client.prompts);
        let engine = EnrichmentEngine::with_generators(
            ScriptedGenerator::boxed(vec![Ok("['widget']".into())]),
            definition_client,
            "kw: ",
            "Define these terms. ",
        );

        let mut record = record_with_text();
        let mut metrics = PipelineMetrics::new("2026-02-01");
        engine.enrich_record(&mut record, &mut metrics).await;

        let prompts = prompts_handle.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].starts_with("['widget']: Define these terms. "));
        assert!(prompts[0].ends_with("Full body about widgets."));
    }

    #[test]
    fn test_filter_definitions() {
        let raw = BTreeMap::from([
            ("alpha".to_string(), "def1".to_string()),
            ("beta".to_string(), "None".to_string()),
            ("gamma".to_string(), "  ".to_string()),
        ]);
        let filtered = filter_definitions(raw);
        assert_eq!(filtered.len(), 1);
        assert!(filtered.contains_key("alpha"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "é".repeat(600);
        let truncated = truncate(&text, 500);
        assert_eq!(truncated.chars().count(), 500);
    }
}
