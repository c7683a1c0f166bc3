//! Text extraction and cleaning
//!
//! Turns a downloaded PDF into cleaned plain text via one of two methods:
//! a content-stream walk over lopdf, or the pdf-extract crate. Both feed the
//! same cleaning pass. A record whose file is missing, or whose extraction
//! yields no usable text, is a skip (full_text stays None); only an
//! extractor error is a failure.

use lexigraph_common::config::StorageConfig;
use lexigraph_common::errors::{ErrorCategory, PipelineError, Result};
use lexigraph_common::metrics::PipelineMetrics;
use lexigraph_common::records::SourceRecord;
use std::path::Path;
use tracing::{debug, warn};

use super::download::document_path;

/// Extracted lines shorter than this are treated as layout noise.
const MIN_LINE_LEN: usize = 3;

/// The closed set of supported extraction methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMethod {
    Lopdf,
    PdfExtract,
}

impl ExtractionMethod {
    /// Parse the configured method name. Config validation has already
    /// rejected anything else, but the mapping stays total.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        match config.extraction_method.as_str() {
            "lopdf" => Ok(ExtractionMethod::Lopdf),
            "pdf-extract" => Ok(ExtractionMethod::PdfExtract),
            other => Err(PipelineError::InvalidConfig {
                key: "storage.extraction_method".into(),
                message: format!("unknown extraction method '{}'", other),
            }),
        }
    }
}

/// Extract cleaned text from a PDF file.
pub fn extract_text(path: &Path, method: ExtractionMethod) -> Result<String> {
    let raw = match method {
        ExtractionMethod::Lopdf => extract_with_lopdf(path)?,
        ExtractionMethod::PdfExtract => {
            pdf_extract::extract_text(path).map_err(|e| PipelineError::Extraction {
                path: path.display().to_string(),
                message: e.to_string(),
            })?
        }
    };
    Ok(clean_text(&raw))
}

/// Walk the PDF content streams and pull text out of the show-text
/// operators, dropping very short lines.
fn extract_with_lopdf(path: &Path) -> Result<String> {
    let doc = lopdf::Document::load(path).map_err(|e| PipelineError::Extraction {
        path: path.display().to_string(),
        message: format!("failed to load PDF: {}", e),
    })?;

    let mut pages = Vec::new();
    for page_id in doc.page_iter() {
        let content = match doc.get_page_content(page_id) {
            Ok(content) => content,
            Err(e) => {
                warn!(page = ?page_id, error = %e, "Skipping unreadable page");
                continue;
            }
        };
        let page_text = text_from_content_stream(&content);
        let kept: Vec<&str> = page_text
            .lines()
            .filter(|line| line.trim().len() >= MIN_LINE_LEN)
            .collect();
        pages.push(kept.join("\n"));
    }

    Ok(pages.join("\n"))
}

/// Scan one content stream for text between BT/ET blocks.
fn text_from_content_stream(content: &[u8]) -> String {
    let stream = String::from_utf8_lossy(content);
    let mut out = String::new();
    let mut in_text = false;

    for line in stream.lines() {
        let line = line.trim();
        match line {
            "BT" => in_text = true,
            "ET" => {
                in_text = false;
                if !out.ends_with('\n') && !out.is_empty() {
                    out.push('\n');
                }
            }
            _ if in_text => {
                if let Some(shown) = text_from_operator(line) {
                    out.push_str(&shown);
                    out.push(' ');
                }
            }
            _ => {}
        }
    }

    out
}

/// Pull the string operands out of a Tj / TJ / ' / " operator line.
fn text_from_operator(line: &str) -> Option<String> {
    let is_show_op = line.ends_with("Tj")
        || line.ends_with("TJ")
        || line.ends_with('\'')
        || line.ends_with('"');
    if !is_show_op {
        return None;
    }

    let mut out = String::new();
    let mut depth = 0u32;
    let mut current = String::new();
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' if depth > 0 => {
                if let Some(escaped) = chars.next() {
                    current.push(unescape_pdf_char(escaped));
                }
            }
            '(' => {
                if depth == 0 {
                    current.clear();
                }
                depth += 1;
            }
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    out.push_str(&current);
                    current.clear();
                }
            }
            _ if depth > 0 => current.push(c),
            _ => {}
        }
    }

    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn unescape_pdf_char(c: char) -> char {
    match c {
        'n' => '\n',
        'r' => '\r',
        't' => '\t',
        other => other,
    }
}

/// Clean extracted text: strip control characters, normalize typographic
/// punctuation to ASCII, rejoin hyphenated line breaks, and collapse
/// whitespace.
pub fn clean_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    // Control characters other than newline and tab
    let mut cleaned: String = text
        .chars()
        .filter(|&c| c == '\n' || c == '\t' || !c.is_control())
        .collect();

    // Typographic punctuation
    for (from, to) in [
        ('\u{2018}', "'"),
        ('\u{2019}', "'"),
        ('\u{201C}', "\""),
        ('\u{201D}', "\""),
        ('\u{2013}', "-"),
        ('\u{2014}', "-"),
        ('\u{2212}', "-"),
        ('\u{2026}', "..."),
        ('\u{00A0}', " "),
    ] {
        if cleaned.contains(from) {
            cleaned = cleaned.replace(from, to);
        }
    }

    // Words split by a trailing hyphen at a line break
    let lines: Vec<&str> = cleaned.lines().collect();
    let mut joined = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i].trim_end();
        if let Some(stem) = line.strip_suffix('-') {
            if i + 1 < lines.len() {
                joined.push(format!("{}{}", stem, lines[i + 1].trim_start()));
                i += 2;
                continue;
            }
        }
        joined.push(line.to_string());
        i += 1;
    }
    let mut cleaned = joined.join("\n");

    // Whitespace normalization
    cleaned = cleaned.replace('\t', " ");
    while cleaned.contains("  ") {
        cleaned = cleaned.replace("  ", " ");
    }
    while cleaned.contains("\n\n\n") {
        cleaned = cleaned.replace("\n\n\n", "\n\n");
    }

    cleaned.trim().to_string()
}

/// Populate `full_text` for every record whose document was downloaded.
pub fn extract_batch(
    records: &mut std::collections::BTreeMap<u32, SourceRecord>,
    save_dir: &Path,
    method: ExtractionMethod,
    metrics: &mut PipelineMetrics,
) {
    for record in records.values_mut() {
        let Some(path) = document_path(record, save_dir) else {
            continue;
        };

        if !path.exists() {
            debug!(record = record.id, path = %path.display(), "No document on disk, skipping extraction");
            metrics.scrape.extraction_skipped += 1;
            continue;
        }

        metrics.scrape.extraction_attempted += 1;

        match extract_text(&path, method) {
            Ok(text) if !text.is_empty() => {
                debug!(record = record.id, chars = text.len(), "Extracted text");
                metrics.scrape.extraction_succeeded += 1;
                record.full_text = Some(text);
            }
            Ok(_) => {
                debug!(record = record.id, "Extraction produced no usable text");
                metrics.scrape.extraction_skipped += 1;
                record.full_text = None;
            }
            Err(e) => {
                warn!(record = record.id, error = %e, "Text extraction failed");
                metrics.scrape.extraction_failed += 1;
                metrics.record_error(
                    ErrorCategory::ExtractionError,
                    &format!("Text extraction failed: {}", e),
                    [
                        ("record_id", record.id.to_string()),
                        ("file", path.display().to_string()),
                    ],
                );
                record.full_text = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    #[test]
    fn test_clean_strips_control_chars() {
        assert_eq!(clean_text("a\u{0000}b\u{0007}c"), "abc");
        assert_eq!(clean_text("keep\nnew\tline"), "keep\nnew line");
    }

    #[test]
    fn test_clean_normalizes_punctuation() {
        assert_eq!(clean_text("\u{201C}quoted\u{201D}"), "\"quoted\"");
        assert_eq!(clean_text("it\u{2019}s"), "it's");
        assert_eq!(clean_text("a\u{2013}b\u{2014}c"), "a-b-c");
        assert_eq!(clean_text("wait\u{2026}"), "wait...");
        assert_eq!(clean_text("non\u{00A0}breaking"), "non breaking");
    }

    #[test]
    fn test_clean_rejoins_hyphenated_line_breaks() {
        assert_eq!(clean_text("transfor-\nmer models"), "transformer models");
        // A hyphen on the final line stays put.
        assert_eq!(clean_text("ends with-"), "ends with-");
    }

    #[test]
    fn test_clean_collapses_whitespace() {
        assert_eq!(clean_text("too    many   spaces"), "too many spaces");
        assert_eq!(clean_text("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(clean_text("  padded  "), "padded");
    }

    #[test]
    fn test_clean_empty_input() {
        assert_eq!(clean_text(""), "");
    }

    #[test]
    fn test_operator_tj_single_string() {
        assert_eq!(text_from_operator("(Hello World) Tj").as_deref(), Some("Hello World"));
    }

    #[test]
    fn test_operator_tj_array() {
        assert_eq!(
            text_from_operator("[(Hel) -20 (lo)] TJ").as_deref(),
            Some("Hello")
        );
    }

    #[test]
    fn test_operator_escapes() {
        assert_eq!(
            text_from_operator(r"(paren \( inside \)) Tj").as_deref(),
            Some("paren ( inside )")
        );
        assert_eq!(text_from_operator(r"(tab\there) Tj").as_deref(), Some("tab\there"));
    }

    #[test]
    fn test_operator_ignores_non_show_ops() {
        assert!(text_from_operator("1 0 0 1 72 720 Tm").is_none());
        assert!(text_from_operator("/F1 12 Tf").is_none());
    }

    #[test]
    fn test_content_stream_text_blocks() {
        let content = b"BT\n(First line) Tj\nET\nBT\n(Second) Tj\nET\n";
        let text = text_from_content_stream(content);
        assert!(text.contains("First line"));
        assert!(text.contains("Second"));
    }

    #[test]
    fn test_method_from_config() {
        let mut config = StorageConfig {
            data_dir: "./data".into(),
            extraction_method: "lopdf".into(),
            retention_days: 7,
        };
        assert_eq!(ExtractionMethod::from_config(&config).unwrap(), ExtractionMethod::Lopdf);
        config.extraction_method = "pdf-extract".into();
        assert_eq!(
            ExtractionMethod::from_config(&config).unwrap(),
            ExtractionMethod::PdfExtract
        );
        config.extraction_method = "tesseract".into();
        assert!(ExtractionMethod::from_config(&config).is_err());
    }

    fn record(id: u32, document_url: Option<&str>) -> SourceRecord {
        SourceRecord {
            id,
            uuid: format!("uuid-{}", id),
            title: format!("Paper {}", id),
            date_submitted: None,
            date_fetched: Utc::now(),
            tags: vec![],
            authors: vec![],
            abstract_text: "abstract".into(),
            document_url: document_url.map(String::from),
            source_url: None,
            full_text: None,
            keywords: None,
            definitions: None,
        }
    }

    #[test]
    fn test_extract_batch_skips_records_without_documents() {
        let dir = tempfile::tempdir().unwrap();
        let mut records = BTreeMap::new();
        // No URL at all: not even counted as a skip.
        records.insert(0, record(0, None));
        // URL but no file on disk: counted as a skip.
        records.insert(1, record(1, Some("http://arxiv.org/pdf/2602.00001v1")));

        let mut metrics = PipelineMetrics::new("2026-02-01");
        extract_batch(&mut records, dir.path(), ExtractionMethod::Lopdf, &mut metrics);

        assert!(records[&0].full_text.is_none());
        assert!(records[&1].full_text.is_none());
        assert_eq!(metrics.scrape.extraction_attempted, 0);
        assert_eq!(metrics.scrape.extraction_skipped, 1);
        assert_eq!(metrics.scrape.extraction_failed, 0);
        assert!(metrics.errors.is_empty());
    }

    #[test]
    fn test_extract_batch_counts_unreadable_file_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("2602.00001v1.pdf"), b"this is not a pdf").unwrap();
        let mut records = BTreeMap::new();
        records.insert(0, record(0, Some("http://arxiv.org/pdf/2602.00001v1")));

        let mut metrics = PipelineMetrics::new("2026-02-01");
        extract_batch(&mut records, dir.path(), ExtractionMethod::Lopdf, &mut metrics);

        assert!(records[&0].full_text.is_none());
        assert_eq!(metrics.scrape.extraction_attempted, 1);
        assert_eq!(metrics.scrape.extraction_failed, 1);
        assert_eq!(metrics.errors.len(), 1);
        assert_eq!(metrics.errors[0].category, ErrorCategory::ExtractionError);
    }
}
