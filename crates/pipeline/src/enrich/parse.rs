//! Tolerant parsers for model output
//!
//! Model responses are prose with a structured payload buried somewhere
//! inside: a bracketed, quoted list for keywords and a brace-delimited
//! mapping for definitions. These parsers locate the payload and pull it
//! out, returning `None` instead of raising when the payload is missing or
//! malformed -- the caller treats a bad response as ordinary data, not as an
//! exceptional control-flow path.

use regex_lite::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn list_span_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\[(.*?)\]").unwrap())
}

fn quoted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"["']([^"']+)["']"#).unwrap())
}

fn map_span_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // First balanced brace span; inner braces may nest one level.
    RE.get_or_init(|| Regex::new(r"(?s)\{(?:[^{}]|(?:\{[^{}]*\}))*\}").unwrap())
}

/// Extract a keyword list from a model response.
///
/// Locates the first `[...]` span and collects its quoted substrings.
/// Returns `None` when the response contains no bracketed list at all; an
/// empty `Some` means a list was found but held no quoted entries (the
/// caller counts both as extraction failure).
pub fn parse_keyword_list(response: &str) -> Option<Vec<String>> {
    let span = list_span_re().captures(response)?;
    let body = span.get(1)?.as_str();
    Some(
        quoted_re()
            .captures_iter(body)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .collect(),
    )
}

/// Extract a keyword -> definition mapping from a model response.
///
/// Locates the first balanced `{...}` span and parses it as a literal
/// string-to-string mapping, accepting single or double quotes and trailing
/// commas. Returns `None` when no span exists or the span is not such a
/// mapping (unterminated strings, non-string values, bare garbage).
pub fn parse_definition_map(response: &str) -> Option<BTreeMap<String, String>> {
    let span = map_span_re().find(response)?;
    parse_literal_map(span.as_str())
}

/// Parse a `{'key': 'value', ...}` literal.
///
/// A small scanner rather than a JSON parser: model output uses Python-style
/// single quotes as often as JSON double quotes, and may carry a bare `None`
/// where a definition is missing. Bare tokens are kept as their literal text
/// so the later "None"-filter sees them; a nested structure in value
/// position makes the whole parse fail.
fn parse_literal_map(span: &str) -> Option<BTreeMap<String, String>> {
    let mut chars = span.chars().peekable();
    let mut map = BTreeMap::new();

    if chars.next()? != '{' {
        return None;
    }

    loop {
        skip_whitespace(&mut chars);
        match chars.peek() {
            Some('}') => {
                chars.next();
                break;
            }
            Some('\'') | Some('"') => {}
            _ => return None,
        }

        let key = parse_quoted(&mut chars)?;

        skip_whitespace(&mut chars);
        if chars.next() != Some(':') {
            return None;
        }
        skip_whitespace(&mut chars);

        let value = match chars.peek() {
            Some('\'') | Some('"') => parse_quoted(&mut chars)?,
            Some('{') => return None,
            Some(_) => parse_bare(&mut chars)?,
            None => return None,
        };
        map.insert(key, value);

        skip_whitespace(&mut chars);
        match chars.next() {
            Some(',') => continue,
            Some('}') => break,
            _ => return None,
        }
    }

    Some(map)
}

fn skip_whitespace(chars: &mut std::iter::Peekable<std::str::Chars>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}

/// Consume a quoted string, honoring backslash escapes.
fn parse_quoted(chars: &mut std::iter::Peekable<std::str::Chars>) -> Option<String> {
    let quote = chars.next()?;
    let mut out = String::new();
    loop {
        match chars.next()? {
            '\\' => match chars.next()? {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                c => out.push(c),
            },
            c if c == quote => return Some(out),
            c => out.push(c),
        }
    }
}

/// Consume an unquoted token up to the next comma or closing brace.
fn parse_bare(chars: &mut std::iter::Peekable<std::str::Chars>) -> Option<String> {
    let mut out = String::new();
    while let Some(&c) = chars.peek() {
        if c == ',' || c == '}' {
            let token = out.trim().to_string();
            return if token.is_empty() { None } else { Some(token) };
        }
        out.push(c);
        chars.next();
    }
    None
}
