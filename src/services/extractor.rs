// src/services/extractor.rs

//! Content extraction.
//!
//! Pulls a comparable string out of a raw response body. One `Extractor`
//! variant per `ExtractorType`, all sharing the same `extract` contract.
//!
//! - `css`: every matching element contributes its trimmed text; empty texts
//!   are skipped and the rest are joined with `\n`.
//! - `regex`: every match contributes one line, the first capture group when
//!   the pattern has one and it participated, otherwise the whole match.
//! - `json`: a dot/bracket path selects one value; strings are returned raw,
//!   everything else as compact JSON text.

use regex::{Regex, RegexBuilder};
use scraper::{Html, Selector};
use serde_json::Value;

use crate::error::ExtractionError;
use crate::models::ExtractorType;

/// Compiled regex programs larger than this are rejected.
const REGEX_SIZE_LIMIT: usize = 10 * (1 << 20);

/// Extract a value from `body` in one step.
pub fn extract(
    body: &[u8],
    extractor_type: ExtractorType,
    expr: &str,
) -> Result<String, ExtractionError> {
    Extractor::compile(extractor_type, expr)?.extract(body)
}

/// A compiled extraction expression.
#[derive(Debug, Clone)]
pub enum Extractor {
    Css { expr: String, selector: Selector },
    Regex { pattern: Regex },
    Json { expr: String, path: JsonPath },
}

impl Extractor {
    /// Compile `expr` for the given extractor type.
    pub fn compile(extractor_type: ExtractorType, expr: &str) -> Result<Self, ExtractionError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(ExtractionError::invalid_expr(expr, "expression is empty"));
        }

        match extractor_type {
            ExtractorType::Css => {
                let selector = Selector::parse(expr)
                    .map_err(|e| ExtractionError::invalid_expr(expr, format!("{e:?}")))?;
                Ok(Self::Css {
                    expr: expr.to_string(),
                    selector,
                })
            }
            ExtractorType::Regex => {
                let pattern = RegexBuilder::new(expr)
                    .size_limit(REGEX_SIZE_LIMIT)
                    .build()
                    .map_err(|e| ExtractionError::invalid_expr(expr, e))?;
                Ok(Self::Regex { pattern })
            }
            ExtractorType::Json => Ok(Self::Json {
                expr: expr.to_string(),
                path: JsonPath::parse(expr)?,
            }),
        }
    }

    /// Apply the expression to a response body.
    pub fn extract(&self, body: &[u8]) -> Result<String, ExtractionError> {
        match self {
            Self::Css { expr, selector } => extract_css(body, expr, selector),
            Self::Regex { pattern } => extract_regex(body, pattern),
            Self::Json { expr, path } => extract_json(body, expr, path),
        }
    }
}

fn extract_css(body: &[u8], expr: &str, selector: &Selector) -> Result<String, ExtractionError> {
    let html = String::from_utf8_lossy(body);
    let document = Html::parse_document(&html);

    let texts: Vec<String> = document
        .select(selector)
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty())
        .collect();

    if texts.is_empty() {
        return Err(ExtractionError::no_match(expr));
    }
    Ok(texts.join("\n"))
}

fn extract_regex(body: &[u8], pattern: &Regex) -> Result<String, ExtractionError> {
    let text = String::from_utf8_lossy(body);
    let has_group = pattern.captures_len() > 1;

    let matches: Vec<&str> = pattern
        .captures_iter(&text)
        .filter_map(|caps| {
            let group = if has_group { caps.get(1) } else { None };
            group.or_else(|| caps.get(0)).map(|m| m.as_str())
        })
        .collect();

    if matches.is_empty() {
        return Err(ExtractionError::no_match(pattern.as_str()));
    }
    Ok(matches.join("\n"))
}

fn extract_json(body: &[u8], expr: &str, path: &JsonPath) -> Result<String, ExtractionError> {
    let document: Value =
        serde_json::from_slice(body).map_err(|e| ExtractionError::ParseError(e.to_string()))?;

    let value = path
        .resolve(&document)
        .ok_or_else(|| ExtractionError::no_match(expr))?;

    Ok(match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// One step of a JSON path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Object key; bare numeric keys also index arrays
    Key(String),
    /// Bracketed array index
    Index(usize),
}

/// Parsed dot/bracket path, e.g. `data.items[0].name` or `$["a.b"].c`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    segments: Vec<PathSegment>,
}

impl JsonPath {
    /// Parse a path expression.
    ///
    /// A leading `$` or `$.` is optional; `$` alone selects the document.
    pub fn parse(expr: &str) -> Result<Self, ExtractionError> {
        let invalid = |message: &str| ExtractionError::invalid_expr(expr, message);

        let mut rest = expr.trim();
        if let Some(stripped) = rest.strip_prefix('$') {
            rest = stripped.strip_prefix('.').unwrap_or(stripped);
            if stripped.starts_with('.') && rest.is_empty() {
                return Err(invalid("path ends with '.'"));
            }
        } else if rest.is_empty() {
            return Err(invalid("path is empty"));
        }

        let mut segments = Vec::new();
        let mut chars = rest.chars().peekable();
        let mut expect_key = !rest.starts_with('[');

        while let Some(&c) = chars.peek() {
            match c {
                '.' => {
                    chars.next();
                    if matches!(chars.peek(), None | Some('.')) {
                        return Err(invalid("empty path segment"));
                    }
                    expect_key = chars.peek() != Some(&'[');
                }
                '[' => {
                    chars.next();
                    let segment =
                        Self::parse_bracket(&mut chars).map_err(|m| invalid(m.as_str()))?;
                    segments.push(segment);
                    expect_key = false;
                }
                _ => {
                    if !expect_key {
                        return Err(invalid("expected '.' or '[' between segments"));
                    }
                    let mut key = String::new();
                    while let Some(&c) = chars.peek() {
                        if c == '.' || c == '[' {
                            break;
                        }
                        if c == ']' {
                            return Err(invalid("unbalanced ']'"));
                        }
                        key.push(c);
                        chars.next();
                    }
                    segments.push(PathSegment::Key(key));
                    expect_key = false;
                }
            }
        }

        Ok(Self { segments })
    }

    fn parse_bracket(
        chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    ) -> Result<PathSegment, String> {
        match chars.peek().copied() {
            Some(quote @ ('"' | '\'')) => {
                chars.next();
                let mut key = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some(escaped) => key.push(escaped),
                            None => return Err("unterminated quoted key".into()),
                        },
                        Some(c) if c == quote => break,
                        Some(c) => key.push(c),
                        None => return Err("unterminated quoted key".into()),
                    }
                }
                match chars.next() {
                    Some(']') => Ok(PathSegment::Key(key)),
                    _ => Err("expected ']' after quoted key".into()),
                }
            }
            _ => {
                let mut digits = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(c) => digits.push(c),
                        None => return Err("unclosed '['".into()),
                    }
                }
                digits
                    .trim()
                    .parse::<usize>()
                    .map(PathSegment::Index)
                    .map_err(|_| format!("invalid array index '{digits}'"))
            }
        }
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Walk the path through `document`.
    pub fn resolve<'a>(&self, document: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(document, |value, segment| match (segment, value) {
                (PathSegment::Key(key), Value::Object(map)) => map.get(key),
                (PathSegment::Key(key), Value::Array(items)) => {
                    key.parse::<usize>().ok().and_then(|i| items.get(i))
                }
                (PathSegment::Index(i), Value::Array(items)) => items.get(*i),
                _ => None,
            })
    }
}
