//! Heuristic pre-detection of field values
//!
//! Evidence comes from, in decreasing strength: the template's regex hint,
//! learned regex patterns, a label anchor (the field's name or display name
//! followed by a value on the same line), and a generic scan for dates or
//! numbers.

use crate::runtime_config::RuntimeField;
use aho_corasick::AhoCorasick;
use formsight_core::{DataType, Error, Result};
use regex::Regex;
use serde::Serialize;

const REGEX_HINT_CONFIDENCE: f32 = 0.9;
const LEARNED_PATTERN_CONFIDENCE: f32 = 0.85;
const TYPED_LABEL_CONFIDENCE: f32 = 0.75;
const TEXT_LABEL_CONFIDENCE: f32 = 0.65;
const UNIQUE_SCAN_CONFIDENCE: f32 = 0.6;
const AMBIGUOUS_SCAN_CONFIDENCE: f32 = 0.45;
const MAX_LABEL_VALUE_CHARS: usize = 120;

/// How a candidate value was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceMethod {
    RegexHint,
    LearnedPattern,
    LabelAnchor,
    TypeScan,
}

impl EvidenceMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RegexHint => "regex hint",
            Self::LearnedPattern => "learned pattern",
            Self::LabelAnchor => "label anchor",
            Self::TypeScan => "type scan",
        }
    }
}

/// A candidate value for one field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evidence {
    pub value: String,
    pub confidence: f32,
    pub method: EvidenceMethod,
}

/// Regex and label based extractor
pub struct HeuristicExtractor {
    auto_date: Regex,
    auto_number: Regex,
    date_limit: usize,
    number_limit: usize,
}

impl HeuristicExtractor {
    pub fn new(date_limit: usize, number_limit: usize) -> Result<Self> {
        Ok(Self {
            auto_date: Regex::new(r"\b\d{1,2}[./-]\d{1,2}[./-]\d{2,4}\b")
                .map_err(|e| Error::internal(format!("Failed to compile date scan regex: {}", e)))?,
            auto_number: Regex::new(r"\b\d{1,3}(?:[.,]\d{3})*(?:[.,]\d+)?\b")
                .map_err(|e| Error::internal(format!("Failed to compile number scan regex: {}", e)))?,
            date_limit,
            number_limit,
        })
    }

    /// All candidates for a field, strongest first, without duplicate values
    pub fn collect(&self, text: &str, field: &RuntimeField) -> Vec<Evidence> {
        let mut evidence = Vec::new();

        if let Some(regex) = &field.patterns.hint_search {
            if let Some(value) = first_match(regex, text) {
                evidence.push(Evidence {
                    value,
                    confidence: REGEX_HINT_CONFIDENCE,
                    method: EvidenceMethod::RegexHint,
                });
            }
        }

        for regex in &field.patterns.learned_search {
            if let Some(value) = first_match(regex, text) {
                evidence.push(Evidence {
                    value,
                    confidence: LEARNED_PATTERN_CONFIDENCE,
                    method: EvidenceMethod::LearnedPattern,
                });
            }
        }

        evidence.extend(self.label_anchor(text, field));
        evidence.extend(self.type_scan(text, field.data_type));

        dedupe(evidence)
    }

    /// Strongest candidate, if any
    pub fn best(&self, text: &str, field: &RuntimeField) -> Option<Evidence> {
        self.collect(text, field).into_iter().next()
    }

    fn label_anchor(&self, text: &str, field: &RuntimeField) -> Option<Evidence> {
        let mut labels: Vec<String> = vec![field.name.clone(), field.name.replace('_', " ")];
        if !field.label.trim().is_empty() {
            labels.push(field.label.trim().to_string());
        }
        labels.retain(|l| !l.trim().is_empty());
        labels.sort();
        labels.dedup();

        let matcher = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(&labels)
            .ok()?;

        let mut fallback = None;
        for found in matcher.find_iter(text) {
            let before = &text[..found.start()];
            if before.chars().next_back().is_some_and(|c| c.is_alphanumeric()) {
                continue;
            }

            let rest = &text[found.end()..];
            let line = rest.lines().next().unwrap_or("");
            if line.starts_with(|c: char| c.is_alphanumeric()) {
                // label is a prefix of a longer word
                continue;
            }
            let Some(evidence) = self.value_after_label(line, field.data_type) else {
                continue;
            };

            let line_prefix = before.rsplit('\n').next().unwrap_or("");
            if line_prefix.trim().is_empty() {
                return Some(evidence);
            }
            fallback.get_or_insert(evidence);
        }
        fallback
    }

    fn value_after_label(&self, line: &str, data_type: DataType) -> Option<Evidence> {
        let remainder = line
            .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ':' | '-' | '=' | '.'))
            .trim();
        if remainder.is_empty() {
            return None;
        }

        let (value, confidence): (String, f32) = match data_type {
            DataType::Text => (
                remainder.chars().take(MAX_LABEL_VALUE_CHARS).collect(),
                TEXT_LABEL_CONFIDENCE,
            ),
            DataType::Date => (self.auto_date.find(remainder)?.as_str().to_string(), TYPED_LABEL_CONFIDENCE),
            DataType::Number => (self.auto_number.find(remainder)?.as_str().to_string(), TYPED_LABEL_CONFIDENCE),
        };
        Some(Evidence {
            value,
            confidence,
            method: EvidenceMethod::LabelAnchor,
        })
    }

    fn type_scan(&self, text: &str, data_type: DataType) -> Vec<Evidence> {
        let (regex, limit) = match data_type {
            DataType::Date => (&self.auto_date, self.date_limit),
            DataType::Number => (&self.auto_number, self.number_limit),
            DataType::Text => return Vec::new(),
        };

        let mut values: Vec<String> = Vec::new();
        for m in regex.find_iter(text) {
            let value = m.as_str().to_string();
            if !values.contains(&value) {
                values.push(value);
            }
            if values.len() >= limit {
                break;
            }
        }

        let confidence = if values.len() == 1 && data_type == DataType::Date {
            UNIQUE_SCAN_CONFIDENCE
        } else {
            AMBIGUOUS_SCAN_CONFIDENCE
        };
        values
            .into_iter()
            .map(|value| Evidence {
                value,
                confidence,
                method: EvidenceMethod::TypeScan,
            })
            .collect()
    }
}

fn first_match(regex: &Regex, text: &str) -> Option<String> {
    regex
        .find(text)
        .map(|m| m.as_str().trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Strip a leading `^` and an unescaped trailing `$` so a full-value pattern can search text
pub fn unanchored(pattern: &str) -> String {
    let mut body = pattern.strip_prefix('^').unwrap_or(pattern);
    if let Some(stripped) = body.strip_suffix('$') {
        let trailing_backslashes = stripped.chars().rev().take_while(|c| *c == '\\').count();
        if trailing_backslashes % 2 == 0 {
            body = stripped;
        }
    }
    body.to_string()
}

fn dedupe(mut evidence: Vec<Evidence>) -> Vec<Evidence> {
    // stable: equal confidences keep discovery order
    evidence.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut seen: Vec<String> = Vec::new();
    evidence.retain(|e| {
        if seen.contains(&e.value) {
            false
        } else {
            seen.push(e.value.clone());
            true
        }
    });
    evidence
}
