//! Hint inference from correction samples
//!
//! Everything here is pure and order-insensitive: the same set of
//! corrections always yields the same hint, whatever order the store
//! returned them in.

use crate::config::LearningConfig;
use chrono::{DateTime, NaiveDate, Utc};
use formsight_core::{Correction, DataType, FieldId, LearnedPattern, TemplateFieldHint, AUTO_LEARNING_SOURCE};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Trim and collapse whitespace; `None` for blank values
pub fn normalize_value(value: &str) -> Option<String> {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Values equal under case and whitespace normalization
#[derive(Debug, Default)]
struct ValueGroup {
    count: u32,
    latest: Option<DateTime<Utc>>,
    surfaces: BTreeMap<String, u32>,
}

impl ValueGroup {
    /// Most frequent surface form, lexicographically smallest on ties
    fn representative(&self) -> Option<&str> {
        let mut best: Option<(&str, u32)> = None;
        for (surface, count) in &self.surfaces {
            match best {
                Some((_, top)) if *count <= top => {}
                _ => best = Some((surface, *count)),
            }
        }
        best.map(|(surface, _)| surface)
    }
}

#[derive(Debug, Default)]
struct PatternTally {
    support: u32,
    latest: Option<DateTime<Utc>>,
}

/// Build the hint for one field, or `None` when it has no usable samples
pub fn infer_field_hint(
    field_id: FieldId,
    samples: &[&Correction],
    config: &LearningConfig,
) -> Option<TemplateFieldHint> {
    let normalized: Vec<(String, DateTime<Utc>)> = samples
        .iter()
        .filter_map(|c| normalize_value(&c.corrected_value).map(|v| (v, c.created_at)))
        .collect();
    let generated_at = normalized.iter().map(|(_, at)| *at).max()?;

    Some(TemplateFieldHint {
        template_field_id: field_id,
        source: AUTO_LEARNING_SOURCE.to_string(),
        type_hint: infer_type(normalized.iter().map(|(v, _)| v.as_str()), config.min_type_support),
        examples: rank_examples(&normalized, config.max_examples),
        regex_patterns: rank_patterns(&normalized, config.min_pattern_support, config.max_patterns),
        generated_at,
    })
}

fn rank_examples(values: &[(String, DateTime<Utc>)], limit: usize) -> Vec<String> {
    let mut groups: BTreeMap<String, ValueGroup> = BTreeMap::new();
    for (value, at) in values {
        let group = groups.entry(value.to_lowercase()).or_default();
        group.count += 1;
        group.latest = group.latest.max(Some(*at));
        *group.surfaces.entry(value.clone()).or_insert(0) += 1;
    }

    let mut ranked: Vec<(&String, &ValueGroup)> = groups.iter().collect();
    ranked.sort_by(|(a_key, a), (b_key, b)| {
        b.count
            .cmp(&a.count)
            .then(b.latest.cmp(&a.latest))
            .then(a_key.cmp(b_key))
    });

    ranked
        .into_iter()
        .filter_map(|(_, group)| group.representative().map(str::to_string))
        .take(limit)
        .collect()
}

/// Classification of one normalized sample: date, then number, else text
pub fn classify_sample(value: &str) -> DataType {
    let patterns = sample_patterns();
    if patterns.is_calendar_date(value) {
        DataType::Date
    } else if patterns.numbers.iter().any(|r| r.is_match(value)) {
        DataType::Number
    } else {
        DataType::Text
    }
}

/// Majority type, provided it reaches `min_support`; otherwise text
pub fn infer_type<'a>(values: impl IntoIterator<Item = &'a str>, min_support: f32) -> DataType {
    let mut votes: BTreeMap<DataType, u32> = BTreeMap::new();
    let mut total = 0u32;
    for value in values {
        *votes.entry(classify_sample(value)).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return DataType::Text;
    }

    // BTreeMap order is text < number < date; ties resolve to the earlier type
    let mut winner = (DataType::Text, 0u32);
    for (data_type, count) in votes {
        if count > winner.1 {
            winner = (data_type, count);
        }
    }

    if winner.1 as f32 / total as f32 >= min_support {
        winner.0
    } else {
        DataType::Text
    }
}

fn rank_patterns(
    values: &[(String, DateTime<Utc>)],
    min_support: u32,
    limit: usize,
) -> Vec<LearnedPattern> {
    let mut tallies: BTreeMap<String, PatternTally> = BTreeMap::new();
    for (value, at) in values {
        let tally = tallies.entry(generalize(value)).or_default();
        tally.support += 1;
        tally.latest = tally.latest.max(Some(*at));
    }

    let mut ranked: Vec<(String, PatternTally)> = tallies
        .into_iter()
        .filter(|(_, tally)| tally.support >= min_support)
        .collect();
    ranked.sort_by(|(a_pattern, a), (b_pattern, b)| {
        b.support
            .cmp(&a.support)
            .then(b.latest.cmp(&a.latest))
            .then(a_pattern.cmp(b_pattern))
    });

    ranked
        .into_iter()
        .take(limit)
        .map(|(pattern, tally)| LearnedPattern {
            pattern,
            support: tally.support,
        })
        .collect()
}

/// Anchored pattern with digit runs as `\d{n}` and whitespace runs as `\s+`
pub fn generalize(value: &str) -> String {
    let mut pattern = String::from("^");
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            let mut run = 1;
            while chars.next_if(|n| n.is_ascii_digit()).is_some() {
                run += 1;
            }
            pattern.push_str(&format!(r"\d{{{}}}", run));
        } else if c.is_whitespace() {
            while chars.next_if(|n| n.is_whitespace()).is_some() {}
            pattern.push_str(r"\s+");
        } else {
            let mut buf = [0u8; 4];
            pattern.push_str(&regex::escape(c.encode_utf8(&mut buf)));
        }
    }

    pattern.push('$');
    pattern
}

struct SamplePatterns {
    day_first: Option<Regex>,
    year_first: Option<Regex>,
    numbers: Vec<Regex>,
}

impl SamplePatterns {
    /// Date-shaped and an actual day of the calendar
    fn is_calendar_date(&self, value: &str) -> bool {
        let parts = |regex: &Option<Regex>| {
            regex.as_ref().and_then(|r| r.captures(value)).map(|caps| {
                [1, 2, 3].map(|i| caps.get(i).map_or("", |m| m.as_str()).to_string())
            })
        };

        let ymd = if let Some([day, month, year]) = parts(&self.day_first) {
            let century = if year.len() == 2 { 2000 } else { 0 };
            year.parse::<i32>().ok().map(|y| (y + century, month, day))
        } else if let Some([year, month, day]) = parts(&self.year_first) {
            year.parse::<i32>().ok().map(|y| (y, month, day))
        } else {
            None
        };

        ymd.and_then(|(year, month, day)| {
            NaiveDate::from_ymd_opt(year, month.parse().ok()?, day.parse().ok()?)
        })
        .is_some()
    }
}

fn sample_patterns() -> &'static SamplePatterns {
    static PATTERNS: OnceLock<SamplePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |patterns: &[&str]| -> Vec<Regex> {
            patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
        };
        SamplePatterns {
            day_first: Regex::new(r"^(\d{1,2})[./-](\d{1,2})[./-](\d{4}|\d{2})$").ok(),
            year_first: Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").ok(),
            numbers: compile(&[
                r"^[+-]?\d+(?:[.,]\d+)?$",
                r"^[+-]?\d{1,3}(?:[.,]\d{3})+(?:[.,]\d+)?$",
            ]),
        }
    })
}
