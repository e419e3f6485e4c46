//! Per-type value coercion
//!
//! Dates normalize to `DD.MM.YYYY`; numbers normalize to a plain decimal with
//! `.` as the decimal separator and no grouping; text is trimmed with internal
//! whitespace collapsed.

use chrono::NaiveDate;
use formsight_core::{DataType, Error, Result};
use regex::Regex;

const CURRENCY_MARKERS: &[&str] = &["₺", "$", "€", "£", "TRY", "TL", "USD", "EUR", "GBP"];

/// Parses and normalizes raw values according to a field's data type
pub struct ValueCoercer {
    day_first: Regex,
    year_first: Regex,
    numeric: Regex,
}

impl ValueCoercer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            day_first: Regex::new(r"^(\d{1,2})[./-](\d{1,2})[./-](\d{4}|\d{2})$")
                .map_err(|e| Error::internal(format!("Failed to compile date regex: {}", e)))?,
            year_first: Regex::new(r"^(\d{4})[./-](\d{1,2})[./-](\d{1,2})$")
                .map_err(|e| Error::internal(format!("Failed to compile ISO date regex: {}", e)))?,
            numeric: Regex::new(r"^[+-]?[0-9.,]*[0-9][0-9.,]*$")
                .map_err(|e| Error::internal(format!("Failed to compile number regex: {}", e)))?,
        })
    }

    /// Normalize `raw`, or `None` when it cannot be read as `data_type`
    pub fn coerce(&self, raw: &str, data_type: DataType) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        match data_type {
            DataType::Text => Some(collapse_whitespace(trimmed)),
            DataType::Date => self.coerce_date(trimmed),
            DataType::Number => self.coerce_number(trimmed),
        }
    }

    fn coerce_date(&self, raw: &str) -> Option<String> {
        let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();

        let (year, month, day) = if let Some(caps) = self.day_first.captures(&compact) {
            let year_raw = &caps[3];
            let mut year: i32 = year_raw.parse().ok()?;
            if year_raw.len() == 2 {
                year += 2000;
            }
            (year, caps[2].parse().ok()?, caps[1].parse().ok()?)
        } else if let Some(caps) = self.year_first.captures(&compact) {
            (caps[1].parse().ok()?, caps[2].parse().ok()?, caps[3].parse().ok()?)
        } else {
            return None;
        };

        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        Some(date.format("%d.%m.%Y").to_string())
    }

    fn coerce_number(&self, raw: &str) -> Option<String> {
        let mut cleaned = raw.to_string();
        for marker in CURRENCY_MARKERS {
            cleaned = cleaned.replace(marker, "");
        }
        let cleaned: String = cleaned
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '\'')
            .collect();

        if !self.numeric.is_match(&cleaned) {
            return None;
        }

        let (sign, body) = match cleaned.strip_prefix('-') {
            Some(rest) => ("-", rest),
            None => ("", cleaned.trim_start_matches('+')),
        };

        let decimal_sep = decimal_separator(body);
        let (int_part, frac_part) = match decimal_sep {
            Some(idx) => (&body[..idx], &body[idx + 1..]),
            None => (body, ""),
        };

        // anything left in the fractional part besides digits is malformed
        if !frac_part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let int_digits: String = int_part.chars().filter(|c| c.is_ascii_digit()).collect();
        if int_digits.is_empty() && frac_part.is_empty() {
            return None;
        }

        let int_digits = int_digits.trim_start_matches('0');
        let int_digits = if int_digits.is_empty() { "0" } else { int_digits };

        let mut normalized = format!("{}{}", sign, int_digits);
        if !frac_part.is_empty() {
            normalized.push('.');
            normalized.push_str(frac_part);
        }
        if normalized == "-0" {
            normalized = "0".to_string();
        }
        Some(normalized)
    }
}

/// Byte index of the decimal separator, if the body has one
fn decimal_separator(body: &str) -> Option<usize> {
    let last_dot = body.rfind('.');
    let last_comma = body.rfind(',');

    match (last_dot, last_comma) {
        (Some(dot), Some(comma)) => Some(dot.max(comma)),
        (Some(idx), None) | (None, Some(idx)) => {
            let sep = body.as_bytes()[idx] as char;
            if body.matches(sep).count() > 1 {
                return None;
            }
            let digits_after = body.len() - idx - 1;
            let int_part = &body[..idx];
            // "1.234" reads as grouping, "0.500" and "12,5" as decimals
            let looks_grouped = digits_after == 3
                && !int_part.is_empty()
                && int_part.len() <= 3
                && !int_part.starts_with('0');
            if looks_grouped {
                None
            } else {
                Some(idx)
            }
        }
        (None, None) => None,
    }
}

/// Trim and collapse whitespace runs into single spaces
pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
