//! Confidence classification

use crate::error::{Error, Result};
use crate::mapping::DocumentMapping;
use crate::template::Template;
use serde::{Deserialize, Serialize};

/// Status tier derived from a confidence score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldStatus {
    Low,
    Medium,
    High,
}

impl FieldStatus {
    /// Ordinal rank, monotonic in confidence
    pub fn rank(&self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Bucket boundaries for confidence classification
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceThresholds {
    /// Lower bound of the medium bucket
    #[serde(default = "default_medium")]
    pub medium: f32,

    /// Lower bound of the high bucket
    #[serde(default = "default_high")]
    pub high: f32,
}

fn default_medium() -> f32 {
    0.5
}

fn default_high() -> f32 {
    0.8
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            medium: default_medium(),
            high: default_high(),
        }
    }
}

impl ConfidenceThresholds {
    pub fn validate(&self) -> Result<()> {
        let in_range = |v: f32| v.is_finite() && (0.0..=1.0).contains(&v);
        if !in_range(self.medium) || !in_range(self.high) || self.medium > self.high {
            return Err(Error::validation(format!(
                "confidence thresholds must satisfy 0 <= medium ({}) <= high ({}) <= 1",
                self.medium, self.high
            )));
        }
        Ok(())
    }
}

/// Clamp a score into [0, 1]; NaN becomes 0
pub fn clamp_confidence(confidence: f32) -> f32 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// Maps confidence scores onto status tiers
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfidenceClassifier {
    thresholds: ConfidenceThresholds,
}

impl ConfidenceClassifier {
    pub fn new(thresholds: ConfidenceThresholds) -> Result<Self> {
        thresholds.validate()?;
        Ok(Self { thresholds })
    }

    pub fn thresholds(&self) -> ConfidenceThresholds {
        self.thresholds
    }

    /// Total over all floats: out-of-range values are clamped, NaN is low
    pub fn classify(&self, confidence: f32) -> FieldStatus {
        let c = clamp_confidence(confidence);
        if c >= self.thresholds.high {
            FieldStatus::High
        } else if c >= self.thresholds.medium {
            FieldStatus::Medium
        } else {
            FieldStatus::Low
        }
    }

    /// True when any enabled field of the template is missing or low
    pub fn needs_review(&self, mapping: &DocumentMapping, template: &Template) -> bool {
        template.enabled_fields().any(|field| {
            mapping
                .fields
                .get(&field.field_name)
                .map(|m| self.classify(m.confidence) == FieldStatus::Low)
                .unwrap_or(true)
        })
    }
}
