//! Correction and hint records

use crate::template::{DataType, DocumentId, FieldId, TemplateId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Source label written on every learned hint
pub const AUTO_LEARNING_SOURCE: &str = "auto-learning";

/// An immutable record of a user overriding a suggested value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub id: i64,
    pub document_id: DocumentId,

    #[serde(default)]
    pub template_field_id: Option<FieldId>,

    #[serde(default)]
    pub original_value: Option<String>,

    pub corrected_value: String,

    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,

    #[serde(default)]
    pub user_id: Option<i64>,

    pub created_at: DateTime<Utc>,
}

/// A correction that has not been stored yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCorrection {
    pub document_id: DocumentId,

    #[serde(default)]
    pub template_field_id: Option<FieldId>,

    #[serde(default)]
    pub original_value: Option<String>,

    pub corrected_value: String,

    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,

    #[serde(default)]
    pub user_id: Option<i64>,
}

impl NewCorrection {
    pub fn into_correction(self, id: i64, created_at: DateTime<Utc>) -> Correction {
        Correction {
            id,
            document_id: self.document_id,
            template_field_id: self.template_field_id,
            original_value: self.original_value,
            corrected_value: self.corrected_value,
            context: self.context,
            user_id: self.user_id,
            created_at,
        }
    }
}

/// A generalized pattern and how many corrections produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub pattern: String,
    pub support: u32,
}

/// Derived suggestion mined from correction history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateFieldHint {
    pub template_field_id: FieldId,
    pub source: String,
    pub type_hint: DataType,
    pub examples: Vec<String>,
    pub regex_patterns: Vec<LearnedPattern>,

    /// Newest correction timestamp in the sample that produced this hint
    pub generated_at: DateTime<Utc>,
}

/// Hint payload as exposed to the API layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HintView {
    pub source: String,
    pub type_hint: DataType,
    pub examples: Vec<String>,
    pub regex_patterns: Vec<LearnedPattern>,
}

impl From<&TemplateFieldHint> for HintView {
    fn from(hint: &TemplateFieldHint) -> Self {
        Self {
            source: hint.source.clone(),
            type_hint: hint.type_hint,
            examples: hint.examples.clone(),
            regex_patterns: hint.regex_patterns.clone(),
        }
    }
}

/// All hints of one template, keyed by field id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HintsResponse {
    pub template_id: TemplateId,
    pub hints: BTreeMap<FieldId, HintView>,
}

impl HintsResponse {
    pub fn new(template_id: TemplateId, hints: &[TemplateFieldHint]) -> Self {
        Self {
            template_id,
            hints: hints
                .iter()
                .map(|h| (h.template_field_id, HintView::from(h)))
                .collect(),
        }
    }
}
