//! Template and field schema

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Template identifier
pub type TemplateId = i64;

/// Template field identifier
pub type FieldId = i64;

/// Document identifier
pub type DocumentId = i64;

const DATE_NAME_KEYWORDS: &[&str] = &["tarih", "date", "gün", "ay", "yıl", "saat"];
const NUMBER_NAME_KEYWORDS: &[&str] = &[
    "tutar", "fiyat", "miktar", "adet", "toplam", "kdv", "amount", "price", "quantity", "total",
    "sayı",
];

/// Expected value type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    Text,
    Number,
    Date,
}

impl DataType {
    /// Guess a type from a field name, for template authoring
    pub fn infer_from_name(name: &str) -> Self {
        let lowered = name.to_lowercase();
        let has_word = |keywords: &[&str]| {
            lowered
                .split(|c: char| !c.is_alphanumeric())
                .any(|word| keywords.contains(&word))
                || keywords.iter().any(|k| k.chars().count() > 3 && lowered.contains(k))
        };

        if has_word(DATE_NAME_KEYWORDS) {
            Self::Date
        } else if has_word(NUMBER_NAME_KEYWORDS) {
            Self::Number
        } else {
            Self::Text
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Date => "date",
        }
    }
}

/// How a field is extracted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    /// Model extraction with heuristic fallback
    #[default]
    Auto,
    /// Heuristic/regex extraction only, never calls a model
    Ocr,
    /// Model extraction only
    Llm,
}

/// Preferred model tier for a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmTier {
    #[default]
    Standard,
    Specialist,
}

/// A single field of a template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateField {
    pub id: FieldId,

    /// Unique within the template
    pub field_name: String,

    #[serde(default)]
    pub display_name: String,

    #[serde(default)]
    pub data_type: DataType,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub regex_hint: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub processing_mode: ProcessingMode,

    #[serde(default)]
    pub llm_tier: LlmTier,

    /// Escalate to the specialist tier when primary confidence falls below this
    #[serde(default)]
    pub handwriting_threshold: Option<f32>,

    #[serde(default)]
    pub auto_detected_handwriting: bool,

    /// Whether corrections on this field feed learned hints
    #[serde(default = "default_true")]
    pub learning_enabled: bool,

    /// Free-form authoring metadata; a `guidance` string is forwarded to the model
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

impl TemplateField {
    /// Create an enabled text field with default routing
    pub fn new(id: FieldId, field_name: impl Into<String>) -> Self {
        Self {
            id,
            field_name: field_name.into(),
            display_name: String::new(),
            data_type: DataType::Text,
            required: false,
            regex_hint: None,
            enabled: true,
            processing_mode: ProcessingMode::Auto,
            llm_tier: LlmTier::Standard,
            handwriting_threshold: None,
            auto_detected_handwriting: false,
            learning_enabled: true,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn with_regex_hint(mut self, pattern: impl Into<String>) -> Self {
        self.regex_hint = Some(pattern.into());
        self
    }

    pub fn with_processing_mode(mut self, mode: ProcessingMode) -> Self {
        self.processing_mode = mode;
        self
    }

    pub fn with_llm_tier(mut self, tier: LlmTier) -> Self {
        self.llm_tier = tier;
        self
    }

    pub fn with_handwriting_threshold(mut self, threshold: f32) -> Self {
        self.handwriting_threshold = Some(threshold);
        self
    }

    pub fn with_guidance(mut self, guidance: impl Into<String>) -> Self {
        self.metadata
            .insert("guidance".to_string(), serde_json::Value::String(guidance.into()));
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn handwritten(mut self, handwritten: bool) -> Self {
        self.auto_detected_handwriting = handwritten;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Human-facing label, falling back to the field name
    pub fn label(&self) -> &str {
        if self.display_name.trim().is_empty() {
            &self.field_name
        } else {
            &self.display_name
        }
    }

    /// Human-authored guidance string from metadata
    pub fn guidance(&self) -> Option<&str> {
        self.metadata
            .get("guidance")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Reject configurations the mapper cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.field_name.trim().is_empty() {
            return Err(Error::validation(format!(
                "field {} has an empty field_name",
                self.id
            )));
        }

        if let Some(threshold) = self.handwriting_threshold {
            if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
                return Err(Error::validation(format!(
                    "field '{}': handwriting_threshold {} is outside [0, 1]",
                    self.field_name, threshold
                )));
            }
        }

        if let Some(pattern) = &self.regex_hint {
            regex::Regex::new(pattern).map_err(|e| {
                Error::validation(format!(
                    "field '{}': regex_hint does not compile: {}",
                    self.field_name, e
                ))
            })?;
        }

        Ok(())
    }
}

/// A user-defined, ordered schema of fields for one document class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub name: String,

    /// Incremented by every field-configuration update
    #[serde(default = "default_version")]
    pub version: u32,

    pub fields: Vec<TemplateField>,
}

fn default_version() -> u32 {
    1
}

impl Template {
    pub fn new(id: TemplateId, name: impl Into<String>, fields: Vec<TemplateField>) -> Self {
        Self {
            id,
            name: name.into(),
            version: default_version(),
            fields,
        }
    }

    /// Load a template from YAML (JSON is valid YAML too)
    pub fn from_yaml(yaml: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Check field names, thresholds, and regex hints
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation(format!(
                "template {} has an empty name",
                self.id
            )));
        }

        let mut names = HashSet::new();
        let mut ids = HashSet::new();
        for field in &self.fields {
            field.validate()?;

            if !names.insert(field.field_name.as_str()) {
                return Err(Error::validation(format!(
                    "duplicate field_name '{}' in template '{}'",
                    field.field_name, self.name
                )));
            }
            if !ids.insert(field.id) {
                return Err(Error::validation(format!(
                    "duplicate field id {} in template '{}'",
                    field.id, self.name
                )));
            }
        }

        Ok(())
    }

    /// Produce a new version of this template with updated fields
    pub fn revise(&self, fields: Vec<TemplateField>) -> Result<Template> {
        let revised = Template {
            id: self.id,
            name: self.name.clone(),
            version: self.version.saturating_add(1),
            fields,
        };
        revised.validate()?;
        Ok(revised)
    }

    pub fn enabled_fields(&self) -> impl Iterator<Item = &TemplateField> {
        self.fields.iter().filter(|f| f.enabled)
    }

    pub fn field(&self, field_name: &str) -> Option<&TemplateField> {
        self.fields.iter().find(|f| f.field_name == field_name)
    }

    pub fn field_by_id(&self, id: FieldId) -> Option<&TemplateField> {
        self.fields.iter().find(|f| f.id == id)
    }
}
