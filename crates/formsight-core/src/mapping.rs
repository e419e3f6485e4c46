//! Field mapping results

use crate::confidence::{clamp_confidence, FieldStatus};
use crate::learning::NewCorrection;
use crate::template::{DocumentId, Template, TemplateId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which tier produced a field's final value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MappingSource {
    Heuristic,
    LlmPrimary,
    LlmSpecialist,
    UserCorrection,
}

impl MappingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heuristic => "heuristic",
            Self::LlmPrimary => "llm-primary",
            Self::LlmSpecialist => "llm-specialist",
            Self::UserCorrection => "user-correction",
        }
    }
}

/// A value that was superseded by a later tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternate {
    pub value: Option<String>,
    pub confidence: f32,
    pub source: MappingSource,
}

/// Extraction result for one field of one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub field_name: String,

    /// Type-coerced value, absent when unresolved
    pub value: Option<String>,

    /// Always within [0, 1]
    pub confidence: f32,

    pub status: FieldStatus,
    pub source: MappingSource,

    /// Set when a model call for this field failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Required field without a resolved value
    #[serde(default)]
    pub validation_gap: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternates: Vec<Alternate>,
}

impl FieldMapping {
    pub fn new(
        field_name: impl Into<String>,
        value: Option<String>,
        confidence: f32,
        status: FieldStatus,
        source: MappingSource,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            value,
            confidence: clamp_confidence(confidence),
            status,
            source,
            error: None,
            validation_gap: false,
            alternates: Vec::new(),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.value.as_deref().is_some_and(|v| !v.trim().is_empty())
    }
}

/// Kinds of routing and adjustment decisions recorded per field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    HeuristicOnly,
    HeuristicFallback,
    PrimaryPass,
    EscalatedToSpecialist,
    SpecialistKeptPrimary,
    RegexOverride,
    CoercionFailed,
    OcrBlend,
    RequiredMissing,
    MissingFromResponse,
    MalformedValue,
    CallFailed,
    PriorRetained,
    UserCorrection,
}

/// One entry of the applied-rules trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedRule {
    pub field: String,
    pub rule: RuleKind,
    pub detail: String,
}

/// Mapping of one document against one template run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMapping {
    pub document_id: DocumentId,
    pub template_id: TemplateId,
    pub template_version: u32,

    #[serde(rename = "suggested_mapping")]
    pub fields: BTreeMap<String, FieldMapping>,

    pub overall_confidence: f32,

    #[serde(default)]
    pub applied_rules: Vec<AppliedRule>,

    /// Set when a model call failed outright
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DocumentMapping {
    pub fn new(document_id: DocumentId, template: &Template) -> Self {
        Self::empty(document_id, template.id, template.version)
    }

    /// Empty mapping for a run against the given template version
    pub fn empty(document_id: DocumentId, template_id: TemplateId, template_version: u32) -> Self {
        Self {
            document_id,
            template_id,
            template_version,
            fields: BTreeMap::new(),
            overall_confidence: 0.0,
            applied_rules: Vec::new(),
            error: None,
        }
    }

    pub fn insert(&mut self, mapping: FieldMapping) {
        self.fields.insert(mapping.field_name.clone(), mapping);
    }

    pub fn get(&self, field_name: &str) -> Option<&FieldMapping> {
        self.fields.get(field_name)
    }

    pub fn record(&mut self, field: impl Into<String>, rule: RuleKind, detail: impl Into<String>) {
        self.applied_rules.push(AppliedRule {
            field: field.into(),
            rule,
            detail: detail.into(),
        });
    }

    /// Mean confidence over the given field names; absent fields count as zero
    pub fn recompute_overall<'a>(&mut self, enabled: impl IntoIterator<Item = &'a str>) {
        let mut total = 0.0f32;
        let mut count = 0usize;
        for name in enabled {
            total += self.fields.get(name).map(|m| m.confidence).unwrap_or(0.0);
            count += 1;
        }
        self.overall_confidence = if count == 0 {
            0.0
        } else {
            clamp_confidence(total / count as f32)
        };
    }

    /// Fields that ended up without a value
    pub fn unresolved_fields(&self) -> Vec<&str> {
        self.fields
            .values()
            .filter(|m| !m.is_resolved())
            .map(|m| m.field_name.as_str())
            .collect()
    }

    /// Supersede a field with a user-provided value
    ///
    /// Returns the new mapping together with the correction to append.
    pub fn apply_correction(
        &self,
        template: &Template,
        field_name: &str,
        corrected_value: impl Into<String>,
        user_id: Option<i64>,
    ) -> (DocumentMapping, NewCorrection) {
        let corrected_value = corrected_value.into();
        let previous = self.fields.get(field_name);

        let mut corrected = FieldMapping::new(
            field_name,
            Some(corrected_value.clone()),
            1.0,
            FieldStatus::High,
            MappingSource::UserCorrection,
        );
        if let Some(prev) = previous {
            corrected.alternates.push(Alternate {
                value: prev.value.clone(),
                confidence: prev.confidence,
                source: prev.source,
            });
        }

        let mut context = BTreeMap::new();
        context.insert(
            "template_id".to_string(),
            serde_json::Value::from(self.template_id),
        );
        context.insert(
            "field_name".to_string(),
            serde_json::Value::from(field_name),
        );
        if let Some(prev) = previous {
            context.insert(
                "previous_confidence".to_string(),
                serde_json::Value::from(f64::from(prev.confidence)),
            );
            context.insert(
                "previous_source".to_string(),
                serde_json::Value::from(prev.source.as_str()),
            );
        }

        let correction = NewCorrection {
            document_id: self.document_id,
            template_field_id: template.field(field_name).map(|f| f.id),
            original_value: previous.and_then(|p| p.value.clone()),
            corrected_value,
            context,
            user_id,
        };

        let mut next = self.clone();
        next.insert(corrected);
        next.record(field_name, RuleKind::UserCorrection, "value supplied by user");
        next.recompute_overall(template.enabled_fields().map(|f| f.field_name.as_str()));

        (next, correction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateField;

    fn template() -> Template {
        Template::new(
            4,
            "receipt",
            vec![TemplateField::new(1, "total"), TemplateField::new(2, "date")],
        )
    }

    #[test]
    fn test_overall_counts_missing_as_zero() {
        let template = template();
        let mut mapping = DocumentMapping::new(1, &template);
        mapping.insert(FieldMapping::new("total", Some("10".into()), 0.8, FieldStatus::High, MappingSource::LlmPrimary));
        mapping.recompute_overall(["total", "date"]);
        assert!((mapping.overall_confidence - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_apply_correction_supersedes() {
        let template = template();
        let mut mapping = DocumentMapping::new(9, &template);
        mapping.insert(FieldMapping::new("total", Some("1O0".into()), 0.4, FieldStatus::Low, MappingSource::LlmPrimary));
        mapping.insert(FieldMapping::new("date", Some("01.02.2024".into()), 0.9, FieldStatus::High, MappingSource::LlmPrimary));

        let (next, correction) = mapping.apply_correction(&template, "total", "100", Some(3));

        let total = next.get("total").unwrap();
        assert_eq!(total.value.as_deref(), Some("100"));
        assert_eq!(total.source, MappingSource::UserCorrection);
        assert_eq!(total.confidence, 1.0);
        assert_eq!(total.alternates[0].value.as_deref(), Some("1O0"));
        assert!((next.overall_confidence - 0.95).abs() < 1e-6);

        // original is untouched
        assert_eq!(mapping.get("total").unwrap().value.as_deref(), Some("1O0"));

        assert_eq!(correction.document_id, 9);
        assert_eq!(correction.template_field_id, Some(1));
        assert_eq!(correction.original_value.as_deref(), Some("1O0"));
        assert_eq!(correction.user_id, Some(3));
    }

    #[test]
    fn test_serialized_shape() {
        let template = template();
        let mut mapping = DocumentMapping::new(2, &template);
        mapping.insert(FieldMapping::new("total", Some("5".into()), 0.6, FieldStatus::Medium, MappingSource::LlmSpecialist));
        mapping.record("total", RuleKind::EscalatedToSpecialist, "handwriting flag");

        let json = serde_json::to_value(&mapping).unwrap();
        assert_eq!(json["suggested_mapping"]["total"]["source"], "llm-specialist");
        assert_eq!(json["suggested_mapping"]["total"]["status"], "medium");
        assert_eq!(json["applied_rules"][0]["rule"], "escalated_to_specialist");
        assert!(json.get("error").is_none());
    }
}
