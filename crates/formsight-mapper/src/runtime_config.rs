//! Per-run configuration built from template rules and learned hints

use crate::heuristics::unanchored;
use formsight_core::{
    DataType, FieldId, LearnedPattern, LlmTier, ProcessingMode, Result, Template, TemplateField,
    TemplateFieldHint, TemplateId,
};
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Where a field's effective data type came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeSource {
    Template,
    Learned,
}

/// Effective settings for one enabled field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeField {
    pub field_id: FieldId,
    pub name: String,
    pub label: String,
    pub data_type: DataType,
    pub type_source: TypeSource,
    pub required: bool,

    /// Authored pattern; learned patterns never replace it
    pub regex_hint: Option<String>,

    pub learned_patterns: Vec<LearnedPattern>,
    pub examples: Vec<String>,

    /// Authored guidance first, learned guidance after
    pub guidance: Vec<String>,

    pub processing_mode: ProcessingMode,
    pub llm_tier: LlmTier,
    pub handwriting_threshold: Option<f32>,
    pub auto_detected_handwriting: bool,

    /// Compiled from `regex_hint` and `learned_patterns`
    #[serde(skip)]
    pub patterns: FieldPatterns,
}

/// Precompiled regexes for one field
///
/// Patterns that do not compile are left out; authored hints are already
/// validated with the template.
#[derive(Debug, Clone, Default)]
pub struct FieldPatterns {
    /// The authored hint as written, checked against whole values
    pub hint: Option<Regex>,

    /// The authored hint unanchored and case-insensitive, for searching text
    pub hint_search: Option<Regex>,

    /// Learned patterns in support order, unanchored and case-insensitive
    pub learned_search: Vec<Regex>,
}

impl FieldPatterns {
    pub fn compile(regex_hint: Option<&str>, learned: &[LearnedPattern]) -> Self {
        Self {
            hint: regex_hint.and_then(|p| compile_logged(Regex::new(p), p)),
            hint_search: regex_hint.and_then(search_regex),
            learned_search: learned.iter().filter_map(|l| search_regex(&l.pattern)).collect(),
        }
    }

    /// Whether the raw or normalized value satisfies the authored hint;
    /// true when there is no usable hint
    pub fn hint_matches(&self, raw: &str, normalized: &str) -> bool {
        match &self.hint {
            Some(regex) => regex.is_match(raw.trim()) || regex.is_match(normalized),
            None => true,
        }
    }
}

impl PartialEq for FieldPatterns {
    fn eq(&self, other: &Self) -> bool {
        fn sources(p: &FieldPatterns) -> Vec<Option<&str>> {
            let mut out = vec![p.hint.as_ref().map(Regex::as_str), p.hint_search.as_ref().map(Regex::as_str)];
            out.extend(p.learned_search.iter().map(|r| Some(r.as_str())));
            out
        }
        sources(self) == sources(other)
    }
}

fn search_regex(pattern: &str) -> Option<Regex> {
    compile_logged(
        RegexBuilder::new(&unanchored(pattern)).case_insensitive(true).build(),
        pattern,
    )
}

fn compile_logged(compiled: std::result::Result<Regex, regex::Error>, pattern: &str) -> Option<Regex> {
    match compiled {
        Ok(regex) => Some(regex),
        Err(e) => {
            debug!(pattern, "skipping pattern that does not compile: {}", e);
            None
        }
    }
}

impl RuntimeField {
    /// Settings taken from the template alone
    pub fn from_field(field: &TemplateField) -> Self {
        Self {
            field_id: field.id,
            name: field.field_name.clone(),
            label: field.label().to_string(),
            data_type: field.data_type,
            type_source: TypeSource::Template,
            required: field.required,
            regex_hint: field.regex_hint.clone(),
            learned_patterns: Vec::new(),
            examples: Vec::new(),
            guidance: field.guidance().map(str::to_string).into_iter().collect(),
            processing_mode: field.processing_mode,
            llm_tier: field.llm_tier,
            handwriting_threshold: field.handwriting_threshold,
            auto_detected_handwriting: field.auto_detected_handwriting,
            patterns: FieldPatterns::compile(field.regex_hint.as_deref(), &[]),
        }
    }

    pub fn with_regex_hint(mut self, pattern: impl Into<String>) -> Self {
        self.regex_hint = Some(pattern.into());
        self.recompile();
        self
    }

    pub fn with_learned_patterns(mut self, learned: Vec<LearnedPattern>) -> Self {
        self.learned_patterns = learned;
        self.recompile();
        self
    }

    fn recompile(&mut self) {
        self.patterns = FieldPatterns::compile(self.regex_hint.as_deref(), &self.learned_patterns);
    }

    fn merge_hint(&mut self, hint: &TemplateFieldHint) {
        if self.data_type == DataType::Text && hint.type_hint != DataType::Text {
            self.data_type = hint.type_hint;
            self.type_source = TypeSource::Learned;
        }

        self.learned_patterns = hint
            .regex_patterns
            .iter()
            .filter(|p| self.regex_hint.as_deref() != Some(p.pattern.as_str()))
            .cloned()
            .collect();
        self.recompile();
        self.examples = hint.examples.clone();

        if !self.examples.is_empty() {
            self.guidance.push(format!(
                "Values previously confirmed by users: {}",
                self.examples.join(", ")
            ));
        }
        if !self.learned_patterns.is_empty() {
            let patterns: Vec<&str> = self.learned_patterns.iter().map(|p| p.pattern.as_str()).collect();
            self.guidance
                .push(format!("Confirmed values usually match: {}", patterns.join(" or ")));
        }
    }
}

/// Immutable configuration for one analysis or batch run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeConfiguration {
    pub template_id: TemplateId,
    pub template_version: u32,

    /// Enabled fields in template order
    pub fields: Vec<RuntimeField>,
}

impl RuntimeConfiguration {
    pub fn field(&self, name: &str) -> Option<&RuntimeField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Copy keeping only the named fields, in template order
    pub fn restricted_to(&self, names: &BTreeSet<String>) -> RuntimeConfiguration {
        RuntimeConfiguration {
            template_id: self.template_id,
            template_version: self.template_version,
            fields: self
                .fields
                .iter()
                .filter(|f| names.contains(&f.name))
                .cloned()
                .collect(),
        }
    }
}

/// Merge template rules with learned hints
///
/// Pure: the same template and hints always produce the same configuration.
/// Authored `data_type` and `regex_hint` win; a learned type only fills in
/// for fields left as `text`; learned examples and patterns are appended as
/// extra guidance.
pub fn build_configuration(
    template: &Template,
    hints: &[TemplateFieldHint],
) -> Result<RuntimeConfiguration> {
    template.validate()?;

    let mut by_field: HashMap<FieldId, &TemplateFieldHint> = HashMap::new();
    for hint in hints {
        by_field.insert(hint.template_field_id, hint);
    }

    let mut fields = Vec::new();
    for field in template.enabled_fields() {
        let mut runtime = RuntimeField::from_field(field);
        if let Some(hint) = by_field.remove(&field.id) {
            runtime.merge_hint(hint);
        }
        fields.push(runtime);
    }

    for field_id in by_field.keys() {
        debug!(
            template_id = template.id,
            field_id, "ignoring hint for a disabled or unknown field"
        );
    }

    Ok(RuntimeConfiguration {
        template_id: template.id,
        template_version: template.version,
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use formsight_core::{Error, AUTO_LEARNING_SOURCE};

    fn hint(field_id: FieldId, type_hint: DataType) -> TemplateFieldHint {
        TemplateFieldHint {
            template_field_id: field_id,
            source: AUTO_LEARNING_SOURCE.to_string(),
            type_hint,
            examples: vec!["05.03.2024".into(), "11.12.2023".into()],
            regex_patterns: vec![LearnedPattern {
                pattern: r"^\d{2}\.\d{2}\.\d{4}$".into(),
                support: 2,
            }],
            generated_at: Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap(),
        }
    }

    fn template() -> Template {
        Template::new(
            7,
            "invoice",
            vec![
                TemplateField::new(1, "issued").with_guidance("Date printed at the top"),
                TemplateField::new(2, "total")
                    .with_data_type(DataType::Number)
                    .with_regex_hint(r"^\d+$"),
                TemplateField::new(3, "memo").enabled(false),
            ],
        )
    }

    #[test]
    fn test_learned_type_fills_text_fields() {
        let config = build_configuration(&template(), &[hint(1, DataType::Date)]).unwrap();
        let issued = config.field("issued").unwrap();
        assert_eq!(issued.data_type, DataType::Date);
        assert_eq!(issued.type_source, TypeSource::Learned);
    }

    #[test]
    fn test_authored_type_and_regex_win() {
        let config = build_configuration(&template(), &[hint(2, DataType::Date)]).unwrap();
        let total = config.field("total").unwrap();
        assert_eq!(total.data_type, DataType::Number);
        assert_eq!(total.type_source, TypeSource::Template);
        assert_eq!(total.regex_hint.as_deref(), Some(r"^\d+$"));
        assert_eq!(total.learned_patterns.len(), 1);
    }

    #[test]
    fn test_guidance_is_appended() {
        let config = build_configuration(&template(), &[hint(1, DataType::Date)]).unwrap();
        let guidance = &config.field("issued").unwrap().guidance;
        assert_eq!(guidance[0], "Date printed at the top");
        assert!(guidance[1].contains("05.03.2024"));
        assert!(guidance[2].contains(r"\d{2}"));
    }

    #[test]
    fn test_disabled_and_unknown_hints_ignored() {
        let config =
            build_configuration(&template(), &[hint(3, DataType::Date), hint(99, DataType::Number)])
                .unwrap();
        assert_eq!(config.fields.len(), 2);
        assert!(config.field("memo").is_none());
    }

    #[test]
    fn test_invalid_template_rejected() {
        let mut template = template();
        template.fields[0].handwriting_threshold = Some(2.0);
        let err = build_configuration(&template, &[]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_build_is_pure() {
        let hints = vec![hint(1, DataType::Date)];
        let a = build_configuration(&template(), &hints).unwrap();
        let b = build_configuration(&template(), &hints).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_patterns_compiled_once_per_run() {
        let config = build_configuration(&template(), &[hint(1, DataType::Date), hint(2, DataType::Date)]).unwrap();

        let issued = &config.field("issued").unwrap().patterns;
        assert!(issued.hint.is_none());
        assert_eq!(issued.learned_search.len(), 1);
        assert!(issued.learned_search[0].is_match("Tarih 05.03.2024"));

        let total = &config.field("total").unwrap().patterns;
        assert_eq!(total.hint.as_ref().map(Regex::as_str), Some(r"^\d+$"));
        assert!(total.hint_matches("118", "118"));
        assert!(!total.hint_matches("118,00", "118.00"));
        assert_eq!(total.learned_search.len(), 1);
    }

    #[test]
    fn test_uncompilable_learned_pattern_is_skipped() {
        let mut bad = hint(1, DataType::Text);
        bad.regex_patterns.push(LearnedPattern {
            pattern: "([unclosed".into(),
            support: 1,
        });
        let config = build_configuration(&template(), &[bad]).unwrap();
        let issued = config.field("issued").unwrap();
        assert_eq!(issued.learned_patterns.len(), 2);
        assert_eq!(issued.patterns.learned_search.len(), 1);
    }

    #[test]
    fn test_restricted_to() {
        let config = build_configuration(&template(), &[]).unwrap();
        let names: BTreeSet<String> = ["total".to_string()].into_iter().collect();
        let restricted = config.restricted_to(&names);
        assert_eq!(restricted.field_names().collect::<Vec<_>>(), vec!["total"]);
    }
}
