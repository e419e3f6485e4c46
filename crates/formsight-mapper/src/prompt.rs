//! Model request construction

use crate::heuristics::Evidence;
use crate::model::{DocumentSummary, FieldSpec, PrimaryRequest, PrimarySuggestion, SpecialistRequest};
use crate::runtime_config::RuntimeField;
use formsight_core::{DataType, FieldMapping, OcrDocument};

/// Longest isolated context handed to the specialist tier, in characters
pub const MAX_SPECIALIST_CONTEXT_CHARS: usize = 500;

const MAX_EVIDENCE_PER_FIELD: usize = 5;

pub const PRIMARY_INSTRUCTIONS: &str = "\
You extract field values from OCR text of a business document.
Return only a JSON object of the form \
{\"mappings\": {\"<field name>\": {\"value\": <string or null>, \"confidence\": <0..1>}}}.
Include every requested field. Use null when a value is not present; never invent values.
Dates use DD.MM.YYYY. Numbers keep the document's digits without currency symbols.
Prefer candidate values listed for a field when they fit its description and pattern.";

pub const SPECIALIST_INSTRUCTIONS: &str = "\
You re-read a single field that a first pass could not read reliably, often handwriting.
Return only a JSON object of the form {\"value\": <string or null>, \"confidence\": <0..1>, \"notes\": <string>}.
Use null when the value is illegible; never guess.";

/// Describe a field for a model request
pub fn field_spec(field: &RuntimeField, evidence: &[Evidence]) -> FieldSpec {
    FieldSpec {
        name: field.name.clone(),
        label: field.label.clone(),
        data_type: field.data_type,
        required: field.required,
        regex_hint: field.regex_hint.clone(),
        guidance: field.guidance.clone(),
        examples: if field.examples.is_empty() {
            default_examples(field.data_type)
        } else {
            field.examples.clone()
        },
        evidence: evidence
            .iter()
            .take(MAX_EVIDENCE_PER_FIELD)
            .map(|e| e.value.clone())
            .collect(),
    }
}

fn default_examples(data_type: DataType) -> Vec<String> {
    match data_type {
        DataType::Date => vec!["05.03.2024".to_string()],
        DataType::Number => vec!["1250.50".to_string()],
        DataType::Text => Vec::new(),
    }
}

pub fn primary_request(fields: Vec<FieldSpec>, text: String) -> PrimaryRequest {
    PrimaryRequest {
        instructions: PRIMARY_INSTRUCTIONS.to_string(),
        fields,
        text,
    }
}

pub fn specialist_request(
    field: FieldSpec,
    context: String,
    document: &OcrDocument,
    primary: Option<&FieldMapping>,
) -> SpecialistRequest {
    let image_ref = document.crop(&field.name).and_then(|c| c.image_ref.clone());
    SpecialistRequest {
        instructions: SPECIALIST_INSTRUCTIONS.to_string(),
        field,
        context,
        summary: DocumentSummary {
            word_count: document.word_count,
            average_confidence: document.average_confidence,
        },
        image_ref,
        primary_suggestion: primary.map(|p| PrimarySuggestion {
            value: p.value.clone(),
            confidence: p.confidence,
        }),
    }
}

/// Text around a field: its OCR crop, or lines mentioning its label or candidates
pub fn isolate_context(document: &OcrDocument, field: &RuntimeField, evidence: &[Evidence]) -> String {
    if let Some(crop) = document.crop(&field.name) {
        if !crop.text.trim().is_empty() {
            return truncate_chars(crop.text.trim(), MAX_SPECIALIST_CONTEXT_CHARS);
        }
    }

    let label = field.label.to_lowercase();
    let name = field.name.replace('_', " ").to_lowercase();
    let lines: Vec<&str> = document.raw_text.lines().collect();

    let mut picked: Vec<usize> = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        let lowered = line.to_lowercase();
        let mentions_field = (!label.is_empty() && lowered.contains(&label)) || lowered.contains(&name);
        let has_candidate = evidence.iter().any(|e| line.contains(e.value.as_str()));
        if mentions_field || has_candidate {
            picked.push(idx);
            if idx + 1 < lines.len() {
                picked.push(idx + 1);
            }
        }
    }
    picked.sort_unstable();
    picked.dedup();

    let context = if picked.is_empty() {
        document.raw_text.trim().to_string()
    } else {
        picked
            .into_iter()
            .map(|i| lines[i].trim())
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    };
    truncate_chars(&context, MAX_SPECIALIST_CONTEXT_CHARS)
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Render a primary request as a single prompt for chat-style transports
pub fn render_primary(request: &PrimaryRequest) -> String {
    let fields = serde_json::to_string_pretty(&request.fields).unwrap_or_else(|_| "[]".to_string());
    format!(
        "FIELDS:\n{}\n\nOCR TEXT:\n\"\"\"\n{}\n\"\"\"",
        fields, request.text
    )
}

/// Render a specialist request as a single prompt for chat-style transports
pub fn render_specialist(request: &SpecialistRequest) -> String {
    let field = serde_json::to_string_pretty(&request.field).unwrap_or_else(|_| "{}".to_string());
    let summary = serde_json::to_string(&request.summary).unwrap_or_else(|_| "{}".to_string());
    let mut prompt = format!(
        "FIELD:\n{}\n\nDOCUMENT SUMMARY: {}\n\nCONTEXT:\n\"\"\"\n{}\n\"\"\"",
        field, summary, request.context
    );
    if let Some(suggestion) = &request.primary_suggestion {
        prompt.push_str(&format!(
            "\n\nFIRST PASS SUGGESTION: {} (confidence {:.2})",
            suggestion.value.as_deref().unwrap_or("null"),
            suggestion.confidence
        ));
    }
    if let Some(image) = &request.image_ref {
        prompt.push_str(&format!("\n\nFIELD IMAGE: {}", image));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristics::EvidenceMethod;
    use formsight_core::{FieldCrop, TemplateField};

    fn runtime(name: &str, label: &str) -> RuntimeField {
        RuntimeField::from_field(&TemplateField::new(1, name).with_display_name(label))
    }

    #[test]
    fn test_context_prefers_crop() {
        let doc = OcrDocument::new(1, "Header\nSignature: ???\nFooter").with_crop(
            "signature",
            FieldCrop {
                text: "A. Yilmaz".into(),
                confidence: Some(0.4),
                image_ref: None,
            },
        );
        let context = isolate_context(&doc, &runtime("signature", "Signature"), &[]);
        assert_eq!(context, "A. Yilmaz");
    }

    #[test]
    fn test_context_from_label_lines() {
        let text = "ACME Ltd\nAddress line\nTeslim Alan:\nMehmet K.\nFooter";
        let doc = OcrDocument::new(1, text);
        let context = isolate_context(&doc, &runtime("receiver", "Teslim Alan"), &[]);
        assert_eq!(context, "Teslim Alan:\nMehmet K.");
    }

    #[test]
    fn test_context_is_truncated() {
        let doc = OcrDocument::new(1, "x".repeat(2_000));
        let context = isolate_context(&doc, &runtime("unknown", ""), &[]);
        assert_eq!(context.chars().count(), MAX_SPECIALIST_CONTEXT_CHARS);
    }

    #[test]
    fn test_field_spec_carries_evidence() {
        let evidence = vec![Evidence {
            value: "05.03.2024".into(),
            confidence: 0.9,
            method: EvidenceMethod::RegexHint,
        }];
        let mut field = runtime("issued", "Issued");
        field.data_type = DataType::Date;
        let spec = field_spec(&field, &evidence);
        assert_eq!(spec.evidence, vec!["05.03.2024"]);
        assert_eq!(spec.examples, vec!["05.03.2024"]);

        let prompt = render_primary(&primary_request(vec![spec], "Tarih: 05.03.2024".into()));
        assert!(prompt.contains("\"issued\""));
        assert!(prompt.contains("Tarih: 05.03.2024"));
    }
}
