//! Field mapper: routes each field to heuristic, primary, or specialist extraction

use crate::coercion::ValueCoercer;
use crate::config::MapperConfig;
use crate::heuristics::{Evidence, HeuristicExtractor};
use crate::masking::{DataMasker, MaskSession};
use crate::model::{ExtractionModel, FieldSpec, ModelTier, SpecialistRequest};
use crate::prompt;
use crate::response::{self, FieldOutcome};
use crate::retry::call_with_retry;
use crate::runtime_config::{RuntimeConfiguration, RuntimeField};
use formsight_core::{
    clamp_confidence, Alternate, ConfidenceClassifier, DocumentMapping, Error, FieldMapping,
    LlmTier, MappingSource, OcrDocument, ProcessingMode, Result, RuleKind,
};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

type EvidenceMap = HashMap<String, Vec<Evidence>>;

fn evidence_of<'a>(evidence: &'a EvidenceMap, field_name: &str) -> &'a [Evidence] {
    evidence.get(field_name).map(Vec::as_slice).unwrap_or(&[])
}

/// Result of one extraction tier for one field, before adjustments
#[derive(Debug, Clone)]
enum Resolution {
    Value { value: String, confidence: f32 },
    Unresolved,
    Failed(String),
}

/// Maps OCR text onto a template's fields
pub struct FieldMapper {
    model: Arc<dyn ExtractionModel>,
    config: MapperConfig,
    classifier: ConfidenceClassifier,
    heuristics: HeuristicExtractor,
    coercer: ValueCoercer,
    masker: Option<DataMasker>,
}

impl FieldMapper {
    /// Create a new mapper over the given model
    pub fn new(model: Arc<dyn ExtractionModel>, config: MapperConfig) -> Result<Self> {
        config.validate()?;
        let masker = if config.mask_sensitive_data {
            Some(DataMasker::new()?)
        } else {
            None
        };

        Ok(Self {
            model,
            classifier: ConfidenceClassifier::new(config.thresholds)?,
            heuristics: HeuristicExtractor::new(config.auto_date_limit, config.auto_number_limit)?,
            coercer: ValueCoercer::new()?,
            masker,
            config,
        })
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    pub fn classifier(&self) -> &ConfidenceClassifier {
        &self.classifier
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Map every field of `configuration` for one document
    ///
    /// Fails only when the document has no extractable text; model failures
    /// are recorded on the affected fields and in `applied_rules`.
    #[instrument(skip_all, fields(document_id = document.document_id, template_id = configuration.template_id))]
    pub async fn map_document(
        &self,
        document: &OcrDocument,
        configuration: &RuntimeConfiguration,
    ) -> Result<DocumentMapping> {
        if !document.has_text() {
            metrics::counter!("formsight_documents_total", "outcome" => "failed").increment(1);
            return Err(Error::document("no extractable text"));
        }

        let start = Instant::now();
        let mut mapping = DocumentMapping::empty(
            document.document_id,
            configuration.template_id,
            configuration.template_version,
        );
        let mut session = self.masker.as_ref().map(DataMasker::session);

        let evidence: EvidenceMap = configuration
            .fields
            .iter()
            .map(|f| (f.name.clone(), self.heuristics.collect(&document.raw_text, f)))
            .collect();

        let (heuristic_fields, model_fields): (Vec<&RuntimeField>, Vec<&RuntimeField>) = configuration
            .fields
            .iter()
            .partition(|f| f.processing_mode == ProcessingMode::Ocr);

        for field in heuristic_fields {
            let resolution = match evidence_of(&evidence, &field.name).first() {
                Some(best) => {
                    mapping.record(
                        &field.name,
                        RuleKind::HeuristicOnly,
                        format!("ocr mode, {} match", best.method.as_str()),
                    );
                    Resolution::Value {
                        value: best.value.clone(),
                        confidence: best.confidence,
                    }
                }
                None => {
                    mapping.record(&field.name, RuleKind::HeuristicOnly, "ocr mode, no match");
                    Resolution::Unresolved
                }
            };
            let result = self.finalize(field, document, resolution, MappingSource::Heuristic, &mut mapping);
            mapping.insert(result);
        }

        if !model_fields.is_empty() {
            self.primary_pass(document, &model_fields, &evidence, session.as_mut(), &mut mapping)
                .await;
            self.specialist_pass(document, &model_fields, &evidence, session.as_mut(), &mut mapping)
                .await;
        }

        mapping.recompute_overall(configuration.field_names());

        let outcome = if mapping.error.is_some() { "partial" } else { "ok" };
        metrics::counter!("formsight_documents_total", "outcome" => outcome).increment(1);
        info!(
            fields = mapping.fields.len(),
            overall_confidence = mapping.overall_confidence,
            latency_ms = start.elapsed().as_millis() as u64,
            "document mapped"
        );

        Ok(mapping)
    }

    async fn primary_pass(
        &self,
        document: &OcrDocument,
        fields: &[&RuntimeField],
        evidence: &EvidenceMap,
        mut session: Option<&mut MaskSession<'_>>,
        mapping: &mut DocumentMapping,
    ) {
        let specs = fields
            .iter()
            .map(|f| {
                let mut spec = prompt::field_spec(f, evidence_of(evidence, &f.name));
                if let Some(session) = session.as_deref_mut() {
                    mask_spec(&mut spec, session);
                }
                spec
            })
            .collect();
        let text = match session.as_deref_mut() {
            Some(session) => session.mask(&document.raw_text),
            None => document.raw_text.clone(),
        };
        let request = prompt::primary_request(specs, text);

        debug!(fields = fields.len(), "sending primary request");
        let reply = call_with_retry(&self.config.primary_retry, ModelTier::Primary, || {
            self.model.extract_primary(&request)
        })
        .await;

        let unmask = |value: String| match session.as_deref() {
            Some(session) => session.unmask(&value),
            None => value,
        };

        let parsed = match reply {
            Ok(reply) => response::parse_primary(&reply.content)
                .ok_or_else(|| "primary reply could not be parsed".to_string()),
            Err(e) => Err(format!("primary pass failed: {}", e)),
        };

        match parsed {
            Ok(map) => {
                for field in fields {
                    let candidates = evidence_of(evidence, &field.name);
                    let (resolution, source) = match map.get(&field.name).map(response::outcome_for) {
                        Some(FieldOutcome::Resolved { value, confidence }) => {
                            mapping.record(
                                &field.name,
                                RuleKind::PrimaryPass,
                                format!("model confidence {:.2}", confidence),
                            );
                            (
                                Resolution::Value {
                                    value: unmask(value),
                                    confidence,
                                },
                                MappingSource::LlmPrimary,
                            )
                        }
                        Some(FieldOutcome::Unresolved) => {
                            mapping.record(&field.name, RuleKind::PrimaryPass, "model returned no value");
                            (Resolution::Unresolved, MappingSource::LlmPrimary)
                        }
                        Some(FieldOutcome::Malformed { raw }) => {
                            mapping.record(
                                &field.name,
                                RuleKind::MalformedValue,
                                format!("unusable model value: {}", truncate(&raw, 80)),
                            );
                            self.fallback(field, candidates, mapping, Resolution::Unresolved)
                        }
                        None => {
                            mapping.record(
                                &field.name,
                                RuleKind::MissingFromResponse,
                                "field key absent from model reply",
                            );
                            self.fallback(field, candidates, mapping, Resolution::Unresolved)
                        }
                    };
                    let result = self.finalize(field, document, resolution, source, mapping);
                    mapping.insert(result);
                }
            }
            Err(message) => {
                warn!("{}", message);
                mapping.error = Some(message.clone());
                for field in fields {
                    mapping.record(&field.name, RuleKind::CallFailed, message.clone());
                    let (resolution, source) = self.fallback(
                        field,
                        evidence_of(evidence, &field.name),
                        mapping,
                        Resolution::Failed(message.clone()),
                    );
                    let result = self.finalize(field, document, resolution, source, mapping);
                    mapping.insert(result);
                }
            }
        }
    }

    /// Heuristic evidence for `auto` fields, otherwise `otherwise`
    fn fallback(
        &self,
        field: &RuntimeField,
        evidence: &[Evidence],
        mapping: &mut DocumentMapping,
        otherwise: Resolution,
    ) -> (Resolution, MappingSource) {
        if field.processing_mode == ProcessingMode::Auto {
            if let Some(best) = evidence.first() {
                mapping.record(
                    &field.name,
                    RuleKind::HeuristicFallback,
                    format!("using {} match", best.method.as_str()),
                );
                return (
                    Resolution::Value {
                        value: best.value.clone(),
                        confidence: best.confidence,
                    },
                    MappingSource::Heuristic,
                );
            }
        }
        (otherwise, MappingSource::LlmPrimary)
    }

    async fn specialist_pass(
        &self,
        document: &OcrDocument,
        fields: &[&RuntimeField],
        evidence: &EvidenceMap,
        mut session: Option<&mut MaskSession<'_>>,
        mapping: &mut DocumentMapping,
    ) {
        let mut jobs: Vec<(usize, &RuntimeField, String, SpecialistRequest)> = Vec::new();
        for (index, field) in fields.iter().enumerate() {
            let current = mapping.get(&field.name);
            let Some(reason) = self.escalation_reason(field, current) else {
                continue;
            };

            let candidates = evidence_of(evidence, &field.name);
            let mut spec = prompt::field_spec(field, candidates);
            let mut context = prompt::isolate_context(document, field, candidates);
            if let Some(session) = session.as_deref_mut() {
                mask_spec(&mut spec, session);
                context = session.mask(&context);
            }
            let request = prompt::specialist_request(spec, context, document, current);
            jobs.push((index, field, reason, request));
        }

        if jobs.is_empty() {
            return;
        }
        metrics::counter!("formsight_escalations_total").increment(jobs.len() as u64);
        debug!(escalated = jobs.len(), "dispatching specialist requests");

        let calls: Vec<_> = jobs
            .into_iter()
            .map(|(index, field, reason, request)| async move {
                let reply = call_with_retry(&self.config.specialist_retry, ModelTier::Specialist, || {
                    self.model.extract_specialist(&request)
                })
                .await;
                (index, field, reason, reply)
            })
            .collect();
        let mut results: Vec<_> = stream::iter(calls)
            .buffer_unordered(self.config.specialist_concurrency)
            .collect()
            .await;
        results.sort_by_key(|(index, ..)| *index);

        for (_, field, reason, reply) in results {
            let outcome = match reply {
                Ok(reply) => Ok(response::parse_specialist(&reply.content, &field.name)),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(Some(FieldOutcome::Resolved { value, confidence })) => {
                    let value = match session.as_deref() {
                        Some(session) => session.unmask(&value),
                        None => value,
                    };
                    mapping.record(
                        &field.name,
                        RuleKind::EscalatedToSpecialist,
                        format!("{}; specialist confidence {:.2}", reason, confidence),
                    );
                    let previous = mapping.fields.remove(&field.name);
                    let mut result = self.finalize(
                        field,
                        document,
                        Resolution::Value { value, confidence },
                        MappingSource::LlmSpecialist,
                        mapping,
                    );
                    if let Some(previous) = previous {
                        result.alternates.push(Alternate {
                            value: previous.value,
                            confidence: previous.confidence,
                            source: previous.source,
                        });
                    }
                    mapping.insert(result);
                }
                Ok(_) => {
                    mapping.record(
                        &field.name,
                        RuleKind::SpecialistKeptPrimary,
                        format!("{}; specialist returned no usable value", reason),
                    );
                }
                Err(e) => {
                    let message = format!("specialist pass failed: {}", e);
                    mapping.record(
                        &field.name,
                        RuleKind::SpecialistKeptPrimary,
                        format!("{}; {}", reason, message),
                    );
                    if let Some(existing) = mapping.fields.get_mut(&field.name) {
                        existing.error = Some(message);
                    }
                }
            }
        }
    }

    fn escalation_reason(&self, field: &RuntimeField, current: Option<&FieldMapping>) -> Option<String> {
        if field.auto_detected_handwriting {
            return Some("handwriting detected".to_string());
        }
        if field.llm_tier == LlmTier::Specialist {
            return Some("specialist tier requested".to_string());
        }
        let threshold = field
            .handwriting_threshold
            .or(self.config.default_handwriting_threshold)?;
        let confidence = current.map(|m| m.confidence).unwrap_or(0.0);
        (confidence < threshold).then(|| {
            format!(
                "primary confidence {:.2} below threshold {:.2}",
                confidence, threshold
            )
        })
    }

    /// Apply coercion, OCR blending, the regex cap, and required-field checks
    fn finalize(
        &self,
        field: &RuntimeField,
        document: &OcrDocument,
        resolution: Resolution,
        source: MappingSource,
        mapping: &mut DocumentMapping,
    ) -> FieldMapping {
        let (raw, confidence, error) = match resolution {
            Resolution::Value { value, confidence } => (Some(value), confidence, None),
            Resolution::Unresolved => (None, 0.0, None),
            Resolution::Failed(message) => (None, 0.0, Some(message)),
        };
        let mut confidence = clamp_confidence(confidence);

        let value = raw.and_then(|raw| match self.coercer.coerce(&raw, field.data_type) {
            Some(normalized) => Some((raw, normalized)),
            None if raw.trim().is_empty() => None,
            None => {
                let penalized = confidence * self.config.coercion_penalty;
                mapping.record(
                    &field.name,
                    RuleKind::CoercionFailed,
                    format!(
                        "'{}' is not a valid {}; confidence {:.2} -> {:.2}",
                        truncate(&raw, 40),
                        field.data_type.as_str(),
                        confidence,
                        penalized
                    ),
                );
                confidence = penalized;
                let kept = crate::coercion::collapse_whitespace(&raw);
                Some((raw, kept))
            }
        });

        if value.is_some() && source != MappingSource::Heuristic {
            if let Some(ocr) = document.crop(&field.name).and_then(|c| c.confidence) {
                let weight = self.config.model_confidence_weight;
                let blended = weight * confidence + (1.0 - weight) * clamp_confidence(ocr);
                mapping.record(
                    &field.name,
                    RuleKind::OcrBlend,
                    format!("blended with OCR confidence {:.2} -> {:.2}", ocr, blended),
                );
                confidence = blended;
            }
        }

        if let (Some((raw, normalized)), Some(pattern)) = (&value, &field.regex_hint) {
            if !field.patterns.hint_matches(raw, normalized) {
                let cap = (self.classifier.thresholds().high - 0.01).max(0.0);
                let capped = (confidence * self.config.regex_cap_multiplier).min(cap);
                if capped < confidence {
                    mapping.record(
                        &field.name,
                        RuleKind::RegexOverride,
                        format!("value does not match {}; confidence {:.2} -> {:.2}", pattern, confidence, capped),
                    );
                    confidence = capped;
                }
            }
        }

        let value = value.map(|(_, normalized)| normalized);
        let validation_gap = value.is_none() && field.required;
        if value.is_none() {
            confidence = 0.0;
            if field.required {
                mapping.record(&field.name, RuleKind::RequiredMissing, "required field has no value");
            }
        }

        let confidence = clamp_confidence(confidence);
        let mut result = FieldMapping::new(
            &field.name,
            value,
            confidence,
            self.classifier.classify(confidence),
            source,
        );
        result.validation_gap = validation_gap;
        result.error = error;
        result
    }
}

/// Learned examples and guidance may carry values from earlier documents
fn mask_spec(spec: &mut FieldSpec, session: &mut MaskSession<'_>) {
    for value in spec
        .evidence
        .iter_mut()
        .chain(spec.examples.iter_mut())
        .chain(spec.guidance.iter_mut())
    {
        *value = session.mask(value);
    }
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        value.to_string()
    } else {
        let mut cut: String = value.chars().take(max).collect();
        cut.push_str("...");
        cut
    }
}
