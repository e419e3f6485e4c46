//! Targeted re-runs of a subset of fields

use crate::mapper::FieldMapper;
use crate::runtime_config::RuntimeConfiguration;
use formsight_core::{DocumentMapping, Error, FieldMapping, MappingSource, OcrDocument, Result, RuleKind};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// Result of a reanalysis request
#[derive(Debug, Clone, Serialize)]
pub struct ReanalysisOutcome {
    pub operation: &'static str,
    pub mapping: DocumentMapping,
    pub requested_fields: Vec<String>,

    /// Requested fields that now carry a value from this run
    pub resolved_fields: Vec<String>,

    /// Requested fields the run left unresolved; prior values were kept
    pub unresolved_fields: Vec<String>,

    #[serde(serialize_with = "serialize_millis")]
    pub latency: Duration,
}

fn serialize_millis<S: serde::Serializer>(value: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
}

/// Re-runs the mapper on requested fields and merges into an existing mapping
pub struct ReanalysisCoordinator {
    mapper: Arc<FieldMapper>,
}

impl ReanalysisCoordinator {
    pub fn new(mapper: Arc<FieldMapper>) -> Self {
        Self { mapper }
    }

    /// Reanalyze `fields` of `document`, leaving every other field untouched
    ///
    /// `configuration` is the full per-run configuration; it is narrowed to
    /// the requested fields before routing, so the usual escalation rules
    /// apply. An unresolved result never replaces a prior value, and neither
    /// does a heuristic fallback standing in for a model miss.
    #[instrument(skip_all, fields(document_id = document.document_id, template_id = configuration.template_id))]
    pub async fn reanalyze(
        &self,
        document: &OcrDocument,
        configuration: &RuntimeConfiguration,
        current: &DocumentMapping,
        fields: &[String],
    ) -> Result<ReanalysisOutcome> {
        if fields.is_empty() {
            return Err(Error::validation("no fields requested for reanalysis"));
        }
        if current.document_id != document.document_id {
            return Err(Error::validation(format!(
                "mapping belongs to document {}, not {}",
                current.document_id, document.document_id
            )));
        }
        if current.template_id != configuration.template_id {
            return Err(Error::validation(format!(
                "mapping belongs to template {}, not {}",
                current.template_id, configuration.template_id
            )));
        }

        let requested: BTreeSet<String> = fields.iter().cloned().collect();
        let unknown: Vec<&str> = requested
            .iter()
            .filter(|name| configuration.field(name).is_none())
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(Error::validation(format!(
                "unknown or disabled fields: {}",
                unknown.join(", ")
            )));
        }

        let start = Instant::now();
        let restricted = configuration.restricted_to(&requested);
        let rerun = self.mapper.map_document(document, &restricted).await?;

        let mut merged = current.clone();
        merged.error = rerun.error.clone();
        merged.applied_rules.extend(rerun.applied_rules.iter().cloned());

        let mut resolved_fields = Vec::new();
        let mut unresolved_fields = Vec::new();
        for name in restricted.field_names() {
            let Some(fresh) = rerun.get(name) else {
                continue;
            };
            let missed = model_missed(&rerun, name, fresh);
            if fresh.is_resolved() && !missed {
                merged.insert(fresh.clone());
                resolved_fields.push(name.to_string());
                continue;
            }

            unresolved_fields.push(name.to_string());
            match current.get(name) {
                Some(prior) if prior.is_resolved() => {
                    let detail = if missed {
                        format!(
                            "model gave no usable value; kept prior value at {:.2}",
                            prior.confidence
                        )
                    } else {
                        format!(
                            "rerun left field unresolved; kept prior value at {:.2}",
                            prior.confidence
                        )
                    };
                    merged.record(name, RuleKind::PriorRetained, detail);
                }
                _ => merged.insert(fresh.clone()),
            }
        }

        merged.template_version = rerun.template_version;
        merged.recompute_overall(configuration.field_names());

        if !unresolved_fields.is_empty() {
            warn!(fields = ?unresolved_fields, "reanalysis left fields unresolved");
        }
        info!(
            requested = requested.len(),
            resolved = resolved_fields.len(),
            overall_confidence = merged.overall_confidence,
            "reanalysis merged"
        );

        Ok(ReanalysisOutcome {
            operation: "reanalyze",
            mapping: merged,
            requested_fields: requested.into_iter().collect(),
            resolved_fields,
            unresolved_fields,
            latency: start.elapsed(),
        })
    }
}

/// The model omitted the field, returned garbage, or failed, and no
/// specialist result replaced the heuristic fallback
fn model_missed(rerun: &DocumentMapping, name: &str, fresh: &FieldMapping) -> bool {
    if fresh.source == MappingSource::LlmSpecialist {
        return false;
    }
    rerun.applied_rules.iter().any(|rule| {
        rule.field == name
            && matches!(
                rule.rule,
                RuleKind::MissingFromResponse
                    | RuleKind::MalformedValue
                    | RuleKind::CallFailed
                    | RuleKind::HeuristicFallback
            )
    })
}
