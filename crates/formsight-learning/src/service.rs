//! Template learning service

use crate::config::LearningConfig;
use crate::inference::infer_field_hint;
use crate::store::{CorrectionFilter, CorrectionStore, HintStore};
use chrono::Utc;
use formsight_core::{
    Correction, FieldId, HintsResponse, NewCorrection, Result, Template, TemplateFieldHint,
    TemplateId,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Records corrections and regenerates per-field hints from them
pub struct TemplateLearningService {
    corrections: Arc<dyn CorrectionStore>,
    hints: Arc<dyn HintStore>,
    config: LearningConfig,
}

impl TemplateLearningService {
    pub fn new(
        corrections: Arc<dyn CorrectionStore>,
        hints: Arc<dyn HintStore>,
        config: LearningConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            corrections,
            hints,
            config,
        })
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    /// Append one correction to the history
    pub async fn record_correction(&self, correction: NewCorrection) -> Result<Correction> {
        let stored = self.corrections.append(correction, Utc::now()).await?;
        debug!(
            correction_id = stored.id,
            document_id = stored.document_id,
            field_id = ?stored.template_field_id,
            "correction recorded"
        );
        Ok(stored)
    }

    /// Append several corrections, stopping at the first rejected one
    pub async fn record_corrections(&self, corrections: Vec<NewCorrection>) -> Result<Vec<Correction>> {
        let mut stored = Vec::with_capacity(corrections.len());
        for correction in corrections {
            stored.push(self.record_correction(correction).await?);
        }
        Ok(stored)
    }

    pub async fn history(&self, filter: &CorrectionFilter) -> Result<Vec<Correction>> {
        self.corrections.history(filter).await
    }

    /// Regenerate every hint of `template` from its correction sample
    ///
    /// The previous hint set is replaced wholesale, so fields that lost all
    /// their corrections (or had learning switched off) lose their hint.
    #[instrument(skip_all, fields(template_id = template.id))]
    pub async fn refresh_template(&self, template: &Template) -> Result<Vec<TemplateFieldHint>> {
        let field_ids: Vec<FieldId> = template
            .fields
            .iter()
            .filter(|f| f.learning_enabled)
            .map(|f| f.id)
            .collect();

        let sample = if field_ids.is_empty() {
            Vec::new()
        } else {
            self.corrections
                .recent_for_fields(&field_ids, self.config.sample_size)
                .await?
        };

        let mut by_field: HashMap<FieldId, Vec<&Correction>> = HashMap::new();
        for correction in &sample {
            if let Some(field_id) = correction.template_field_id {
                by_field.entry(field_id).or_default().push(correction);
            }
        }

        let hints: Vec<TemplateFieldHint> = field_ids
            .iter()
            .filter_map(|id| {
                let samples = by_field.get(id)?;
                infer_field_hint(*id, samples, &self.config)
            })
            .collect();

        self.hints.replace_all(template.id, hints.clone()).await?;
        info!(
            sampled = sample.len(),
            hints = hints.len(),
            "template hints refreshed"
        );
        Ok(hints)
    }

    pub async fn hints_for_template(&self, template_id: TemplateId) -> Result<Vec<TemplateFieldHint>> {
        self.hints.hints_for_template(template_id).await
    }

    /// Hints of a template in the shape served to the API layer
    pub async fn hints_response(&self, template_id: TemplateId) -> Result<HintsResponse> {
        let hints = self.hints_for_template(template_id).await?;
        Ok(HintsResponse::new(template_id, &hints))
    }
}
