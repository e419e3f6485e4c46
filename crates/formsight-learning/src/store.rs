//! Correction and hint persistence seams
//!
//! Corrections are append-only; hints are replaced wholesale per template.
//! The in-memory implementations back the CLI and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use formsight_core::{
    Correction, DocumentId, Error, FieldId, NewCorrection, Result, TemplateFieldHint, TemplateId,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

/// History query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrectionFilter {
    #[serde(default)]
    pub document_id: Option<DocumentId>,

    #[serde(default)]
    pub template_field_id: Option<FieldId>,

    #[serde(default)]
    pub limit: Option<usize>,
}

impl CorrectionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(mut self, document_id: DocumentId) -> Self {
        self.document_id = Some(document_id);
        self
    }

    pub fn field(mut self, field_id: FieldId) -> Self {
        self.template_field_id = Some(field_id);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, correction: &Correction) -> bool {
        self.document_id.map_or(true, |id| correction.document_id == id)
            && self
                .template_field_id
                .map_or(true, |id| correction.template_field_id == Some(id))
    }
}

/// Append-only correction history
#[async_trait]
pub trait CorrectionStore: Send + Sync {
    /// Store a correction
    ///
    /// A resubmission of the same (document, field, corrected value) updates
    /// the stored row's context and returns it instead of appending.
    async fn append(&self, correction: NewCorrection, created_at: DateTime<Utc>) -> Result<Correction>;

    /// Most recent corrections for any of `field_ids`, newest first
    async fn recent_for_fields(&self, field_ids: &[FieldId], limit: usize) -> Result<Vec<Correction>>;

    /// Filtered history, newest first
    async fn history(&self, filter: &CorrectionFilter) -> Result<Vec<Correction>>;
}

/// Per-template hint storage with replace-all semantics
#[async_trait]
pub trait HintStore: Send + Sync {
    async fn replace_all(&self, template_id: TemplateId, hints: Vec<TemplateFieldHint>) -> Result<()>;

    async fn hints_for_template(&self, template_id: TemplateId) -> Result<Vec<TemplateFieldHint>>;
}

/// In-memory correction history
#[derive(Debug, Default)]
pub struct InMemoryCorrectionStore {
    rows: RwLock<Vec<Correction>>,
    next_id: AtomicI64,
}

impl InMemoryCorrectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

fn newest_first(rows: &mut [Correction]) {
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

#[async_trait]
impl CorrectionStore for InMemoryCorrectionStore {
    async fn append(&self, correction: NewCorrection, created_at: DateTime<Utc>) -> Result<Correction> {
        if correction.corrected_value.trim().is_empty() {
            return Err(Error::validation("corrected value must not be empty"));
        }

        let mut rows = self.rows.write();
        if let Some(existing) = rows.iter_mut().find(|row| {
            row.document_id == correction.document_id
                && row.template_field_id == correction.template_field_id
                && row.corrected_value == correction.corrected_value
        }) {
            existing.context.extend(correction.context);
            if correction.original_value.is_some() {
                existing.original_value = correction.original_value;
            }
            if correction.user_id.is_some() {
                existing.user_id = correction.user_id;
            }
            return Ok(existing.clone());
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let stored = correction.into_correction(id, created_at);
        rows.push(stored.clone());
        Ok(stored)
    }

    async fn recent_for_fields(&self, field_ids: &[FieldId], limit: usize) -> Result<Vec<Correction>> {
        let mut matching: Vec<Correction> = self
            .rows
            .read()
            .iter()
            .filter(|row| row.template_field_id.is_some_and(|id| field_ids.contains(&id)))
            .cloned()
            .collect();
        newest_first(&mut matching);
        matching.truncate(limit);
        Ok(matching)
    }

    async fn history(&self, filter: &CorrectionFilter) -> Result<Vec<Correction>> {
        let mut matching: Vec<Correction> = self
            .rows
            .read()
            .iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect();
        newest_first(&mut matching);
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }
}

/// In-memory hint table
#[derive(Debug, Default)]
pub struct InMemoryHintStore {
    hints: RwLock<HashMap<TemplateId, Vec<TemplateFieldHint>>>,
}

impl InMemoryHintStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HintStore for InMemoryHintStore {
    async fn replace_all(&self, template_id: TemplateId, hints: Vec<TemplateFieldHint>) -> Result<()> {
        self.hints.write().insert(template_id, hints);
        Ok(())
    }

    async fn hints_for_template(&self, template_id: TemplateId) -> Result<Vec<TemplateFieldHint>> {
        Ok(self.hints.read().get(&template_id).cloned().unwrap_or_default())
    }
}
