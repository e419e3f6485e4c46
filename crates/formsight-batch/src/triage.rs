//! Batch triage: failure and low-confidence worklists

use formsight_core::{DocumentId, DocumentMapping, FieldStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome of one document within a batch
#[derive(Debug, Clone)]
pub enum DocumentRun {
    Mapped(DocumentMapping),
    Failed { document_id: DocumentId, reason: String },

    /// Not started because the batch was cancelled
    Skipped { document_id: DocumentId },
}

impl DocumentRun {
    pub fn document_id(&self) -> DocumentId {
        match self {
            Self::Mapped(mapping) => mapping.document_id,
            Self::Failed { document_id, .. } | Self::Skipped { document_id } => *document_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Running,
    Completed,
    Cancelled,
}

/// A low-status field with its suggested value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LowConfidenceField {
    pub field_name: String,
    pub value: Option<String>,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LowConfidenceItem {
    pub document_id: DocumentId,

    /// Sorted by field name
    pub fields: Vec<LowConfidenceField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedDocument {
    pub document_id: DocumentId,
    pub reason: String,
}

/// Snapshot of a batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatus {
    pub batch_job_id: String,
    pub state: BatchState,

    /// Share of documents finished (mapped or failed), 0 to 100
    pub progress: f32,

    pub total_files: usize,
    pub processed_files: usize,
    pub failed_files: usize,
    pub skipped_files: usize,

    /// Sorted by document id
    pub low_confidence_items: Vec<LowConfidenceItem>,

    /// Sorted by document id
    pub failed_documents: Vec<FailedDocument>,
}

/// Folds per-document outcomes into a batch status
///
/// Outcomes may arrive in any order; the worklists are kept sorted.
#[derive(Debug)]
pub struct TriageAggregator {
    batch_job_id: String,
    total: usize,
    processed: usize,
    skipped: usize,
    low_confidence: BTreeMap<DocumentId, Vec<LowConfidenceField>>,
    failures: BTreeMap<DocumentId, String>,
}

impl TriageAggregator {
    pub fn new(batch_job_id: impl Into<String>, total: usize) -> Self {
        Self {
            batch_job_id: batch_job_id.into(),
            total,
            processed: 0,
            skipped: 0,
            low_confidence: BTreeMap::new(),
            failures: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, run: &DocumentRun) {
        match run {
            DocumentRun::Mapped(mapping) => {
                self.processed += 1;
                let fields: Vec<LowConfidenceField> = mapping
                    .fields
                    .values()
                    .filter(|m| m.status == FieldStatus::Low)
                    .map(|m| LowConfidenceField {
                        field_name: m.field_name.clone(),
                        value: m.value.clone(),
                        confidence: m.confidence,
                    })
                    .collect();
                if !fields.is_empty() {
                    self.low_confidence.insert(mapping.document_id, fields);
                }
            }
            DocumentRun::Failed { document_id, reason } => {
                self.failures.insert(*document_id, reason.clone());
            }
            DocumentRun::Skipped { .. } => self.skipped += 1,
        }
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn finished(&self) -> usize {
        self.processed + self.failures.len()
    }

    pub fn progress(&self) -> f32 {
        if self.total == 0 {
            return 100.0;
        }
        self.finished() as f32 / self.total as f32 * 100.0
    }

    pub fn status(&self, state: BatchState) -> BatchStatus {
        BatchStatus {
            batch_job_id: self.batch_job_id.clone(),
            state,
            progress: self.progress(),
            total_files: self.total,
            processed_files: self.processed,
            failed_files: self.failures.len(),
            skipped_files: self.skipped,
            low_confidence_items: self
                .low_confidence
                .iter()
                .map(|(document_id, fields)| LowConfidenceItem {
                    document_id: *document_id,
                    fields: fields.clone(),
                })
                .collect(),
            failed_documents: self
                .failures
                .iter()
                .map(|(document_id, reason)| FailedDocument {
                    document_id: *document_id,
                    reason: reason.clone(),
                })
                .collect(),
        }
    }
}
