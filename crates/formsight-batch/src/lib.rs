//! Formsight Batch
//!
//! Maps many documents against one template with bounded concurrency and
//! folds the results into triage worklists.
//!
//! - [`BatchRunner`] fans documents out to the field mapper, publishes a
//!   [`BatchStatus`] after each one, and honours cooperative cancellation
//!   between documents
//! - [`TriageAggregator`] separates failed documents from mapped documents
//!   that still have low-confidence fields

pub mod runner;
pub mod triage;

pub use runner::{BatchConfig, BatchHandle, BatchJob, BatchReport, BatchRunner};
pub use triage::{
    BatchState, BatchStatus, DocumentRun, FailedDocument, LowConfidenceField, LowConfidenceItem,
    TriageAggregator,
};
