//! Formsight Core
//!
//! Core types and utilities shared across Formsight components.
//!
//! This crate provides:
//! - Error types and result handling
//! - Template and field schema with validation
//! - OCR input shapes consumed by the field mapper
//! - Field mapping results, correction records, and learned hints
//! - Confidence classification into low/medium/high status tiers

pub mod confidence;
pub mod document;
pub mod error;
pub mod learning;
pub mod mapping;
pub mod template;

pub use confidence::{clamp_confidence, ConfidenceClassifier, ConfidenceThresholds, FieldStatus};
pub use document::{FieldCrop, OcrDocument};
pub use error::{Error, Result};
pub use learning::{
    Correction, HintView, HintsResponse, LearnedPattern, NewCorrection, TemplateFieldHint,
    AUTO_LEARNING_SOURCE,
};
pub use mapping::{Alternate, AppliedRule, DocumentMapping, FieldMapping, MappingSource, RuleKind};
pub use template::{
    DataType, DocumentId, FieldId, LlmTier, ProcessingMode, Template, TemplateField, TemplateId,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::confidence::{ConfidenceClassifier, FieldStatus};
    pub use crate::document::OcrDocument;
    pub use crate::error::{Error, Result};
    pub use crate::mapping::{DocumentMapping, FieldMapping, MappingSource};
    pub use crate::template::{DataType, Template, TemplateField};
}
