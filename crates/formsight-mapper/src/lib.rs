//! Formsight Mapper
//!
//! Turns OCR text into confidence-scored field values.
//!
//! Each enabled field is routed to one of three tiers:
//!
//! - **Heuristic**: regex hints, learned patterns, and label anchoring; the
//!   only tier for `ocr` fields and the fallback for `auto` fields
//! - **Primary**: one batched model request per document
//! - **Specialist**: one narrow request per escalated field, dispatched
//!   concurrently under a per-document cap
//!
//! Model calls go through [`ExtractionModel`], so transports can be swapped
//! and tests can script replies.

pub mod coercion;
pub mod config;
pub mod heuristics;
pub mod mapper;
pub mod masking;
pub mod model;
pub mod openai;
pub mod prompt;
pub mod reanalysis;
pub mod response;
pub mod retry;
pub mod runtime_config;

pub use config::{MapperConfig, RetryPolicy};
pub use heuristics::{Evidence, EvidenceMethod, HeuristicExtractor};
pub use mapper::FieldMapper;
pub use model::{
    ExtractionModel, FieldSpec, ModelReply, ModelTier, PrimaryRequest, SpecialistRequest,
    UnavailableModel,
};
pub use openai::{ModelConfig, OpenAiModel};
pub use reanalysis::{ReanalysisCoordinator, ReanalysisOutcome};
pub use response::FieldOutcome;
pub use runtime_config::{build_configuration, RuntimeConfiguration, RuntimeField, TypeSource};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::mapper::FieldMapper;
    pub use crate::model::{ExtractionModel, ModelReply};
    pub use crate::reanalysis::ReanalysisCoordinator;
    pub use crate::runtime_config::{build_configuration, RuntimeConfiguration};
    pub use formsight_core::prelude::*;
}
