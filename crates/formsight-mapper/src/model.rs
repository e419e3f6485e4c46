//! Two-tier extraction model contract

use async_trait::async_trait;
use formsight_core::{DataType, Result};
use serde::{Deserialize, Serialize};

/// Trait for hosted extraction models
///
/// Implementations return the raw textual reply; parsing and reconciliation
/// happen in the mapper so every transport is held to the same rules.
#[async_trait]
pub trait ExtractionModel: Send + Sync {
    /// Batched pass over the full document text
    async fn extract_primary(&self, request: &PrimaryRequest) -> Result<ModelReply>;

    /// Narrow pass for a single escalated field
    async fn extract_specialist(&self, request: &SpecialistRequest) -> Result<ModelReply>;

    /// Get the model name
    fn name(&self) -> &str;
}

/// Model tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Primary,
    Specialist,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Specialist => "specialist",
        }
    }
}

/// Per-field description sent to a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub label: String,
    pub data_type: DataType,
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex_hint: Option<String>,

    /// Template guidance followed by learned guidance
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub guidance: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,

    /// Candidate values found by pre-detection
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,
}

/// Batched request covering every primary-routed field of a document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrimaryRequest {
    pub instructions: String,
    pub fields: Vec<FieldSpec>,
    pub text: String,
}

/// Summary of the document given to the specialist tier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub word_count: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_confidence: Option<f32>,
}

/// Value the primary pass proposed for an escalated field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrimarySuggestion {
    pub value: Option<String>,
    pub confidence: f32,
}

/// Narrow request for one escalated field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpecialistRequest {
    pub instructions: String,
    pub field: FieldSpec,

    /// Isolated text for the field
    pub context: String,

    pub summary: DocumentSummary,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_suggestion: Option<PrimarySuggestion>,
}

/// Raw reply from a model call
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelReply {
    pub content: String,

    /// Total tokens billed, when the transport reports it
    pub total_tokens: Option<u64>,
}

impl ModelReply {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            total_tokens: None,
        }
    }
}

/// A model that is never available
///
/// Used when no credentials are configured; `auto` fields then resolve
/// through heuristics alone.
#[derive(Debug, Clone, Default)]
pub struct UnavailableModel;

#[async_trait]
impl ExtractionModel for UnavailableModel {
    async fn extract_primary(&self, _request: &PrimaryRequest) -> Result<ModelReply> {
        Err(formsight_core::Error::service("no extraction model configured"))
    }

    async fn extract_specialist(&self, _request: &SpecialistRequest) -> Result<ModelReply> {
        Err(formsight_core::Error::service("no extraction model configured"))
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}
