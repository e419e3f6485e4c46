//! Error types for Formsight

/// Result type alias using Formsight's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Formsight operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed template or field configuration, rejected before any model call
    #[error("validation error: {0}")]
    Validation(String),

    /// Rate limits, overloaded upstream, dropped connections
    #[error("transient service error: {0}")]
    Transient(String),

    /// Non-retryable model service errors
    #[error("model service error: {0}")]
    Service(String),

    /// External call exceeded its deadline
    #[error("operation timed out")]
    Timeout,

    /// The document cannot be mapped at all (e.g. no extractable text)
    #[error("document failure: {0}")]
    Document(String),

    /// Correction or hint store errors
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Network/IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new transient service error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Create a new non-retryable service error
    pub fn service(msg: impl Into<String>) -> Self {
        Self::Service(msg.into())
    }

    /// Create a new document failure
    pub fn document(msg: impl Into<String>) -> Self {
        Self::Document(msg.into())
    }

    /// Create a new storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether a retry may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout)
    }

    /// Short label used for metrics and audit records
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Transient(_) => "transient",
            Self::Service(_) => "service",
            Self::Timeout => "timeout",
            Self::Document(_) => "document",
            Self::Storage(_) => "storage",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
        }
    }
}
