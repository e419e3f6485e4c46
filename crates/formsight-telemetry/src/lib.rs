//! Formsight Telemetry
//!
//! Tamper-evident audit trail for mapping, reanalysis, correction, learning,
//! and batch events.
//!
//! Provides:
//! - SHA-256 hash-chained [`AuditEvent`]s with [`verify_chain`]
//! - Append-only JSON-lines persistence with query support
//! - A background [`AuditService`] that keeps disk writes off the request path

pub mod audit;
pub mod persistence;
pub mod service;

pub use audit::{verify_chain, AuditChain, AuditEvent, AuditEventKind, ChainBreak};
pub use persistence::{AuditConfig, AuditQuery, AuditReader, AuditWriter, ChainReport};
pub use service::AuditService;
