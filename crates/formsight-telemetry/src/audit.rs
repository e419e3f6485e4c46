//! Hash-chained audit events
//!
//! Every event carries the hash of its predecessor, so editing, removing, or
//! reordering a persisted line breaks the chain from that point on.

use chrono::{DateTime, Utc};
use formsight_core::{
    Correction, DocumentId, DocumentMapping, TemplateFieldHint, TemplateId,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    DocumentMapped,
    FieldsReanalyzed,
    CorrectionRecorded,
    HintsRefreshed,
    BatchCompleted,
}

impl AuditEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentMapped => "document_mapped",
            Self::FieldsReanalyzed => "fields_reanalyzed",
            Self::CorrectionRecorded => "correction_recorded",
            Self::HintsRefreshed => "hints_refreshed",
            Self::BatchCompleted => "batch_completed",
        }
    }
}

/// A single audit event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub kind: AuditEventKind,
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<TemplateId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<DocumentId>,

    #[serde(default)]
    pub data: Value,

    #[serde(default)]
    pub previous_hash: Option<String>,

    #[serde(default)]
    pub hash: Option<String>,
}

impl AuditEvent {
    pub fn new(kind: AuditEventKind) -> Self {
        Self {
            id: format!("evt_{}", uuid::Uuid::new_v4()),
            kind,
            timestamp: Utc::now(),
            template_id: None,
            document_id: None,
            data: Value::Null,
            previous_hash: None,
            hash: None,
        }
    }

    pub fn with_template(mut self, template_id: TemplateId) -> Self {
        self.template_id = Some(template_id);
        self
    }

    pub fn with_document(mut self, document_id: DocumentId) -> Self {
        self.document_id = Some(document_id);
        self
    }

    /// Attach a payload; payloads that fail to serialize are recorded as null
    pub fn with_data(mut self, data: impl Serialize) -> Self {
        self.data = serde_json::to_value(data).unwrap_or(Value::Null);
        self
    }

    pub fn document_mapped(mapping: &DocumentMapping) -> Self {
        Self::new(AuditEventKind::DocumentMapped)
            .with_template(mapping.template_id)
            .with_document(mapping.document_id)
            .with_data(json!({
                "template_version": mapping.template_version,
                "overall_confidence": mapping.overall_confidence,
                "unresolved_fields": mapping.unresolved_fields(),
                "rules": mapping.applied_rules.len(),
                "error": mapping.error,
            }))
    }

    pub fn fields_reanalyzed(mapping: &DocumentMapping, requested: &[String]) -> Self {
        Self::new(AuditEventKind::FieldsReanalyzed)
            .with_template(mapping.template_id)
            .with_document(mapping.document_id)
            .with_data(json!({
                "requested_fields": requested,
                "overall_confidence": mapping.overall_confidence,
                "error": mapping.error,
            }))
    }

    pub fn correction_recorded(correction: &Correction) -> Self {
        Self::new(AuditEventKind::CorrectionRecorded)
            .with_document(correction.document_id)
            .with_data(json!({
                "correction_id": correction.id,
                "template_field_id": correction.template_field_id,
                "user_id": correction.user_id,
            }))
    }

    pub fn hints_refreshed(template_id: TemplateId, hints: &[TemplateFieldHint]) -> Self {
        let fields: Vec<_> = hints.iter().map(|h| h.template_field_id).collect();
        Self::new(AuditEventKind::HintsRefreshed)
            .with_template(template_id)
            .with_data(json!({ "fields": fields }))
    }

    pub fn batch_completed(template_id: TemplateId, summary: impl Serialize) -> Self {
        Self::new(AuditEventKind::BatchCompleted)
            .with_template(template_id)
            .with_data(summary)
    }

    /// Hash over every field except `hash` itself
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update(self.kind.as_str().as_bytes());
        hasher.update(self.timestamp.to_rfc3339().as_bytes());
        if let Some(template_id) = self.template_id {
            hasher.update(template_id.to_le_bytes());
        }
        if let Some(document_id) = self.document_id {
            hasher.update(document_id.to_le_bytes());
        }
        hasher.update(self.data.to_string().as_bytes());
        if let Some(prev) = &self.previous_hash {
            hasher.update(prev.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Links events into a chain as they are appended
#[derive(Debug, Default)]
pub struct AuditChain {
    last_hash: Option<String>,
}

impl AuditChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue a chain whose last persisted hash is `last_hash`
    pub fn resume(last_hash: Option<String>) -> Self {
        Self { last_hash }
    }

    pub fn last_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }

    pub fn link(&mut self, mut event: AuditEvent) -> AuditEvent {
        event.previous_hash = self.last_hash.clone();
        let hash = event.compute_hash();
        event.hash = Some(hash.clone());
        self.last_hash = Some(hash);
        event
    }
}

/// Where and why a chain stopped verifying
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainBreak {
    pub index: usize,
    pub event_id: String,
    pub reason: String,
}

/// Check every link; returns the first break
pub fn verify_chain(events: &[AuditEvent]) -> std::result::Result<(), ChainBreak> {
    let mut previous: Option<&str> = None;
    for (index, event) in events.iter().enumerate() {
        let fail = |reason: &str| ChainBreak {
            index,
            event_id: event.id.clone(),
            reason: reason.to_string(),
        };
        if event.previous_hash.as_deref() != previous {
            return Err(fail("previous hash does not match"));
        }
        match event.hash.as_deref() {
            Some(hash) if hash == event.compute_hash() => {}
            Some(_) => return Err(fail("content does not match hash")),
            None => return Err(fail("event is not hashed")),
        }
        previous = event.hash.as_deref();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chained(kinds: &[AuditEventKind]) -> Vec<AuditEvent> {
        let mut chain = AuditChain::new();
        kinds.iter().map(|k| chain.link(AuditEvent::new(*k))).collect()
    }

    #[test]
    fn test_chain_verifies() {
        let events = chained(&[
            AuditEventKind::DocumentMapped,
            AuditEventKind::CorrectionRecorded,
            AuditEventKind::HintsRefreshed,
        ]);
        assert!(verify_chain(&events).is_ok());
        assert_eq!(events[1].previous_hash, events[0].hash);
        assert!(events[0].previous_hash.is_none());
    }

    #[test]
    fn test_tampered_payload_is_detected() {
        let mut events = chained(&[AuditEventKind::DocumentMapped, AuditEventKind::BatchCompleted]);
        events[0].data = json!({"overall_confidence": 1.0});

        let err = verify_chain(&events).unwrap_err();
        assert_eq!(err.index, 0);
        assert_eq!(err.reason, "content does not match hash");
    }

    #[test]
    fn test_removed_event_is_detected() {
        let mut events = chained(&[
            AuditEventKind::DocumentMapped,
            AuditEventKind::FieldsReanalyzed,
            AuditEventKind::CorrectionRecorded,
        ]);
        events.remove(1);

        let err = verify_chain(&events).unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(err.reason, "previous hash does not match");
    }

    #[test]
    fn test_hash_survives_json_round_trip() {
        let events = chained(&[AuditEventKind::HintsRefreshed]);
        let line = serde_json::to_string(&events[0]).unwrap();
        let parsed: AuditEvent = serde_json::from_str(&line).unwrap();
        assert!(verify_chain(&[parsed]).is_ok());
    }
}
