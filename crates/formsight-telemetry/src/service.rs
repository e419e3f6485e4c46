//! Background audit recording
//!
//! Callers hand events to [`AuditService::record`] and never wait on disk.
//! A dedicated writer thread chains and appends them in arrival order.

use crate::audit::AuditEvent;
use crate::persistence::{AuditConfig, AuditQuery, AuditReader, AuditWriter, ChainReport};
use formsight_core::Result;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

enum AuditCommand {
    Record(Box<AuditEvent>),

    /// Flush, then acknowledge
    Flush(oneshot::Sender<()>),

    Shutdown,
}

/// Audit trail handle
///
/// A disabled service accepts events and drops them.
pub struct AuditService {
    sender: Option<mpsc::UnboundedSender<AuditCommand>>,
    reader: AuditReader,
}

impl AuditService {
    /// Open the log and start the writer thread
    pub fn start(config: &AuditConfig) -> Result<Self> {
        config.validate()?;
        let reader = AuditReader::new(&config.path);
        if !config.enabled {
            return Ok(Self { sender: None, reader });
        }

        // open on the caller's thread so a bad path fails here, not silently later
        let writer = AuditWriter::open(config)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("formsight-audit".to_string())
            .spawn(move || run_writer(writer, receiver))?;

        info!(path = %config.path.display(), "audit trail started");
        Ok(Self {
            sender: Some(sender),
            reader,
        })
    }

    pub fn disabled() -> Self {
        Self {
            sender: None,
            reader: AuditReader::new(AuditConfig::default().path),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    pub fn record(&self, event: AuditEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        let kind = event.kind.as_str();
        if let Err(e) = sender.send(AuditCommand::Record(Box::new(event))) {
            warn!("failed to queue audit event: {}", e);
            return;
        }
        metrics::counter!("formsight_audit_events_total", "kind" => kind).increment(1);
    }

    /// Wait until every event recorded so far is on disk
    pub async fn flush(&self) {
        let Some(sender) = &self.sender else {
            return;
        };
        let (ack, done) = oneshot::channel();
        if sender.send(AuditCommand::Flush(ack)).is_err() {
            warn!("audit writer is gone, nothing to flush");
            return;
        }
        let _ = done.await;
    }

    pub fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>> {
        self.reader.query(query)
    }

    pub fn verify(&self) -> Result<ChainReport> {
        self.reader.verify()
    }
}

impl Drop for AuditService {
    fn drop(&mut self) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(AuditCommand::Shutdown);
        }
    }
}

fn run_writer(mut writer: AuditWriter, mut receiver: mpsc::UnboundedReceiver<AuditCommand>) {
    while let Some(command) = receiver.blocking_recv() {
        match command {
            AuditCommand::Record(event) => {
                if let Err(e) = writer.write_event(*event) {
                    error!("failed to write audit event: {}", e);
                }
            }
            AuditCommand::Flush(ack) => {
                if let Err(e) = writer.flush() {
                    error!("failed to flush audit log: {}", e);
                }
                let _ = ack.send(());
            }
            AuditCommand::Shutdown => break,
        }
    }
    if let Err(e) = writer.flush() {
        error!("failed to flush audit log on shutdown: {}", e);
    }
    debug!("audit writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditEventKind;
    use formsight_core::{DocumentMapping, NewCorrection};
    use tempfile::TempDir;

    fn enabled(dir: &std::path::Path) -> AuditConfig {
        AuditConfig {
            enabled: true,
            path: dir.join("audit.jsonl"),
            flush_interval: 100,
        }
    }

    #[tokio::test]
    async fn test_recorded_events_are_chained_on_disk() {
        let dir = TempDir::new().unwrap();
        let service = AuditService::start(&enabled(dir.path())).unwrap();

        let mapping = DocumentMapping::empty(11, 2, 1);
        service.record(AuditEvent::document_mapped(&mapping));
        let correction = NewCorrection {
            document_id: 11,
            template_field_id: Some(5),
            original_value: Some("Ankra".into()),
            corrected_value: "Ankara".into(),
            context: Default::default(),
            user_id: Some(3),
        }
        .into_correction(1, chrono::Utc::now());
        service.record(AuditEvent::correction_recorded(&correction));
        service.flush().await;

        let events = service.query(&AuditQuery::new()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, AuditEventKind::DocumentMapped);
        assert_eq!(events[0].template_id, Some(2));
        assert_eq!(events[1].kind, AuditEventKind::CorrectionRecorded);
        assert_eq!(events[1].data["template_field_id"], 5);
        assert!(service.verify().unwrap().is_intact());
    }

    #[tokio::test]
    async fn test_disabled_service_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let config = AuditConfig {
            enabled: false,
            ..enabled(dir.path())
        };
        let service = AuditService::start(&config).unwrap();
        assert!(!service.is_enabled());

        service.record(AuditEvent::new(AuditEventKind::BatchCompleted));
        service.flush().await;
        assert!(!config.path.exists());
    }
}
