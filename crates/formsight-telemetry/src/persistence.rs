//! JSON-lines persistence for the audit trail
//!
//! One event per line, appended. A writer reopening an existing log resumes
//! the chain from the last persisted hash.

use crate::audit::{verify_chain, AuditChain, AuditEvent, AuditEventKind, ChainBreak};
use formsight_core::{DocumentId, Error, Result, TemplateId};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Audit trail settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Record events at all
    #[serde(default)]
    pub enabled: bool,

    /// Log file, created on first write
    #[serde(default = "default_path")]
    pub path: PathBuf,

    /// Flush to disk after this many events
    #[serde(default = "default_flush_interval")]
    pub flush_interval: usize,
}

fn default_path() -> PathBuf {
    PathBuf::from("./audit/formsight-audit.jsonl")
}

fn default_flush_interval() -> usize {
    10
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_path(),
            flush_interval: default_flush_interval(),
        }
    }
}

impl AuditConfig {
    pub fn validate(&self) -> Result<()> {
        if self.flush_interval == 0 {
            return Err(Error::config("audit flush_interval must be at least 1"));
        }
        Ok(())
    }
}

/// Appends chained events to the log file
pub struct AuditWriter {
    file: BufWriter<File>,
    chain: AuditChain,
    flush_interval: usize,
    since_flush: usize,
}

impl AuditWriter {
    pub fn open(config: &AuditConfig) -> Result<Self> {
        if let Some(dir) = config.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let last_hash = if config.path.exists() {
            read_events(&config.path)?.last().and_then(|e| e.hash.clone())
        } else {
            None
        };
        if last_hash.is_some() {
            debug!(path = %config.path.display(), "resuming audit chain");
        }

        let file = OpenOptions::new().create(true).append(true).open(&config.path)?;
        Ok(Self {
            file: BufWriter::new(file),
            chain: AuditChain::resume(last_hash),
            flush_interval: config.flush_interval.max(1),
            since_flush: 0,
        })
    }

    /// Chain and append one event, returning it as persisted
    pub fn write_event(&mut self, event: AuditEvent) -> Result<AuditEvent> {
        let event = self.chain.link(event);
        let line = serde_json::to_string(&event)?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;

        self.since_flush += 1;
        if self.since_flush >= self.flush_interval {
            self.flush()?;
        }
        Ok(event)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        self.since_flush = 0;
        Ok(())
    }
}

/// Read every event in file order
///
/// A line that does not parse is a storage error; the log is append-only so
/// any such line means the file was edited or truncated mid-write.
pub fn read_events(path: &Path) -> Result<Vec<AuditEvent>> {
    let reader = BufReader::new(File::open(path)?);
    let mut events = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(&line)
            .map_err(|e| Error::storage(format!("audit line {} is malformed: {}", number + 1, e)))?;
        events.push(event);
    }
    Ok(events)
}

/// Filter for audit queries
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub kind: Option<AuditEventKind>,
    pub template_id: Option<TemplateId>,
    pub document_id: Option<DocumentId>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: AuditEventKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn template(mut self, template_id: TemplateId) -> Self {
        self.template_id = Some(template_id);
        self
    }

    pub fn document(mut self, document_id: DocumentId) -> Self {
        self.document_id = Some(document_id);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, event: &AuditEvent) -> bool {
        self.kind.map_or(true, |k| event.kind == k)
            && self.template_id.map_or(true, |t| event.template_id == Some(t))
            && self.document_id.map_or(true, |d| event.document_id == Some(d))
    }
}

/// Outcome of verifying a log file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    pub events: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub broken_at: Option<ChainBreak>,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.broken_at.is_none()
    }
}

/// Read-side access to a log file
pub struct AuditReader {
    path: PathBuf,
}

impl AuditReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Events matching `query`, oldest first; a missing log is empty
    pub fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(read_events(&self.path)?
            .into_iter()
            .filter(|e| query.matches(e))
            .take(limit)
            .collect())
    }

    pub fn verify(&self) -> Result<ChainReport> {
        let events = if self.path.exists() {
            read_events(&self.path)?
        } else {
            Vec::new()
        };
        let report = ChainReport {
            events: events.len(),
            broken_at: verify_chain(&events).err(),
        };
        info!(events = report.events, intact = report.is_intact(), "audit chain verified");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &Path) -> AuditConfig {
        AuditConfig {
            enabled: true,
            path: dir.join("logs").join("audit.jsonl"),
            flush_interval: 1,
        }
    }

    #[test]
    fn test_reopened_writer_continues_chain() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());

        let first = {
            let mut writer = AuditWriter::open(&config).unwrap();
            writer
                .write_event(AuditEvent::new(AuditEventKind::DocumentMapped).with_document(1))
                .unwrap()
        };

        let mut writer = AuditWriter::open(&config).unwrap();
        let second = writer
            .write_event(AuditEvent::new(AuditEventKind::CorrectionRecorded).with_document(1))
            .unwrap();
        writer.flush().unwrap();

        assert_eq!(second.previous_hash, first.hash);
        let report = AuditReader::new(&config.path).verify().unwrap();
        assert_eq!(report.events, 2);
        assert!(report.is_intact());
    }

    #[test]
    fn test_query_filters_and_limits() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let mut writer = AuditWriter::open(&config).unwrap();
        for document_id in 1..=3 {
            writer
                .write_event(
                    AuditEvent::new(AuditEventKind::DocumentMapped)
                        .with_template(7)
                        .with_document(document_id),
                )
                .unwrap();
        }
        writer
            .write_event(AuditEvent::new(AuditEventKind::HintsRefreshed).with_template(7))
            .unwrap();

        let reader = AuditReader::new(&config.path);
        let mapped = reader
            .query(&AuditQuery::new().kind(AuditEventKind::DocumentMapped).limit(2))
            .unwrap();
        assert_eq!(mapped.len(), 2);
        assert_eq!(mapped[0].document_id, Some(1));

        let doc3 = reader.query(&AuditQuery::new().document(3)).unwrap();
        assert_eq!(doc3.len(), 1);
        assert_eq!(reader.query(&AuditQuery::new().template(7)).unwrap().len(), 4);
    }

    #[test]
    fn test_edited_line_breaks_verification() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let mut writer = AuditWriter::open(&config).unwrap();
        writer
            .write_event(AuditEvent::new(AuditEventKind::DocumentMapped).with_document(4))
            .unwrap();
        writer
            .write_event(AuditEvent::new(AuditEventKind::DocumentMapped).with_document(5))
            .unwrap();
        drop(writer);

        let content = std::fs::read_to_string(&config.path).unwrap();
        std::fs::write(&config.path, content.replacen("\"document_id\":5", "\"document_id\":6", 1)).unwrap();

        let report = AuditReader::new(&config.path).verify().unwrap();
        let broken = report.broken_at.unwrap();
        assert_eq!(broken.index, 1);
    }

    #[test]
    fn test_missing_log_is_empty() {
        let dir = TempDir::new().unwrap();
        let reader = AuditReader::new(dir.path().join("none.jsonl"));
        assert!(reader.query(&AuditQuery::new()).unwrap().is_empty());
        assert!(reader.verify().unwrap().is_intact());
    }
}
