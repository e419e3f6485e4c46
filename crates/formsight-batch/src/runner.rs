//! Bounded-concurrency batch runner

use crate::triage::{BatchState, BatchStatus, DocumentRun, TriageAggregator};
use formsight_core::{DocumentMapping, Error, OcrDocument, Result, Template, TemplateFieldHint};
use formsight_learning::RefreshQueue;
use formsight_mapper::{build_configuration, FieldMapper, RuntimeConfiguration};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Batch settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Documents mapped at the same time
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Largest accepted batch
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

fn default_concurrency() -> usize {
    4
}

fn default_max_batch_size() -> usize {
    100
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::config("batch concurrency must be at least 1"));
        }
        if self.max_batch_size == 0 {
            return Err(Error::config("batch max_batch_size must be at least 1"));
        }
        Ok(())
    }
}

/// Documents to map against one template run
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub batch_job_id: String,
    pub template: Template,
    pub configuration: RuntimeConfiguration,
    pub documents: Vec<OcrDocument>,
}

impl BatchJob {
    /// Build the run configuration from the template and its current hints
    pub fn new(template: Template, hints: &[TemplateFieldHint], documents: Vec<OcrDocument>) -> Result<Self> {
        check_unique_ids(&documents)?;
        let configuration = build_configuration(&template, hints)?;
        Ok(Self {
            batch_job_id: Uuid::new_v4().to_string(),
            template,
            configuration,
            documents,
        })
    }
}

/// Final result of a batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub status: BatchStatus,

    /// Mappings of processed documents, sorted by document id
    pub mappings: Vec<DocumentMapping>,
}

/// Handle to a batch running in the background
pub struct BatchHandle {
    batch_job_id: String,
    status: watch::Receiver<BatchStatus>,
    cancel: CancellationToken,
    task: JoinHandle<Result<BatchReport>>,
}

impl BatchHandle {
    pub fn batch_job_id(&self) -> &str {
        &self.batch_job_id
    }

    /// Latest status snapshot
    pub fn status(&self) -> BatchStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BatchStatus> {
        self.status.clone()
    }

    /// Stop starting new documents; documents already being mapped finish
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn wait(self) -> Result<BatchReport> {
        self.task
            .await
            .map_err(|e| Error::internal(format!("batch task failed: {}", e)))?
    }
}

/// Maps many documents with bounded concurrency
pub struct BatchRunner {
    mapper: Arc<FieldMapper>,
    config: BatchConfig,
    refresh: Option<Arc<RefreshQueue>>,
}

impl BatchRunner {
    pub fn new(mapper: Arc<FieldMapper>, config: BatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            mapper,
            config,
            refresh: None,
        })
    }

    /// Enqueue a hint refresh for the template when a batch finishes
    pub fn with_refresh_queue(mut self, queue: Arc<RefreshQueue>) -> Self {
        self.refresh = Some(queue);
        self
    }

    /// Start a batch in the background
    pub fn spawn(self: &Arc<Self>, job: BatchJob) -> Result<BatchHandle> {
        self.check_size(&job)?;

        let (status_tx, status_rx) = watch::channel(
            TriageAggregator::new(job.batch_job_id.clone(), job.documents.len()).status(BatchState::Running),
        );
        let cancel = CancellationToken::new();
        let batch_job_id = job.batch_job_id.clone();

        let runner = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { runner.run(job, token, status_tx).await });

        Ok(BatchHandle {
            batch_job_id,
            status: status_rx,
            cancel,
            task,
        })
    }

    /// Run a batch to completion, publishing a snapshot after every document
    ///
    /// Cancellation is checked before each document starts; a document that
    /// has started is always mapped to the end.
    #[instrument(skip_all, fields(batch_job_id = %job.batch_job_id, template_id = job.template.id))]
    pub async fn run(
        &self,
        job: BatchJob,
        cancel: CancellationToken,
        status: watch::Sender<BatchStatus>,
    ) -> Result<BatchReport> {
        self.check_size(&job)?;

        let BatchJob {
            batch_job_id,
            template,
            configuration,
            documents,
        } = job;
        let total = documents.len();
        info!(documents = total, concurrency = self.config.concurrency, "batch started");

        let mut triage = TriageAggregator::new(batch_job_id, total);
        status.send_replace(triage.status(BatchState::Running));

        let configuration = Arc::new(configuration);
        let pending: Vec<_> = documents
            .into_iter()
            .map(|document| map_one(self.mapper.clone(), configuration.clone(), document, cancel.clone()))
            .collect();
        let mut runs = stream::iter(pending).buffer_unordered(self.config.concurrency);

        let mut mappings = Vec::new();
        while let Some(run) = runs.next().await {
            triage.record(&run);
            match run {
                DocumentRun::Mapped(mapping) => mappings.push(mapping),
                DocumentRun::Failed { document_id, reason } => {
                    warn!(document_id, "document failed: {}", reason);
                }
                DocumentRun::Skipped { document_id } => {
                    debug!(document_id, "document skipped after cancellation");
                }
            }
            status.send_replace(triage.status(BatchState::Running));
        }

        let state = if cancel.is_cancelled() && triage.skipped() > 0 {
            BatchState::Cancelled
        } else {
            BatchState::Completed
        };
        let final_status = triage.status(state);
        status.send_replace(final_status.clone());

        let state_label = match state {
            BatchState::Cancelled => "cancelled",
            _ => "completed",
        };
        metrics::counter!("formsight_batches_total", "state" => state_label).increment(1);
        metrics::counter!("formsight_batch_documents_total", "outcome" => "failed")
            .increment(final_status.failed_files as u64);
        metrics::counter!("formsight_batch_documents_total", "outcome" => "skipped")
            .increment(final_status.skipped_files as u64);

        if let Some(queue) = &self.refresh {
            queue.trigger(&template);
        }

        mappings.sort_by_key(|m| m.document_id);
        info!(
            processed = final_status.processed_files,
            failed = final_status.failed_files,
            skipped = final_status.skipped_files,
            state = ?final_status.state,
            "batch finished"
        );

        Ok(BatchReport {
            status: final_status,
            mappings,
        })
    }

    fn check_size(&self, job: &BatchJob) -> Result<()> {
        if job.documents.len() > self.config.max_batch_size {
            return Err(Error::validation(format!(
                "batch of {} documents exceeds the limit of {}",
                job.documents.len(),
                self.config.max_batch_size
            )));
        }
        check_unique_ids(&job.documents)
    }
}

/// Triage worklists are keyed by document id
fn check_unique_ids(documents: &[OcrDocument]) -> Result<()> {
    let mut seen = HashSet::with_capacity(documents.len());
    let duplicates: BTreeSet<_> = documents
        .iter()
        .map(|d| d.document_id)
        .filter(|id| !seen.insert(*id))
        .collect();
    if duplicates.is_empty() {
        return Ok(());
    }
    let ids: Vec<String> = duplicates.iter().map(ToString::to_string).collect();
    Err(Error::validation(format!(
        "duplicate document ids in batch: {}",
        ids.join(", ")
    )))
}

async fn map_one(
    mapper: Arc<FieldMapper>,
    configuration: Arc<RuntimeConfiguration>,
    document: OcrDocument,
    cancel: CancellationToken,
) -> DocumentRun {
    let document_id = document.document_id;
    if cancel.is_cancelled() {
        return DocumentRun::Skipped { document_id };
    }

    // a panic while mapping one document must not take down the batch
    let task = tokio::spawn(async move { mapper.map_document(&document, &configuration).await });
    match task.await {
        Ok(Ok(mapping)) => DocumentRun::Mapped(mapping),
        Ok(Err(e)) => DocumentRun::Failed {
            document_id,
            reason: e.to_string(),
        },
        Err(e) => DocumentRun::Failed {
            document_id,
            reason: format!("mapping task failed: {}", e),
        },
    }
}
