//! Batch runner scenarios: failures, triage, concurrency, and cancellation

use async_trait::async_trait;
use formsight_core::{Error, OcrDocument, Result, Template, TemplateField};
use formsight_batch::{BatchConfig, BatchJob, BatchRunner, BatchState};
use formsight_learning::{
    InMemoryCorrectionStore, InMemoryHintStore, LearningConfig, RefreshQueue,
    TemplateLearningService,
};
use formsight_mapper::{
    ExtractionModel, FieldMapper, MapperConfig, ModelReply, PrimaryRequest, SpecialistRequest,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Model that reads the receiver with low confidence when the text says so
struct ReceiverModel {
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ReceiverModel {
    fn new(latency: Duration) -> Self {
        Self {
            latency,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ExtractionModel for ReceiverModel {
    async fn extract_primary(&self, request: &PrimaryRequest) -> Result<ModelReply> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let confidence = if request.text.contains("SMUDGED") { 0.3 } else { 0.9 };
        Ok(ModelReply::new(
            json!({"mappings": {"receiver": {"value": "Mehmet K.", "confidence": confidence}}}).to_string(),
        ))
    }

    async fn extract_specialist(&self, _request: &SpecialistRequest) -> Result<ModelReply> {
        Ok(ModelReply::new(json!({"value": null}).to_string()))
    }

    fn name(&self) -> &str {
        "receiver-mock"
    }
}

fn template() -> Template {
    Template::new(
        1,
        "delivery",
        vec![TemplateField::new(1, "receiver").with_display_name("Teslim Alan")],
    )
}

fn document(id: i64) -> OcrDocument {
    OcrDocument::new(id, "Irsaliye\nTeslim Alan: Mehmet K.")
}

fn runner(model: Arc<ReceiverModel>, concurrency: usize) -> Arc<BatchRunner> {
    let mapper = Arc::new(FieldMapper::new(model, MapperConfig::default()).unwrap());
    let config = BatchConfig {
        concurrency,
        ..BatchConfig::default()
    };
    Arc::new(BatchRunner::new(mapper, config).unwrap())
}

#[tokio::test]
async fn test_empty_document_fails_alone() {
    let model = Arc::new(ReceiverModel::new(Duration::from_millis(1)));
    let documents = (1..=10)
        .map(|id| if id == 7 { OcrDocument::new(id, "   ") } else { document(id) })
        .collect();
    let job = BatchJob::new(template(), &[], documents).unwrap();

    let report = runner(model, 4).spawn(job).unwrap().wait().await.unwrap();
    let status = report.status;

    assert_eq!(status.state, BatchState::Completed);
    assert_eq!(status.failed_files, 1);
    assert_eq!(status.processed_files, 9);
    assert_eq!(status.failed_documents.len(), 1);
    assert_eq!(status.failed_documents[0].document_id, 7);
    assert!(status.failed_documents[0].reason.contains("no extractable text"));
    assert_eq!(status.progress, 100.0);

    let ids: Vec<i64> = report.mappings.iter().map(|m| m.document_id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 6, 8, 9, 10]);
}

#[tokio::test]
async fn test_low_confidence_worklist_sorted_by_document() {
    let model = Arc::new(ReceiverModel::new(Duration::from_millis(1)));
    let documents = vec![
        OcrDocument::new(30, "SMUDGED\nTeslim Alan: Mehmet K."),
        document(20),
        OcrDocument::new(10, "SMUDGED\nTeslim Alan: Mehmet K."),
    ];
    let job = BatchJob::new(template(), &[], documents).unwrap();

    let report = runner(model, 3).spawn(job).unwrap().wait().await.unwrap();
    let items = &report.status.low_confidence_items;

    let ids: Vec<i64> = items.iter().map(|i| i.document_id).collect();
    assert_eq!(ids, vec![10, 30]);
    assert_eq!(items[0].fields[0].field_name, "receiver");
    assert_eq!(items[0].fields[0].value.as_deref(), Some("Mehmet K."));
    assert!(report.status.failed_documents.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_is_bounded() {
    let model = Arc::new(ReceiverModel::new(Duration::from_millis(50)));
    let documents = (1..=6).map(document).collect();
    let job = BatchJob::new(template(), &[], documents).unwrap();

    let report = runner(model.clone(), 2).spawn(job).unwrap().wait().await.unwrap();

    assert_eq!(report.status.processed_files, 6);
    assert_eq!(model.max_in_flight.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_oversized_batch_is_rejected() {
    let model = Arc::new(ReceiverModel::new(Duration::from_millis(1)));
    let mapper = Arc::new(FieldMapper::new(model, MapperConfig::default()).unwrap());
    let runner = Arc::new(
        BatchRunner::new(
            mapper,
            BatchConfig {
                concurrency: 2,
                max_batch_size: 3,
            },
        )
        .unwrap(),
    );
    let job = BatchJob::new(template(), &[], (1..=4).map(document).collect()).unwrap();

    let Err(err) = runner.spawn(job) else {
        panic!("oversized batch was accepted");
    };
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn test_duplicate_document_ids_are_rejected() {
    let documents = vec![OcrDocument::new(7, " "), OcrDocument::new(7, "")];
    let Err(err) = BatchJob::new(template(), &[], documents) else {
        panic!("batch with duplicate ids was accepted");
    };
    assert!(matches!(err, Error::Validation(_)));
    assert!(err.to_string().contains('7'));

    // jobs assembled by hand are checked again on submission
    let mut job = BatchJob::new(template(), &[], vec![document(1), document(2)]).unwrap();
    job.documents.push(document(2));
    let model = Arc::new(ReceiverModel::new(Duration::from_millis(1)));
    let Err(err) = runner(model.clone(), 2).spawn(job) else {
        panic!("batch with duplicate ids was accepted");
    };
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(model.in_flight.load(Ordering::SeqCst), 0);
}

#[test]
fn test_zero_concurrency_is_a_config_error() {
    let config = BatchConfig {
        concurrency: 0,
        max_batch_size: 10,
    };
    assert!(matches!(config.validate(), Err(Error::Config(_))));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_new_documents() {
    let model = Arc::new(ReceiverModel::new(Duration::from_millis(100)));
    let documents = (1..=10).map(document).collect();
    let job = BatchJob::new(template(), &[], documents).unwrap();

    let handle = runner(model, 2).spawn(job).unwrap();
    let mut status = handle.subscribe();
    status.wait_for(|s| s.processed_files >= 2).await.unwrap();
    handle.cancel();

    let report = handle.wait().await.unwrap();
    let status = report.status;

    assert_eq!(status.state, BatchState::Cancelled);
    assert!(status.skipped_files > 0);
    assert!(status.processed_files >= 2);
    assert_eq!(status.processed_files + status.failed_files + status.skipped_files, 10);
    assert_eq!(report.mappings.len(), status.processed_files);
    assert!(status.progress < 100.0);
}

#[tokio::test]
async fn test_finished_batch_enqueues_refresh() {
    let learning = Arc::new(
        TemplateLearningService::new(
            Arc::new(InMemoryCorrectionStore::new()),
            Arc::new(InMemoryHintStore::new()),
            LearningConfig::default(),
        )
        .unwrap(),
    );
    let queue = Arc::new(RefreshQueue::start(learning));

    let model = Arc::new(ReceiverModel::new(Duration::from_millis(1)));
    let mapper = Arc::new(FieldMapper::new(model, MapperConfig::default()).unwrap());
    let runner = Arc::new(
        BatchRunner::new(mapper, BatchConfig::default())
            .unwrap()
            .with_refresh_queue(queue.clone()),
    );

    let job = BatchJob::new(template(), &[], vec![document(1), document(2)]).unwrap();
    runner.spawn(job).unwrap().wait().await.unwrap();
    queue.wait_idle().await;

    let refresh = queue.status(1).unwrap();
    assert_eq!(refresh.runs, 1);
    assert_eq!(refresh.failures, 0);
}
