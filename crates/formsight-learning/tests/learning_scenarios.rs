//! Learning service and refresh queue behaviour

use async_trait::async_trait;
use formsight_core::{
    DataType, Error, FieldId, NewCorrection, Result, Template, TemplateField, TemplateFieldHint,
    TemplateId,
};
use formsight_learning::{
    HintStore, InMemoryCorrectionStore, InMemoryHintStore, LearningConfig, RefreshQueue,
    TemplateLearningService,
};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Hint store that can delay, hang, or fail writes
struct InstrumentedHintStore {
    inner: InMemoryHintStore,
    delay: Option<Duration>,
    hang: bool,
    fail: bool,
    panic: bool,
    writes: AtomicU32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl InstrumentedHintStore {
    fn new() -> Self {
        Self {
            inner: InMemoryHintStore::new(),
            delay: None,
            hang: false,
            fail: false,
            panic: false,
            writes: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    fn panicking(mut self) -> Self {
        self.panic = true;
        self
    }
}

#[async_trait]
impl HintStore for InstrumentedHintStore {
    async fn replace_all(&self, template_id: TemplateId, hints: Vec<TemplateFieldHint>) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.panic {
            panic!("hint store lost its connection");
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::storage("hint table is read-only"));
        }
        self.inner.replace_all(template_id, hints).await
    }

    async fn hints_for_template(&self, template_id: TemplateId) -> Result<Vec<TemplateFieldHint>> {
        self.inner.hints_for_template(template_id).await
    }
}

fn template(id: TemplateId) -> Template {
    Template::new(
        id,
        "customer",
        vec![TemplateField::new(10, "city"), TemplateField::new(11, "since")],
    )
}

fn correction(document_id: i64, field_id: FieldId, value: &str) -> NewCorrection {
    NewCorrection {
        document_id,
        template_field_id: Some(field_id),
        original_value: None,
        corrected_value: value.to_string(),
        context: Default::default(),
        user_id: Some(1),
    }
}

async fn seeded_service(hints: Arc<dyn HintStore>) -> Arc<TemplateLearningService> {
    let service = TemplateLearningService::new(
        Arc::new(InMemoryCorrectionStore::new()),
        hints,
        LearningConfig::default(),
    )
    .unwrap();
    service
        .record_corrections(vec![
            correction(1, 10, "Istanbul"),
            correction(2, 10, "istanbul "),
            correction(3, 10, "Ankara"),
            correction(1, 11, "2021-04-01"),
            correction(2, 11, "2022-09-15"),
        ])
        .await
        .unwrap();
    Arc::new(service)
}

#[tokio::test]
async fn test_city_corrections_produce_text_hint() {
    let service = seeded_service(Arc::new(InMemoryHintStore::new())).await;
    service.refresh_template(&template(1)).await.unwrap();

    let response = service.hints_response(1).await.unwrap();
    let city = &response.hints[&10];
    assert_eq!(city.examples, vec!["Istanbul", "Ankara"]);
    assert_eq!(city.type_hint, DataType::Text);
    assert_eq!(response.hints[&11].type_hint, DataType::Date);
}

#[tokio::test]
async fn test_refresh_is_idempotent() {
    let service = seeded_service(Arc::new(InMemoryHintStore::new())).await;

    service.refresh_template(&template(1)).await.unwrap();
    let first = serde_json::to_string(&service.hints_for_template(1).await.unwrap()).unwrap();

    service.refresh_template(&template(1)).await.unwrap();
    let second = serde_json::to_string(&service.hints_for_template(1).await.unwrap()).unwrap();

    assert_eq!(first, second);
}

#[tokio::test(start_paused = true)]
async fn test_queue_coalesces_triggers_per_template() {
    let store = Arc::new(InstrumentedHintStore::new().with_delay(Duration::from_millis(50)));
    let service = seeded_service(store.clone()).await;
    let queue = RefreshQueue::start(service);

    let template = template(1);
    for _ in 0..5 {
        queue.trigger(&template);
    }
    queue.wait_idle().await;

    // one run in flight, one queued behind it, three merged into the queued one
    assert_eq!(store.writes.load(Ordering::SeqCst), 2);
    assert_eq!(store.max_in_flight.load(Ordering::SeqCst), 1);

    let status = queue.status(1).unwrap();
    assert_eq!(status.runs, 2);
    assert_eq!(status.coalesced, 3);
    assert_eq!(status.last_hint_count, Some(2));
    assert_eq!(queue.outstanding(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_templates_refresh_independently() {
    let store = Arc::new(InstrumentedHintStore::new().with_delay(Duration::from_millis(50)));
    let service = seeded_service(store.clone()).await;
    let queue = RefreshQueue::start(service);

    queue.trigger(&template(1));
    queue.trigger(&template(2));
    queue.wait_idle().await;

    assert_eq!(store.writes.load(Ordering::SeqCst), 2);
    assert_eq!(store.max_in_flight.load(Ordering::SeqCst), 2);
    assert_eq!(queue.status(2).unwrap().runs, 1);
}

#[tokio::test]
async fn test_refresh_failure_is_recorded_not_propagated() {
    let store = Arc::new(InstrumentedHintStore::new().failing());
    let service = seeded_service(store).await;
    let queue = RefreshQueue::start(service);

    queue.trigger(&template(1));
    queue.wait_idle().await;

    let status = queue.status(1).unwrap();
    assert_eq!(status.failures, 1);
    assert!(status.last_error.unwrap().contains("read-only"));
}

#[tokio::test(start_paused = true)]
async fn test_refresh_timeout_is_recorded() {
    let store = Arc::new(InstrumentedHintStore::new().hanging());
    let service = seeded_service(store).await;
    let queue = RefreshQueue::start(service);

    queue.trigger(&template(1));
    queue.wait_idle().await;

    let status = queue.status(1).unwrap();
    assert_eq!(status.failures, 1);
    assert_eq!(status.last_error.as_deref(), Some("refresh timed out"));
}

#[tokio::test]
async fn test_panicking_refresh_does_not_wedge_the_queue() {
    let store = Arc::new(InstrumentedHintStore::new().panicking());
    let service = seeded_service(store.clone()).await;
    let queue = RefreshQueue::start(service);

    queue.trigger(&template(1));
    queue.wait_idle().await;

    let status = queue.status(1).unwrap();
    assert_eq!(status.runs, 1);
    assert_eq!(status.failures, 1);
    assert_eq!(status.last_error.as_deref(), Some("refresh task panicked"));

    // the template is free to refresh again
    queue.trigger(&template(1));
    queue.wait_idle().await;

    assert_eq!(queue.status(1).unwrap().runs, 2);
    assert_eq!(store.writes.load(Ordering::SeqCst), 2);
    assert_eq!(queue.outstanding(), 0);
}
