//! Scripted extraction model for testing
//!
//! Replies are queued per tier (specialist replies per field name) so tests
//! can drive the mapper through success, malformed output, and failures.

#![allow(dead_code)]

use async_trait::async_trait;
use formsight_core::{Error, Result};
use formsight_mapper::{ExtractionModel, ModelReply, PrimaryRequest, SpecialistRequest};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// One scripted model behaviour
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(String),
    Transient,
    Fail,
    Hang,
}

impl Scripted {
    pub fn json(value: serde_json::Value) -> Self {
        Scripted::Reply(value.to_string())
    }
}

/// A configurable mock model for testing
pub struct MockModel {
    primary: Mutex<VecDeque<Scripted>>,
    primary_default: Scripted,
    specialist: Mutex<HashMap<String, VecDeque<Scripted>>>,
    latency: Option<Duration>,

    primary_calls: AtomicU32,
    specialist_calls: AtomicU32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,

    primary_requests: Mutex<Vec<PrimaryRequest>>,
    specialist_requests: Mutex<Vec<SpecialistRequest>>,
}

impl MockModel {
    /// Create a mock whose primary pass always returns an empty object
    pub fn new() -> Self {
        Self {
            primary: Mutex::new(VecDeque::new()),
            primary_default: Scripted::Reply("{}".to_string()),
            specialist: Mutex::new(HashMap::new()),
            latency: None,
            primary_calls: AtomicU32::new(0),
            specialist_calls: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            primary_requests: Mutex::new(Vec::new()),
            specialist_requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a primary-pass behaviour; the last queued one repeats
    pub fn with_primary(mut self, scripted: Scripted) -> Self {
        self.primary.get_mut().push_back(scripted.clone());
        self.primary_default = scripted;
        self
    }

    /// Queue a one-off primary-pass behaviour that is not repeated
    pub fn then_primary(self, scripted: Scripted) -> Self {
        self.primary.lock().push_back(scripted);
        self
    }

    /// Queue a specialist behaviour for one field
    pub fn with_specialist(self, field: &str, scripted: Scripted) -> Self {
        self.specialist
            .lock()
            .entry(field.to_string())
            .or_default()
            .push_back(scripted);
        self
    }

    /// Simulate latency on every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn primary_calls(&self) -> u32 {
        self.primary_calls.load(Ordering::SeqCst)
    }

    pub fn specialist_calls(&self) -> u32 {
        self.specialist_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn primary_requests(&self) -> Vec<PrimaryRequest> {
        self.primary_requests.lock().clone()
    }

    pub fn specialist_requests(&self) -> Vec<SpecialistRequest> {
        self.specialist_requests.lock().clone()
    }

    async fn perform(&self, scripted: Scripted) -> Result<ModelReply> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let result = match scripted {
            Scripted::Reply(content) => Ok(ModelReply::new(content)),
            Scripted::Transient => Err(Error::transient("rate limited")),
            Scripted::Fail => Err(Error::service("model rejected the request")),
            Scripted::Hang => {
                std::future::pending::<()>().await;
                Err(Error::internal("unreachable"))
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl ExtractionModel for MockModel {
    async fn extract_primary(&self, request: &PrimaryRequest) -> Result<ModelReply> {
        self.primary_calls.fetch_add(1, Ordering::SeqCst);
        self.primary_requests.lock().push(request.clone());
        let scripted = self
            .primary
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.primary_default.clone());
        self.perform(scripted).await
    }

    async fn extract_specialist(&self, request: &SpecialistRequest) -> Result<ModelReply> {
        self.specialist_calls.fetch_add(1, Ordering::SeqCst);
        self.specialist_requests.lock().push(request.clone());
        let scripted = self
            .specialist
            .lock()
            .get_mut(&request.field.name)
            .and_then(|queue| {
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            })
            .unwrap_or(Scripted::Reply(r#"{"value": null}"#.to_string()));
        self.perform(scripted).await
    }

    fn name(&self) -> &str {
        "mock"
    }
}
