//! Background hint refresh with per-template coalescing
//!
//! Each template has at most one refresh in flight and at most one queued
//! behind it. Triggers that arrive while a refresh is queued merge into it:
//! a refresh always reads the full correction history, so one run after the
//! latest trigger covers every trigger before it.

use crate::service::TemplateLearningService;
use chrono::{DateTime, Utc};
use formsight_core::{Template, TemplateId};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Last known refresh state of one template
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefreshStatus {
    pub runs: u64,
    pub failures: u64,

    /// Triggers merged into an already queued refresh
    pub coalesced: u64,

    pub last_hint_count: Option<usize>,
    pub last_error: Option<String>,
    pub last_finished_at: Option<DateTime<Utc>>,
}

type StatusMap = Arc<RwLock<HashMap<TemplateId, RefreshStatus>>>;

/// Handle to the background refresh task
pub struct RefreshQueue {
    sender: mpsc::UnboundedSender<Template>,
    outstanding: Arc<watch::Sender<usize>>,
    idle: watch::Receiver<usize>,
    status: StatusMap,
}

impl RefreshQueue {
    /// Start the refresh task on the current runtime
    pub fn start(service: Arc<TemplateLearningService>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (outstanding, idle) = watch::channel(0usize);
        let outstanding = Arc::new(outstanding);
        let status: StatusMap = Arc::new(RwLock::new(HashMap::new()));

        let worker = RefreshWorker {
            service,
            outstanding: outstanding.clone(),
            status: status.clone(),
            in_flight: HashSet::new(),
            pending: HashMap::new(),
        };
        tokio::spawn(worker.run(receiver));

        Self {
            sender,
            outstanding,
            idle,
            status,
        }
    }

    /// Request a refresh for `template`; never blocks on the refresh itself
    pub fn trigger(&self, template: &Template) {
        self.outstanding.send_modify(|n| *n += 1);
        if let Err(e) = self.sender.send(template.clone()) {
            self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
            warn!(template_id = template.id, "refresh queue is closed: {}", e);
        }
    }

    /// Triggers not yet covered by a finished refresh
    pub fn outstanding(&self) -> usize {
        *self.idle.borrow()
    }

    /// Wait until every trigger so far has been covered by a finished refresh
    pub async fn wait_idle(&self) {
        let mut idle = self.idle.clone();
        let _ = idle.wait_for(|n| *n == 0).await;
    }

    pub fn status(&self, template_id: TemplateId) -> Option<RefreshStatus> {
        self.status.read().get(&template_id).cloned()
    }
}

type Finished = (TemplateId, Result<usize, String>);

struct RefreshWorker {
    service: Arc<TemplateLearningService>,
    outstanding: Arc<watch::Sender<usize>>,
    status: StatusMap,
    in_flight: HashSet<TemplateId>,

    /// Latest template snapshot queued behind an in-flight refresh
    pending: HashMap<TemplateId, Template>,
}

impl RefreshWorker {
    async fn run(mut self, mut triggers: mpsc::UnboundedReceiver<Template>) {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Finished>();
        let mut closed = false;

        loop {
            tokio::select! {
                trigger = triggers.recv(), if !closed => match trigger {
                    Some(template) => self.on_trigger(template, &done_tx),
                    None => closed = true,
                },
                Some((template_id, outcome)) = done_rx.recv() => {
                    self.on_finished(template_id, outcome, &done_tx);
                }
            }

            if closed && self.in_flight.is_empty() {
                debug!("refresh queue drained, stopping");
                break;
            }
        }
    }

    fn on_trigger(&mut self, template: Template, done: &mpsc::UnboundedSender<Finished>) {
        let template_id = template.id;
        if !self.in_flight.contains(&template_id) {
            self.spawn(template, done);
            return;
        }

        // the queued run will read the full history, so this trigger is covered by it
        if self.pending.insert(template_id, template).is_some() {
            self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
            self.status.write().entry(template_id).or_default().coalesced += 1;
            debug!(template_id, "refresh trigger coalesced");
        }
    }

    fn on_finished(
        &mut self,
        template_id: TemplateId,
        outcome: Result<usize, String>,
        done: &mpsc::UnboundedSender<Finished>,
    ) {
        self.in_flight.remove(&template_id);
        {
            let mut status = self.status.write();
            let entry = status.entry(template_id).or_default();
            entry.runs += 1;
            entry.last_finished_at = Some(Utc::now());
            match outcome {
                Ok(count) => {
                    entry.last_hint_count = Some(count);
                    entry.last_error = None;
                }
                Err(e) => {
                    entry.failures += 1;
                    entry.last_error = Some(e);
                }
            }
        }
        self.outstanding.send_modify(|n| *n = n.saturating_sub(1));

        if let Some(next) = self.pending.remove(&template_id) {
            self.spawn(next, done);
        }
    }

    fn spawn(&mut self, template: Template, done: &mpsc::UnboundedSender<Finished>) {
        let template_id = template.id;
        self.in_flight.insert(template_id);
        let service = self.service.clone();
        let done = done.clone();
        let timeout = service.config().refresh_timeout();

        let refresh = tokio::spawn(async move {
            match tokio::time::timeout(timeout, service.refresh_template(&template)).await {
                Ok(Ok(hints)) => {
                    metrics::counter!("formsight_learning_refresh_total", "outcome" => "ok").increment(1);
                    info!(template_id, hints = hints.len(), "background refresh finished");
                    Ok(hints.len())
                }
                Ok(Err(e)) => {
                    metrics::counter!("formsight_learning_refresh_total", "outcome" => "failed").increment(1);
                    warn!(template_id, "background refresh failed: {}", e);
                    Err(e.to_string())
                }
                Err(_) => {
                    metrics::counter!("formsight_learning_refresh_total", "outcome" => "timeout").increment(1);
                    warn!(template_id, timeout_ms = timeout.as_millis() as u64, "background refresh timed out");
                    Err("refresh timed out".to_string())
                }
            }
        });

        // the template must leave `in_flight` even when the refresh panics
        tokio::spawn(async move {
            let outcome = match refresh.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    metrics::counter!("formsight_learning_refresh_total", "outcome" => "panicked").increment(1);
                    warn!(template_id, "background refresh task failed: {}", e);
                    Err("refresh task panicked".to_string())
                }
            };
            let _ = done.send((template_id, outcome));
        });
    }
}
