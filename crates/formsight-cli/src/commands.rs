//! Subcommand handlers; each prints its result as JSON on stdout

use crate::app::{append_corrections, load_document, load_template, read_json, App};
use crate::cli::{AuditCommand, TemplateArgs};
use anyhow::{bail, Context, Result};
use formsight_batch::{BatchConfig, BatchJob, BatchRunner, BatchState};
use formsight_core::DocumentMapping;
use formsight_learning::RefreshQueue;
use formsight_mapper::ReanalysisCoordinator;
use formsight_telemetry::{AuditEvent, AuditQuery};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn analyze(app: &App, args: &TemplateArgs, document: &Path) -> Result<()> {
    let (_, configuration) = app.prepare(args).await?;
    let document = load_document(document)?;

    let mapping = app.mapper.map_document(&document, &configuration).await?;
    app.audit.record(AuditEvent::document_mapped(&mapping));
    print_json(&mapping)
}

pub async fn reanalyze(
    app: &App,
    args: &TemplateArgs,
    document: &Path,
    mapping: &Path,
    fields: &[String],
) -> Result<()> {
    let (_, configuration) = app.prepare(args).await?;
    let document = load_document(document)?;
    let current: DocumentMapping = read_json(mapping)?;

    let coordinator = ReanalysisCoordinator::new(app.mapper.clone());
    let outcome = coordinator
        .reanalyze(&document, &configuration, &current, fields)
        .await?;
    app.audit
        .record(AuditEvent::fields_reanalyzed(&outcome.mapping, fields));
    print_json(&outcome)
}

pub async fn batch(
    app: &App,
    args: &TemplateArgs,
    documents: &[PathBuf],
    concurrency: Option<usize>,
    full: bool,
) -> Result<()> {
    let (template, _) = app.prepare(args).await?;
    let hints = app.learning.hints_for_template(template.id).await?;
    let documents = documents
        .iter()
        .map(|p| load_document(p))
        .collect::<Result<Vec<_>>>()?;
    let template_id = template.id;

    let config = BatchConfig {
        concurrency: concurrency.unwrap_or(app.config.batch.concurrency),
        ..app.config.batch.clone()
    };
    let queue = Arc::new(RefreshQueue::start(app.learning.clone()));
    let runner = Arc::new(BatchRunner::new(app.mapper.clone(), config)?.with_refresh_queue(queue.clone()));

    let job = BatchJob::new(template, &hints, documents)?;
    let handle = runner.spawn(job)?;
    info!(batch_job_id = handle.batch_job_id(), "batch submitted");

    let mut progress = handle.subscribe();
    let cancel_on_signal = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => warn!("interrupt received, finishing documents in progress"),
            Err(e) => {
                warn!("cannot listen for interrupts: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::pin!(cancel_on_signal);

    loop {
        tokio::select! {
            changed = progress.changed() => {
                if changed.is_err() || progress.borrow().state != BatchState::Running {
                    break;
                }
                let status = progress.borrow().clone();
                info!(progress = status.progress, processed = status.processed_files, failed = status.failed_files, "batch progress");
            }
            _ = &mut cancel_on_signal => {
                handle.cancel();
                break;
            }
        }
    }

    let report = handle.wait().await?;
    queue.wait_idle().await;

    for mapping in &report.mappings {
        app.audit.record(AuditEvent::document_mapped(mapping));
    }
    app.audit
        .record(AuditEvent::batch_completed(template_id, &report.status));
    if let Some(refresh) = queue.status(template_id) {
        info!(runs = refresh.runs, failures = refresh.failures, "post-batch refresh finished");
    }

    if full {
        print_json(&report)
    } else {
        print_json(&report.status)
    }
}

pub async fn correct(
    app: &App,
    args: &TemplateArgs,
    mapping: &Path,
    field: &str,
    value: &str,
    user: Option<i64>,
) -> Result<()> {
    let template = load_template(&args.template)?;
    if template.field(field).is_none() {
        bail!("template {} has no field named {}", template.id, field);
    }
    let current: DocumentMapping = read_json(mapping)?;
    if current.template_id != template.id {
        bail!(
            "mapping belongs to template {}, not {}",
            current.template_id,
            template.id
        );
    }

    let (updated, correction) = current.apply_correction(&template, field, value, user);

    let recorded = app.learning.record_correction(correction.clone()).await?;
    app.audit.record(AuditEvent::correction_recorded(&recorded));

    if let Some(path) = &args.corrections {
        append_corrections(path, vec![correction])?;
        info!(path = %path.display(), "correction appended to history");
    }

    std::fs::write(mapping, serde_json::to_string_pretty(&updated)?)
        .with_context(|| format!("failed to write {}", mapping.display()))?;
    print_json(&updated)
}

pub async fn learn(app: &App, args: &TemplateArgs) -> Result<()> {
    if args.corrections.is_none() {
        bail!("learning needs a correction history (--corrections)");
    }
    let (template, _) = app.prepare(args).await?;
    let hints = app.learning.hints_for_template(template.id).await?;
    app.audit
        .record(AuditEvent::hints_refreshed(template.id, &hints));
    print_json(&app.learning.hints_response(template.id).await?)
}

pub async fn hints(app: &App, args: &TemplateArgs) -> Result<()> {
    let (_, configuration) = app.prepare(args).await?;
    print_json(&configuration)
}

pub fn audit(app: &App, command: &AuditCommand) -> Result<()> {
    match command {
        AuditCommand::Verify => {
            let report = app.audit.verify()?;
            print_json(&report)?;
            if !report.is_intact() {
                bail!("audit chain is broken");
            }
            Ok(())
        }
        AuditCommand::List {
            kind,
            document,
            template,
            limit,
        } => {
            let mut query = AuditQuery::new().limit(*limit);
            if let Some(kind) = kind {
                query = query.kind((*kind).into());
            }
            if let Some(document) = document {
                query = query.document(*document);
            }
            if let Some(template) = template {
                query = query.template(*template);
            }
            let events = app.audit.query(&query)?;
            print_json(&json!({ "count": events.len(), "events": events }))
        }
    }
}
