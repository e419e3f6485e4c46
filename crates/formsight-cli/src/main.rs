//! Formsight
//!
//! Maps OCR output onto user-defined templates with a two-tier model,
//! and learns per-field hints from user corrections.

use anyhow::Result;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;

mod app;
mod cli;
mod commands;
mod config;

use app::App;
use cli::{Cli, Commands};
use config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.log_json);
    let metrics = init_metrics()?;

    let config = AppConfig::load(&cli.config, &cli)?;
    let app = App::new(config, cli.offline)?;
    info!(model = app.mapper.model_name(), "formsight ready");

    let outcome = match &cli.command {
        Commands::Analyze { template, document } => commands::analyze(&app, template, document).await,
        Commands::Reanalyze {
            template,
            document,
            mapping,
            fields,
        } => commands::reanalyze(&app, template, document, mapping, fields).await,
        Commands::Batch {
            template,
            documents,
            concurrency,
            full,
        } => commands::batch(&app, template, documents, *concurrency, *full).await,
        Commands::Correct {
            template,
            mapping,
            field,
            value,
            user,
        } => commands::correct(&app, template, mapping, field, value, *user).await,
        Commands::Learn { template } => commands::learn(&app, template).await,
        Commands::Hints { template } => commands::hints(&app, template).await,
        Commands::Audit { command } => commands::audit(&app, command),
    };

    app.audit.flush().await;
    if cli.print_metrics {
        eprintln!("{}", metrics.render());
    }
    outcome
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool, json: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("formsight=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("formsight=info"))
    };

    // stdout carries command output, so logs go to stderr
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Install the Prometheus recorder and describe the metrics we emit
fn init_metrics() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {}", e))?;

    metrics::describe_counter!(
        "formsight_model_calls_total",
        "Model calls by tier and outcome"
    );
    metrics::describe_histogram!(
        "formsight_model_latency_us",
        metrics::Unit::Microseconds,
        "Model call latency in microseconds by tier"
    );
    metrics::describe_counter!(
        "formsight_escalations_total",
        "Fields escalated to the specialist tier"
    );
    metrics::describe_counter!("formsight_documents_total", "Mapped documents by outcome");
    metrics::describe_counter!(
        "formsight_learning_refresh_total",
        "Background hint refreshes by outcome"
    );
    metrics::describe_counter!("formsight_batches_total", "Finished batches by final state");
    metrics::describe_counter!("formsight_audit_events_total", "Audit events queued by kind");

    Ok(handle)
}
