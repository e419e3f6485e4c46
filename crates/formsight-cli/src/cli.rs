use clap::{Args, Parser, Subcommand, ValueEnum};
use formsight_telemetry::AuditEventKind;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "formsight")]
#[command(author, version, about = "AI-assisted OCR field mapping with template learning")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "formsight.yaml", env = "FORMSIGHT_CONFIG")]
    pub config: PathBuf,

    /// Model API base URL
    #[arg(long, global = true, env = "FORMSIGHT_MODEL_URL")]
    pub model_url: Option<String>,

    /// Run without a hosted model; `auto` fields resolve heuristically
    #[arg(long, global = true)]
    pub offline: bool,

    /// Append audit events to this log
    #[arg(long, global = true, env = "FORMSIGHT_AUDIT_LOG")]
    pub audit_log: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Print Prometheus metrics to stderr before exiting
    #[arg(long, global = true)]
    pub print_metrics: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Template plus the correction history that feeds its hints
#[derive(Args, Debug)]
pub struct TemplateArgs {
    /// Template definition (YAML or JSON)
    #[arg(short, long)]
    pub template: PathBuf,

    /// Correction history (JSON array of corrections)
    #[arg(long)]
    pub corrections: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Map one OCR document against a template
    Analyze {
        #[command(flatten)]
        template: TemplateArgs,

        /// OCR document (JSON)
        #[arg(short, long)]
        document: PathBuf,
    },

    /// Re-run selected fields of an existing mapping
    Reanalyze {
        #[command(flatten)]
        template: TemplateArgs,

        /// OCR document (JSON)
        #[arg(short, long)]
        document: PathBuf,

        /// Current mapping (JSON, as printed by `analyze`)
        #[arg(short, long)]
        mapping: PathBuf,

        /// Fields to re-run (comma-separated)
        #[arg(short, long, value_delimiter = ',', required = true)]
        fields: Vec<String>,
    },

    /// Map many OCR documents; Ctrl+C stops before the next document
    Batch {
        #[command(flatten)]
        template: TemplateArgs,

        /// OCR documents (JSON files)
        #[arg(required = true)]
        documents: Vec<PathBuf>,

        /// Documents mapped at the same time
        #[arg(long, env = "FORMSIGHT_BATCH_CONCURRENCY")]
        concurrency: Option<usize>,

        /// Include every mapping in the output, not only the status
        #[arg(long)]
        full: bool,
    },

    /// Replace a field value in a mapping and record the correction
    Correct {
        #[command(flatten)]
        template: TemplateArgs,

        /// Current mapping (JSON)
        #[arg(short, long)]
        mapping: PathBuf,

        /// Field to correct
        #[arg(short, long)]
        field: String,

        /// Corrected value
        #[arg(long)]
        value: String,

        /// User making the correction
        #[arg(long)]
        user: Option<i64>,
    },

    /// Regenerate learned hints from the correction history
    Learn {
        #[command(flatten)]
        template: TemplateArgs,
    },

    /// Show the run configuration a template resolves to with its hints
    Hints {
        #[command(flatten)]
        template: TemplateArgs,
    },

    /// Inspect the audit trail
    Audit {
        #[command(subcommand)]
        command: AuditCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum AuditCommand {
    /// Check the hash chain
    Verify,

    /// List events
    List {
        #[arg(long, value_enum)]
        kind: Option<KindArg>,

        #[arg(long)]
        document: Option<i64>,

        #[arg(long)]
        template: Option<i64>,

        #[arg(long, default_value = "50")]
        limit: usize,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum KindArg {
    DocumentMapped,
    FieldsReanalyzed,
    CorrectionRecorded,
    HintsRefreshed,
    BatchCompleted,
}

impl From<KindArg> for AuditEventKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::DocumentMapped => AuditEventKind::DocumentMapped,
            KindArg::FieldsReanalyzed => AuditEventKind::FieldsReanalyzed,
            KindArg::CorrectionRecorded => AuditEventKind::CorrectionRecorded,
            KindArg::HintsRefreshed => AuditEventKind::HintsRefreshed,
            KindArg::BatchCompleted => AuditEventKind::BatchCompleted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_reanalyze_splits_fields() {
        let cli = Cli::try_parse_from([
            "formsight",
            "reanalyze",
            "-t",
            "invoice.yaml",
            "-d",
            "doc.json",
            "-m",
            "mapping.json",
            "-f",
            "total,receiver",
        ])
        .unwrap();
        match cli.command {
            Commands::Reanalyze { fields, .. } => assert_eq!(fields, vec!["total", "receiver"]),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
