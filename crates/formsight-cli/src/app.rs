//! Wiring of model, mapper, learning, and audit for one invocation

use crate::cli::TemplateArgs;
use crate::config::AppConfig;
use anyhow::{bail, Context, Result};
use formsight_core::{NewCorrection, OcrDocument, Template};
use formsight_learning::{InMemoryCorrectionStore, InMemoryHintStore, TemplateLearningService};
use formsight_mapper::{
    build_configuration, ExtractionModel, FieldMapper, OpenAiModel, RuntimeConfiguration,
    UnavailableModel,
};
use formsight_telemetry::AuditService;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub struct App {
    pub config: AppConfig,
    pub mapper: Arc<FieldMapper>,
    pub learning: Arc<TemplateLearningService>,
    pub audit: AuditService,
}

impl App {
    pub fn new(config: AppConfig, offline: bool) -> Result<Self> {
        let model: Arc<dyn ExtractionModel> = match config.model.api_key() {
            Some(key) if !offline => Arc::new(OpenAiModel::new(config.model.clone(), key)?),
            Some(_) => {
                info!("offline mode, model calls disabled");
                Arc::new(UnavailableModel)
            }
            None => {
                warn!(
                    env = %config.model.api_key_env,
                    "no API key configured, falling back to heuristic extraction"
                );
                Arc::new(UnavailableModel)
            }
        };
        let mapper = Arc::new(FieldMapper::new(model, config.mapper.clone())?);

        let learning = Arc::new(TemplateLearningService::new(
            Arc::new(InMemoryCorrectionStore::new()),
            Arc::new(InMemoryHintStore::new()),
            config.learning.clone(),
        )?);
        let audit = AuditService::start(&config.audit)?;

        Ok(Self {
            config,
            mapper,
            learning,
            audit,
        })
    }

    /// Load the template and its history, refresh hints, and build the run configuration
    pub async fn prepare(&self, args: &TemplateArgs) -> Result<(Template, RuntimeConfiguration)> {
        let template = load_template(&args.template)?;
        if let Some(path) = &args.corrections {
            let corrections: Vec<NewCorrection> = read_json(path)?;
            let count = corrections.len();
            self.learning.record_corrections(corrections).await?;
            info!(count, "correction history loaded");
        }
        let hints = self.learning.refresh_template(&template).await?;
        let configuration = build_configuration(&template, &hints)?;
        Ok((template, configuration))
    }
}

pub fn load_template(path: &Path) -> Result<Template> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read template {}", path.display()))?;
    let template = Template::from_yaml(&content)
        .with_context(|| format!("invalid template {}", path.display()))?;
    template.validate()?;
    Ok(template)
}

pub fn load_document(path: &Path) -> Result<OcrDocument> {
    let mut document: OcrDocument = read_json(path)?;
    if document.word_count == 0 {
        document.word_count = document.raw_text.split_whitespace().count();
    }
    Ok(document)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid JSON in {}", path.display()))
}

/// Append corrections to a JSON array file, creating it if needed
pub fn append_corrections(path: &Path, new: Vec<NewCorrection>) -> Result<()> {
    let mut corrections: Vec<NewCorrection> = if path.exists() {
        read_json(path)?
    } else {
        Vec::new()
    };
    if new.iter().any(|c| c.corrected_value.trim().is_empty()) {
        bail!("corrected value must not be empty");
    }
    corrections.extend(new);
    std::fs::write(path, serde_json::to_string_pretty(&corrections)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn correction(value: &str) -> NewCorrection {
        NewCorrection {
            document_id: 1,
            template_field_id: Some(2),
            original_value: None,
            corrected_value: value.to_string(),
            context: Default::default(),
            user_id: None,
        }
    }

    #[test]
    fn test_corrections_file_grows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corrections.json");

        append_corrections(&path, vec![correction("Ankara")]).unwrap();
        append_corrections(&path, vec![correction("Izmir")]).unwrap();

        let stored: Vec<NewCorrection> = read_json(&path).unwrap();
        let values: Vec<&str> = stored.iter().map(|c| c.corrected_value.as_str()).collect();
        assert_eq!(values, vec!["Ankara", "Izmir"]);
    }

    #[test]
    fn test_blank_correction_is_refused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corrections.json");
        assert!(append_corrections(&path, vec![correction("  ")]).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_demo_inputs_load() {
        let demos = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos");
        let template = load_template(&demos.join("invoice.yaml")).unwrap();
        assert_eq!(template.fields.len(), 4);

        let document = load_document(&demos.join("invoice-0001.json")).unwrap();
        assert_eq!(document.word_count, 13);
        assert!(document.crop("receiver").is_some());

        let corrections: Vec<NewCorrection> = read_json(&demos.join("corrections.json")).unwrap();
        assert_eq!(corrections.len(), 4);
    }

    #[test]
    fn test_document_word_count_is_filled_in() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, r#"{"document_id": 4, "raw_text": "Toplam: 118,00 TL"}"#).unwrap();

        let document = load_document(&path).unwrap();
        assert_eq!(document.word_count, 3);
    }
}
