//! Application configuration
//!
//! Loaded from `formsight.yaml` when it exists, then overridden by flags and
//! environment variables.

use crate::cli::Cli;
use anyhow::Context;
use formsight_batch::BatchConfig;
use formsight_learning::LearningConfig;
use formsight_mapper::{MapperConfig, ModelConfig};
use formsight_telemetry::AuditConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub mapper: MapperConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub learning: LearningConfig,

    #[serde(default)]
    pub audit: AuditConfig,
}

impl AppConfig {
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file and CLI overrides
    pub fn load(path: &Path, cli: &Cli) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Self::from_yaml(&content).with_context(|| format!("in {}", path.display()))?
        } else {
            Self::default()
        };

        if let Some(url) = &cli.model_url {
            config.model.base_url = url.clone();
        }
        if let Some(audit_log) = &cli.audit_log {
            config.audit.enabled = true;
            config.audit.path = audit_log.clone();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.mapper.validate()?;
        self.batch.validate()?;
        self.learning.validate()?;
        self.audit.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::from_yaml(
            r#"
mapper:
  thresholds:
    medium: 0.4
    high: 0.75
batch:
  concurrency: 8
"#,
        )
        .unwrap();

        assert_eq!(config.mapper.thresholds.medium, 0.4);
        assert_eq!(config.batch.concurrency, 8);
        assert_eq!(config.batch.max_batch_size, 100);
        assert_eq!(config.learning.sample_size, 200);
        assert_eq!(config.model.api_key_env, "OPENAI_API_KEY");
        assert!(!config.audit.enabled);
    }

    #[test]
    fn test_out_of_range_threshold_is_rejected() {
        let result = AppConfig::from_yaml("mapper:\n  thresholds:\n    medium: 1.5\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        assert!(AppConfig::from_yaml("batch:\n  concurrency: 0\n").is_err());
    }
}
