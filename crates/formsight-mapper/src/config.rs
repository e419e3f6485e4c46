//! Configuration for the field mapper

use formsight_core::{ConfidenceThresholds, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for field mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapperConfig {
    /// Status bucket boundaries
    #[serde(default)]
    pub thresholds: ConfidenceThresholds,

    /// Factor applied to confidence when a value misses its regex hint
    #[serde(default = "default_regex_cap_multiplier")]
    pub regex_cap_multiplier: f32,

    /// Factor applied to confidence when a value cannot be coerced to its type
    #[serde(default = "default_coercion_penalty")]
    pub coercion_penalty: f32,

    /// Maximum concurrent specialist calls within one document
    #[serde(default = "default_specialist_concurrency")]
    pub specialist_concurrency: usize,

    /// Escalation threshold for fields that do not set their own
    #[serde(default)]
    pub default_handwriting_threshold: Option<f32>,

    /// Replace IBANs, ids, phones, and e-mails before text leaves the process
    #[serde(default = "default_true")]
    pub mask_sensitive_data: bool,

    /// Weight of the model score when blending with OCR word confidence
    #[serde(default = "default_model_weight")]
    pub model_confidence_weight: f32,

    /// How many generic date candidates are offered as evidence
    #[serde(default = "default_auto_date_limit")]
    pub auto_date_limit: usize,

    /// How many generic number candidates are offered as evidence
    #[serde(default = "default_auto_number_limit")]
    pub auto_number_limit: usize,

    /// Retry policy for the batched primary pass
    #[serde(default = "RetryPolicy::primary")]
    pub primary_retry: RetryPolicy,

    /// Retry policy for per-field specialist calls
    #[serde(default = "RetryPolicy::specialist")]
    pub specialist_retry: RetryPolicy,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            thresholds: ConfidenceThresholds::default(),
            regex_cap_multiplier: default_regex_cap_multiplier(),
            coercion_penalty: default_coercion_penalty(),
            specialist_concurrency: default_specialist_concurrency(),
            default_handwriting_threshold: None,
            mask_sensitive_data: true,
            model_confidence_weight: default_model_weight(),
            auto_date_limit: default_auto_date_limit(),
            auto_number_limit: default_auto_number_limit(),
            primary_retry: RetryPolicy::primary(),
            specialist_retry: RetryPolicy::specialist(),
        }
    }
}

impl MapperConfig {
    /// Load configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("invalid mapper config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()?;

        let unit = |name: &str, v: f32| {
            if v.is_finite() && (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(Error::validation(format!("{} must be within [0, 1], got {}", name, v)))
            }
        };
        unit("regex_cap_multiplier", self.regex_cap_multiplier)?;
        unit("coercion_penalty", self.coercion_penalty)?;
        unit("model_confidence_weight", self.model_confidence_weight)?;
        if let Some(threshold) = self.default_handwriting_threshold {
            unit("default_handwriting_threshold", threshold)?;
        }

        if self.specialist_concurrency == 0 {
            return Err(Error::validation("specialist_concurrency must be at least 1"));
        }
        self.primary_retry.validate()?;
        self.specialist_retry.validate()?;
        Ok(())
    }
}

/// Bounded retry with exponential backoff and a per-attempt timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Deadline for a single attempt
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl RetryPolicy {
    pub fn primary() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }

    pub fn specialist() -> Self {
        Self {
            timeout_ms: 45_000,
            ..Self::primary()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Backoff before the given retry (1-based), without jitter
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::validation("retry max_attempts must be at least 1"));
        }
        if self.timeout_ms == 0 {
            return Err(Error::validation("retry timeout_ms must be positive"));
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::primary()
    }
}

fn default_regex_cap_multiplier() -> f32 {
    0.5
}

fn default_coercion_penalty() -> f32 {
    0.5
}

fn default_specialist_concurrency() -> usize {
    2
}

fn default_model_weight() -> f32 {
    0.6
}

fn default_auto_date_limit() -> usize {
    3
}

fn default_auto_number_limit() -> usize {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    2_000
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_yaml() {
        let config = MapperConfig::from_yaml("{}").unwrap();
        assert_eq!(config.thresholds.medium, 0.5);
        assert_eq!(config.thresholds.high, 0.8);
        assert_eq!(config.regex_cap_multiplier, 0.5);
        assert_eq!(config.specialist_concurrency, 2);
        assert_eq!(config.primary_retry.max_attempts, 3);
        assert_eq!(config.specialist_retry.timeout_ms, 45_000);
    }

    #[test]
    fn test_overrides() {
        let yaml = r#"
thresholds:
  medium: 0.4
  high: 0.9
specialist_concurrency: 4
primary_retry:
  max_attempts: 5
  timeout_ms: 1000
"#;
        let config = MapperConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.thresholds.high, 0.9);
        assert_eq!(config.specialist_concurrency, 4);
        assert_eq!(config.primary_retry.max_attempts, 5);
        assert_eq!(config.primary_retry.initial_backoff_ms, 200);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(MapperConfig::from_yaml("regex_cap_multiplier: 1.5").is_err());
        assert!(MapperConfig::from_yaml("specialist_concurrency: 0").is_err());
        assert!(MapperConfig::from_yaml("default_handwriting_threshold: -0.1").is_err());
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::primary();
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(10), Duration::from_millis(2_000));
    }
}
