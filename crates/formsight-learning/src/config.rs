//! Configuration for hint learning

use formsight_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the learning service and refresh queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Most recent corrections sampled per template refresh
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    /// Examples kept per hint
    #[serde(default = "default_max_examples")]
    pub max_examples: usize,

    /// Regex patterns kept per hint
    #[serde(default = "default_max_patterns")]
    pub max_patterns: usize,

    /// Corrections a pattern must explain before it is kept
    #[serde(default = "default_min_pattern_support")]
    pub min_pattern_support: u32,

    /// Share of samples that must agree on a non-text type
    #[serde(default = "default_min_type_support")]
    pub min_type_support: f32,

    /// Deadline for one background refresh
    #[serde(default = "default_refresh_timeout_ms")]
    pub refresh_timeout_ms: u64,
}

fn default_sample_size() -> usize {
    200
}

fn default_max_examples() -> usize {
    5
}

fn default_max_patterns() -> usize {
    5
}

fn default_min_pattern_support() -> u32 {
    2
}

fn default_min_type_support() -> f32 {
    0.6
}

fn default_refresh_timeout_ms() -> u64 {
    60_000
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            sample_size: default_sample_size(),
            max_examples: default_max_examples(),
            max_patterns: default_max_patterns(),
            min_pattern_support: default_min_pattern_support(),
            min_type_support: default_min_type_support(),
            refresh_timeout_ms: default_refresh_timeout_ms(),
        }
    }
}

impl LearningConfig {
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_size == 0 || self.max_examples == 0 || self.max_patterns == 0 {
            return Err(Error::config(
                "learning sample_size, max_examples and max_patterns must be positive",
            ));
        }
        if self.min_pattern_support == 0 {
            return Err(Error::config("learning min_pattern_support must be at least 1"));
        }
        if !(self.min_type_support > 0.0 && self.min_type_support <= 1.0) {
            return Err(Error::config(format!(
                "learning min_type_support must be in (0, 1], got {}",
                self.min_type_support
            )));
        }
        if self.refresh_timeout_ms == 0 {
            return Err(Error::config("learning refresh_timeout_ms must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_yaml() {
        let config: LearningConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, LearningConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_support() {
        let config = LearningConfig {
            min_type_support: 1.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
