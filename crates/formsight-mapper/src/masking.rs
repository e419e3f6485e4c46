//! Sensitive data masking for text sent to hosted models

use formsight_core::{Error, Result};
use regex::Regex;

/// Detects sensitive values and swaps them for placeholder tokens
pub struct DataMasker {
    patterns: Vec<(&'static str, Regex)>,
}

impl DataMasker {
    /// Create a new masker
    pub fn new() -> Result<Self> {
        let compile = |label: &'static str, pattern: &str| {
            Regex::new(pattern)
                .map(|regex| (label, regex))
                .map_err(|e| Error::internal(format!("Failed to compile {} regex: {}", label, e)))
        };

        Ok(Self {
            patterns: vec![
                compile("EMAIL", r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")?,
                compile("IBAN", r"\b[A-Z]{2}\d{2}(?:\s?[A-Z0-9]{4}){3,7}(?:\s?[A-Z0-9]{1,3})?\b")?,
                compile("PHONE", r"(?:\+90[\s-]?|\b0|\b)5\d{2}[\s-]?\d{3}[\s-]?\d{2}[\s-]?\d{2}\b")?,
                compile("NATIONAL_ID", r"\b[1-9]\d{10}\b")?,
            ],
        })
    }

    /// Start a masking session; tokens are stable within one session
    pub fn session(&self) -> MaskSession<'_> {
        MaskSession {
            masker: self,
            replacements: Vec::new(),
        }
    }
}

/// Token table for one document
pub struct MaskSession<'a> {
    masker: &'a DataMasker,
    replacements: Vec<(String, String)>,
}

impl MaskSession<'_> {
    /// Replace sensitive values in `text` with tokens
    pub fn mask(&mut self, text: &str) -> String {
        let masker = self.masker;
        let mut masked = text.to_string();
        for (label, regex) in &masker.patterns {
            let found: Vec<String> = regex
                .find_iter(&masked)
                .map(|m| m.as_str().to_string())
                .collect();
            for original in found {
                let token = self.token_for(label, &original);
                masked = masked.replace(&original, &token);
            }
        }
        masked
    }

    /// Restore original values in a model-returned string
    pub fn unmask(&self, value: &str) -> String {
        let mut restored = value.to_string();
        for (token, original) in &self.replacements {
            if restored.contains(token.as_str()) {
                restored = restored.replace(token.as_str(), original);
            }
        }
        restored
    }

    pub fn masked_count(&self) -> usize {
        self.replacements.len()
    }

    fn token_for(&mut self, label: &str, original: &str) -> String {
        if let Some((token, _)) = self.replacements.iter().find(|(_, o)| o == original) {
            return token.clone();
        }
        let token = format!("__{}_MASK_{}__", label, self.replacements.len() + 1);
        self.replacements.push((token.clone(), original.to_string()));
        token
    }
}
