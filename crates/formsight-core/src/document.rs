//! OCR input shapes

use crate::template::DocumentId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Text isolated for one field by the OCR collaborator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldCrop {
    pub text: String,

    /// Mean OCR word confidence for the crop
    #[serde(default)]
    pub confidence: Option<f32>,

    /// Location of the cropped image, when one was produced
    #[serde(default)]
    pub image_ref: Option<String>,
}

/// Raw OCR output for one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrDocument {
    pub document_id: DocumentId,
    pub raw_text: String,

    #[serde(default)]
    pub word_count: usize,

    /// Mean OCR word confidence over the page
    #[serde(default)]
    pub average_confidence: Option<f32>,

    /// Keyed by field_name
    #[serde(default)]
    pub field_crops: BTreeMap<String, FieldCrop>,
}

impl OcrDocument {
    pub fn new(document_id: DocumentId, raw_text: impl Into<String>) -> Self {
        let raw_text = raw_text.into();
        let word_count = raw_text.split_whitespace().count();
        Self {
            document_id,
            raw_text,
            word_count,
            average_confidence: None,
            field_crops: BTreeMap::new(),
        }
    }

    pub fn with_crop(mut self, field_name: impl Into<String>, crop: FieldCrop) -> Self {
        self.field_crops.insert(field_name.into(), crop);
        self
    }

    pub fn has_text(&self) -> bool {
        !self.raw_text.trim().is_empty()
    }

    pub fn crop(&self, field_name: &str) -> Option<&FieldCrop> {
        self.field_crops.get(field_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_count_and_text() {
        let doc = OcrDocument::new(1, "Tarih: 05.03.2024\nToplam: 120,50");
        assert_eq!(doc.word_count, 4);
        assert!(doc.has_text());
        assert!(!OcrDocument::new(2, " \n\t").has_text());
    }
}
