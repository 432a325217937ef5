use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TmplDiffError};
use crate::layout::TextItem;

/// Text decoded by the host for one content stream, in stream order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecodedText {
    /// One entry per text-showing chunk (a `TJ` array may own several).
    #[serde(default)]
    pub occurrences: Vec<String>,
    #[serde(default)]
    pub items: Vec<TextItem>,
    /// Whole-stream text as a layout-aware extractor would return it.
    #[serde(default)]
    pub stream_text: Option<String>,
}

impl DecodedText {
    pub fn is_empty(&self) -> bool {
        self.occurrences.is_empty() && self.items.is_empty() && self.stream_text.is_none()
    }

    /// Reads a JSON sidecar written by an external decoder.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

/// One content stream plus whatever decoded text the host can supply.
pub trait TextOpsSource {
    /// Raw (decompressed) content-stream bytes.
    fn stream_bytes(&self) -> Result<Vec<u8>>;

    fn decoded_occurrences(&self) -> Vec<String> {
        Vec::new()
    }

    fn decoded_items(&self) -> Vec<TextItem> {
        Vec::new()
    }

    fn stream_text(&self) -> Option<String> {
        None
    }

    /// Human-readable origin used in reports.
    fn label(&self) -> String {
        String::new()
    }

    /// 1-based page the stream belongs to, when known.
    fn page(&self) -> Option<u32> {
        None
    }

    fn decoded(&self) -> DecodedText {
        DecodedText {
            occurrences: self.decoded_occurrences(),
            items: self.decoded_items(),
            stream_text: self.stream_text(),
        }
    }
}

/// Source backed by bytes already in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    pub label: String,
    pub bytes: Vec<u8>,
    pub decoded: DecodedText,
}

impl MemorySource {
    pub fn new(label: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            label: label.into(),
            bytes: bytes.into(),
            decoded: DecodedText::default(),
        }
    }

    pub fn with_decoded(mut self, decoded: DecodedText) -> Self {
        self.decoded = decoded;
        self
    }
}

impl TextOpsSource for MemorySource {
    fn stream_bytes(&self) -> Result<Vec<u8>> {
        if self.bytes.is_empty() {
            return Err(TmplDiffError::StreamUnavailable(self.label.clone()));
        }
        Ok(self.bytes.clone())
    }

    fn decoded_occurrences(&self) -> Vec<String> {
        self.decoded.occurrences.clone()
    }

    fn decoded_items(&self) -> Vec<TextItem> {
        self.decoded.items.clone()
    }

    fn stream_text(&self) -> Option<String> {
        self.decoded.stream_text.clone()
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_fields_default_when_missing() {
        let decoded: DecodedText =
            serde_json::from_str(r#"{"occurrences":["a"],"items":[{"text":"a"}]}"#).unwrap();
        assert_eq!(decoded.occurrences, vec!["a"]);
        assert!(decoded.items[0].has_box);
        assert!(decoded.stream_text.is_none());
        assert!(!decoded.is_empty());
    }

    #[test]
    fn sidecar_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.json");
        fs::write(&path, r#"{"stream_text":"x\ny"}"#).unwrap();
        let decoded = DecodedText::from_json_file(&path).unwrap();
        assert_eq!(decoded.stream_text.as_deref(), Some("x\ny"));
    }

    #[test]
    fn memory_source_reports_missing_stream() {
        let empty = MemorySource::new("doc.pdf#obj 7", Vec::new());
        assert!(matches!(
            empty.stream_bytes(),
            Err(TmplDiffError::StreamUnavailable(_))
        ));
        let source = MemorySource::new("a", b"BT ET".to_vec());
        assert_eq!(source.stream_bytes().unwrap(), b"BT ET");
        assert_eq!(source.decoded(), DecodedText::default());

        let decoded = DecodedText {
            occurrences: vec!["Nome".into()],
            ..DecodedText::default()
        };
        let source = source.with_decoded(decoded.clone());
        assert_eq!(source.decoded(), decoded);
    }
}
