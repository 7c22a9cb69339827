use std::path::Path;

use crate::error::ProcessError;
use crate::processor::{DocumentFormat, ExtractedDocument, PageText, TextExtractor};

/// Plain text and markdown: the whole file is one page.
pub struct TextExtractorImpl;

impl TextExtractorImpl {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TextExtractorImpl {
    fn default() -> Self {
        Self::new()
    }
}

impl TextExtractor for TextExtractorImpl {
    fn extract(&self, path: &Path) -> Result<ExtractedDocument, ProcessError> {
        let text = std::fs::read_to_string(path).map_err(|e| ProcessError::ReadDocument {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(ExtractedDocument {
            format: DocumentFormat::Text,
            pages: vec![PageText { number: 1, text }],
        })
    }

    fn supports(&self, format: DocumentFormat) -> bool {
        matches!(format, DocumentFormat::Text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supports_text_only() {
        let extractor = TextExtractorImpl::new();
        assert!(extractor.supports(DocumentFormat::Text));
        assert!(!extractor.supports(DocumentFormat::Pdf));
    }

    #[test]
    fn test_missing_file_error() {
        let extractor = TextExtractorImpl::new();
        match extractor.extract(Path::new("/nonexistent/notes.txt")) {
            Err(ProcessError::ReadDocument { path, .. }) => {
                assert_eq!(path, Path::new("/nonexistent/notes.txt"));
            }
            _ => panic!("Expected ReadDocument error"),
        }
    }
}
