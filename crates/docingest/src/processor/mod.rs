pub mod pdf;
pub mod pptx;
pub mod text;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ProcessError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Pptx,
    Text,
}

impl DocumentFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "pptx" => Some(Self::Pptx),
            "txt" | "text" | "md" => Some(Self::Text),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Pptx => "pptx",
            Self::Text => "txt",
        }
    }
}

/// Text of one page (PDF) or slide (PPTX). Numbers start at 1.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub format: DocumentFormat,
    pub pages: Vec<PageText>,
}

impl ExtractedDocument {
    /// All non-empty pages joined by newlines.
    pub fn text(&self) -> String {
        self.pages
            .iter()
            .filter(|p| !p.text.is_empty())
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Character count of [`Self::text`].
    pub fn text_length(&self) -> usize {
        self.text().chars().count()
    }

    pub fn is_blank(&self) -> bool {
        self.pages.iter().all(|p| p.text.trim().is_empty())
    }
}

pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<ExtractedDocument, ProcessError>;
    fn supports(&self, format: DocumentFormat) -> bool;
}

pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn TextExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self {
            extractors: vec![
                Box::new(text::TextExtractorImpl::new()),
                Box::new(pdf::PdfExtractor::new()),
                Box::new(pptx::PptxExtractor::new()),
            ],
        }
    }

    /// Registers an extractor ahead of the built-in ones.
    pub fn with_extractor(mut self, extractor: Box<dyn TextExtractor>) -> Self {
        self.extractors.insert(0, extractor);
        self
    }

    /// Extracts text from `path`, routed by the job's declared `file_type`.
    pub fn extract(&self, path: &Path, file_type: &str) -> Result<ExtractedDocument, ProcessError> {
        let format = DocumentFormat::from_extension(file_type)
            .ok_or_else(|| ProcessError::UnsupportedFormat(file_type.to_string()))?;

        for extractor in &self.extractors {
            if extractor.supports(format) {
                return extractor.extract(path);
            }
        }

        Err(ProcessError::UnsupportedFormat(file_type.to_string()))
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_registry_routes_text_format() {
        let registry = ExtractorRegistry::new();

        let mut temp_file = NamedTempFile::with_suffix(".txt").unwrap();
        writeln!(temp_file, "Test content").unwrap();

        let doc = registry.extract(temp_file.path(), "txt").unwrap();
        assert_eq!(doc.format, DocumentFormat::Text);
        assert_eq!(doc.pages.len(), 1);
        assert!(doc.text().contains("Test content"));
    }

    #[test]
    fn test_routing_uses_declared_type_not_path() {
        let registry = ExtractorRegistry::new();

        // Uploads are stored under generated names; the declared type wins.
        let mut temp_file = NamedTempFile::with_suffix(".bin").unwrap();
        writeln!(temp_file, "# Heading").unwrap();

        let doc = registry.extract(temp_file.path(), "md").unwrap();
        assert!(doc.text().contains("# Heading"));
    }

    #[test]
    fn test_unsupported_format_error() {
        let registry = ExtractorRegistry::new();
        let temp_file = NamedTempFile::with_suffix(".xyz").unwrap();

        match registry.extract(temp_file.path(), "xyz") {
            Err(ProcessError::UnsupportedFormat(ext)) => assert_eq!(ext, "xyz"),
            other => panic!("Expected UnsupportedFormat error, got {:?}", other.map(|d| d.pages)),
        }
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(DocumentFormat::from_extension("PDF"), Some(DocumentFormat::Pdf));
        assert_eq!(DocumentFormat::from_extension("pptx"), Some(DocumentFormat::Pptx));
        assert_eq!(DocumentFormat::from_extension("md"), Some(DocumentFormat::Text));
        assert_eq!(DocumentFormat::from_extension("docx"), None);
    }

    #[test]
    fn test_document_text_and_blank_detection() {
        let doc = ExtractedDocument {
            format: DocumentFormat::Pdf,
            pages: vec![
                PageText { number: 1, text: "alpha".into() },
                PageText { number: 2, text: String::new() },
                PageText { number: 3, text: "beta".into() },
            ],
        };
        assert_eq!(doc.text(), "alpha\nbeta");
        assert_eq!(doc.text_length(), 10);
        assert!(!doc.is_blank());

        let blank = ExtractedDocument {
            format: DocumentFormat::Pdf,
            pages: vec![PageText { number: 1, text: "  \n\t".into() }],
        };
        assert!(blank.is_blank());
    }

    struct Outage;

    impl TextExtractor for Outage {
        fn extract(&self, _path: &Path) -> Result<ExtractedDocument, ProcessError> {
            Err(ProcessError::Transient("ocr backend down".into()))
        }

        fn supports(&self, format: DocumentFormat) -> bool {
            format == DocumentFormat::Text
        }
    }

    #[test]
    fn test_added_extractor_takes_precedence() {
        let registry = ExtractorRegistry::new().with_extractor(Box::new(Outage));
        let temp_file = NamedTempFile::with_suffix(".txt").unwrap();

        let err = registry.extract(temp_file.path(), "txt").unwrap_err();
        assert!(err.is_transient());
        assert!(registry.extract(temp_file.path(), "pdf").is_err());
    }
}
