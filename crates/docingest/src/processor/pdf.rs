use std::path::Path;

use crate::error::ProcessError;
use crate::processor::{DocumentFormat, ExtractedDocument, PageText, TextExtractor};

pub struct PdfExtractor;

impl PdfExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PdfExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TextExtractor for PdfExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedDocument, ProcessError> {
        let _span = tracing::info_span!("extractor.pdf").entered();

        let pdf_bytes = std::fs::read(path).map_err(|e| ProcessError::ReadDocument {
            path: path.to_path_buf(),
            source: e,
        })?;

        let doc = lopdf::Document::load_mem(&pdf_bytes)
            .map_err(|e| ProcessError::PdfProcessing(format!("Failed to load PDF: {}", e)))?;

        Ok(ExtractedDocument {
            format: DocumentFormat::Pdf,
            pages: extract_pages(&doc),
        })
    }

    fn supports(&self, format: DocumentFormat) -> bool {
        matches!(format, DocumentFormat::Pdf)
    }
}

/// Per-page text. Pages whose text cannot be decoded come back empty rather
/// than failing the whole document.
fn extract_pages(doc: &lopdf::Document) -> Vec<PageText> {
    doc.get_pages()
        .into_keys()
        .map(|number| {
            let text = match doc.extract_text(&[number]) {
                Ok(text) => text,
                Err(e) => {
                    tracing::debug!("Skipping undecodable page {}: {}", number, e);
                    String::new()
                }
            };
            PageText { number, text }
        })
        .collect()
}
