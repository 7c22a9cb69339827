use std::io::{Read, Seek};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::ProcessError;
use crate::processor::{DocumentFormat, ExtractedDocument, PageText, TextExtractor};

const SLIDE_PREFIX: &str = "ppt/slides/slide";

pub struct PptxExtractor;

impl PptxExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PptxExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TextExtractor for PptxExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedDocument, ProcessError> {
        let _span = tracing::info_span!("extractor.pptx").entered();

        let file = std::fs::File::open(path).map_err(|e| ProcessError::ReadDocument {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| ProcessError::PptxProcessing(format!("Failed to open PPTX: {}", e)))?;

        Ok(ExtractedDocument {
            format: DocumentFormat::Pptx,
            pages: extract_slides(&mut archive)?,
        })
    }

    fn supports(&self, format: DocumentFormat) -> bool {
        matches!(format, DocumentFormat::Pptx)
    }
}

/// Slide number from an archive entry name like `ppt/slides/slide12.xml`.
fn slide_number(name: &str) -> Option<u32> {
    name.strip_prefix(SLIDE_PREFIX)?
        .strip_suffix(".xml")?
        .parse()
        .ok()
}

fn extract_slides<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<Vec<PageText>, ProcessError> {
    // Archive order is arbitrary and slide10 sorts before slide2 as text.
    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| slide_number(name).map(|n| (n, name.to_string())))
        .collect();
    slides.sort_by_key(|(n, _)| *n);

    if slides.is_empty() {
        return Err(ProcessError::PptxProcessing(
            "No slides found in presentation".to_string(),
        ));
    }

    let mut pages = Vec::with_capacity(slides.len());
    for (number, name) in slides {
        let mut entry = archive.by_name(&name).map_err(|e| {
            ProcessError::PptxProcessing(format!("Failed to open {}: {}", name, e))
        })?;
        let mut xml = String::new();
        entry.read_to_string(&mut xml).map_err(|e| {
            ProcessError::PptxProcessing(format!("Failed to read {}: {}", name, e))
        })?;

        pages.push(PageText {
            number,
            text: parse_slide_xml(&xml)?,
        });
    }

    Ok(pages)
}

/// Collects `<a:t>` runs, one line per `<a:p>` paragraph.
fn parse_slide_xml(xml: &str) -> Result<String, ProcessError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text_element = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text_element = true;
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text_element = false,
                b"p" => {
                    if !current.is_empty() {
                        lines.push(std::mem::take(&mut current));
                    }
                }
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_text_element {
                    let decoded = e.unescape().unwrap_or_default();
                    current.push_str(&decoded);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ProcessError::PptxProcessing(format!(
                    "XML parsing error: {}",
                    e
                )));
            }
            _ => {}
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }

    Ok(lines.join("\n"))
}
