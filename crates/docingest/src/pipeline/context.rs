use std::time::Instant;

use crate::chunker::Chunk;
use crate::processor::ExtractedDocument;

/// State of one document moving through extract → chunk → store.
pub struct PipelineContext {
    // Input
    pub job_id: String,
    pub file_name: String,
    pub file_type: String,
    pub collection: String,
    pub started: Instant,

    // Extraction result — guaranteed Some after step_extract
    pub extracted: Option<ExtractedDocument>,

    // Chunking result — guaranteed Some after step_chunk
    pub chunks: Option<Vec<Chunk>>,

    // Number of chunks accepted by the vector store
    pub stored: usize,
}

impl PipelineContext {
    pub fn new(job_id: &str, file_name: &str, file_type: &str, collection: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            file_name: file_name.to_string(),
            file_type: file_type.to_string(),
            collection: collection.to_string(),
            started: Instant::now(),
            extracted: None,
            chunks: None,
            stored: 0,
        }
    }

    pub fn text_length(&self) -> usize {
        self.extracted
            .as_ref()
            .map(ExtractedDocument::text_length)
            .unwrap_or(0)
    }

    pub fn total_chunks(&self) -> usize {
        self.chunks.as_ref().map(Vec::len).unwrap_or(0)
    }
}
