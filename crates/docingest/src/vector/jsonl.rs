use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use super::{ChunkBatch, VectorStore, VectorStoreError};
use crate::chunker::ChunkMetadata;

/// One line of a collection file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonlRecord {
    pub id: String,
    pub document: String,
    pub metadata: ChunkMetadata,
}

/// Appends chunks to `<dir>/<collection>.jsonl`, one JSON object per line.
///
/// Readers should treat the last line for an id as authoritative, so a
/// retried write behaves as an upsert.
#[derive(Debug, Clone)]
pub struct JsonlVectorStore {
    dir: PathBuf,
}

impl JsonlVectorStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn collection_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", collection))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn io_error(context: &str, e: std::io::Error) -> VectorStoreError {
    match e.kind() {
        std::io::ErrorKind::Interrupted
        | std::io::ErrorKind::TimedOut
        | std::io::ErrorKind::WouldBlock => {
            VectorStoreError::Transient(format!("{}: {}", context, e))
        }
        _ => VectorStoreError::Rejected(format!("{}: {}", context, e)),
    }
}

#[async_trait]
impl VectorStore for JsonlVectorStore {
    async fn add(&self, collection: &str, batch: ChunkBatch) -> Result<usize, VectorStoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error("Failed to create store directory", e))?;

        let mut buf = String::new();
        for (id, document, metadata) in batch.iter() {
            let line = serde_json::to_string(&JsonlRecord {
                id: id.to_string(),
                document: document.to_string(),
                metadata: metadata.clone(),
            })
            .map_err(|e| VectorStoreError::Rejected(format!("Failed to encode chunk: {}", e)))?;
            buf.push_str(&line);
            buf.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.collection_path(collection))
            .await
            .map_err(|e| io_error("Failed to open collection file", e))?;
        file.write_all(buf.as_bytes())
            .await
            .map_err(|e| io_error("Failed to write chunks", e))?;
        file.flush()
            .await
            .map_err(|e| io_error("Failed to flush chunks", e))?;

        tracing::debug!(collection, chunks = batch.len(), "Appended chunks");
        Ok(batch.len())
    }
}
