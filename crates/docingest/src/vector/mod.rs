//! Vector store collaborator.
//!
//! The pipeline hands over a validated [`ChunkBatch`]; embedding and indexing
//! are the store's business.

pub mod jsonl;
pub mod memory;

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;

use crate::chunker::{Chunk, ChunkMetadata};

pub use jsonl::JsonlVectorStore;
pub use memory::MemoryVectorStore;

/// A batch whose parallel arrays disagree, detected before anything is written.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error(
        "Mismatched batch lengths: {documents} documents, {ids} ids, {metadatas} metadata entries"
    )]
    LengthMismatch {
        documents: usize,
        ids: usize,
        metadatas: usize,
    },

    #[error("Duplicate chunk id '{0}'")]
    DuplicateId(String),
}

#[derive(Error, Debug)]
pub enum VectorStoreError {
    /// Upstream timeout or outage; worth retrying.
    #[error("Vector store unavailable: {0}")]
    Transient(String),

    /// The store refused the batch; retrying will not help.
    #[error("Vector store rejected batch: {0}")]
    Rejected(String),
}

impl VectorStoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, VectorStoreError::Transient(_))
    }
}

/// Documents, ids and metadata of equal length with unique ids.
#[derive(Debug, Clone)]
pub struct ChunkBatch {
    documents: Vec<String>,
    ids: Vec<String>,
    metadatas: Vec<ChunkMetadata>,
}

impl ChunkBatch {
    pub fn new(
        documents: Vec<String>,
        ids: Vec<String>,
        metadatas: Vec<ChunkMetadata>,
    ) -> Result<Self, ConsistencyError> {
        if documents.len() != ids.len() || ids.len() != metadatas.len() {
            return Err(ConsistencyError::LengthMismatch {
                documents: documents.len(),
                ids: ids.len(),
                metadatas: metadatas.len(),
            });
        }

        let mut seen = HashSet::with_capacity(ids.len());
        for id in &ids {
            if !seen.insert(id.as_str()) {
                return Err(ConsistencyError::DuplicateId(id.clone()));
            }
        }

        Ok(Self {
            documents,
            ids,
            metadatas,
        })
    }

    /// Builds a batch from chunks, deriving each id from its chunk index.
    pub fn from_chunks<F>(chunks: Vec<Chunk>, id_for: F) -> Result<Self, ConsistencyError>
    where
        F: Fn(&ChunkMetadata) -> String,
    {
        let mut documents = Vec::with_capacity(chunks.len());
        let mut ids = Vec::with_capacity(chunks.len());
        let mut metadatas = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            ids.push(id_for(&chunk.metadata));
            documents.push(chunk.text);
            metadatas.push(chunk.metadata);
        }
        Self::new(documents, ids, metadatas)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Iterates `(id, document, metadata)` triples.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &ChunkMetadata)> {
        self.ids
            .iter()
            .zip(&self.documents)
            .zip(&self.metadatas)
            .map(|((id, doc), meta)| (id.as_str(), doc.as_str(), meta))
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Persists the batch under `collection`, returning how many chunks were
    /// stored. Re-adding an existing id replaces it.
    async fn add(&self, collection: &str, batch: ChunkBatch) -> Result<usize, VectorStoreError>;
}
