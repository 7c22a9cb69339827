use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use super::{ChunkBatch, VectorStore, VectorStoreError};
use crate::chunker::ChunkMetadata;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub document: String,
    pub metadata: ChunkMetadata,
}

/// In-process store keyed by collection, then chunk id.
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    collections: RwLock<HashMap<String, BTreeMap<String, StoredChunk>>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, collection: &str) -> usize {
        let collections = self.collections.read().unwrap_or_else(|p| p.into_inner());
        collections.get(collection).map_or(0, BTreeMap::len)
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<StoredChunk> {
        let collections = self.collections.read().unwrap_or_else(|p| p.into_inner());
        collections.get(collection)?.get(id).cloned()
    }

    pub fn ids(&self, collection: &str) -> Vec<String> {
        let collections = self.collections.read().unwrap_or_else(|p| p.into_inner());
        collections
            .get(collection)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn add(&self, collection: &str, batch: ChunkBatch) -> Result<usize, VectorStoreError> {
        let mut collections = self.collections.write().unwrap_or_else(|p| p.into_inner());
        let target = collections.entry(collection.to_string()).or_default();
        for (id, document, metadata) in batch.iter() {
            target.insert(
                id.to_string(),
                StoredChunk {
                    document: document.to_string(),
                    metadata: metadata.clone(),
                },
            );
        }
        Ok(batch.len())
    }
}
