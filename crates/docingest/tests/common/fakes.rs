//! Test doubles for the pipeline's collaborators.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeDelta;

use docingest::chunker::{Chunk, ChunkError, ChunkSource, Chunker};
use docingest::error::{ProcessError, WorkerError};
use docingest::jobs::ManualClock;
use docingest::pipeline::{FsCleaner, UploadCleaner};
use docingest::processor::{DocumentFormat, ExtractedDocument, PageText, TextExtractor};
use docingest::vector::{ChunkBatch, MemoryVectorStore, VectorStore, VectorStoreError};
use docingest::worker::{Dispatcher, Task};

/// Fails with a transient error for the first `failures` calls, then
/// delegates to an in-memory store.
pub struct FlakyVectorStore {
    remaining: AtomicUsize,
    pub calls: AtomicUsize,
    pub inner: MemoryVectorStore,
}

impl FlakyVectorStore {
    pub fn new(failures: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
            inner: MemoryVectorStore::new(),
        }
    }
}

#[async_trait]
impl VectorStore for FlakyVectorStore {
    async fn add(&self, collection: &str, batch: ChunkBatch) -> Result<usize, VectorStoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(VectorStoreError::Transient("connection reset".into()));
        }
        self.inner.add(collection, batch).await
    }
}

/// Takes `delay` per call before succeeding.
pub struct SlowVectorStore {
    pub delay: Duration,
}

#[async_trait]
impl VectorStore for SlowVectorStore {
    async fn add(&self, _collection: &str, batch: ChunkBatch) -> Result<usize, VectorStoreError> {
        tokio::time::sleep(self.delay).await;
        Ok(batch.len())
    }
}

/// Panics for collections named `poison`; stores everything else.
#[derive(Default)]
pub struct PanickingVectorStore {
    pub inner: MemoryVectorStore,
}

#[async_trait]
impl VectorStore for PanickingVectorStore {
    async fn add(&self, collection: &str, batch: ChunkBatch) -> Result<usize, VectorStoreError> {
        if collection == "poison" {
            panic!("vector store exploded");
        }
        self.inner.add(collection, batch).await
    }
}

/// Moves the job store's clock forward while storing, so the record expires
/// in the middle of the job.
pub struct ExpiringVectorStore {
    pub clock: Arc<ManualClock>,
    pub by: TimeDelta,
}

#[async_trait]
impl VectorStore for ExpiringVectorStore {
    async fn add(&self, _collection: &str, batch: ChunkBatch) -> Result<usize, VectorStoreError> {
        self.clock.advance(self.by);
        Ok(batch.len())
    }
}

/// Reads text files, failing for any whose content contains `marker`.
pub struct FailingExtractor {
    pub marker: String,
}

impl FailingExtractor {
    pub fn new(marker: &str) -> Self {
        Self {
            marker: marker.to_string(),
        }
    }
}

impl TextExtractor for FailingExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedDocument, ProcessError> {
        let text = std::fs::read_to_string(path).map_err(|e| ProcessError::ReadDocument {
            path: path.to_path_buf(),
            source: e,
        })?;
        if text.contains(&self.marker) {
            return Err(ProcessError::PdfProcessing("corrupt cross-reference table".into()));
        }
        Ok(ExtractedDocument {
            format: DocumentFormat::Text,
            pages: vec![PageText { number: 1, text }],
        })
    }

    fn supports(&self, format: DocumentFormat) -> bool {
        format == DocumentFormat::Text
    }
}

/// Records dispatched tasks without running them.
#[derive(Default)]
pub struct RecordingDispatcher {
    pub tasks: Mutex<Vec<Task>>,
}

impl Dispatcher for RecordingDispatcher {
    fn dispatch(&self, task: Task) -> Result<(), WorkerError> {
        self.tasks.lock().unwrap().push(task);
        Ok(())
    }
}

/// A broker that is down.
pub struct RejectingDispatcher;

impl Dispatcher for RejectingDispatcher {
    fn dispatch(&self, _task: Task) -> Result<(), WorkerError> {
        Err(WorkerError::ChannelClosed)
    }
}

/// Always refuses to split.
pub struct FailingChunker;

impl Chunker for FailingChunker {
    fn split(&self, _doc: &ExtractedDocument, _source: &ChunkSource) -> Result<Vec<Chunk>, ChunkError> {
        Err(ChunkError::ZeroSize)
    }
}

/// Deletes uploads like the real cleaner and records every call.
#[derive(Default)]
pub struct CountingCleaner {
    pub removed: Mutex<Vec<PathBuf>>,
}

impl CountingCleaner {
    pub fn count(&self) -> usize {
        self.removed.lock().unwrap().len()
    }

    pub fn count_of(&self, path: &Path) -> usize {
        self.removed
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.as_path() == path)
            .count()
    }
}

impl UploadCleaner for CountingCleaner {
    fn remove(&self, path: &Path) {
        self.removed.lock().unwrap().push(path.to_path_buf());
        FsCleaner.remove(path);
    }
}
