//! Sequential processing of multi-file jobs.

use std::path::Path;
use std::time::Instant;

use tracing::{info, info_span, warn, Instrument};

use crate::chunker::ChunkSource;
use crate::jobs::{
    BatchFileSource, BatchFileStatus, BatchSummary, FileUpdate, JobMetadata, JobStatus,
    StatusUpdate, StoreError,
};
use crate::sanitize;

use super::cleanup::TempUpload;
use super::control::RunControl;
use super::error::PipelineError;
use super::progress::{reporter_for, ProgressEvent, ProgressReporter};
use super::runner::Pipeline;

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub job_id: String,
    pub status: JobStatus,
    pub successful_files: usize,
    pub failed_files: usize,
    pub chunks: usize,
}

#[derive(Debug, Default)]
struct BatchTally {
    successful: usize,
    failed: usize,
    chunks: usize,
    text_length: usize,
}

impl BatchTally {
    fn status(&self) -> JobStatus {
        if self.failed == 0 {
            JobStatus::Completed
        } else if self.successful == 0 {
            JobStatus::Failed
        } else {
            JobStatus::PartiallyCompleted
        }
    }
}

/// Runs every file of a batch job on one worker, isolating per-file failures.
#[derive(Clone)]
pub struct BatchCoordinator {
    pipeline: Pipeline,
}

impl BatchCoordinator {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    /// Processes the batch to a terminal state.
    ///
    /// Per-file errors are recorded on the file's entry and the batch moves on.
    /// Store failures, a vanished record, cancellation and the soft limit abort
    /// the whole batch; they are returned after a best-effort FAILED write.
    pub async fn run(
        &self,
        job_id: &str,
        control: &RunControl,
    ) -> Result<BatchOutcome, PipelineError> {
        let span = info_span!("batch", job_id = %job_id);
        self.run_inner(job_id, control).instrument(span).await
    }

    async fn run_inner(
        &self,
        job_id: &str,
        control: &RunControl,
    ) -> Result<BatchOutcome, PipelineError> {
        let store = self.pipeline.store();
        let record = store
            .get(job_id)?
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))?;

        if record.status.is_terminal() {
            info!(status = %record.status, "Batch already finished, skipping redelivery");
            let (successful_files, failed_files) = record
                .batch
                .as_ref()
                .map(|b| (b.successful_files, b.failed_files))
                .unwrap_or((0, 0));
            return Ok(BatchOutcome {
                job_id: job_id.to_string(),
                status: record.status,
                successful_files,
                failed_files,
                chunks: record.metadata.map(|m| m.chunks_count).unwrap_or(0),
            });
        }

        let files = store
            .get_batch_files(job_id)?
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))?;
        // Files finished by an earlier delivery have had their uploads removed.
        let mut uploads: Vec<TempUpload> = files
            .iter()
            .map(|f| {
                if f.status.is_done() {
                    TempUpload::already_removed(f.file_path.clone(), self.pipeline.cleaner())
                } else {
                    TempUpload::new(f.file_path.clone(), self.pipeline.cleaner())
                }
            })
            .collect();
        let progress = reporter_for(self.pipeline.broadcaster(), job_id, &record.file_name);
        let started = Instant::now();

        info!(files = files.len(), "Processing batch");

        let result = self
            .process_files(
                job_id,
                &record.collection_name,
                &files,
                &mut uploads,
                control,
                progress.as_ref(),
            )
            .await;

        // Whatever is still on disk goes before the terminal write.
        for upload in uploads.iter_mut() {
            upload.remove();
        }

        match result {
            Ok(tally) => self.finish(job_id, tally, started, progress.as_ref()),
            Err(e) => {
                let names: Vec<(&Path, &str)> = files
                    .iter()
                    .map(|f| (f.file_path.as_path(), f.name.as_str()))
                    .collect();
                self.abort(job_id, e, &names, progress.as_ref())
            }
        }
    }

    async fn process_files(
        &self,
        job_id: &str,
        collection: &str,
        files: &[BatchFileSource],
        uploads: &mut [TempUpload],
        control: &RunControl,
        progress: &dyn ProgressReporter,
    ) -> Result<BatchTally, PipelineError> {
        let store = self.pipeline.store();
        self.pipeline.write_status(
            job_id,
            StatusUpdate::new(JobStatus::Processing).started_at(store.now()),
        )?;

        let total = files.len();
        let mut tally = BatchTally::default();

        for (index, (file, upload)) in files.iter().zip(uploads.iter_mut()).enumerate() {
            match file.status {
                BatchFileStatus::Completed => {
                    tally.successful += 1;
                    tally.chunks += file.chunks;
                    continue;
                }
                BatchFileStatus::Failed => {
                    tally.failed += 1;
                    continue;
                }
                BatchFileStatus::Pending | BatchFileStatus::Processing => {}
            }
            control.check()?;
            ensure_written(
                job_id,
                store.update_batch_file_at(job_id, index, FileUpdate::processing()),
            )?;
            progress.report(ProgressEvent::FileStarted {
                file_name: file.name.clone(),
                percentage: percent(index, total),
            });

            let result = self
                .process_file(job_id, index, file, collection, control)
                .instrument(info_span!("batch_file", index, file = %file.name))
                .await;
            upload.remove();

            let update = match result {
                Ok((chunks, text_length)) => {
                    tally.successful += 1;
                    tally.chunks += chunks;
                    tally.text_length += text_length;
                    FileUpdate::completed(chunks)
                }
                Err(e) if e.is_per_file() => {
                    let message = sanitize::public_message(
                        &e.to_string(),
                        &[(upload.path(), file.name.as_str())],
                    );
                    warn!(index, "Batch file failed: {}", message);
                    tally.failed += 1;
                    FileUpdate::failed(message)
                }
                Err(e) => return Err(e),
            };
            ensure_written(job_id, store.update_batch_file_at(job_id, index, update))?;
            ensure_written(job_id, store.update_batch_progress(job_id, index + 1))?;
        }

        Ok(tally)
    }

    /// One file with bounded retry of transient failures. Returns the stored
    /// chunk count and extracted text length.
    async fn process_file(
        &self,
        job_id: &str,
        index: usize,
        file: &BatchFileSource,
        collection: &str,
        control: &RunControl,
    ) -> Result<(usize, usize), PipelineError> {
        let retry = self.pipeline.config().retry;
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self
                .process_file_once(job_id, index, file, collection, control)
                .await
            {
                Err(e) if e.is_transient() && attempts <= retry.max_retries => {
                    warn!(attempt = attempts, "Transient failure, retrying file: {}", e);
                    control.sleep(retry.backoff).await?;
                }
                other => return other,
            }
        }
    }

    async fn process_file_once(
        &self,
        job_id: &str,
        index: usize,
        file: &BatchFileSource,
        collection: &str,
        control: &RunControl,
    ) -> Result<(usize, usize), PipelineError> {
        let doc = self.pipeline.extract(&file.file_path, &file.file_type).await?;
        control.check()?;

        let text_length = doc.text_length();
        let source = ChunkSource {
            source: file.name.clone(),
            collection: collection.to_string(),
        };
        let chunks = self.pipeline.chunk(&doc, &source)?;
        control.check()?;

        let stored = self
            .pipeline
            .store_chunks(collection, chunks, |meta| {
                format!("{}:{}:{}", job_id, index, meta.chunk_index)
            })
            .await?;
        Ok((stored, text_length))
    }

    fn finish(
        &self,
        job_id: &str,
        tally: BatchTally,
        started: Instant,
        progress: &dyn ProgressReporter,
    ) -> Result<BatchOutcome, PipelineError> {
        let store = self.pipeline.store();
        let total = tally.successful + tally.failed;
        ensure_written(
            job_id,
            store.finish_batch(
                job_id,
                BatchSummary {
                    successful_files: tally.successful,
                    failed_files: tally.failed,
                },
            ),
        )?;

        let status = tally.status();
        let error = (tally.failed > 0)
            .then(|| format!("{} of {} files failed to process", tally.failed, total));

        let mut update = StatusUpdate::new(status).completed_at(store.now());
        if let Some(ref message) = error {
            update = update.error(message.clone());
        }
        if status != JobStatus::Failed {
            update = update.metadata(JobMetadata::new(
                tally.chunks,
                tally.text_length,
                started.elapsed(),
            ));
        }
        self.pipeline.write_status(job_id, update)?;
        progress.report(ProgressEvent::Finished {
            status,
            error: error.clone(),
        });

        info!(
            status = %status,
            successful = tally.successful,
            failed = tally.failed,
            chunks = tally.chunks,
            "Batch finished"
        );
        Ok(BatchOutcome {
            job_id: job_id.to_string(),
            status,
            successful_files: tally.successful,
            failed_files: tally.failed,
            chunks: tally.chunks,
        })
    }

    fn abort(
        &self,
        job_id: &str,
        error: PipelineError,
        uploads: &[(&Path, &str)],
        progress: &dyn ProgressReporter,
    ) -> Result<BatchOutcome, PipelineError> {
        if matches!(
            error,
            PipelineError::JobNotFound(_) | PipelineError::JobVanished(_)
        ) {
            warn!("Abandoning batch: {}", error);
            return Err(error);
        }

        let message = sanitize::public_message(&error.to_string(), uploads);
        warn!("Batch aborted: {}", message);

        let store = self.pipeline.store();
        self.fail_in_flight(job_id, &message);
        let update = StatusUpdate::new(JobStatus::Failed)
            .completed_at(store.now())
            .error(message.clone());
        match store.update_status(job_id, update) {
            Ok(true) => {}
            Ok(false) => warn!("Batch record gone before it could be marked failed"),
            Err(e) => warn!("Failed to mark batch failed: {}", e),
        }
        progress.report(ProgressEvent::Finished {
            status: JobStatus::Failed,
            error: Some(message),
        });
        Err(error)
    }

    /// Marks entries left mid-flight as failed, best-effort.
    fn fail_in_flight(&self, job_id: &str, message: &str) {
        let store = self.pipeline.store();
        let files = match store.get_batch_files(job_id) {
            Ok(Some(files)) => files,
            Ok(None) => return,
            Err(e) => {
                warn!("Failed to read batch files before abort: {}", e);
                return;
            }
        };
        for (index, file) in files.iter().enumerate() {
            if file.status != BatchFileStatus::Processing {
                continue;
            }
            if let Err(e) = store.update_batch_file_at(job_id, index, FileUpdate::failed(message)) {
                warn!(index, "Failed to mark batch file failed: {}", e);
            }
        }
    }
}

fn ensure_written(job_id: &str, written: Result<bool, StoreError>) -> Result<(), PipelineError> {
    if written? {
        Ok(())
    } else {
        Err(PipelineError::JobVanished(job_id.to_string()))
    }
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    (done * 100 / total).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{BatchFileStatus, JobStore, NewBatchFile};
    use crate::pipeline::cleanup::UploadCleaner;
    use crate::pipeline::config::{PipelineConfig, RetryPolicy};
    use crate::vector::{ChunkBatch, MemoryVectorStore, VectorStore, VectorStoreError};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct CountingCleaner {
        removed: Mutex<Vec<PathBuf>>,
    }

    impl UploadCleaner for CountingCleaner {
        fn remove(&self, path: &Path) {
            self.removed.lock().unwrap().push(path.to_path_buf());
        }
    }

    /// Cancels the run on the first store call.
    struct CancellingStore {
        token: CancellationToken,
        inner: MemoryVectorStore,
    }

    #[async_trait]
    impl VectorStore for CancellingStore {
        async fn add(&self, collection: &str, batch: ChunkBatch) -> Result<usize, VectorStoreError> {
            self.token.cancel();
            self.inner.add(collection, batch).await
        }
    }

    struct FlakyStore {
        failures: AtomicUsize,
        inner: MemoryVectorStore,
    }

    #[async_trait]
    impl VectorStore for FlakyStore {
        async fn add(&self, collection: &str, batch: ChunkBatch) -> Result<usize, VectorStoreError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(VectorStoreError::Transient("timeout".into()));
            }
            self.inner.add(collection, batch).await
        }
    }

    struct Fixture {
        dir: TempDir,
        store: JobStore,
        cleaner: Arc<CountingCleaner>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
                store: JobStore::in_memory(Duration::from_secs(3600)),
                cleaner: Arc::new(CountingCleaner::default()),
            }
        }

        fn coordinator(&self, vectors: Arc<dyn VectorStore>, retry: RetryPolicy) -> BatchCoordinator {
            let config = PipelineConfig {
                retry,
                ..PipelineConfig::default()
            };
            let pipeline = Pipeline::new(self.store.clone(), vectors, config)
                .unwrap()
                .with_cleaner(self.cleaner.clone());
            BatchCoordinator::new(pipeline)
        }

        /// Each entry is (name, content); all files are plain text.
        fn batch(&self, files: &[(&str, &str)]) -> String {
            let files = files
                .iter()
                .enumerate()
                .map(|(i, (name, content))| {
                    let path = self.dir.path().join(format!("{}.txt", i));
                    std::fs::write(&path, content).unwrap();
                    NewBatchFile {
                        name: name.to_string(),
                        file_type: "txt".to_string(),
                        file_path: path,
                    }
                })
                .collect();
            self.store.create_batch(files, "lectures").unwrap()
        }

        fn removed(&self) -> Vec<PathBuf> {
            self.cleaner.removed.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn test_mixed_batch_is_partially_completed() {
        let fx = Fixture::new();
        let vectors = Arc::new(MemoryVectorStore::new());
        let coordinator = fx.coordinator(vectors.clone(), RetryPolicy::none());
        let id = fx.batch(&[
            ("week1.txt", "Ownership and borrowing."),
            ("empty.txt", "   "),
            ("week2.txt", "Traits and generics."),
        ]);

        let outcome = coordinator.run(&id, &RunControl::default()).await.unwrap();
        assert_eq!(outcome.status, JobStatus::PartiallyCompleted);
        assert_eq!(outcome.successful_files, 2);
        assert_eq!(outcome.failed_files, 1);

        let record = fx.store.get(&id).unwrap().unwrap();
        assert_eq!(record.status, JobStatus::PartiallyCompleted);
        assert_eq!(
            record.error.as_deref(),
            Some("1 of 3 files failed to process")
        );
        let metadata = record.metadata.unwrap();
        assert_eq!(metadata.chunks_count, outcome.chunks);
        assert_eq!(
            metadata.text_length,
            "Ownership and borrowing.".len() + "Traits and generics.".len()
        );

        let batch = record.batch.unwrap();
        assert_eq!(batch.processed_files, 3);
        assert_eq!(batch.overall_progress, 100.0);
        assert!(batch.current_file.is_none());
        assert_eq!(batch.files[0].status, BatchFileStatus::Completed);
        assert_eq!(batch.files[1].status, BatchFileStatus::Failed);
        assert_eq!(
            batch.files[1].error.as_deref(),
            Some("No text could be extracted from the document")
        );
        assert_eq!(batch.files[2].status, BatchFileStatus::Completed);

        assert!(vectors.get("lectures", &format!("{}:2:0", id)).is_some());
        assert_eq!(fx.removed().len(), 3);
    }

    #[tokio::test]
    async fn test_all_good_batch_completes_without_error() {
        let fx = Fixture::new();
        let coordinator = fx.coordinator(Arc::new(MemoryVectorStore::new()), RetryPolicy::none());
        let id = fx.batch(&[("a.txt", "alpha"), ("b.txt", "beta")]);

        let outcome = coordinator.run(&id, &RunControl::default()).await.unwrap();
        assert_eq!(outcome.status, JobStatus::Completed);
        let record = fx.store.get(&id).unwrap().unwrap();
        assert!(record.error.is_none());
        assert_eq!(record.metadata.unwrap().chunks_count, 2);
    }

    #[tokio::test]
    async fn test_all_bad_batch_fails_without_metadata() {
        let fx = Fixture::new();
        let coordinator = fx.coordinator(Arc::new(MemoryVectorStore::new()), RetryPolicy::none());
        let id = fx.batch(&[("a.txt", ""), ("b.txt", "\n")]);

        let outcome = coordinator.run(&id, &RunControl::default()).await.unwrap();
        assert_eq!(outcome.status, JobStatus::Failed);
        let record = fx.store.get(&id).unwrap().unwrap();
        assert_eq!(
            record.error.as_deref(),
            Some("2 of 2 files failed to process")
        );
        assert!(record.metadata.is_none());
        assert_eq!(fx.removed().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_names_are_tracked_separately() {
        let fx = Fixture::new();
        let coordinator = fx.coordinator(Arc::new(MemoryVectorStore::new()), RetryPolicy::none());
        let id = fx.batch(&[("same.txt", "first"), ("same.txt", " ")]);

        coordinator.run(&id, &RunControl::default()).await.unwrap();
        let batch = fx.store.get(&id).unwrap().unwrap().batch.unwrap();
        assert_eq!(batch.files[0].status, BatchFileStatus::Completed);
        assert_eq!(batch.files[1].status, BatchFileStatus::Failed);
    }

    #[tokio::test]
    async fn test_transient_file_failure_is_retried() {
        let fx = Fixture::new();
        let vectors = Arc::new(FlakyStore {
            failures: AtomicUsize::new(1),
            inner: MemoryVectorStore::new(),
        });
        let coordinator = fx.coordinator(vectors, RetryPolicy::new(2, Duration::ZERO));
        let id = fx.batch(&[("a.txt", "alpha")]);

        let outcome = coordinator.run(&id, &RunControl::default()).await.unwrap();
        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(fx.removed().len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_and_cleans_every_upload() {
        let fx = Fixture::new();
        let token = CancellationToken::new();
        let vectors = Arc::new(CancellingStore {
            token: token.clone(),
            inner: MemoryVectorStore::new(),
        });
        let coordinator = fx.coordinator(vectors, RetryPolicy::none());
        let id = fx.batch(&[("a.txt", "alpha"), ("b.txt", "beta"), ("c.txt", "gamma")]);

        let err = coordinator
            .run(&id, &RunControl::new(token))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));

        let record = fx.store.get(&id).unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("Job was cancelled"));
        assert_eq!(record.batch.unwrap().files[1].status, BatchFileStatus::Pending);
        assert_eq!(fx.removed().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_batch_is_not_found() {
        let fx = Fixture::new();
        let coordinator = fx.coordinator(Arc::new(MemoryVectorStore::new()), RetryPolicy::none());
        let err = coordinator
            .run("nope", &RunControl::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::JobNotFound(_)));
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 4), 0);
        assert_eq!(percent(1, 4), 25);
        assert_eq!(percent(3, 0), 0);
    }
}
