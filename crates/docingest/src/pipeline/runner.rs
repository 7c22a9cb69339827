use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, info_span, warn, Instrument};

use crate::broadcast::job_progress::{JobPhase, JobProgressBroadcaster};
use crate::chunker::{Chunk, ChunkError, ChunkSource, Chunker, RecursiveSplitter};
use crate::error::ProcessError;
use crate::jobs::{JobMetadata, JobProgress, JobStatus, JobStore, StatusUpdate};
use crate::processor::{ExtractedDocument, ExtractorRegistry};
use crate::sanitize;
use crate::vector::{ChunkBatch, VectorStore};

use super::cleanup::{FsCleaner, TempUpload, UploadCleaner};
use super::config::PipelineConfig;
use super::context::PipelineContext;
use super::control::RunControl;
use super::error::PipelineError;
use super::progress::{reporter_for, ProgressEvent, ProgressReporter};

/// Result of one `execute` call that reached (or found) a terminal state.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job_id: String,
    pub status: JobStatus,
    pub chunks: usize,
    /// Attempts made by this call; 0 when the job was already finished.
    pub attempts: u32,
    pub error: Option<String>,
}

/// Runs single-document jobs: extract → chunk → store, with bounded retry
/// of transient failures.
#[derive(Clone)]
pub struct Pipeline {
    store: JobStore,
    extractors: Arc<ExtractorRegistry>,
    chunker: Arc<dyn Chunker>,
    vectors: Arc<dyn VectorStore>,
    cleaner: Arc<dyn UploadCleaner>,
    config: PipelineConfig,
    broadcaster: Option<JobProgressBroadcaster>,
}

impl Pipeline {
    /// Production constructor — default extractors, a recursive splitter
    /// sized from config, and filesystem cleanup.
    pub fn new(
        store: JobStore,
        vectors: Arc<dyn VectorStore>,
        config: PipelineConfig,
    ) -> Result<Self, ChunkError> {
        let chunker = RecursiveSplitter::new(config.chunk_size, config.chunk_overlap)?;
        Ok(Self {
            store,
            extractors: Arc::new(ExtractorRegistry::new()),
            chunker: Arc::new(chunker),
            vectors,
            cleaner: Arc::new(FsCleaner),
            config,
            broadcaster: None,
        })
    }

    pub fn with_extractors(mut self, extractors: ExtractorRegistry) -> Self {
        self.extractors = Arc::new(extractors);
        self
    }

    pub fn with_chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_cleaner(mut self, cleaner: Arc<dyn UploadCleaner>) -> Self {
        self.cleaner = cleaner;
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: JobProgressBroadcaster) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub(crate) fn cleaner(&self) -> Arc<dyn UploadCleaner> {
        Arc::clone(&self.cleaner)
    }

    pub(crate) fn broadcaster(&self) -> Option<&JobProgressBroadcaster> {
        self.broadcaster.as_ref()
    }

    /// Runs a single-document job to a terminal state.
    ///
    /// Returns `Ok` when the job finished (completed, failed on its own
    /// content, or was already terminal on redelivery). Returns `Err` when the
    /// job was abandoned: not found, vanished, store unavailable, cancelled or
    /// past its soft limit. The upload is removed in every case except a
    /// redelivered terminal job, whose upload is already gone.
    pub async fn execute(
        &self,
        job_id: &str,
        control: &RunControl,
    ) -> Result<JobOutcome, PipelineError> {
        let span = info_span!("pipeline", job_id = %job_id);
        self.execute_inner(job_id, control).instrument(span).await
    }

    async fn execute_inner(
        &self,
        job_id: &str,
        control: &RunControl,
    ) -> Result<JobOutcome, PipelineError> {
        let record = self
            .store
            .get(job_id)?
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))?;

        if record.status.is_terminal() {
            info!(status = %record.status, "Job already finished, skipping redelivery");
            return Ok(JobOutcome {
                job_id: job_id.to_string(),
                status: record.status,
                chunks: record.metadata.as_ref().map(|m| m.chunks_count).unwrap_or(0),
                attempts: 0,
                error: record.error,
            });
        }

        let path = self
            .store
            .get_file_path(job_id)?
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))?;
        let mut upload = TempUpload::new(path, self.cleaner());
        let progress = reporter_for(self.broadcaster(), job_id, &record.file_name);

        info!(
            file = %sanitize::redact_path(upload.path()),
            file_type = %record.file_type,
            "Processing document"
        );

        let mut attempts = 0;
        let result = loop {
            attempts += 1;
            let mut ctx = PipelineContext::new(
                job_id,
                &record.file_name,
                &record.file_type,
                &record.collection_name,
            );

            match self
                .run_attempt(&mut ctx, upload.path(), control, progress.as_ref())
                .await
            {
                Ok(()) => break Ok(ctx),
                Err(e) if e.is_transient() && attempts <= self.config.retry.max_retries => {
                    warn!(
                        attempt = attempts,
                        max_retries = self.config.retry.max_retries,
                        "Transient failure, retrying: {}",
                        e
                    );
                    if let Err(stop) = self.wait_for_retry(job_id, control, progress.as_ref()).await
                    {
                        break Err(stop);
                    }
                }
                Err(e) => break Err(e),
            }
        };

        // The upload goes before the terminal write so a finished job never
        // leaves a file behind.
        upload.remove();

        match result {
            Ok(ctx) => self.complete(ctx, attempts, progress.as_ref()),
            Err(e) => self.fail(
                job_id,
                e,
                (upload.path(), record.file_name.as_str()),
                attempts,
                progress.as_ref(),
            ),
        }
    }

    async fn run_attempt(
        &self,
        ctx: &mut PipelineContext,
        path: &Path,
        control: &RunControl,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        control.check()?;
        self.write_status(
            &ctx.job_id,
            StatusUpdate::new(JobStatus::Processing).started_at(self.store.now()),
        )?;
        self.checkpoint(&ctx.job_id, progress, JobPhase::TextExtraction, 0, 0, 0)?;

        // Step 1: Extract text
        let doc = self
            .extract(path, &ctx.file_type)
            .instrument(info_span!("extract_text", upload = %sanitize::hash_path(path)))
            .await?;
        ctx.extracted = Some(doc);
        control.check()?;
        self.checkpoint(&ctx.job_id, progress, JobPhase::TextExtraction, 25, 0, 0)?;

        // Step 2: Chunk
        {
            let _step = info_span!("chunk").entered();
            self.step_chunk(ctx)?;
        }
        let total = ctx.total_chunks();
        control.check()?;
        self.checkpoint(&ctx.job_id, progress, JobPhase::Chunking, 50, 0, total)?;

        // Step 3: Embed and store
        self.checkpoint(
            &ctx.job_id,
            progress,
            JobPhase::GeneratingEmbeddings,
            75,
            0,
            total,
        )?;
        control.check()?;
        let chunks = ctx.chunks.take().unwrap_or_default();
        let job_id = ctx.job_id.clone();
        ctx.stored = self
            .store_chunks(&ctx.collection, chunks, |meta| {
                format!("{}:{}", job_id, meta.chunk_index)
            })
            .instrument(info_span!("store_chunks", chunks = total))
            .await?;
        self.checkpoint(&ctx.job_id, progress, JobPhase::Storing, 90, total, total)?;

        Ok(())
    }

    fn step_chunk(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        let doc = match ctx.extracted.as_ref() {
            Some(doc) => doc,
            None => return Err(ProcessError::NoText.into()),
        };
        let source = ChunkSource {
            source: ctx.file_name.clone(),
            collection: ctx.collection.clone(),
        };
        let chunks = self.chunk(doc, &source)?;
        debug!("Split {} into {} chunks", ctx.file_name, chunks.len());
        ctx.chunks = Some(chunks);
        Ok(())
    }

    async fn wait_for_retry(
        &self,
        job_id: &str,
        control: &RunControl,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        self.checkpoint(job_id, progress, JobPhase::Retrying, 0, 0, 0)?;
        control.sleep(self.config.retry.backoff).await
    }

    fn complete(
        &self,
        ctx: PipelineContext,
        attempts: u32,
        progress: &dyn ProgressReporter,
    ) -> Result<JobOutcome, PipelineError> {
        let metadata = JobMetadata::new(ctx.stored, ctx.text_length(), ctx.started.elapsed());
        self.write_status(
            &ctx.job_id,
            StatusUpdate::new(JobStatus::Completed)
                .completed_at(self.store.now())
                .metadata(metadata),
        )?;
        self.checkpoint(
            &ctx.job_id,
            progress,
            JobPhase::Completed,
            100,
            ctx.stored,
            ctx.stored,
        )?;
        progress.report(ProgressEvent::Finished {
            status: JobStatus::Completed,
            error: None,
        });

        info!(chunks = ctx.stored, attempts, "Document ingested");
        Ok(JobOutcome {
            job_id: ctx.job_id,
            status: JobStatus::Completed,
            chunks: ctx.stored,
            attempts,
            error: None,
        })
    }

    fn fail(
        &self,
        job_id: &str,
        error: PipelineError,
        upload: (&Path, &str),
        attempts: u32,
        progress: &dyn ProgressReporter,
    ) -> Result<JobOutcome, PipelineError> {
        if matches!(
            error,
            PipelineError::JobNotFound(_) | PipelineError::JobVanished(_)
        ) {
            warn!("Abandoning job: {}", error);
            return Err(error);
        }

        let message = sanitize::public_message(&error.to_string(), &[upload]);
        warn!(attempts, "Job failed: {}", message);

        let written = self.store.update_status(
            job_id,
            StatusUpdate::new(JobStatus::Failed)
                .completed_at(self.store.now())
                .error(message.clone()),
        );
        progress.report(ProgressEvent::Finished {
            status: JobStatus::Failed,
            error: Some(message.clone()),
        });

        if let PipelineError::Store(_) = error {
            // The store itself is the problem; the write above was best-effort.
            return Err(error);
        }
        let abandoned = matches!(
            error,
            PipelineError::Cancelled | PipelineError::SoftTimeLimitExceeded
        );

        match written {
            Err(e) => Err(e.into()),
            Ok(false) => Err(PipelineError::JobVanished(job_id.to_string())),
            Ok(true) if abandoned => Err(error),
            Ok(true) => Ok(JobOutcome {
                job_id: job_id.to_string(),
                status: JobStatus::Failed,
                chunks: 0,
                attempts,
                error: Some(message),
            }),
        }
    }

    // ─── Stages shared with the batch coordinator ───────────────────────────

    /// Extracts text on the blocking pool. Blank documents are an error.
    pub(crate) async fn extract(
        &self,
        path: &Path,
        file_type: &str,
    ) -> Result<ExtractedDocument, PipelineError> {
        let extractors = Arc::clone(&self.extractors);
        let path = path.to_path_buf();
        let file_type = file_type.to_string();
        let doc = tokio::task::spawn_blocking(move || extractors.extract(&path, &file_type))
            .await
            .map_err(|e| PipelineError::TaskFailed(e.to_string()))??;

        if doc.is_blank() {
            return Err(ProcessError::NoText.into());
        }
        Ok(doc)
    }

    pub(crate) fn chunk(
        &self,
        doc: &ExtractedDocument,
        source: &ChunkSource,
    ) -> Result<Vec<Chunk>, PipelineError> {
        Ok(self.chunker.split(doc, source)?)
    }

    /// Validates the batch before anything is written, then hands it over.
    pub(crate) async fn store_chunks<F>(
        &self,
        collection: &str,
        chunks: Vec<Chunk>,
        id_for: F,
    ) -> Result<usize, PipelineError>
    where
        F: Fn(&crate::chunker::ChunkMetadata) -> String,
    {
        let batch = ChunkBatch::from_chunks(chunks, id_for)?;
        if batch.is_empty() {
            return Ok(0);
        }
        Ok(self.vectors.add(collection, batch).await?)
    }

    /// Status write whose `false` means the record is gone or finished elsewhere.
    pub(crate) fn write_status(
        &self,
        job_id: &str,
        update: StatusUpdate,
    ) -> Result<(), PipelineError> {
        if self.store.update_status(job_id, update)? {
            Ok(())
        } else {
            Err(PipelineError::JobVanished(job_id.to_string()))
        }
    }

    fn checkpoint(
        &self,
        job_id: &str,
        progress: &dyn ProgressReporter,
        phase: JobPhase,
        percentage: u8,
        chunks_processed: usize,
        total_chunks: usize,
    ) -> Result<(), PipelineError> {
        let update = JobProgress::new(phase.as_step(), percentage, chunks_processed, total_chunks);
        if !self.store.update_progress(job_id, update)? {
            return Err(PipelineError::JobVanished(job_id.to_string()));
        }
        progress.report(ProgressEvent::Phase {
            phase,
            percentage,
            message: phase.to_string(),
        });
        Ok(())
    }
}
