//! Job record types.
//!
//! `JobRecord` is the public view handed to pollers. `StoredJob` is what the
//! backend actually persists; it carries the internal upload paths and is
//! converted to a `JobRecord` on every read.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    /// Only reachable by batch jobs.
    PartiallyCompleted,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::PartiallyCompleted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::PartiallyCompleted => "partially_completed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress checkpoint, replaced wholesale on every update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobProgress {
    pub current_step: String,
    pub percentage: u8,
    pub chunks_processed: usize,
    pub total_chunks: usize,
}

impl JobProgress {
    pub fn new(step: &str, percentage: u8, chunks_processed: usize, total_chunks: usize) -> Self {
        Self {
            current_step: step.to_string(),
            percentage: percentage.min(100),
            chunks_processed,
            total_chunks,
        }
    }
}

/// Summary written on a terminal success state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobMetadata {
    pub chunks_count: usize,
    pub text_length: usize,
    pub processing_time_seconds: f64,
}

impl JobMetadata {
    /// Builds metadata, rounding the elapsed time to two decimals.
    pub fn new(chunks_count: usize, text_length: usize, elapsed: std::time::Duration) -> Self {
        let secs = (elapsed.as_secs_f64() * 100.0).round() / 100.0;
        Self {
            chunks_count,
            text_length,
            processing_time_seconds: secs,
        }
    }
}

/// Status of one file inside a batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchFileStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchFileStatus {
    pub fn is_done(self) -> bool {
        matches!(self, BatchFileStatus::Completed | BatchFileStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchFileEntry {
    pub name: String,
    pub status: BatchFileStatus,
    #[serde(default)]
    pub chunks: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Batch aggregate as returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchInfo {
    pub total_files: usize,
    pub processed_files: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    pub overall_progress: f64,
    pub successful_files: usize,
    pub failed_files: usize,
    pub files: Vec<BatchFileEntry>,
}

/// Public view of a job. Internal upload paths never appear here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub file_name: String,
    pub file_type: String,
    pub collection_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JobMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub is_batch: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchInfo>,
}

// ─── Inputs ─────────────────────────────────────────────────────────────────

/// Metadata for a new single-document job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub file_name: String,
    pub file_type: String,
    pub file_path: PathBuf,
    pub collection_name: String,
}

/// One file of a new batch job.
#[derive(Debug, Clone)]
pub struct NewBatchFile {
    pub name: String,
    pub file_type: String,
    pub file_path: PathBuf,
}

/// Internal view of one batch input, as needed to process it.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFileSource {
    pub name: String,
    pub file_type: String,
    pub file_path: PathBuf,
    pub status: BatchFileStatus,
    pub chunks: usize,
}

/// Partial status update; only the fields that are set get written.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub metadata: Option<JobMetadata>,
}

impl StatusUpdate {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            started_at: None,
            completed_at: None,
            error: None,
            metadata: None,
        }
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    pub fn metadata(mut self, metadata: JobMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Update for one batch file entry.
#[derive(Debug, Clone)]
pub struct FileUpdate {
    pub status: BatchFileStatus,
    pub chunks: Option<usize>,
    pub error: Option<String>,
}

impl FileUpdate {
    pub fn processing() -> Self {
        Self {
            status: BatchFileStatus::Processing,
            chunks: None,
            error: None,
        }
    }

    pub fn completed(chunks: usize) -> Self {
        Self {
            status: BatchFileStatus::Completed,
            chunks: Some(chunks),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: BatchFileStatus::Failed,
            chunks: None,
            error: Some(error.into()),
        }
    }
}

/// Final per-file tallies of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub successful_files: usize,
    pub failed_files: usize,
}

// ─── Persisted form ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredBatchFile {
    #[serde(flatten)]
    pub entry: BatchFileEntry,
    #[serde(default)]
    pub file_type: String,
    pub file_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredBatch {
    pub total_files: usize,
    pub processed_files: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    #[serde(default)]
    pub successful_files: usize,
    #[serde(default)]
    pub failed_files: usize,
    pub files: Vec<StoredBatchFile>,
}

impl StoredBatch {
    pub fn done_count(&self) -> usize {
        self.files.iter().filter(|f| f.entry.status.is_done()).count()
    }

    /// Raises `processed_files`, never lowering it and never exceeding the total.
    pub fn raise_processed(&mut self, processed: usize) {
        let clamped = processed.min(self.total_files);
        if clamped > self.processed_files {
            self.processed_files = clamped;
        }
    }

    fn overall_progress(&self) -> f64 {
        if self.total_files == 0 {
            return 0.0;
        }
        self.processed_files as f64 / self.total_files as f64 * 100.0
    }

    fn to_info(&self) -> BatchInfo {
        BatchInfo {
            total_files: self.total_files,
            processed_files: self.processed_files,
            current_file: self.current_file.clone(),
            overall_progress: self.overall_progress(),
            successful_files: self.successful_files,
            failed_files: self.failed_files,
            files: self.files.iter().map(|f| f.entry.clone()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredJob {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub file_name: String,
    pub file_type: String,
    pub collection_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JobMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub is_batch: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<StoredBatch>,
}

impl StoredJob {
    pub fn single(job_id: String, new: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            job_id,
            status: JobStatus::Queued,
            created_at: now,
            started_at: None,
            completed_at: None,
            file_name: new.file_name,
            file_type: new.file_type,
            collection_name: new.collection_name,
            progress: None,
            metadata: None,
            error: None,
            is_batch: false,
            file_path: Some(new.file_path),
            batch: None,
        }
    }

    pub fn batch(
        job_id: String,
        files: Vec<NewBatchFile>,
        collection_name: String,
        now: DateTime<Utc>,
    ) -> Self {
        let total_files = files.len();
        let files = files
            .into_iter()
            .map(|f| StoredBatchFile {
                entry: BatchFileEntry {
                    name: f.name,
                    status: BatchFileStatus::Pending,
                    chunks: 0,
                    error: None,
                },
                file_type: f.file_type,
                file_path: f.file_path,
            })
            .collect();

        Self {
            job_id,
            status: JobStatus::Queued,
            created_at: now,
            started_at: None,
            completed_at: None,
            file_name: format!("{} files", total_files),
            file_type: "batch".to_string(),
            collection_name,
            progress: None,
            metadata: None,
            error: None,
            is_batch: true,
            file_path: None,
            batch: Some(StoredBatch {
                total_files,
                processed_files: 0,
                current_file: None,
                successful_files: 0,
                failed_files: 0,
                files,
            }),
        }
    }

    /// Applies a status update. Returns false when the transition is not allowed.
    pub fn apply_status(&mut self, update: StatusUpdate) -> bool {
        if self.status.is_terminal() {
            log::warn!(
                "Rejecting status '{}' for job {}: already {}",
                update.status,
                self.job_id,
                self.status
            );
            return false;
        }
        if update.status == JobStatus::Queued && self.status != JobStatus::Queued {
            log::warn!("Rejecting revert to queued for job {}", self.job_id);
            return false;
        }
        if update.status == JobStatus::PartiallyCompleted && !self.is_batch {
            log::warn!(
                "Rejecting partially_completed for non-batch job {}",
                self.job_id
            );
            return false;
        }

        self.status = update.status;
        if self.started_at.is_none() {
            self.started_at = update.started_at;
        }
        if self.completed_at.is_none() {
            self.completed_at = update.completed_at;
        }
        if update.error.is_some() {
            self.error = update.error;
        }
        if update.metadata.is_some() {
            self.metadata = update.metadata;
        }
        true
    }

    /// Applies a file update to the entry at `index`.
    pub fn apply_file_update(&mut self, index: usize, update: FileUpdate) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let Some(batch) = self.batch.as_mut() else {
            return false;
        };
        let Some(file) = batch.files.get_mut(index) else {
            return false;
        };

        file.entry.status = update.status;
        if update.status == BatchFileStatus::Failed {
            file.entry.chunks = 0;
        } else if let Some(chunks) = update.chunks {
            file.entry.chunks = chunks;
        }
        if update.error.is_some() {
            file.entry.error = update.error;
        }
        if update.status == BatchFileStatus::Processing {
            batch.current_file = Some(file.entry.name.clone());
        }

        let done = batch.done_count();
        batch.raise_processed(done);
        true
    }

    pub fn to_public(&self) -> JobRecord {
        JobRecord {
            job_id: self.job_id.clone(),
            status: self.status,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            file_name: self.file_name.clone(),
            file_type: self.file_type.clone(),
            collection_name: self.collection_name.clone(),
            progress: self.progress.clone(),
            metadata: self.metadata.clone(),
            error: self.error.clone(),
            is_batch: self.is_batch,
            batch: self.batch.as_ref().map(StoredBatch::to_info),
        }
    }
}
