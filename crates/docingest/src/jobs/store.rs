//! Job store over a key-value backend.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

use super::backend::{KeyValueBackend, MemoryBackend, SqliteBackend};
use super::clock::{Clock, SystemClock};
use super::record::{
    BatchFileSource, BatchSummary, FileUpdate, JobProgress, JobRecord, NewBatchFile, NewJob,
    StatusUpdate, StoredJob,
};
use super::StoreError;
use crate::db::Database;

/// Records live for a day after their last write.
pub const DEFAULT_JOB_TTL: Duration = Duration::from_secs(86_400);

fn job_key(job_id: &str) -> String {
    format!("job:{}", job_id)
}

fn decode(key: &str, raw: &str) -> Result<StoredJob, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Decode {
        key: key.to_string(),
        source: e,
    })
}

fn encode(job: &StoredJob) -> Result<String, StoreError> {
    serde_json::to_string(job).map_err(StoreError::Encode)
}

/// Handle to the job records. Cloning shares the backend.
///
/// Every write re-applies the TTL, so a job that keeps reporting progress
/// never expires mid-flight. Mutations on unknown or expired ids are no-ops
/// returning `false`.
#[derive(Clone)]
pub struct JobStore {
    backend: Arc<dyn KeyValueBackend>,
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
}

impl JobStore {
    pub fn new(backend: Arc<dyn KeyValueBackend>, ttl: Duration) -> Self {
        Self::with_clock(backend, Arc::new(SystemClock), ttl)
    }

    pub fn with_clock(backend: Arc<dyn KeyValueBackend>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        Self {
            backend,
            clock,
            ttl,
        }
    }

    /// Store persisted in the given SQLite database.
    pub fn sqlite(db: Database, ttl: Duration) -> Self {
        Self::new(Arc::new(SqliteBackend::new(db)), ttl)
    }

    /// Process-local store.
    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), ttl)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    fn expires_at_ms(&self, now: DateTime<Utc>) -> i64 {
        now.checked_add_signed(self.ttl)
            .map(|t| t.timestamp_millis())
            .unwrap_or(i64::MAX)
    }

    fn insert(&self, job: &StoredJob) -> Result<(), StoreError> {
        let now = self.clock.now();
        self.backend
            .put(&job_key(&job.job_id), &encode(job)?, self.expires_at_ms(now))
    }

    fn load(&self, job_id: &str) -> Result<Option<StoredJob>, StoreError> {
        let key = job_key(job_id);
        let now_ms = self.clock.now().timestamp_millis();
        match self.backend.get(&key, now_ms)? {
            Some(raw) => decode(&key, &raw).map(Some),
            None => Ok(None),
        }
    }

    /// Atomic read-modify-write. `apply` returns false to abandon the write.
    fn mutate<F>(&self, job_id: &str, mut apply: F) -> Result<bool, StoreError>
    where
        F: FnMut(&mut StoredJob) -> bool,
    {
        let key = job_key(job_id);
        let now = self.clock.now();
        let written = self.backend.update(
            &key,
            now.timestamp_millis(),
            self.expires_at_ms(now),
            &mut |raw| {
                let mut job = decode(&key, raw)?;
                if !apply(&mut job) {
                    return Ok(None);
                }
                encode(&job).map(Some)
            },
        )?;

        if !written {
            log::debug!("No update applied to job {}", job_id);
        }
        Ok(written)
    }

    /// Creates a QUEUED single-document job and returns its id.
    pub fn create(&self, new: NewJob) -> Result<String, StoreError> {
        let job_id = Uuid::new_v4().to_string();
        let file_name = new.file_name.clone();
        let job = StoredJob::single(job_id.clone(), new, self.clock.now());
        self.insert(&job)?;
        log::info!("Created job {} for {}", job_id, file_name);
        Ok(job_id)
    }

    /// Creates a QUEUED batch job with one pending entry per file.
    pub fn create_batch(
        &self,
        files: Vec<NewBatchFile>,
        collection_name: &str,
    ) -> Result<String, StoreError> {
        let job_id = Uuid::new_v4().to_string();
        let count = files.len();
        let job = StoredJob::batch(
            job_id.clone(),
            files,
            collection_name.to_string(),
            self.clock.now(),
        );
        self.insert(&job)?;
        log::info!("Created batch job {} with {} files", job_id, count);
        Ok(job_id)
    }

    /// Returns the public view of a job, or `None` if it does not exist.
    pub fn get(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.load(job_id)?.map(|job| job.to_public()))
    }

    pub fn update_status(&self, job_id: &str, update: StatusUpdate) -> Result<bool, StoreError> {
        let status = update.status;
        let written = self.mutate(job_id, |job| job.apply_status(update.clone()))?;
        if written {
            log::debug!("Job {} -> {}", job_id, status);
        }
        Ok(written)
    }

    pub fn update_progress(&self, job_id: &str, progress: JobProgress) -> Result<bool, StoreError> {
        self.mutate(job_id, |job| {
            job.progress = Some(progress.clone());
            true
        })
    }

    /// Updates the first batch entry named `file_name`.
    pub fn update_batch_file_status(
        &self,
        job_id: &str,
        file_name: &str,
        update: FileUpdate,
    ) -> Result<bool, StoreError> {
        self.mutate(job_id, |job| {
            let index = job
                .batch
                .as_ref()
                .and_then(|b| b.files.iter().position(|f| f.entry.name == file_name));
            match index {
                Some(i) => job.apply_file_update(i, update.clone()),
                None => false,
            }
        })
    }

    /// Updates the batch entry at `index`.
    pub fn update_batch_file_at(
        &self,
        job_id: &str,
        index: usize,
        update: FileUpdate,
    ) -> Result<bool, StoreError> {
        self.mutate(job_id, |job| job.apply_file_update(index, update.clone()))
    }

    /// Raises `processed_files`; lower values are ignored.
    pub fn update_batch_progress(&self, job_id: &str, processed: usize) -> Result<bool, StoreError> {
        self.mutate(job_id, |job| match job.batch.as_mut() {
            Some(batch) => {
                batch.raise_processed(processed);
                true
            }
            None => false,
        })
    }

    /// Records the final tallies and clears `current_file`.
    pub fn finish_batch(&self, job_id: &str, summary: BatchSummary) -> Result<bool, StoreError> {
        self.mutate(job_id, |job| match job.batch.as_mut() {
            Some(batch) => {
                batch.successful_files = summary.successful_files;
                batch.failed_files = summary.failed_files;
                batch.current_file = None;
                true
            }
            None => false,
        })
    }

    /// Upload path of a single-document job.
    pub fn get_file_path(&self, job_id: &str) -> Result<Option<PathBuf>, StoreError> {
        Ok(self.load(job_id)?.and_then(|job| job.file_path))
    }

    /// Upload paths of a batch job, in entry order.
    pub fn get_batch_file_paths(&self, job_id: &str) -> Result<Option<Vec<PathBuf>>, StoreError> {
        Ok(self
            .get_batch_files(job_id)?
            .map(|files| files.into_iter().map(|f| f.file_path).collect()))
    }

    /// Name, type and upload path of every batch input, in entry order.
    pub fn get_batch_files(&self, job_id: &str) -> Result<Option<Vec<BatchFileSource>>, StoreError> {
        Ok(self.load(job_id)?.and_then(|job| job.batch).map(|batch| {
            batch
                .files
                .into_iter()
                .map(|f| BatchFileSource {
                    name: f.entry.name,
                    file_type: f.file_type,
                    file_path: f.file_path,
                    status: f.entry.status,
                    chunks: f.entry.chunks,
                })
                .collect()
        }))
    }

    pub fn delete(&self, job_id: &str) -> Result<bool, StoreError> {
        let now_ms = self.clock.now().timestamp_millis();
        let deleted = self.backend.delete(&job_key(job_id), now_ms)?;
        if deleted {
            log::info!("Deleted job {}", job_id);
        }
        Ok(deleted)
    }

    /// Physically removes expired records.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        self.backend
            .purge_expired(self.clock.now().timestamp_millis())
    }
}
