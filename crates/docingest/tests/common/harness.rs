//! Test harness for isolated test execution.
//!
//! The `TestHarness` owns:
//! - Temporary directories for uploads, vectors and config files
//! - A `JobStore` on an in-memory backend driven by a `ManualClock`
//! - Factories for pipelines, worker pools and submitters over that store

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tempfile::TempDir;

use docingest::config::{Config, UploadsConfig};
use docingest::jobs::{JobRecord, JobStore, ManualClock, MemoryBackend, NewBatchFile, NewJob};
use docingest::pipeline::{Pipeline, PipelineConfig, RetryPolicy};
use docingest::vector::VectorStore;
use docingest::worker::{Dispatcher, PoolConfig, WorkerPool};
use docingest::Submitter;

/// TTL used by harness stores unless a test asks for another.
pub const HARNESS_TTL: Duration = Duration::from_secs(3600);

pub struct TestHarness {
    temp_dir: TempDir,
    /// Where staged uploads live.
    pub upload_dir: PathBuf,
    /// Where config files are written.
    pub config_dir: PathBuf,
    pub clock: Arc<ManualClock>,
    pub store: JobStore,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_ttl(HARNESS_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let upload_dir = temp_dir.path().join("uploads");
        let config_dir = temp_dir.path().join("config");
        std::fs::create_dir_all(&upload_dir).expect("Failed to create upload dir");
        std::fs::create_dir_all(&config_dir).expect("Failed to create config dir");

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = JobStore::with_clock(Arc::new(MemoryBackend::new()), clock.clone(), ttl);

        Self {
            temp_dir,
            upload_dir,
            config_dir,
            clock,
            store,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Moves the store's clock forward.
    pub fn advance(&self, by: Duration) {
        self.clock
            .advance(TimeDelta::from_std(by).expect("duration out of range"));
    }

    /// Writes an upload the way the submission surface would stage it.
    pub fn write_upload(&self, extension: &str, content: &[u8]) -> PathBuf {
        let path = self
            .upload_dir
            .join(format!("{}.{}", uuid::Uuid::new_v4(), extension));
        std::fs::write(&path, content).expect("Failed to write upload");
        path
    }

    /// Stages a text upload and creates a QUEUED job for it.
    pub fn text_job(&self, file_name: &str, content: &str) -> String {
        let path = self.write_upload("txt", content.as_bytes());
        self.store
            .create(NewJob {
                file_name: file_name.to_string(),
                file_type: "txt".to_string(),
                file_path: path,
                collection_name: "notes".to_string(),
            })
            .expect("Failed to create job")
    }

    /// Stages text uploads and creates one QUEUED batch job for them.
    pub fn text_batch(&self, files: &[(&str, &str)]) -> String {
        let files = files
            .iter()
            .map(|(name, content)| NewBatchFile {
                name: name.to_string(),
                file_type: "txt".to_string(),
                file_path: self.write_upload("txt", content.as_bytes()),
            })
            .collect();
        self.store
            .create_batch(files, "notes")
            .expect("Failed to create batch")
    }

    pub fn record(&self, job_id: &str) -> JobRecord {
        self.store
            .get(job_id)
            .expect("store error")
            .expect("job not found")
    }

    /// Number of uploads still on disk.
    pub fn staged_uploads(&self) -> usize {
        std::fs::read_dir(&self.upload_dir)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    pub fn pipeline(&self, vectors: Arc<dyn VectorStore>, retry: RetryPolicy) -> Pipeline {
        let config = PipelineConfig {
            retry,
            ..PipelineConfig::default()
        };
        Pipeline::new(self.store.clone(), vectors, config).expect("Failed to build pipeline")
    }

    pub fn pool(&self, pipeline: Pipeline, workers: usize) -> WorkerPool {
        self.pool_with_limits(pipeline, workers, Duration::from_secs(30), Duration::from_secs(60))
    }

    pub fn pool_with_limits(
        &self,
        pipeline: Pipeline,
        workers: usize,
        soft: Duration,
        hard: Duration,
    ) -> WorkerPool {
        WorkerPool::new(
            pipeline,
            PoolConfig {
                workers,
                soft_time_limit: soft,
                hard_time_limit: hard,
                ..PoolConfig::default()
            },
        )
        .expect("Failed to start pool")
    }

    pub fn pool_with_queue(&self, pipeline: Pipeline, workers: usize, queue: usize) -> WorkerPool {
        WorkerPool::new(
            pipeline,
            PoolConfig {
                workers,
                soft_time_limit: Duration::from_secs(30),
                hard_time_limit: Duration::from_secs(60),
                queue_capacity: queue,
            },
        )
        .expect("Failed to start pool")
    }

    pub fn uploads_config(&self) -> UploadsConfig {
        UploadsConfig {
            directory: self.upload_dir.clone(),
            allowed_extensions: vec!["pdf".to_string(), "pptx".to_string(), "txt".to_string()],
            ..UploadsConfig::default()
        }
    }

    pub fn submitter(&self, dispatcher: Arc<dyn Dispatcher>) -> Submitter {
        Submitter::new(self.store.clone(), dispatcher, self.uploads_config())
    }

    /// Writes a config file to the config directory.
    pub fn write_config(&self, filename: &str, config: &Config) -> PathBuf {
        let path = self.config_dir.join(filename);
        let json = serde_json::to_string_pretty(config).expect("Failed to serialize config");
        std::fs::write(&path, json).expect("Failed to write config file");
        path
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
