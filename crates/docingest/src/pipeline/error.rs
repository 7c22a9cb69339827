use thiserror::Error;

use crate::chunker::ChunkError;
use crate::error::ProcessError;
use crate::jobs::StoreError;
use crate::vector::{ConsistencyError, VectorStoreError};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Job {0} not found")]
    JobNotFound(String),

    /// The record expired, was deleted, or was finalized by someone else
    /// while this worker still held the job.
    #[error("Job {0} is no longer available")]
    JobVanished(String),

    #[error(transparent)]
    Processing(#[from] ProcessError),

    #[error("Chunking failed: {0}")]
    Chunking(#[from] ChunkError),

    #[error("Inconsistent chunk batch: {0}")]
    Consistency(#[from] ConsistencyError),

    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Job was cancelled")]
    Cancelled,

    #[error("soft time limit exceeded")]
    SoftTimeLimitExceeded,

    #[error("hard time limit exceeded")]
    HardTimeLimitExceeded,

    #[error("Processing task failed: {0}")]
    TaskFailed(String),
}

impl PipelineError {
    /// Only upstream outages are retried; everything else is final.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Processing(e) => e.is_transient(),
            PipelineError::VectorStore(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Errors confined to one file of a batch. Anything else aborts the batch.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            PipelineError::Processing(_)
                | PipelineError::Chunking(_)
                | PipelineError::Consistency(_)
                | PipelineError::VectorStore(_)
                | PipelineError::TaskFailed(_)
        )
    }
}
