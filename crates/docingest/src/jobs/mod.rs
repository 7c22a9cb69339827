//! Durable, TTL-bounded job records.
//!
//! The [`JobStore`] is constructed explicitly and handed to the pipeline and
//! the submission surface; there is no process-wide instance.

pub mod backend;
pub mod clock;
pub mod record;
pub mod store;

use thiserror::Error;

pub use backend::{KeyValueBackend, MemoryBackend, SqliteBackend};
pub use clock::{Clock, ManualClock, SystemClock};
pub use record::{
    BatchFileEntry, BatchFileSource, BatchFileStatus, BatchInfo, BatchSummary, FileUpdate, JobMetadata,
    JobProgress, JobRecord, JobStatus, NewBatchFile, NewJob, StatusUpdate,
};
pub use store::{JobStore, DEFAULT_JOB_TTL};

/// The backend is unavailable or a stored record could not be decoded.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Corrupt record '{key}': {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode record: {0}")]
    Encode(#[source] serde_json::Error),
}
