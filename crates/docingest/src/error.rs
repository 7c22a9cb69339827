use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Submission rejected: {0}")]
    Submit(#[from] SubmitError),

    #[error("Job store error: {0}")]
    Store(#[from] crate::jobs::StoreError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid value for environment variable {name}: '{value}'")]
    InvalidEnv { name: String, value: String },
}

/// Text extraction failures. Only `Transient` is worth retrying.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to read document '{path}': {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to process PDF: {0}")]
    PdfProcessing(String),

    #[error("Failed to process PPTX: {0}")]
    PptxProcessing(String),

    #[error("No text could be extracted from the document")]
    NoText,

    #[error("Extraction service unavailable: {0}")]
    Transient(String),
}

impl ProcessError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProcessError::Transient(_))
    }
}

/// Rejections raised by the submission surface before any job exists.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("File type not allowed: '{extension}'. Allowed types: {allowed}")]
    ExtensionNotAllowed { extension: String, allowed: String },

    #[error("File '{file_name}' is {size} bytes, exceeding the limit of {limit} bytes")]
    TooLarge {
        file_name: String,
        size: u64,
        limit: u64,
    },

    #[error("File '{0}' is empty")]
    EmptyFile(String),

    #[error("Invalid collection name '{0}'")]
    InvalidCollection(String),

    #[error("A batch needs at least one file")]
    EmptyBatch,

    #[error("Failed to write upload '{path}': {source}")]
    WriteUpload {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Job store error: {0}")]
    Store(#[from] crate::jobs::StoreError),

    #[error("Failed to enqueue job: {0}")]
    Dispatch(#[from] WorkerError),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Worker pool is shutting down")]
    ShuttingDown,

    #[error("Worker queue is full")]
    QueueFull,
}

pub type Result<T> = std::result::Result<T, IngestError>;
