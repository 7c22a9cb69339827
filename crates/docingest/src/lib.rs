pub mod broadcast;
pub mod chunker;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod pipeline;
pub mod processor;
pub mod sanitize;
pub mod submit;
pub mod telemetry;
pub mod vector;
pub mod worker;

pub use broadcast::{JobProgressBroadcaster, JobProgressEvent};
pub use chunker::{Chunk, Chunker, RecursiveSplitter};
pub use config::{load_config, load_with_env, Config};
pub use error::{ConfigError, IngestError, ProcessError, Result, SubmitError, WorkerError};
pub use jobs::{JobRecord, JobStatus, JobStore};
pub use pipeline::{BatchCoordinator, Pipeline, PipelineConfig, PipelineError, RunControl};
pub use processor::{DocumentFormat, ExtractorRegistry, TextExtractor};
pub use submit::{Submitter, Upload};
pub use vector::{JsonlVectorStore, MemoryVectorStore, VectorStore};
pub use worker::{Dispatcher, PoolConfig, Task, WorkerPool};
