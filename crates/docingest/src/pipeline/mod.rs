pub mod batch;
pub mod cleanup;
pub mod config;
pub mod context;
pub mod control;
pub mod error;
pub mod progress;
pub mod runner;

pub use batch::{BatchCoordinator, BatchOutcome};
pub use cleanup::{FsCleaner, TempUpload, UploadCleaner};
pub use config::{PipelineConfig, RetryPolicy};
pub use context::PipelineContext;
pub use control::RunControl;
pub use error::PipelineError;
pub use progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};
pub use runner::{JobOutcome, Pipeline};
