//! Broadcasting of job progress events.
//!
//! Pollers read the job store; anything that wants a push feed (the CLI's
//! live output, an embedding application) subscribes here instead.

pub mod job_progress;

pub use job_progress::{JobPhase, JobProgressBroadcaster, JobProgressEvent, JobProgressTracker};
