//! Dispatch boundary: hands job ids to workers that run them to completion.

pub mod cancellation;
pub mod pool;
pub mod task;

use crate::error::WorkerError;

pub use cancellation::CancellationRegistry;
pub use pool::{
    PoolConfig, WorkerPool, DEFAULT_HARD_TIME_LIMIT, DEFAULT_QUEUE_CAPACITY, DEFAULT_SOFT_TIME_LIMIT,
};
pub use task::{Task, TaskKind, TaskReport};

/// Accepts tasks for asynchronous execution. Delivery is at-least-once; the
/// pipeline tolerates redelivery of a finished job.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, task: Task) -> Result<(), WorkerError>;
}
