use std::time::Duration;

use crate::jobs::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// A single uploaded document.
    Document,
    /// A multi-file batch, processed sequentially on one worker.
    Batch,
}

/// A unit of work handed to the dispatch boundary. Only the job id travels;
/// everything else is read from the job store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub kind: TaskKind,
    pub job_id: String,
}

impl Task {
    pub fn document(job_id: impl Into<String>) -> Self {
        Self {
            kind: TaskKind::Document,
            job_id: job_id.into(),
        }
    }

    pub fn batch(job_id: impl Into<String>) -> Self {
        Self {
            kind: TaskKind::Batch,
            job_id: job_id.into(),
        }
    }
}

/// What a worker observed when it finished with a task.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task: Task,
    /// Terminal status of the job, or `None` if the job was abandoned
    /// (not found, expired, deleted).
    pub status: Option<JobStatus>,
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl TaskReport {
    pub fn succeeded(&self) -> bool {
        matches!(
            self.status,
            Some(JobStatus::Completed) | Some(JobStatus::PartiallyCompleted)
        )
    }
}
