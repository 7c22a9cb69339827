//! Job progress broadcaster for real-time job status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::jobs::JobStatus;

/// Phase of job processing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    TextExtraction,
    Chunking,
    GeneratingEmbeddings,
    Storing,
    Retrying,
    Completed,
    Failed,
}

impl JobPhase {
    /// Step name as persisted in `JobProgress::current_step`.
    pub fn as_step(self) -> &'static str {
        match self {
            JobPhase::Queued => "queued",
            JobPhase::TextExtraction => "text_extraction",
            JobPhase::Chunking => "chunking",
            JobPhase::GeneratingEmbeddings => "generating_embeddings",
            JobPhase::Storing => "storing",
            JobPhase::Retrying => "retrying",
            JobPhase::Completed => "completed",
            JobPhase::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Queued => write!(f, "Queued"),
            JobPhase::TextExtraction => write!(f, "Extracting text"),
            JobPhase::Chunking => write!(f, "Chunking"),
            JobPhase::GeneratingEmbeddings => write!(f, "Generating embeddings"),
            JobPhase::Storing => write!(f, "Storing"),
            JobPhase::Retrying => write!(f, "Retrying"),
            JobPhase::Completed => write!(f, "Completed"),
            JobPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Progress event for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    /// Unique job identifier.
    pub job_id: String,
    /// Display name of the job (file name, or "<n> files" for a batch).
    pub file_name: String,
    /// Current phase of processing.
    pub phase: JobPhase,
    /// Overall job status.
    pub status: JobStatus,
    /// Completion percentage of the current job.
    pub percentage: u8,
    /// Human-readable message describing current activity.
    pub message: String,
    /// Timestamp of this event.
    pub timestamp: DateTime<Utc>,
    /// File currently being processed (batch jobs).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    /// Error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobProgressEvent {
    /// Creates a new progress event.
    pub fn new(job_id: &str, file_name: &str, phase: JobPhase, percentage: u8, message: &str) -> Self {
        let status = match phase {
            JobPhase::Queued => JobStatus::Queued,
            JobPhase::Completed => JobStatus::Completed,
            JobPhase::Failed => JobStatus::Failed,
            _ => JobStatus::Processing,
        };

        Self {
            job_id: job_id.to_string(),
            file_name: file_name.to_string(),
            phase,
            status,
            percentage,
            message: message.to_string(),
            timestamp: Utc::now(),
            current_file: None,
            error: None,
        }
    }

    /// Creates a terminal event carrying the final status.
    pub fn finished(job_id: &str, file_name: &str, status: JobStatus, error: Option<&str>) -> Self {
        let phase = if status == JobStatus::Failed {
            JobPhase::Failed
        } else {
            JobPhase::Completed
        };
        let message = match status {
            JobStatus::Completed => "Processing completed successfully",
            JobStatus::PartiallyCompleted => "Processing completed with failures",
            _ => "Processing failed",
        };

        Self {
            job_id: job_id.to_string(),
            file_name: file_name.to_string(),
            phase,
            status,
            percentage: 100,
            message: message.to_string(),
            timestamp: Utc::now(),
            current_file: None,
            error: error.map(|e| e.to_string()),
        }
    }
}

/// Broadcasts job progress events for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new job progress broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    /// Creates a progress tracker for a job.
    pub fn start_job(&self, job_id: &str, file_name: &str) -> JobProgressTracker {
        JobProgressTracker::new(job_id, file_name, Arc::clone(&self.sender))
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Tracks progress for a single job.
pub struct JobProgressTracker {
    job_id: String,
    file_name: String,
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressTracker {
    pub fn new(
        job_id: &str,
        file_name: &str,
        sender: Arc<broadcast::Sender<JobProgressEvent>>,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            file_name: file_name.to_string(),
            sender,
        }
    }

    /// Updates the current phase with a message.
    pub fn update_phase(&self, phase: JobPhase, percentage: u8, message: &str) {
        let event = JobProgressEvent::new(&self.job_id, &self.file_name, phase, percentage, message);
        let _ = self.sender.send(event);
    }

    /// Reports the batch file now being processed.
    pub fn file_started(&self, file_name: &str, percentage: u8) {
        let mut event = JobProgressEvent::new(
            &self.job_id,
            &self.file_name,
            JobPhase::TextExtraction,
            percentage,
            &format!("Processing {}", file_name),
        );
        event.current_file = Some(file_name.to_string());
        let _ = self.sender.send(event);
    }

    /// Reports the terminal status of the job.
    pub fn finished(&self, status: JobStatus, error: Option<&str>) {
        let event = JobProgressEvent::finished(&self.job_id, &self.file_name, status, error);
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcaster_send_receive() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        let event = JobProgressEvent::new("test-job", "slides.pptx", JobPhase::Chunking, 50, "Chunking");
        broadcaster.send(event);

        let received = rx.try_recv().unwrap();
        assert_eq!(received.job_id, "test-job");
        assert_eq!(received.file_name, "slides.pptx");
        assert_eq!(received.phase, JobPhase::Chunking);
        assert_eq!(received.status, JobStatus::Processing);
        assert_eq!(received.percentage, 50);
    }

    #[test]
    fn test_send_without_subscribers_is_fine() {
        let broadcaster = JobProgressBroadcaster::default();
        broadcaster.send(JobProgressEvent::new("j", "f", JobPhase::Queued, 0, "queued"));
    }

    #[test]
    fn test_tracker_events() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();
        let tracker = broadcaster.start_job("job-1", "2 files");

        tracker.file_started("a.pdf", 0);
        let received = rx.try_recv().unwrap();
        assert_eq!(received.current_file.as_deref(), Some("a.pdf"));

        tracker.finished(JobStatus::PartiallyCompleted, Some("1 of 2 files failed to process"));
        let received = rx.try_recv().unwrap();
        assert_eq!(received.status, JobStatus::PartiallyCompleted);
        assert_eq!(received.phase, JobPhase::Completed);
        assert_eq!(received.error.as_deref(), Some("1 of 2 files failed to process"));
    }

    #[test]
    fn test_phase_step_names() {
        assert_eq!(JobPhase::GeneratingEmbeddings.as_step(), "generating_embeddings");
        assert_eq!(JobPhase::TextExtraction.to_string(), "Extracting text");
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let event = JobProgressEvent::new("j", "f.pdf", JobPhase::Storing, 90, "Storing");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"jobId\""));
        assert!(json.contains("\"fileName\""));
        assert!(!json.contains("currentFile"));
    }
}
