use crate::broadcast::job_progress::{JobPhase, JobProgressBroadcaster, JobProgressTracker};
use crate::jobs::JobStatus;

/// Events emitted by the pipeline during processing.
pub enum ProgressEvent {
    Phase {
        phase: JobPhase,
        percentage: u8,
        message: String,
    },
    FileStarted {
        file_name: String,
        percentage: u8,
    },
    Finished {
        status: JobStatus,
        error: Option<String>,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests and runs without subscribers.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Wraps a JobProgressTracker to bridge pipeline events to the broadcast channel.
pub struct BroadcastProgress {
    tracker: JobProgressTracker,
}

impl BroadcastProgress {
    pub fn new(broadcaster: &JobProgressBroadcaster, job_id: &str, file_name: &str) -> Self {
        Self {
            tracker: broadcaster.start_job(job_id, file_name),
        }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Phase {
                phase,
                percentage,
                message,
            } => self.tracker.update_phase(phase, percentage, &message),
            ProgressEvent::FileStarted {
                file_name,
                percentage,
            } => self.tracker.file_started(&file_name, percentage),
            ProgressEvent::Finished { status, error } => {
                self.tracker.finished(status, error.as_deref())
            }
        }
    }
}

/// Picks the broadcast reporter when a broadcaster is configured.
pub(crate) fn reporter_for(
    broadcaster: Option<&JobProgressBroadcaster>,
    job_id: &str,
    file_name: &str,
) -> Box<dyn ProgressReporter> {
    match broadcaster {
        Some(b) => Box::new(BroadcastProgress::new(b, job_id, file_name)),
        None => Box::new(NoopProgress),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_progress_forwards_events() {
        let broadcaster = JobProgressBroadcaster::new(16);
        let mut rx = broadcaster.subscribe();
        let progress = BroadcastProgress::new(&broadcaster, "job-1", "report.pdf");

        progress.report(ProgressEvent::Phase {
            phase: JobPhase::Chunking,
            percentage: 50,
            message: "Splitting text".to_string(),
        });
        progress.report(ProgressEvent::Finished {
            status: JobStatus::Failed,
            error: Some("boom".to_string()),
        });

        let first = rx.try_recv().unwrap();
        assert_eq!(first.phase, JobPhase::Chunking);
        assert_eq!(first.percentage, 50);
        assert_eq!(first.status, JobStatus::Processing);

        let last = rx.try_recv().unwrap();
        assert_eq!(last.status, JobStatus::Failed);
        assert_eq!(last.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_reporter_without_broadcaster_is_silent() {
        let reporter = reporter_for(None, "job-1", "a.pdf");
        reporter.report(ProgressEvent::FileStarted {
            file_name: "a.pdf".to_string(),
            percentage: 0,
        });
    }
}
