//! Cooperative stop signals for a running job.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::PipelineError;

/// Checked at every checkpoint of a job: an explicit cancel and the soft time
/// limit both stop work at the next boundary.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    token: CancellationToken,
    soft_deadline: Option<Instant>,
}

impl RunControl {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            soft_deadline: None,
        }
    }

    pub fn with_soft_deadline(mut self, deadline: Instant) -> Self {
        self.soft_deadline = Some(deadline);
        self
    }

    pub fn with_soft_limit(self, limit: Duration) -> Self {
        self.with_soft_deadline(Instant::now() + limit)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn check(&self) -> Result<(), PipelineError> {
        if self.token.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if let Some(deadline) = self.soft_deadline {
            if Instant::now() >= deadline {
                return Err(PipelineError::SoftTimeLimitExceeded);
            }
        }
        Ok(())
    }

    /// Sleeps for `duration`, waking early on cancellation or at the soft
    /// deadline.
    pub async fn sleep(&self, duration: Duration) -> Result<(), PipelineError> {
        let wake = Instant::now() + duration;
        let until = match self.soft_deadline {
            Some(deadline) if deadline < wake => deadline,
            _ => wake,
        };

        tokio::select! {
            _ = self.token.cancelled() => return Err(PipelineError::Cancelled),
            _ = tokio::time::sleep_until(until) => {}
        }
        self.check()
    }
}
