use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use log::info;
use tokio_util::sync::CancellationToken;

/// Cancellation tokens of the jobs currently running, keyed by job id.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(|poisoned| {
            log::warn!("Cancellation registry lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Registers a fresh token for a job that is about to run.
    pub fn register(&self, job_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.lock().insert(job_id.to_string(), token.clone());
        token
    }

    /// Removes a token once its job stops running.
    pub fn unregister(&self, job_id: &str) {
        self.lock().remove(job_id);
    }

    /// Cancels a running job. Returns false if the job is not running here.
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.lock().remove(job_id) {
            Some(token) => {
                token.cancel();
                info!("Cancellation requested for job {}", job_id);
                true
            }
            None => false,
        }
    }

    /// Cancels every running job, returning how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let tokens: Vec<CancellationToken> = self.lock().drain().map(|(_, t)| t).collect();
        for token in &tokens {
            token.cancel();
        }
        tokens.len()
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.lock().contains_key(job_id)
    }
}
