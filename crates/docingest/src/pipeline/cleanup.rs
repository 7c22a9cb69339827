//! Removal of temporary uploads.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::sanitize;

/// Deletes an uploaded file once its job is done with it.
pub trait UploadCleaner: Send + Sync {
    fn remove(&self, path: &Path);
}

/// Removes uploads from the local filesystem. A file that is already gone is
/// not an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsCleaner;

impl UploadCleaner for FsCleaner {
    fn remove(&self, path: &Path) {
        match std::fs::remove_file(path) {
            Ok(()) => log::debug!("Removed upload {}", sanitize::redact_path(path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("Upload {} already removed", sanitize::redact_path(path))
            }
            Err(e) => log::warn!(
                "Failed to remove upload {}: {}",
                sanitize::redact_path(path),
                e
            ),
        }
    }
}

/// Owns an upload for the duration of a job.
///
/// The file is handed to the cleaner exactly once: on an explicit
/// [`TempUpload::remove`], or on drop if that never happened (early return,
/// panic unwinding, or the job future being dropped by a timeout).
pub struct TempUpload {
    path: PathBuf,
    cleaner: Arc<dyn UploadCleaner>,
    removed: bool,
}

impl TempUpload {
    pub fn new(path: PathBuf, cleaner: Arc<dyn UploadCleaner>) -> Self {
        Self {
            path,
            cleaner,
            removed: false,
        }
    }

    /// A guard for an upload an earlier run already removed.
    pub fn already_removed(path: PathBuf, cleaner: Arc<dyn UploadCleaner>) -> Self {
        Self {
            path,
            cleaner,
            removed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn remove(&mut self) {
        if !self.removed {
            self.removed = true;
            self.cleaner.remove(&self.path);
        }
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        self.remove();
    }
}
