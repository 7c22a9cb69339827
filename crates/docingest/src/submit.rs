//! Accepting uploads: validation, staging on disk, job creation and dispatch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use uuid::Uuid;

use crate::config::UploadsConfig;
use crate::error::SubmitError;
use crate::jobs::{JobRecord, JobStore, NewBatchFile, NewJob};
use crate::pipeline::{FsCleaner, UploadCleaner};
use crate::sanitize;
use crate::worker::{Dispatcher, Task};

/// Collection used for a batch submitted without one.
pub const DEFAULT_BATCH_COLLECTION: &str = "documents";

const MAX_COLLECTION_LEN: usize = 63;

/// A file as received from a caller.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    /// Reads a file from disk, keeping only its file name.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(Self::new(sanitize::redact_path(path), bytes))
    }
}

/// An upload that passed validation, with its lowercased extension.
struct Accepted {
    upload: Upload,
    extension: String,
}

pub struct Submitter {
    store: JobStore,
    dispatcher: Arc<dyn Dispatcher>,
    uploads: UploadsConfig,
    cleaner: Arc<dyn UploadCleaner>,
}

impl Submitter {
    pub fn new(store: JobStore, dispatcher: Arc<dyn Dispatcher>, uploads: UploadsConfig) -> Self {
        Self {
            store,
            dispatcher,
            uploads,
            cleaner: Arc::new(FsCleaner),
        }
    }

    pub fn with_cleaner(mut self, cleaner: Arc<dyn UploadCleaner>) -> Self {
        self.cleaner = cleaner;
        self
    }

    /// Validates and stages one document, creates its job and queues it.
    /// Returns the new job id.
    pub fn submit_file(&self, upload: Upload, collection: Option<&str>) -> Result<String, SubmitError> {
        let accepted = self.accept(upload)?;
        let collection = match collection.map(str::trim).filter(|c| !c.is_empty()) {
            Some(name) => name.to_string(),
            None => default_collection(&accepted.upload.file_name),
        };
        validate_collection(&collection)?;

        let path = self.stage(&accepted)?;
        let new = NewJob {
            file_name: accepted.upload.file_name.clone(),
            file_type: accepted.extension.clone(),
            file_path: path.clone(),
            collection_name: collection,
        };

        let job_id = match self.store.create(new) {
            Ok(job_id) => job_id,
            Err(e) => {
                self.cleaner.remove(&path);
                return Err(e.into());
            }
        };

        self.dispatch(Task::document(job_id.clone()), &job_id, &[path])?;
        log::info!(
            "Queued {} as job {}",
            accepted.upload.file_name,
            job_id
        );
        Ok(job_id)
    }

    /// Validates every upload before staging any of them, then creates one
    /// batch job for all of them.
    pub fn submit_batch(
        &self,
        uploads: Vec<Upload>,
        collection: Option<&str>,
    ) -> Result<String, SubmitError> {
        if uploads.is_empty() {
            return Err(SubmitError::EmptyBatch);
        }
        let collection = collection
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_BATCH_COLLECTION)
            .to_string();
        validate_collection(&collection)?;

        let accepted = uploads
            .into_iter()
            .map(|upload| self.accept(upload))
            .collect::<Result<Vec<_>, _>>()?;

        let mut staged: Vec<PathBuf> = Vec::with_capacity(accepted.len());
        let mut files = Vec::with_capacity(accepted.len());
        for item in &accepted {
            match self.stage(item) {
                Ok(path) => {
                    staged.push(path.clone());
                    files.push(NewBatchFile {
                        name: item.upload.file_name.clone(),
                        file_type: item.extension.clone(),
                        file_path: path,
                    });
                }
                Err(e) => {
                    self.remove_all(&staged);
                    return Err(e);
                }
            }
        }

        let job_id = match self.store.create_batch(files, &collection) {
            Ok(job_id) => job_id,
            Err(e) => {
                self.remove_all(&staged);
                return Err(e.into());
            }
        };

        self.dispatch(Task::batch(job_id.clone()), &job_id, &staged)?;
        log::info!("Queued batch job {} with {} files", job_id, staged.len());
        Ok(job_id)
    }

    /// Public view of a job, `None` once it is unknown or expired.
    pub fn job_status(&self, job_id: &str) -> Result<Option<JobRecord>, SubmitError> {
        Ok(self.store.get(job_id)?)
    }

    fn accept(&self, upload: Upload) -> Result<Accepted, SubmitError> {
        let extension = file_extension(&upload.file_name);
        if !self
            .uploads
            .allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&extension))
        {
            return Err(SubmitError::ExtensionNotAllowed {
                extension,
                allowed: self.uploads.allowed_extensions.join(", "),
            });
        }

        let size = upload.bytes.len() as u64;
        if size == 0 {
            return Err(SubmitError::EmptyFile(upload.file_name));
        }
        if size > self.uploads.max_file_size_bytes {
            return Err(SubmitError::TooLarge {
                file_name: upload.file_name,
                size,
                limit: self.uploads.max_file_size_bytes,
            });
        }

        Ok(Accepted { upload, extension })
    }

    /// Writes the bytes under a fresh name in the upload directory.
    fn stage(&self, accepted: &Accepted) -> Result<PathBuf, SubmitError> {
        let dir = &self.uploads.directory;
        std::fs::create_dir_all(dir).map_err(|e| SubmitError::WriteUpload {
            path: dir.clone(),
            source: e,
        })?;

        let path = dir.join(format!("{}.{}", Uuid::new_v4(), accepted.extension));
        std::fs::write(&path, &accepted.upload.bytes).map_err(|e| SubmitError::WriteUpload {
            path: path.clone(),
            source: e,
        })?;
        log::debug!(
            "Staged {} as {}",
            accepted.upload.file_name,
            sanitize::redact_path(&path)
        );
        Ok(path)
    }

    /// Hands the task to the workers. A job that cannot be queued is rolled
    /// back so no orphan record or upload remains.
    fn dispatch(&self, task: Task, job_id: &str, uploads: &[PathBuf]) -> Result<(), SubmitError> {
        if let Err(e) = self.dispatcher.dispatch(task) {
            log::error!("Failed to dispatch job {}: {}", job_id, e);
            if let Err(delete_err) = self.store.delete(job_id) {
                log::warn!("Failed to roll back job {}: {}", job_id, delete_err);
            }
            self.remove_all(uploads);
            return Err(SubmitError::Dispatch(e));
        }
        Ok(())
    }

    fn remove_all(&self, paths: &[PathBuf]) {
        for path in paths {
            self.cleaner.remove(path);
        }
    }
}

/// Lowercased text after the last dot, empty when there is none.
pub fn file_extension(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((_, ext)) => ext.to_lowercase(),
        None => String::new(),
    }
}

/// Collection derived from a file name: the stem, lowercased, with spaces
/// replaced by underscores.
pub fn default_collection(file_name: &str) -> String {
    let stem = match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    };
    stem.replace(' ', "_").to_lowercase()
}

fn validate_collection(name: &str) -> Result<(), SubmitError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_COLLECTION_LEN
        && name.starts_with(|c: char| c.is_ascii_alphanumeric())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(SubmitError::InvalidCollection(name.to_string()))
    }
}
