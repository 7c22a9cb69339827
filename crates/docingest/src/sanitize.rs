//! Helpers for keeping internal file paths out of anything a caller can see.
//!
//! Job records are returned to pollers verbatim, and traces are safe to
//! share for debugging. Neither may carry the upload directory layout.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

/// Returns only the filename component of a path (no directory).
///
/// Safe for span fields — reveals file name without exposing the full path.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Rewrites an error message for storage in a job record. Each upload is
/// given as `(staged path, name the caller uploaded it as)`: the staged path
/// or bare staged file name becomes the caller's name, and any mention of the
/// upload directory becomes `<uploads>`.
pub fn public_message(message: &str, uploads: &[(&Path, &str)]) -> String {
    let mut out = message.to_string();
    for (path, display) in uploads {
        let full = path.to_string_lossy();
        if !full.is_empty() {
            out = out.replace(full.as_ref(), display);
        }
        if let Some(parent) = path.parent() {
            let dir = parent.to_string_lossy();
            if dir.len() > 1 {
                out = out.replace(dir.as_ref(), "<uploads>");
            }
        }
        if let Some(staged) = path.file_name().and_then(|n| n.to_str()) {
            if staged != *display {
                out = out.replace(staged, display);
            }
        }
    }
    out
}

/// Returns a short deterministic hash of a path for correlation without
/// exposing the actual path.
pub fn hash_path(path: &Path) -> String {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    let hash = hasher.finish();
    format!("{:016x}", hash)
}
