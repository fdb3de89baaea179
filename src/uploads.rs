//! Local storage for files uploaded through the Control API.
//!
//! Adapted from `storage::local::LocalFileStorage`'s directory layout,
//! minus the pluggable S3/Azure backend abstraction the teacher builds
//! around it — this spec has exactly one storage backend (the local
//! filesystem) and no Non-goal asks for more.

use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Errors from storing an uploaded file.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The filename was empty or otherwise unusable.
    #[error("invalid filename")]
    InvalidFilename,
    /// Underlying disk I/O failed.
    #[error("upload storage error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persists an uploaded file under `base_dir`, namespaced by a fresh UUID
/// directory the way `LocalFileStorage::get_file_directory` shards by the
/// first two characters of a UUID, scaled down since a single-node
/// deployment has no need for that level of fan-out.
pub struct UploadStorage {
    base_dir: PathBuf,
}

impl UploadStorage {
    /// Use `base_dir` (created on demand) as the upload root.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Store `bytes` under a fresh UUID-prefixed filename, preserving the
    /// original filename's extension. Returns the path the file was
    /// written to, relative to `base_dir`.
    pub async fn store(&self, original_filename: &str, bytes: &[u8]) -> Result<PathBuf, UploadError> {
        if original_filename.trim().is_empty() {
            return Err(UploadError::InvalidFilename);
        }

        tokio::fs::create_dir_all(&self.base_dir).await?;

        let safe_name = sanitize_filename(original_filename);
        let stored_name = format!("{}-{safe_name}", Uuid::new_v4());
        let full_path = self.base_dir.join(&stored_name);

        tokio::fs::write(&full_path, bytes).await?;

        Ok(PathBuf::from(stored_name))
    }

    /// Absolute path for a previously stored, relative file path.
    #[must_use]
    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.base_dir.join(relative)
    }
}

fn sanitize_filename(name: &str) -> String {
    name.rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
