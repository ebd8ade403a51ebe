//! Scratch directories owned by a single encoder.

use crate::{Error, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// A private output directory for one encoder process.
///
/// Unlike a `TempDir`, the directory is not removed on drop: its lifetime is
/// tied to the rendition, which removes it explicitly through
/// [`ScratchDir::remove`] once the process is gone.
///
/// # Example
///
/// ```no_run
/// use castforge_av::ScratchDir;
///
/// # async fn example() -> castforge_av::Result<()> {
/// let dir = ScratchDir::create("/tmp/castforge/session/720p")?;
/// // ... run an encoder writing into dir.path() ...
/// dir.remove().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Create the directory (and parents), starting from an empty state.
    ///
    /// Leftovers from an earlier encoder at the same path are cleared first.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        match std::fs::remove_dir_all(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "Cleared stale scratch directory"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::Workspace(format!(
                    "failed to clear {}: {e}",
                    path.display()
                )))
            }
        }
        std::fs::create_dir_all(&path).map_err(|e| {
            Error::Workspace(format!("failed to create {}: {e}", path.display()))
        })?;
        Ok(Self { path })
    }

    /// The directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A path inside the directory.
    pub fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Whether the directory still exists.
    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    /// Remove the directory, logging (not returning) failures.
    pub async fn remove(&self) {
        remove_dir_best_effort(&self.path).await;
    }
}

/// Remove a directory tree; a missing directory is not an error.
pub async fn remove_dir_best_effort(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed scratch directory"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove scratch directory")
        }
    }
}
