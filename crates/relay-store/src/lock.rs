use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::StoreError;

/// Process-global advisory lock guarding engine opens on a base directory.
/// The exclusive flock is released when the guard drops, which covers
/// every exit path including panics during unwind.
pub struct EngineLock {
    file: File,
    path: PathBuf,
}

impl EngineLock {
    /// Acquire the lock, blocking until the current holder releases it.
    pub fn acquire(path: &Path) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        file.lock_exclusive()?;
        debug!(path = %path.display(), "engine lock acquired");
        Ok(Self {
            file,
            path: path.to_owned(),
        })
    }

    /// Acquire the lock without blocking; fails with Conflict if another
    /// engine holds it.
    pub fn try_acquire(path: &Path) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        file.try_lock_exclusive().map_err(|_| {
            StoreError::Conflict(format!("engine lock held by another process: {}", path.display()))
        })?;
        Ok(Self {
            file,
            path: path.to_owned(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for EngineLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!(path = %self.path.display(), "engine lock released");
    }
}
