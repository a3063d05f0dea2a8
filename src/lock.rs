//! Advisory exclusive lock held on a data file for the duration of a mutation.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{Result, VtabError};

/// Open handle to a data file plus the exclusive OS lock taken on it.
///
/// The lock is released when the guard is dropped. Mutations perform their I/O through
/// [`FileLock::file`] so the locked descriptor is the one being written.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Lock an existing data file without blocking.
    pub fn try_exclusive(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::try_acquire(file, path)
    }

    /// Like [`FileLock::try_exclusive`], creating the file first when missing.
    pub fn try_exclusive_create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Self::try_acquire(file, path)
    }

    fn try_acquire(file: File, path: &Path) -> Result<Self> {
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self {
                file,
                path: path.to_path_buf(),
            }),
            Err(err) if err.kind() == fs2::lock_contended_error().kind() => {
                tracing::debug!(lock.path = %path.display(), "data file is locked elsewhere");
                Err(VtabError::Locked {
                    path: path.to_path_buf(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    #[must_use]
    pub fn file(&self) -> &File {
        &self.file
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::warn!(lock.path = %self.path.display(), error = %err, "failed to release file lock");
        }
    }
}
