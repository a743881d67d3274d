//! Exclusive advisory lock on a namespace lock file

use crate::error::{ClusterError, Result};
use fs2::FileExt;
use std::fs::{self, File, Metadata, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Identity of the file a handle was opened on. Used to notice that the lock
/// path was deleted or replaced while the lock is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    #[cfg(unix)]
    dev: u64,
    #[cfg(unix)]
    ino: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    fn of(metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }

    #[cfg(not(unix))]
    fn of(_metadata: &Metadata) -> Self {
        Self {}
    }
}

/// OS-level exclusive lock on one lock file.
///
/// The lock is held as long as the handle is open. Dropping the primitive
/// releases it.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    held: Option<(File, FileIdentity)>,
}

impl LockFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            held: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Try to take the lock without blocking.
    ///
    /// Returns `Ok(false)` when another holder has the lock or when the
    /// coordination directory is gone. The lock file is created if absent.
    pub fn try_acquire(&mut self) -> Result<bool> {
        if self.is_held() {
            return Ok(true);
        }
        // a handle on a deleted or replaced file no longer guards anything
        self.release();

        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "Lock directory is missing");
                return Ok(false);
            }
            Err(e) => return Err(ClusterError::LockAcquisition(e)),
        };

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                let identity = file
                    .metadata()
                    .map(|m| FileIdentity::of(&m))
                    .map_err(ClusterError::LockAcquisition)?;
                self.held = Some((file, identity));
                tracing::trace!(path = %self.path.display(), "Lock acquired");
                Ok(true)
            }
            Err(e) if is_contended(&e) => Ok(false),
            Err(e) => Err(ClusterError::LockAcquisition(e)),
        }
    }

    /// Release the lock if held. Idempotent.
    pub fn release(&mut self) {
        if let Some((file, _)) = self.held.take() {
            if let Err(e) = FileExt::unlock(&file) {
                // closing the handle below drops the lock regardless
                tracing::debug!(path = %self.path.display(), error = %e, "Unlock failed");
            }
            tracing::trace!(path = %self.path.display(), "Lock released");
        }
    }

    /// Whether this primitive still holds the lock on the file at its path.
    ///
    /// False once the lock file has been deleted or replaced out-of-band, even
    /// though the OS lock on the old inode is technically still ours.
    pub fn is_held(&self) -> bool {
        match &self.held {
            None => false,
            Some((_, identity)) => fs::metadata(&self.path)
                .map(|m| FileIdentity::of(&m) == *identity)
                .unwrap_or(false),
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        self.release();
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_acquire_creates_lock_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ns");
        let mut lock = LockFile::new(&path);

        assert!(!lock.is_held());
        assert!(lock.try_acquire().unwrap());
        assert!(lock.is_held());
        assert!(path.exists());
    }

    #[test]
    fn test_second_holder_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ns");
        let mut first = LockFile::new(&path);
        let mut second = LockFile::new(&path);

        assert!(first.try_acquire().unwrap());
        assert!(!second.try_acquire().unwrap());
        assert!(!second.is_held());

        first.release();
        assert!(second.try_acquire().unwrap());
    }

    #[test]
    fn test_release_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut lock = LockFile::new(dir.path().join("ns"));

        lock.release();
        assert!(lock.try_acquire().unwrap());
        lock.release();
        lock.release();
        assert!(!lock.is_held());
    }

    #[test]
    fn test_reacquire_while_held_is_true() {
        let dir = tempdir().unwrap();
        let mut lock = LockFile::new(dir.path().join("ns"));

        assert!(lock.try_acquire().unwrap());
        assert!(lock.try_acquire().unwrap());
    }

    #[test]
    fn test_drop_releases() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ns");
        {
            let mut lock = LockFile::new(&path);
            assert!(lock.try_acquire().unwrap());
        }
        let mut other = LockFile::new(&path);
        assert!(other.try_acquire().unwrap());
    }

    #[test]
    fn test_missing_directory_is_not_an_error() {
        let dir = tempdir().unwrap();
        let mut lock = LockFile::new(dir.path().join("gone").join("ns"));

        assert!(!lock.try_acquire().unwrap());
        assert!(!lock.is_held());
    }

    #[test]
    fn test_deleted_lock_file_is_not_held() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ns");
        let mut lock = LockFile::new(&path);

        assert!(lock.try_acquire().unwrap());
        fs::remove_file(&path).unwrap();
        assert!(!lock.is_held());

        // the next attempt drops the orphaned handle and locks the new file
        assert!(lock.try_acquire().unwrap());
        assert!(lock.is_held());
    }

    #[cfg(unix)]
    #[test]
    fn test_replaced_lock_file_is_not_held() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ns");
        let mut lock = LockFile::new(&path);

        assert!(lock.try_acquire().unwrap());
        fs::remove_file(&path).unwrap();
        fs::write(&path, b"").unwrap();
        assert!(!lock.is_held());
    }
}
