//! Advisory write lock
//!
//! Activation takes an exclusive, non-blocking `flock` on the index file
//! through its own file handle. The lock belongs to that open file
//! description, so two stores in one process opening the same file conflict
//! just like two processes would. Dropping the lock releases it.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Held exclusive lock on an index file
#[derive(Debug)]
pub struct WriteLock {
    file: File,
    path: PathBuf,
}

impl WriteLock {
    /// Try to take the lock without blocking.
    ///
    /// Returns `Ok(None)` if another handle already holds it.
    pub fn try_acquire(path: &Path) -> io::Result<Option<Self>> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        if !try_lock_exclusive(&file)? {
            return Ok(None);
        }

        trace!(path = %path.display(), "Acquired write lock");
        Ok(Some(Self {
            file,
            path: path.to_path_buf(),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        unlock(&self.file);
        trace!(path = %self.path.display(), "Released write lock");
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if ret == 0 {
        return Ok(true);
    }

    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::EWOULDBLOCK => Ok(false),
        _ => Err(err),
    }
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;

    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

// Advisory locking is unix-only; elsewhere activation always succeeds
#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> io::Result<bool> {
    Ok(true)
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[cfg(unix)]
    #[test]
    fn test_second_lock_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.tix");
        std::fs::write(&path, b"x").unwrap();

        let first = WriteLock::try_acquire(&path).unwrap();
        assert!(first.is_some());
        assert!(WriteLock::try_acquire(&path).unwrap().is_none());

        drop(first);
        assert!(WriteLock::try_acquire(&path).unwrap().is_some());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        assert!(WriteLock::try_acquire(&dir.path().join("missing.tix")).is_err());
    }
}
