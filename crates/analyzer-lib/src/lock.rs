//! Exclusive run lock
//!
//! A non-blocking `flock(LOCK_EX)` on a lock file held for the whole run.
//! A second run fails immediately instead of queueing.

use crate::error::{AnalysisError, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Held for the lifetime of a run; released on drop
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false) // Contents belong to the current holder
            .open(path)?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = file.as_raw_fd();
            let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };

            if result != 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::WouldBlock {
                    return Err(AnalysisError::ConcurrentRun(path.display().to_string()));
                }
                return Err(err.into());
            }
        }

        file.set_len(0)?;
        let mut writer = &file;
        let _ = writer.write_all(std::process::id().to_string().as_bytes());
        let _ = writer.flush();

        debug!(path = %path.display(), "Run lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
        // Lock file is never removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_second_acquire_fails_fast() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.lock");
        let held = RunLock::acquire(&path).unwrap();

        let err = RunLock::acquire(&path).unwrap_err();
        assert!(matches!(err, AnalysisError::ConcurrentRun(_)));
        assert_eq!(err.exit_code(), 7);

        drop(held);
        assert!(RunLock::acquire(&path).is_ok());
        assert!(path.exists());
    }

    #[test]
    fn test_lock_records_pid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("run.lock");
        let lock = RunLock::acquire(&path).unwrap();
        assert_eq!(lock.path(), path.as_path());
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, std::process::id().to_string());
    }
}
