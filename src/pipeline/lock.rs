//! Advisory lock around a full run.

use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::Write;
use std::path::Path;

use crate::error::{AppError, Result};

/// Held for the duration of a run.
///
/// Wraps an exclusive OS lock on the lock file. The operating system
/// releases it when the file is closed, including when the process is
/// killed, so a crashed run never blocks the next one.
#[derive(Debug)]
pub struct RunLock {
    file: File,
}

impl RunLock {
    /// Take the exclusive lock on `path`, creating the file if needed.
    ///
    /// Fails with [`AppError::Locked`] while another run holds it. The file
    /// records the holder's pid for diagnostics; its content is never used to
    /// decide ownership.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(AppError::Locked {
                    path: path.to_path_buf(),
                });
            }
            Err(TryLockError::Error(e)) => return Err(e.into()),
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        log::debug!("Acquired run lock {}", path.display());
        Ok(Self { file })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            log::warn!("Failed to release run lock: {}", e);
        }
    }
}
