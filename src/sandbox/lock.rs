//! Advisory file lock shared by every shellbox process on the host.
//!
//! The in-process mutexes on [`super::Sandbox`] only cover one value; separate
//! CLI invocations meet here instead.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::error::SandboxError;

/// Exclusive lock on a file, released on drop.
#[derive(Debug)]
pub(crate) struct ProcessLock {
    file: File,
    path: PathBuf,
}

impl ProcessLock {
    /// Waits for the lock, retrying every `poll` until `timeout` has passed.
    pub async fn acquire(
        path: &Path,
        poll: Duration,
        timeout: Duration,
    ) -> Result<Self, SandboxError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| lock_failed(path, &e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| lock_failed(path, &e))?;

        let deadline = tokio::time::Instant::now() + timeout;
        let mut waiting = false;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!("Locked {}", path.display());
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if is_contended(&e) => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(SandboxError::lock(format!(
                            "{} is still held by another shellbox process after {timeout:?}",
                            path.display()
                        )));
                    }
                    if !waiting {
                        info!("Waiting for another shellbox process ({})", path.display());
                        waiting = true;
                    }
                    tokio::time::sleep(poll.max(Duration::from_millis(1))).await;
                }
                Err(e) => return Err(lock_failed(path, &e)),
            }
        }
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!("Failed to unlock {}: {}", self.path.display(), e);
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn lock_failed(path: &Path, err: &io::Error) -> SandboxError {
    SandboxError::lock(format!("cannot lock {}: {err}", path.display()))
}
