#![forbid(unsafe_code)]

//! Minimal cross-process advisory lock: exclusive creation of a sidecar
//! `.lock` file, spun with a short sleep until it succeeds or a deadline
//! passes. No locking crate is used anywhere in the reference corpus, so
//! this follows the teacher's own manual-file-safety idiom (write-temp,
//! then rename) one step further rather than reaching for an unfamiliar
//! dependency.

use crate::error::{AppError, Result};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Held for the lifetime of the guard; the lock file is removed on drop.
pub struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Acquires an advisory lock named `<target>.lock`, waiting up to
/// `DEFAULT_TIMEOUT` for a concurrent holder to release it.
pub fn acquire(target: &Path) -> Result<LockGuard> {
    acquire_with_timeout(target, DEFAULT_TIMEOUT)
}

pub fn acquire_with_timeout(target: &Path, timeout: Duration) -> Result<LockGuard> {
    let lock_path = lock_path_for(target);
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let deadline = Instant::now() + timeout;
    loop {
        match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
            Ok(_file) => {
                return Ok(LockGuard { path: lock_path });
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                if Instant::now() >= deadline {
                    return Err(AppError::Io(format!(
                        "timed out waiting for lock {}",
                        lock_path.display()
                    )));
                }
                sleep(POLL_INTERVAL);
            }
            Err(err) => return Err(AppError::from(err)),
        }
    }
}

fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    target.with_file_name(name)
}

/// Writes `contents` to `path` atomically: write to a sibling `.tmp` file,
/// then rename over the destination. The rename is never interrupted
/// mid-way by cancellation (spec.md §5): callers check cancellation before
/// and after this call, never inside it.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("tmp")
    ));
    fs::write(&tmp_path, contents)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
