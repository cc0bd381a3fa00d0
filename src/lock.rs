//! Run lock for the container directory
//!
//! A PID file inside the container directory keeps two backup runs from
//! working on the same working copies. A lock left behind by a process that
//! no longer exists is treated as stale and replaced.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Lock file name inside the container directory
pub const LOCK_FILE_NAME: &str = ".github-backup.lock";

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another backup (pid {pid}) is already running against {}", path.display())]
    Held { path: PathBuf, pid: u32 },

    #[error("cannot create lock file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Held run lock; the file is removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Take the lock for `container`
    pub fn acquire(container: &Path) -> Result<Self, LockError> {
        let path = container.join(LOCK_FILE_NAME);

        // One retry: the first attempt may find a stale lock and remove it.
        for _ in 0..2 {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    let pid = std::process::id();
                    file.write_all(pid.to_string().as_bytes())
                        .map_err(|source| LockError::Io {
                            path: path.clone(),
                            source,
                        })?;
                    debug!("Lock file written: {} (PID: {})", path.display(), pid);
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    match read_pid(&path) {
                        Some(pid) if is_process_running(pid) => {
                            return Err(LockError::Held { path, pid });
                        }
                        _ => {
                            warn!("Removing stale lock file {}", path.display());
                            let _ = fs::remove_file(&path);
                        }
                    }
                }
                Err(source) => return Err(LockError::Io { path, source }),
            }
        }

        Err(LockError::Io {
            path,
            source: std::io::Error::new(ErrorKind::AlreadyExists, "lock file keeps reappearing"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => info!("Lock file removed: {}", self.path.display()),
            Err(e) => warn!("Failed to remove lock file {}: {}", self.path.display(), e),
        }
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Check whether a process with this PID exists
#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }

    match signal::kill(Pid::from_raw(raw), None) {
        Ok(_) => true,
        Err(Errno::ESRCH) => false,
        Err(_) => true, // Assume running if we can't check
    }
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    true
}
