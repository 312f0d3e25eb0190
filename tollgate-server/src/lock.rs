//! Single-instance lock file.
//!
//! The embedded store does not tolerate two writer processes, so the
//! server refuses to start while another live process holds the lock.
//! A lock left behind by a dead process is replaced.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

const LOCK_FILE: &str = "tollgate.lock";

/// Held for the process lifetime; removes the lock file on drop.
pub struct InstanceLock {
    path: PathBuf,
}

fn pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

/// Acquire the instance lock in `data_dir`.
pub fn acquire(data_dir: &Path) -> io::Result<InstanceLock> {
    std::fs::create_dir_all(data_dir)?;
    let path = data_dir.join(LOCK_FILE);

    for attempt in 0..2 {
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                write!(file, "{}", std::process::id())?;
                info!("Acquired instance lock at {}", path.display());
                return Ok(InstanceLock { path });
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt == 0 => {
                let holder: Option<u32> = std::fs::read_to_string(&path)
                    .ok()
                    .and_then(|s| s.trim().parse().ok());

                if let Some(pid) = holder {
                    if pid_alive(pid) {
                        return Err(io::Error::new(
                            io::ErrorKind::AddrInUse,
                            format!(
                                "another tollgate instance (pid {}) holds {}",
                                pid,
                                path.display()
                            ),
                        ));
                    }
                }

                warn!("Removing stale instance lock at {}", path.display());
                std::fs::remove_file(&path)?;
            }
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AddrInUse,
        format!("could not acquire instance lock at {}", path.display()),
    ))
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
