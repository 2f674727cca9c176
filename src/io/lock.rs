use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::{Instant, sleep};

const LOCK_FILE: &str = ".lock";
const RETRY_EVERY: Duration = Duration::from_millis(25);
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Exclusive hold on a board directory's store.
///
/// `watch` and one-shot commands each load, change and save `store.json`;
/// the lock keeps those cycles from interleaving. The holder's pid is
/// written into the lock file so a waiting process can name it.
#[derive(Debug)]
pub struct BoardLock {
    file: File,
    path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("could not open lock file {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("board is busy: {path} is held{}", holder_suffix(.holder))]
    Busy { path: PathBuf, holder: Option<u32> },
}

fn holder_suffix(holder: &Option<u32>) -> String {
    holder.map(|pid| format!(" by pid {}", pid)).unwrap_or_default()
}

impl BoardLock {
    /// Wait up to `timeout` for the lock, retrying without blocking the
    /// runtime.
    pub async fn acquire(board_dir: &Path, timeout: Duration) -> Result<Self, LockError> {
        let path = board_dir.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| LockError::Open {
                path: path.clone(),
                source,
            })?;

        let deadline = Instant::now() + timeout;
        while try_lock(&file).is_err() {
            if Instant::now() >= deadline {
                let holder = read_holder(&mut file);
                tracing::warn!(path = %path.display(), ?holder, "board lock timed out");
                return Err(LockError::Busy { path, holder });
            }
            sleep(RETRY_EVERY).await;
        }

        if let Err(e) = write_holder(&mut file) {
            tracing::debug!(error = %e, "could not record lock holder");
        }
        tracing::debug!(path = %path.display(), "board lock acquired");
        Ok(BoardLock { file, path })
    }

    pub async fn acquire_default(board_dir: &Path) -> Result<Self, LockError> {
        Self::acquire(board_dir, DEFAULT_LOCK_TIMEOUT).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BoardLock {
    fn drop(&mut self) {
        // flock goes away with the descriptor
        let _ = self.file.set_len(0);
        let _ = fs::remove_file(&self.path);
    }
}

fn write_holder(file: &mut File) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    write!(file, "{}", std::process::id())?;
    file.flush()
}

fn read_holder(file: &mut File) -> Option<u32> {
    let mut raw = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut raw).ok()?;
    raw.trim().parse().ok()
}

#[cfg(unix)]
fn try_lock(file: &File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn try_lock(_file: &File) -> std::io::Result<()> {
    Ok(())
}
