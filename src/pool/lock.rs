//! The exclusive pool lock. A MonetDB server holds a record lock on byte 4
//! of `.gdk_lock` in its farm directory for as long as it runs; we take the
//! same lock, so a server cannot open the pool under us and we cannot read
//! a pool a server is busy writing.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::pool::{PoolError, PoolResult};

pub const LOCK_FILE_NAME: &str = ".gdk_lock";

const LOCK_OFFSET: libc::off_t = 4;
const LOCK_LENGTH: libc::off_t = 1;

/// Held for the lifetime of the pool container; dropping it unlocks and
/// closes the file on every exit path.
#[derive(Debug)]
pub struct PoolLock {
    path: PathBuf,
    file: File,
}

impl PoolLock {
    pub fn acquire(pool_dir: &Path) -> PoolResult<PoolLock> {
        let path = pool_dir.join(LOCK_FILE_NAME);
        // the server creates the file mode 666; match it if we get there first
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o666)
            .open(&path)
            .map_err(|e| PoolError::LockFailed(path.clone(), e))?;

        let fd = file.as_raw_fd();
        unsafe {
            if libc::lseek(fd, LOCK_OFFSET, libc::SEEK_SET) != LOCK_OFFSET {
                return Err(PoolError::LockFailed(path, io::Error::last_os_error()));
            }
            if libc::lockf(fd, libc::F_TLOCK, LOCK_LENGTH) != 0 {
                let err = io::Error::last_os_error();
                return Err(match err.raw_os_error() {
                    Some(libc::EAGAIN) | Some(libc::EACCES) => PoolError::LockContention(path),
                    _ => PoolError::LockFailed(path, err),
                });
            }
            libc::lseek(fd, 0, libc::SEEK_SET);
        }
        Ok(PoolLock { path, file })
    }

    pub fn path(&self) -> &Path { &self.path }
}

impl Drop for PoolLock {
    fn drop(&mut self) {
        let fd = self.file.as_raw_fd();
        unsafe {
            if libc::lseek(fd, LOCK_OFFSET, libc::SEEK_SET) == LOCK_OFFSET {
                libc::lockf(fd, libc::F_ULOCK, LOCK_LENGTH);
            }
        }
    }
}
