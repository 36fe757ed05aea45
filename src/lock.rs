//! Advisory `flock()` on the base directory so concurrent `catus` processes
//! do not interleave read-modify-write cycles on `stacks.yaml`.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

const LOCK_FILE_NAME: &str = "catus.lock";

/// A held file lock that releases on drop
pub struct FileLock {
    #[allow(dead_code)]
    file: File,
}

impl FileLock {
    fn open(base_path: &Path) -> io::Result<File> {
        std::fs::create_dir_all(base_path)?;
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(base_path.join(LOCK_FILE_NAME))
    }

    /// Fails with `WouldBlock` if another process holds the lock.
    pub fn try_acquire(base_path: &Path) -> io::Result<Self> {
        let file = Self::open(base_path)?;
        sys::lock(&file, false)?;
        Ok(FileLock { file })
    }

    /// Takes the lock, waiting for the holder to finish if there is one.
    pub fn acquire(base_path: &Path) -> io::Result<Self> {
        match Self::try_acquire(base_path) {
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                log::info!("another catus process is editing stacks, waiting");
                let file = Self::open(base_path)?;
                sys::lock(&file, true)?;
                Ok(FileLock { file })
            }
            other => other,
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        sys::unlock(&self.file);
    }
}

#[cfg(unix)]
mod sys {
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;

    pub fn lock(file: &File, wait: bool) -> io::Result<()> {
        let op = if wait {
            libc::LOCK_EX
        } else {
            libc::LOCK_EX | libc::LOCK_NB
        };
        if unsafe { libc::flock(file.as_raw_fd(), op) } == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EWOULDBLOCK || code == libc::EAGAIN => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "stack file is locked by another catus process",
            )),
            _ => Err(err),
        }
    }

    pub fn unlock(file: &File) {
        // nothing useful to do if release fails
        unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    }
}

// no locking outside unix
#[cfg(not(unix))]
mod sys {
    use std::fs::File;
    use std::io;

    pub fn lock(_file: &File, _wait: bool) -> io::Result<()> {
        Ok(())
    }

    pub fn unlock(_file: &File) {}
}
