//! Exclusive directory lock.
//!
//! Only one process may hold an index directory open. The lock is taken on
//! `<dir>/.lock` without blocking and released when [`FileLock`] is dropped.

use std::fs::{File, OpenOptions};
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::Path;

const LOCK_FILE: &str = ".lock";

/// Held for as long as a persistent space is open.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
}

impl FileLock {
    /// Locks `dir`, failing with [`ErrorKind::WouldBlock`] if it is held.
    pub fn acquire(dir: &Path) -> IoResult<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;

        if !lock_exclusive(&file)? {
            return Err(IoError::new(
                ErrorKind::WouldBlock,
                format!("index directory {} is open in another process", dir.display()),
            ));
        }
        Ok(Self { _file: file })
    }
}

/// Returns `Ok(false)` when another handle already holds the lock.
#[cfg(unix)]
fn lock_exclusive(file: &File) -> IoResult<bool> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor belongs to `file`, which outlives the call.
    if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } == 0 {
        return Ok(true);
    }
    let err = IoError::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::EWOULDBLOCK => Ok(false),
        _ => Err(err),
    }
}

#[cfg(windows)]
fn lock_exclusive(file: &File) -> IoResult<bool> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
    use windows_sys::Win32::Storage::FileSystem::{LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY};
    use windows_sys::Win32::System::IO::OVERLAPPED;

    // SAFETY: the handle belongs to `file`; OVERLAPPED is plain data.
    let locked = unsafe {
        let mut overlapped: OVERLAPPED = std::mem::zeroed();
        LockFileEx(
            file.as_raw_handle() as HANDLE,
            LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
            0,
            1,
            0,
            &mut overlapped,
        )
    };
    if locked != 0 {
        return Ok(true);
    }
    let err = IoError::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == ERROR_LOCK_VIOLATION as i32 => Ok(false),
        _ => Err(err),
    }
}

#[cfg(not(any(unix, windows)))]
fn lock_exclusive(_file: &File) -> IoResult<bool> {
    Err(IoError::new(ErrorKind::Unsupported, "directory locking is not supported on this platform"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempdir().unwrap();
        drop(FileLock::acquire(dir.path()).unwrap());

        assert!(dir.path().join(LOCK_FILE).exists());
        FileLock::acquire(dir.path()).unwrap();
    }

    #[test]
    fn test_second_holder_is_refused() {
        let dir = tempdir().unwrap();
        let _held = FileLock::acquire(dir.path()).unwrap();

        let err = FileLock::acquire(dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
        assert!(err.to_string().contains("another process"));
    }
}
