//! Exclusive OS lock on a case directory.
//!
//! Only one process may have a durable case open. The lock lives as long as
//! the [`FileLock`] and is released when its file handle closes.

use std::fs::{File, OpenOptions};
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::Path;

const LOCK_FILE: &str = "case.lock";

#[derive(Debug)]
pub(crate) struct FileLock {
    _file: File,
}

impl FileLock {
    /// Take the lock without blocking. Fails with `WouldBlock` when another
    /// handle already holds it.
    pub(crate) fn acquire(dir: &Path) -> IoResult<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;
        try_lock(&file)?;
        Ok(Self { _file: file })
    }
}

#[cfg(unix)]
fn try_lock(file: &File) -> IoResult<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor is owned by `file`, which outlives the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(());
    }
    let err = IoError::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        return Err(IoError::new(
            ErrorKind::WouldBlock,
            "case is open in another process",
        ));
    }
    Err(err)
}

#[cfg(windows)]
fn try_lock(file: &File) -> IoResult<()> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::HANDLE;
    use windows_sys::Win32::Storage::FileSystem::{
        LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };
    use windows_sys::Win32::System::IO::OVERLAPPED;

    // SAFETY: the handle is owned by `file`; OVERLAPPED is plain data and a
    // zeroed value is the documented way to lock from offset 0.
    let ok = unsafe {
        let mut overlapped = std::mem::zeroed::<OVERLAPPED>();
        LockFileEx(
            file.as_raw_handle() as HANDLE,
            LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
            0,
            1,
            0,
            &mut overlapped,
        )
    };
    if ok == 0 {
        return Err(IoError::new(
            ErrorKind::WouldBlock,
            format!("case is open in another process: {}", IoError::last_os_error()),
        ));
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
fn try_lock(_file: &File) -> IoResult<()> {
    Err(IoError::new(
        ErrorKind::Unsupported,
        "case directory locking is not supported on this platform",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_second_acquire_would_block() {
        let dir = tempdir().unwrap();
        let _held = FileLock::acquire(dir.path()).unwrap();
        let err = FileLock::acquire(dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempdir().unwrap();
        drop(FileLock::acquire(dir.path()).unwrap());
        assert!(FileLock::acquire(dir.path()).is_ok());
        assert!(dir.path().join(LOCK_FILE).exists());
    }
}
