//
// lock.rs -- whole-file advisory locking
//
// This file is part of the gdbm-native software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

use std::io;
use std::os::unix::io::RawFd;

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockKind {
    None,
    Flock,
    Lockf,
    Fcntl,
}

/// Holds a whole-file advisory lock for the lifetime of a database
/// handle, releasing it on drop. Tries `flock(2)` first, falls back to
/// `lockf(3)`, then `fcntl(F_SETLK)` -- mirroring the fallback chain
/// real GDBM uses across platforms where not every mechanism is
/// available.
pub struct FileLock {
    fd: RawFd,
    kind: LockKind,
}

impl FileLock {
    /// Acquires a lock appropriate for `writer` (exclusive) or reader
    /// (shared) access, non-blocking. Returns `Ok(None)` if locking was
    /// explicitly disabled by the caller.
    pub fn acquire(fd: RawFd, writer: bool, disabled: bool) -> crate::Result<Option<Self>> {
        if disabled {
            return Ok(None);
        }

        if let Err(e) = try_flock(fd, writer) {
            log::warn!("flock failed ({e}), falling back to lockf");
        } else {
            return Ok(Some(FileLock {
                fd,
                kind: LockKind::Flock,
            }));
        }

        if let Err(e) = try_lockf(fd) {
            log::warn!("lockf failed ({e}), falling back to fcntl");
        } else {
            return Ok(Some(FileLock {
                fd,
                kind: LockKind::Lockf,
            }));
        }

        match try_fcntl(fd, writer) {
            Ok(()) => Ok(Some(FileLock {
                fd,
                kind: LockKind::Fcntl,
            })),
            Err(e) => Err(Error::LockFailed(e)),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        match self.kind {
            LockKind::None => {}
            LockKind::Flock => unsafe {
                libc::flock(self.fd, libc::LOCK_UN);
            },
            LockKind::Lockf => unsafe {
                libc::lockf(self.fd, libc::F_ULOCK, 0);
            },
            LockKind::Fcntl => unsafe {
                let mut fl: libc::flock = std::mem::zeroed();
                fl.l_type = libc::F_UNLCK as i16;
                fl.l_whence = libc::SEEK_SET as i16;
                fl.l_start = 0;
                fl.l_len = 0;
                libc::fcntl(self.fd, libc::F_SETLK, &fl);
            },
        }
    }
}

fn try_flock(fd: RawFd, writer: bool) -> io::Result<()> {
    let op = if writer {
        libc::LOCK_EX | libc::LOCK_NB
    } else {
        libc::LOCK_SH | libc::LOCK_NB
    };
    let rc = unsafe { libc::flock(fd, op) };
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn try_lockf(fd: RawFd) -> io::Result<()> {
    let rc = unsafe { libc::lockf(fd, libc::F_TLOCK, 0) };
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn try_fcntl(fd: RawFd, writer: bool) -> io::Result<()> {
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = if writer {
        libc::F_WRLCK as i16
    } else {
        libc::F_RDLCK as i16
    };
    fl.l_whence = libc::SEEK_SET as i16;
    fl.l_start = 0;
    fl.l_len = 0;
    let rc = unsafe { libc::fcntl(fd, libc::F_SETLK, &fl) };
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
