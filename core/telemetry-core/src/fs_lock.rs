//! Non-blocking whole-file exclusive locking.
//!
//! File-lock contention is a benign skip, never an error: callers must use
//! `try_lock_exclusive` semantics and treat "not lockable right now"
//! (`WouldBlock`) differently from "locking unsupported on this platform" or
//! any other I/O failure. Locks are never retried in a spin loop; callers
//! that want another attempt wait for their next scheduled beat instead.

use std::fs::File;
use std::io;

use fs2::FileExt;

/// Outcome of a single, non-blocking exclusive-lock attempt.
pub enum LockAttempt {
    /// The lock was acquired; it is released when `file`'s handle is
    /// dropped or [`unlock`] is called explicitly.
    Acquired,
    /// Another open file description (same or different process) already
    /// holds the lock. Not an error — the caller should skip this file for
    /// now.
    Contended,
}

/// Attempts to acquire an exclusive lock on `file` without blocking.
pub fn try_lock_exclusive(file: &File) -> io::Result<LockAttempt> {
    match file.try_lock_exclusive() {
        Ok(()) => Ok(LockAttempt::Acquired),
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(LockAttempt::Contended),
        Err(err) => Err(err),
    }
}

/// Releases a lock acquired via [`try_lock_exclusive`].
///
/// Safe to call on a file that isn't locked; unlocking an unlocked file is a
/// no-op on every platform `fs2` supports.
pub fn unlock(file: &File) -> io::Result<()> {
    FileExt::unlock(file)
}
