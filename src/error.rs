//! Kernel error codes
//!
//! Per-call failures returned to the immediate caller. Structural
//! corruption never shows up here; it goes through [`crate::fatal`].
//!
//! Author: Moroya Sakamoto

use core::fmt;

/// Result alias used by every fallible kernel call
pub type KResult<T> = Result<T, KernelError>;

/// Recoverable kernel errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Non-blocking call found nothing available
    WouldBlock,
    /// Blocking call's deadline elapsed (or its wait was cancelled)
    Timeout,
    /// Give to a full object with no waiter
    NoSpace,
    /// Timeout abort raced with expiry; nothing was queued
    AlreadyExpired,
    /// Owner tried to lock a mutex it already holds
    Deadlock,
    /// Unlock by a thread that does not own the mutex
    NotOwner,
    /// A fixed-size kernel arena is exhausted
    NoResources,
    /// Object still has waiters
    Busy,
    /// Thread id does not name a live thread
    InvalidThread,
    /// Argument outside the accepted range (object ids, limits)
    InvalidArgument,
}

impl KernelError {
    /// Negative errno-style code
    pub const fn errno(self) -> i32 {
        match self {
            KernelError::WouldBlock => -16, // EBUSY
            KernelError::Timeout => -11,    // EAGAIN
            KernelError::NoSpace => -12,    // ENOMEM
            KernelError::AlreadyExpired => -1,
            KernelError::Deadlock => -35, // EDEADLK
            KernelError::NotOwner => -1,  // EPERM
            KernelError::NoResources => -12,
            KernelError::Busy => -11,
            KernelError::InvalidThread => -22, // EINVAL
            KernelError::InvalidArgument => -22,
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KernelError::WouldBlock => "operation would block",
            KernelError::Timeout => "wait timed out",
            KernelError::NoSpace => "object is full",
            KernelError::AlreadyExpired => "timeout already expired",
            KernelError::Deadlock => "mutex already held by caller",
            KernelError::NotOwner => "caller does not own the mutex",
            KernelError::NoResources => "kernel arena exhausted",
            KernelError::Busy => "object has waiters",
            KernelError::InvalidThread => "invalid thread id",
            KernelError::InvalidArgument => "invalid argument",
        };
        f.write_str(msg)
    }
}

impl core::error::Error for KernelError {}
