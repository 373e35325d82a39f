//! Fatal kernel errors
//!
//! Anything that means the scheduler's own state can no longer be trusted
//! ends here instead of being returned to a caller.
//!
//! Author: Moroya Sakamoto

use core::fmt;

/// Why the kernel gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalReason {
    /// A thread marked essential aborted or exited
    EssentialThreadExit,
    /// Priority outside the application range
    InvalidPriority,
    /// A kernel invariant did not hold
    CorruptedState(&'static str),
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalReason::EssentialThreadExit => f.write_str("essential thread exited"),
            FatalReason::InvalidPriority => f.write_str("invalid thread priority"),
            FatalReason::CorruptedState(what) => write!(f, "kernel state corrupted: {what}"),
        }
    }
}

/// System-wide hook run before the kernel halts (reset the board, dump state…)
pub type FatalHandler = fn(FatalReason);

static HANDLER: spin::RwLock<Option<FatalHandler>> = spin::RwLock::new(None);

/// Install the fatal-error hook, replacing any previous one
pub fn set_fatal_handler(handler: FatalHandler) {
    *HANDLER.write() = Some(handler);
}

/// Report a fatal error and halt
pub fn fatal_error(reason: FatalReason) -> ! {
    log::error!("fatal: {}", reason);
    let handler = *HANDLER.read();
    if let Some(h) = handler {
        h(reason);
    }
    panic!("kernel fatal error: {reason}");
}
