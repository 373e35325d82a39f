//! Thread control blocks — static, no-alloc thread descriptors
//!
//! A thread's queue links (ready, wait, timeout) live in the kernel's
//! arenas, indexed by the same [`ThreadId`]; the TCB itself only carries
//! what belongs to the thread.
//!
//! Author: Moroya Sakamoto

use crate::config::{NUM_COOP_PRIORITIES, NUM_PREEMPT_PRIORITIES};

/// Thread entry point, called once with its argument
pub type ThreadFn = fn(usize);

/// Stable arena index of a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub(crate) usize);

impl ThreadId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Thread priority (lower number = higher priority)
///
/// Negative values are cooperative: a running cooperative thread is never
/// preempted, it only gives up the CPU by yielding or blocking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub i8);

impl Priority {
    /// Highest cooperative priority
    pub const HIGHEST: Priority = Priority(-(NUM_COOP_PRIORITIES as i8));
    /// Highest preemptible priority
    pub const PREEMPT_HIGHEST: Priority = Priority(0);
    /// Lowest priority an application thread may use
    pub const LOWEST_APP: Priority = Priority(NUM_PREEMPT_PRIORITIES as i8 - 2);
    /// Reserved for the idle thread
    pub const IDLE: Priority = Priority(NUM_PREEMPT_PRIORITIES as i8 - 1);

    /// Cooperative threads run until they yield or block
    pub fn is_cooperative(self) -> bool {
        self.0 < 0
    }

    /// Inside the range application threads may use
    pub fn is_valid_app(self) -> bool {
        self >= Self::HIGHEST && self <= Self::LOWEST_APP
    }

    /// Ready-queue level (0 = highest)
    pub(crate) fn level(self) -> usize {
        (self.0 as isize + NUM_COOP_PRIORITIES as isize) as usize
    }
}

/// Thread execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Created, not yet started
    Prestart,
    /// Eligible, queued on the ready queue
    Ready,
    /// Owns the CPU
    Running,
    /// Blocked on a wait queue, maybe with a timeout
    Pending,
    /// Sleeping on the timeout queue alone
    Timing,
    /// Parked until explicitly resumed
    Suspended,
    /// Terminated
    Dead,
}

impl ThreadState {
    /// Blocked in a call that completes through swap data
    pub fn is_blocked(self) -> bool {
        matches!(self, ThreadState::Pending | ThreadState::Timing)
    }
}

bitflags::bitflags! {
    /// Thread creation options
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ThreadOptions: u8 {
        /// Aborting or exiting this thread is a fatal kernel error
        const ESSENTIAL = 1 << 0;
    }
}

/// Result slot written by whoever wakes a blocked thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwapData {
    /// Nothing delivered yet
    #[default]
    Empty,
    /// Wake-up payload
    Value(usize),
    /// The wait ended without the object becoming available
    TimedOut,
}

/// Saved execution context
///
/// Register state itself is pushed on the thread's stack by the port;
/// the kernel only tracks where it is.
#[derive(Debug, Clone, Copy, Default)]
pub struct Context {
    /// Saved stack pointer
    pub sp: usize,
    /// Entry point, taken on first dispatch
    pub entry: Option<ThreadFn>,
    /// Entry argument
    pub arg: usize,
}

/// Thread control block
#[derive(Debug, Clone, Copy)]
pub struct Thread {
    /// Thread name (8 ASCII chars max)
    pub name: [u8; 8],
    /// Priority (lower = higher priority)
    pub priority: Priority,
    /// Current state
    pub state: ThreadState,
    /// Creation options
    pub options: ThreadOptions,
    /// Saved context
    pub context: Context,
    /// Wake-up result for the blocked call
    pub swap: SwapData,
    /// Times this thread has been dispatched
    pub dispatch_count: u32,
    /// Has been made ready at least once
    pub started: bool,
    /// Start delay left when suspended in PRESTART (None = start explicitly)
    pub start_delay: Option<u32>,
    /// Slot holds a thread (live or dead, not yet reaped)
    pub in_use: bool,
}

impl Thread {
    /// Empty thread slot
    pub const fn empty() -> Self {
        Self {
            name: [0u8; 8],
            priority: Priority::IDLE,
            state: ThreadState::Dead,
            options: ThreadOptions::empty(),
            context: Context {
                sp: 0,
                entry: None,
                arg: 0,
            },
            swap: SwapData::Empty,
            dispatch_count: 0,
            started: false,
            start_delay: None,
            in_use: false,
        }
    }

    /// Create a new thread descriptor in PRESTART
    pub fn new(
        name: &[u8],
        entry: Option<ThreadFn>,
        arg: usize,
        priority: Priority,
        options: ThreadOptions,
    ) -> Self {
        let mut n = [0u8; 8];
        let len = name.len().min(8);
        n[..len].copy_from_slice(&name[..len]);

        Self {
            name: n,
            priority,
            state: ThreadState::Prestart,
            options,
            context: Context { sp: 0, entry, arg },
            swap: SwapData::Empty,
            dispatch_count: 0,
            started: false,
            start_delay: None,
            in_use: true,
        }
    }

    /// Is this slot a live (not dead, not free) thread?
    pub fn is_active(&self) -> bool {
        self.in_use && self.state != ThreadState::Dead
    }

    pub fn is_essential(&self) -> bool {
        self.options.contains(ThreadOptions::ESSENTIAL)
    }

    /// Name without trailing padding
    pub fn name(&self) -> &[u8] {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(8);
        &self.name[..end]
    }
}
