//! Kernel configuration — compile-time limits and runtime knobs
//!
//! All arenas are sized here. Nothing in the kernel allocates.
//!
//! Author: Moroya Sakamoto

/// Maximum threads the kernel can manage (idle thread included)
pub const MAX_THREADS: usize = 16;

/// Maximum wait queues (one per synchronization object or timer)
pub const MAX_WAIT_QUEUES: usize = 24;

/// Maximum kernel timers
pub const MAX_TIMERS: usize = 8;

/// Timeout records: one embedded per thread, one per timer
pub const MAX_TIMEOUTS: usize = MAX_THREADS + MAX_TIMERS;

/// Cooperative priority levels (`-16..=-1`)
pub const NUM_COOP_PRIORITIES: usize = 16;

/// Preemptible priority levels (`0..=15`, the last one reserved for idle)
pub const NUM_PREEMPT_PRIORITIES: usize = 16;

/// Total priority levels, must fit the `u32` ready bitmap
pub const NUM_PRIORITIES: usize = NUM_COOP_PRIORITIES + NUM_PREEMPT_PRIORITIES;

const _: () = assert!(NUM_PRIORITIES <= 32);

/// Default system tick rate
pub const TICKS_PER_SEC: u32 = 100;

/// Runtime kernel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// System clock tick rate in Hz
    pub ticks_per_sec: u32,
    /// Upper bound on a single tickless idle period (None = unbounded)
    pub idle_timeout_max: Option<u32>,
}

impl KernelConfig {
    /// Defaults: 100 Hz tick, idle sleep unbounded
    pub const fn new() -> Self {
        Self {
            ticks_per_sec: TICKS_PER_SEC,
            idle_timeout_max: None,
        }
    }

    /// Set the tick rate
    pub const fn ticks_per_sec(mut self, hz: u32) -> Self {
        self.ticks_per_sec = hz;
        self
    }

    /// Bound the tickless idle period
    pub const fn idle_timeout_max(mut self, ticks: u32) -> Self {
        self.idle_timeout_max = Some(ticks);
        self
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}
