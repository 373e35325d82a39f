//! System clock and kernel timers
//!
//! `SysClock` counts announced ticks since boot. On real hardware the tick
//! source is SysTick (Cortex-M) or MTIME (RISC-V); the port calls
//! [`Kernel::announce_ticks`](crate::Kernel::announce_ticks) from its
//! interrupt.
//!
//! A [`Timer`] is a timeout record with no thread behind it: on expiry it
//! bumps its status counter, runs its callback and wakes one
//! `timer_status_sync` waiter.
//!
//! Callbacks run inside the tick handler with the kernel borrowed, so they
//! only get the [`TimerId`]: they cannot give a semaphore or push to a
//! stack. Work that needs the kernel belongs in a thread blocked in
//! `timer_status_sync`, which is woken on every expiry.
//!
//! Author: Moroya Sakamoto

use crate::wait_queue::WaitQueueId;

/// Milliseconds → ticks, rounded up so a delay is never shortened
pub const fn ms_to_ticks(ms: u32, ticks_per_sec: u32) -> u32 {
    let t = (ms as u64 * ticks_per_sec as u64).div_ceil(1000);
    if t > u32::MAX as u64 {
        u32::MAX
    } else {
        t as u32
    }
}

/// Ticks → milliseconds, rounded down
pub const fn ticks_to_ms(ticks: u64, ticks_per_sec: u32) -> u64 {
    if ticks_per_sec == 0 {
        0
    } else {
        ticks * 1000 / ticks_per_sec as u64
    }
}

/// Monotonic tick counter
pub struct SysClock {
    /// Ticks announced since boot
    ticks: u64,
    /// Tick rate in Hz
    ticks_per_sec: u32,
}

impl SysClock {
    pub const fn new(ticks_per_sec: u32) -> Self {
        Self {
            ticks: 0,
            ticks_per_sec,
        }
    }

    /// Advance by announced ticks
    pub fn advance(&mut self, ticks: u32) {
        self.ticks = self.ticks.wrapping_add(ticks as u64);
    }

    /// Ticks since boot
    pub fn now_ticks(&self) -> u64 {
        self.ticks
    }

    /// Milliseconds since boot
    pub fn uptime_ms(&self) -> u64 {
        ticks_to_ms(self.ticks, self.ticks_per_sec)
    }

    pub fn ticks_per_sec(&self) -> u32 {
        self.ticks_per_sec
    }

    /// Ticks elapsed since a reference point
    pub fn elapsed_since(&self, reference: u64) -> u64 {
        self.ticks.wrapping_sub(reference)
    }

    /// Milliseconds → ticks at this clock's rate
    pub fn ms_to_ticks(&self, ms: u32) -> u32 {
        ms_to_ticks(ms, self.ticks_per_sec)
    }
}

/// Timer callback, run from the tick handler; has no kernel access
pub type TimerFn = fn(TimerId);

/// Index of a kernel timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub(crate) usize);

impl TimerId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Kernel timer state
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    /// Called on every expiry
    pub expiry_fn: Option<TimerFn>,
    /// Called when stopped while running
    pub stop_fn: Option<TimerFn>,
    /// Re-arm interval in ticks (0 = one-shot)
    pub period: u32,
    /// Expiries since the status was last read
    pub status: u32,
    /// Threads blocked in `timer_status_sync`
    pub wait_q: Option<WaitQueueId>,
    /// Slot handed out
    pub in_use: bool,
}

impl Timer {
    pub const fn empty() -> Self {
        Self {
            expiry_fn: None,
            stop_fn: None,
            period: 0,
            status: 0,
            wait_q: None,
            in_use: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advance() {
        let mut clock = SysClock::new(1000);
        assert_eq!(clock.now_ticks(), 0);
        clock.advance(1500);
        assert_eq!(clock.now_ticks(), 1500);
        assert_eq!(clock.uptime_ms(), 1500);
    }

    #[test]
    fn test_clock_at_100hz() {
        let mut clock = SysClock::new(100);
        clock.advance(25);
        assert_eq!(clock.uptime_ms(), 250);
        assert_eq!(clock.ms_to_ticks(10), 1);
        assert_eq!(clock.ms_to_ticks(11), 2);
    }

    #[test]
    fn test_ms_to_ticks_rounds_up() {
        assert_eq!(ms_to_ticks(0, 100), 0);
        assert_eq!(ms_to_ticks(1, 100), 1);
        assert_eq!(ms_to_ticks(1000, 100), 100);
        assert_eq!(ms_to_ticks(u32::MAX, 1_000_000), u32::MAX);
    }

    #[test]
    fn test_elapsed_since() {
        let mut clock = SysClock::new(100);
        clock.advance(10);
        let r = clock.now_ticks();
        clock.advance(5);
        assert_eq!(clock.elapsed_since(r), 5);
    }
}
