//! Ready queue — per-priority FIFOs plus an occupancy bitmap
//!
//! Bit `n` of the bitmap is set while level `n` has at least one thread, so
//! picking the next thread is a `trailing_zeros` and a head lookup.
//!
//! Author: Moroya Sakamoto

use crate::config::{MAX_THREADS, NUM_PRIORITIES};
use crate::list::{Links, ListHead};
use crate::task::{Priority, ThreadId};

/// Runnable threads, organized by priority
pub struct ReadyQueue {
    bitmap: u32,
    levels: [ListHead; NUM_PRIORITIES],
    links: Links<MAX_THREADS>,
    queued: [Option<Priority>; MAX_THREADS],
}

impl ReadyQueue {
    pub const fn new() -> Self {
        Self {
            bitmap: 0,
            levels: [ListHead::new(); NUM_PRIORITIES],
            links: Links::new(),
            queued: [None; MAX_THREADS],
        }
    }

    /// Append `tid` to the tail of its priority's FIFO
    pub fn insert(&mut self, tid: ThreadId, prio: Priority) {
        debug_assert!(self.queued[tid.0].is_none(), "{tid:?} already ready");
        if self.queued[tid.0].is_some() {
            self.remove(tid);
        }
        let level = prio.level();
        self.links.push_back(&mut self.levels[level], tid.0);
        self.bitmap |= 1 << level;
        self.queued[tid.0] = Some(prio);
    }

    /// Take `tid` off the queue; false if it was not queued
    pub fn remove(&mut self, tid: ThreadId) -> bool {
        let Some(prio) = self.queued[tid.0].take() else {
            return false;
        };
        let level = prio.level();
        self.links.remove(&mut self.levels[level], tid.0);
        if self.levels[level].is_empty() {
            self.bitmap &= !(1 << level);
        }
        true
    }

    /// Highest-priority thread, first in FIFO order within its level
    pub fn best(&self) -> Option<ThreadId> {
        if self.bitmap == 0 {
            return None;
        }
        let level = self.bitmap.trailing_zeros() as usize;
        self.levels[level].first().map(ThreadId)
    }

    pub fn contains(&self, tid: ThreadId) -> bool {
        self.queued[tid.0].is_some()
    }

    /// Number of ready threads
    pub fn len(&self) -> usize {
        self.levels.iter().map(ListHead::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bitmap == 0
    }

    /// Occupied levels (bit 0 = highest priority)
    pub fn bitmap(&self) -> u32 {
        self.bitmap
    }

    /// Threads at one priority, in dispatch order
    pub fn iter_priority(&self, prio: Priority) -> impl Iterator<Item = ThreadId> + '_ {
        self.links.iter(&self.levels[prio.level()]).map(ThreadId)
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}
