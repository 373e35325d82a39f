//! Wait queues — threads blocked on a synchronization object
//!
//! Heads live in a kernel-owned table so the timeout engine can unlink an
//! expired waiter without knowing which object it was blocked on. Order is
//! FIFO: the first thread to block is the first one woken.
//!
//! Author: Moroya Sakamoto

use crate::config::{MAX_THREADS, MAX_WAIT_QUEUES};
use crate::error::{KResult, KernelError};
use crate::list::{Links, ListHead};
use crate::task::ThreadId;

/// Handle to one wait queue in the kernel table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitQueueId(pub(crate) usize);

/// All wait queues in the system
pub struct WaitQueues {
    heads: [ListHead; MAX_WAIT_QUEUES],
    allocated: [bool; MAX_WAIT_QUEUES],
    links: Links<MAX_THREADS>,
    pended_on: [Option<WaitQueueId>; MAX_THREADS],
}

impl WaitQueues {
    pub const fn new() -> Self {
        Self {
            heads: [ListHead::new(); MAX_WAIT_QUEUES],
            allocated: [false; MAX_WAIT_QUEUES],
            links: Links::new(),
            pended_on: [None; MAX_THREADS],
        }
    }

    /// Claim an empty wait queue
    pub fn alloc(&mut self) -> KResult<WaitQueueId> {
        let idx = self
            .allocated
            .iter()
            .position(|used| !used)
            .ok_or(KernelError::NoResources)?;
        self.allocated[idx] = true;
        self.heads[idx] = ListHead::new();
        Ok(WaitQueueId(idx))
    }

    /// Return a wait queue to the table; fails with `Busy` while it has waiters
    pub fn free(&mut self, wq: WaitQueueId) -> KResult<()> {
        if !self.heads[wq.0].is_empty() {
            return Err(KernelError::Busy);
        }
        self.allocated[wq.0] = false;
        Ok(())
    }

    /// Block `tid` at the tail of `wq`
    pub fn enqueue(&mut self, wq: WaitQueueId, tid: ThreadId) {
        debug_assert!(self.allocated[wq.0], "{wq:?} not allocated");
        debug_assert!(self.pended_on[tid.0].is_none(), "{tid:?} already pended");
        self.links.push_back(&mut self.heads[wq.0], tid.0);
        self.pended_on[tid.0] = Some(wq);
    }

    /// Remove and return the longest waiter
    pub fn dequeue_first(&mut self, wq: WaitQueueId) -> Option<ThreadId> {
        let idx = self.links.pop_front(&mut self.heads[wq.0])?;
        self.pended_on[idx] = None;
        Some(ThreadId(idx))
    }

    /// Remove `tid` from whatever queue holds it; returns that queue
    pub fn remove(&mut self, tid: ThreadId) -> Option<WaitQueueId> {
        let wq = self.pended_on[tid.0].take()?;
        self.links.remove(&mut self.heads[wq.0], tid.0);
        Some(wq)
    }

    /// Longest waiter, left in place
    pub fn head(&self, wq: WaitQueueId) -> Option<ThreadId> {
        self.heads[wq.0].first().map(ThreadId)
    }

    pub fn len(&self, wq: WaitQueueId) -> usize {
        self.heads[wq.0].len()
    }

    pub fn is_empty(&self, wq: WaitQueueId) -> bool {
        self.heads[wq.0].is_empty()
    }

    pub fn pended_on(&self, tid: ThreadId) -> Option<WaitQueueId> {
        self.pended_on[tid.0]
    }

    /// Waiters in wake order
    pub fn iter(&self, wq: WaitQueueId) -> impl Iterator<Item = ThreadId> + '_ {
        self.links.iter(&self.heads[wq.0]).map(ThreadId)
    }

    /// Wait queues currently handed out
    pub fn allocated_count(&self) -> usize {
        self.allocated.iter().filter(|&&a| a).count()
    }
}

impl Default for WaitQueues {
    fn default() -> Self {
        Self::new()
    }
}
