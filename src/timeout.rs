//! Timeout queue — one delta-ordered list of every pending deadline
//!
//! Each queued record stores only the ticks between its predecessor's
//! deadline and its own, so the prefix sum up to a record is that record's
//! remaining time. Insertion walks at most the records ahead of the new
//! deadline; a tick only ever touches the head.
//!
//! ```text
//! head                               tail
//!  [Δ5] ──► [Δ0] ──► [Δ12] ──► [Δ3]
//!   5        5        17        20     ← remaining ticks
//! ```
//!
//! Every mutation must happen with the interrupt lock held; the kernel
//! does that, this module only owns the data structure.
//!
//! Author: Moroya Sakamoto

use crate::error::{KResult, KernelError};
use crate::list::{Links, ListHead};
use crate::task::ThreadId;
use crate::timer::TimerId;
use crate::wait_queue::WaitQueueId;

/// Timeout argument of a blocking call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Never suspend
    NoWait,
    /// Suspend for at most this many ticks
    Ticks(u32),
    /// Never expire
    Forever,
}

impl Timeout {
    /// Map a raw tick count: 0 is `NoWait`, `u32::MAX` is `Forever`
    pub const fn from_ticks(ticks: u32) -> Self {
        match ticks {
            0 => Timeout::NoWait,
            u32::MAX => Timeout::Forever,
            n => Timeout::Ticks(n),
        }
    }

    /// Milliseconds at the default tick rate, rounded up to whole ticks
    pub const fn millis(ms: u32) -> Self {
        Self::from_ticks(crate::timer::ms_to_ticks(ms, crate::config::TICKS_PER_SEC))
    }

    /// Raw tick count: `NoWait` → 0, `Forever` → `u32::MAX`
    pub const fn ticks(self) -> u32 {
        match self {
            Timeout::NoWait => 0,
            Timeout::Ticks(n) => n,
            Timeout::Forever => u32::MAX,
        }
    }

    pub const fn is_no_wait(self) -> bool {
        matches!(self, Timeout::NoWait | Timeout::Ticks(0))
    }

    pub const fn is_forever(self) -> bool {
        matches!(self, Timeout::Forever)
    }
}

/// Index of a timeout record in the queue's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeoutId(pub(crate) usize);

/// What expiry acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutOwner {
    /// Wake (or time out) this thread
    Thread(ThreadId),
    /// Fire this kernel timer's callback
    Timer(TimerId),
}

/// Queue membership of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutState {
    #[default]
    Unqueued,
    /// Ticks after the predecessor's deadline
    Queued { delta: u32 },
}

/// One pending deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeoutRecord {
    pub state: TimeoutState,
    pub owner: Option<TimeoutOwner>,
    /// Wait queue the owner must be unlinked from on expiry
    pub wait_q: Option<WaitQueueId>,
}

impl TimeoutRecord {
    pub const fn new() -> Self {
        Self {
            state: TimeoutState::Unqueued,
            owner: None,
            wait_q: None,
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self.state, TimeoutState::Queued { .. })
    }

    fn delta(&self) -> u32 {
        match self.state {
            TimeoutState::Queued { delta } => delta,
            TimeoutState::Unqueued => 0,
        }
    }
}

/// Delta-encoded timeout list over `N` records
pub struct TimeoutQueue<const N: usize> {
    records: [TimeoutRecord; N],
    links: Links<N>,
    list: ListHead,
}

impl<const N: usize> TimeoutQueue<N> {
    pub const fn new() -> Self {
        Self {
            records: [TimeoutRecord::new(); N],
            links: Links::new(),
            list: ListHead::new(),
        }
    }

    pub fn record(&self, id: TimeoutId) -> &TimeoutRecord {
        &self.records[id.0]
    }

    pub fn is_queued(&self, id: TimeoutId) -> bool {
        self.records[id.0].is_queued()
    }

    /// Number of queued records
    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    fn set_delta(&mut self, id: usize, delta: u32) {
        self.records[id].state = TimeoutState::Queued { delta };
    }

    /// Queue `id` to expire `ticks` from now (zero is rounded up to one tick)
    ///
    /// Ties keep insertion order: a new record goes behind every record
    /// with the same deadline.
    pub fn add(
        &mut self,
        id: TimeoutId,
        owner: TimeoutOwner,
        wait_q: Option<WaitQueueId>,
        ticks: u32,
    ) {
        debug_assert!(!self.is_queued(id), "timeout {id:?} already queued");
        if self.is_queued(id) {
            let _ = self.abort(id);
        }

        let mut remaining = ticks.max(1);
        let mut cursor = self.list.first();
        while let Some(c) = cursor {
            let d = self.records[c].delta();
            if remaining < d {
                self.set_delta(c, d - remaining);
                break;
            }
            remaining -= d;
            cursor = self.links.next(c);
        }

        match cursor {
            Some(before) => self.links.insert_before(&mut self.list, before, id.0),
            None => self.links.push_back(&mut self.list, id.0),
        }
        self.records[id.0] = TimeoutRecord {
            state: TimeoutState::Queued { delta: remaining },
            owner: Some(owner),
            wait_q,
        };
        log::trace!("timeout {} queued for {} ticks", id.0, ticks);
    }

    /// Cancel a queued record
    ///
    /// Its remaining delta is folded into the successor so every later
    /// deadline is unchanged. Fails with `AlreadyExpired` when nothing is
    /// queued, which is how a cancel that lost the race with expiry shows up.
    pub fn abort(&mut self, id: TimeoutId) -> KResult<()> {
        let TimeoutState::Queued { delta } = self.records[id.0].state else {
            return Err(KernelError::AlreadyExpired);
        };
        if let Some(next) = self.links.next(id.0) {
            let nd = self.records[next].delta();
            self.set_delta(next, nd.saturating_add(delta));
        }
        self.links.remove(&mut self.list, id.0);
        self.records[id.0].state = TimeoutState::Unqueued;
        self.records[id.0].wait_q = None;
        Ok(())
    }

    /// Consume `ticks` elapsed ticks from the front of the list
    ///
    /// Records whose deadline has passed are left at delta zero for
    /// [`pop_expired`](Self::pop_expired).
    pub fn announce(&mut self, ticks: u32) {
        let mut left = ticks;
        let mut cursor = self.list.first();
        while left > 0 {
            let Some(c) = cursor else { break };
            let d = self.records[c].delta();
            let step = d.min(left);
            self.set_delta(c, d - step);
            left -= step;
            cursor = self.links.next(c);
        }
    }

    /// Pop the head if its deadline has arrived
    pub fn pop_expired(&mut self) -> Option<(TimeoutId, TimeoutRecord)> {
        let head = self.list.first()?;
        if self.records[head].delta() != 0 {
            return None;
        }
        self.links.remove(&mut self.list, head);
        let rec = self.records[head];
        self.records[head].state = TimeoutState::Unqueued;
        self.records[head].wait_q = None;
        log::trace!("timeout {} expired", head);
        Some((TimeoutId(head), rec))
    }

    /// Ticks until `id` expires, or None if it is not queued
    pub fn remaining(&self, id: TimeoutId) -> Option<u32> {
        if !self.is_queued(id) {
            return None;
        }
        let mut sum = 0u32;
        for c in self.links.iter(&self.list) {
            sum = sum.saturating_add(self.records[c].delta());
            if c == id.0 {
                return Some(sum);
            }
        }
        None
    }

    /// Ticks until the next expiry, capped by `bound`; None = nothing to wait for
    pub fn earliest_deadline(&self, bound: Option<u32>) -> Option<u32> {
        let head = self.list.first().map(|h| self.records[h].delta());
        match (head, bound) {
            (Some(h), Some(b)) => Some(h.min(b)),
            (h, b) => h.or(b),
        }
    }

    /// Queued records, head first, with their absolute remaining ticks
    pub fn iter(&self) -> impl Iterator<Item = (TimeoutId, u32)> + '_ {
        let mut sum = 0u32;
        self.links.iter(&self.list).map(move |c| {
            sum = sum.saturating_add(self.records[c].delta());
            (TimeoutId(c), sum)
        })
    }
}

impl<const N: usize> Default for TimeoutQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
