//! Priority-preemptive scheduler
//!
//! Owns the thread table, the ready queue and the notion of "current".
//! A running thread only loses the CPU to a strictly higher-priority thread
//! (never to an equal one), or when it yields or blocks. Cooperative
//! threads and a held scheduler lock suppress preemption entirely.
//!
//! Reschedule requests raised inside an ISR are latched and carried out at
//! the outermost `isr_exit`, the way an interrupt returns through the
//! scheduler on real hardware.
//!
//! Author: Moroya Sakamoto

use crate::config::MAX_THREADS;
use crate::error::{KResult, KernelError};
use crate::fatal::{fatal_error, FatalReason};
use crate::ready::ReadyQueue;
use crate::task::{Context, Priority, SwapData, Thread, ThreadId, ThreadOptions, ThreadState};

/// Port hook run on every context switch: (outgoing, incoming)
pub type SwitchHook = fn(Option<ThreadId>, ThreadId);

/// Thread table + ready queue + dispatch
///
/// Slot 0 is always the idle thread.
pub struct Scheduler {
    /// Static thread table
    threads: [Thread; MAX_THREADS],
    /// Runnable threads
    ready: ReadyQueue,
    /// Thread on the CPU (None before start)
    current: Option<ThreadId>,
    /// Dispatching enabled
    started: bool,
    /// Scheduler lock nesting depth
    sched_lock: u32,
    /// ISR nesting depth
    isr_nesting: u32,
    /// Reschedule latched during an ISR
    switch_pending: bool,
    /// Port context-switch hook
    switch_hook: Option<SwitchHook>,
    /// Total context switches
    pub context_switches: u32,
}

impl Scheduler {
    /// Id of the idle thread
    pub const IDLE: ThreadId = ThreadId(0);

    /// Create a scheduler holding only the idle thread
    pub const fn new() -> Self {
        let mut threads = [Thread::empty(); MAX_THREADS];
        threads[0] = Thread {
            name: *b"idle\0\0\0\0",
            priority: Priority::IDLE,
            state: ThreadState::Prestart,
            options: ThreadOptions::ESSENTIAL,
            context: Context {
                sp: 0,
                entry: None,
                arg: 0,
            },
            swap: SwapData::Empty,
            dispatch_count: 0,
            started: false,
            start_delay: None,
            in_use: true,
        };
        Self {
            threads,
            ready: ReadyQueue::new(),
            current: None,
            started: false,
            sched_lock: 0,
            isr_nesting: 0,
            switch_pending: false,
            switch_hook: None,
            context_switches: 0,
        }
    }

    /// Place a thread descriptor in a free slot
    pub fn register(&mut self, thread: Thread) -> KResult<ThreadId> {
        let idx = self
            .threads
            .iter()
            .position(|t| !t.in_use)
            .ok_or(KernelError::NoResources)?;
        self.threads[idx] = thread;
        Ok(ThreadId(idx))
    }

    /// Return a dead thread's slot to the table
    pub fn release(&mut self, tid: ThreadId) -> KResult<()> {
        let t = self.get(tid)?;
        if t.state != ThreadState::Dead {
            return Err(KernelError::Busy);
        }
        self.threads[tid.0] = Thread::empty();
        Ok(())
    }

    /// Install the port's context-switch hook
    pub fn set_switch_hook(&mut self, hook: SwitchHook) {
        self.switch_hook = Some(hook);
    }

    /// Begin dispatching: ready the idle thread and run the best one
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        self.make_ready(Self::IDLE);
        if let Some(next) = self.ready.best() {
            self.switch_to(next);
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Look up a slot that holds a thread
    pub fn get(&self, tid: ThreadId) -> KResult<&Thread> {
        match self.threads.get(tid.0) {
            Some(t) if t.in_use => Ok(t),
            _ => Err(KernelError::InvalidThread),
        }
    }

    pub(crate) fn thread_mut(&mut self, tid: ThreadId) -> &mut Thread {
        &mut self.threads[tid.0]
    }

    /// Thread on the CPU
    pub fn current(&self) -> Option<ThreadId> {
        self.current
    }

    /// Mark READY and append to its priority's FIFO
    pub(crate) fn make_ready(&mut self, tid: ThreadId) {
        let t = &mut self.threads[tid.0];
        t.state = ThreadState::Ready;
        t.started = true;
        self.ready.insert(tid, t.priority);
    }

    /// Drop from the ready queue without touching the state
    pub(crate) fn unready(&mut self, tid: ThreadId) -> bool {
        self.ready.remove(tid)
    }

    /// Next thread the dispatcher would pick
    pub fn next_up(&self) -> Option<ThreadId> {
        self.ready.best()
    }

    pub fn ready_queue(&self) -> &ReadyQueue {
        &self.ready
    }

    /// Change priority, keeping a ready thread queued at its new level
    pub(crate) fn set_priority(&mut self, tid: ThreadId, prio: Priority) {
        let queued = self.ready.remove(tid);
        self.threads[tid.0].priority = prio;
        if queued {
            self.ready.insert(tid, prio);
        }
    }

    /// Would `candidate` take the CPU from the current thread?
    fn should_preempt(&self, candidate: ThreadId) -> bool {
        let Some(cur) = self.current else {
            return true;
        };
        let c = &self.threads[cur.0];
        if c.state != ThreadState::Running {
            return true;
        }
        if self.sched_lock > 0 || c.priority.is_cooperative() {
            return false;
        }
        self.threads[candidate.0].priority < c.priority
    }

    /// Preemption point: switch if a ready thread outranks the current one
    pub fn reschedule(&mut self) {
        if !self.started {
            return;
        }
        if self.isr_nesting > 0 {
            self.switch_pending = true;
            return;
        }
        if let Some(next) = self.ready.best() {
            if self.should_preempt(next) {
                self.switch_to(next);
            }
        }
    }

    /// The current thread stopped running (blocked, suspended, dead);
    /// hand the CPU to the best ready thread
    pub(crate) fn swap_out(&mut self) {
        if self.isr_nesting > 0 {
            self.switch_pending = true;
            return;
        }
        match self.ready.best() {
            Some(next) => self.switch_to(next),
            None => fatal_error(FatalReason::CorruptedState("no runnable thread")),
        }
    }

    /// Requeue the current thread behind its equal-priority peers
    pub fn yield_current(&mut self) {
        let Some(cur) = self.current else { return };
        if self.threads[cur.0].state != ThreadState::Running || self.isr_nesting > 0 {
            return;
        }
        self.make_ready(cur);
        if let Some(next) = self.ready.best() {
            self.switch_to(next);
        }
    }

    fn switch_to(&mut self, next: ThreadId) {
        let prev = self.current;
        self.ready.remove(next);
        if let Some(p) = prev {
            if p != next && self.threads[p.0].state == ThreadState::Running {
                self.make_ready(p);
            }
        }
        let t = &mut self.threads[next.0];
        t.state = ThreadState::Running;
        self.current = Some(next);
        if prev == Some(next) {
            return;
        }
        t.dispatch_count += 1;
        self.context_switches += 1;
        log::trace!("switch {:?} -> {:?}", prev, next);
        if let Some(hook) = self.switch_hook {
            hook(prev, next);
        }
    }

    /// Disable preemption (nestable)
    pub fn lock(&mut self) {
        self.sched_lock += 1;
    }

    /// Re-enable preemption; the outermost unlock is a preemption point
    pub fn unlock(&mut self) {
        debug_assert!(self.sched_lock > 0, "unbalanced scheduler unlock");
        self.sched_lock = self.sched_lock.saturating_sub(1);
        if self.sched_lock == 0 {
            self.reschedule();
        }
    }

    pub fn is_locked(&self) -> bool {
        self.sched_lock > 0
    }

    /// Interrupt entry
    pub fn isr_enter(&mut self) {
        self.isr_nesting += 1;
    }

    /// Interrupt exit; the outermost exit performs any latched reschedule
    pub fn isr_exit(&mut self) {
        debug_assert!(self.isr_nesting > 0, "unbalanced isr_exit");
        self.isr_nesting = self.isr_nesting.saturating_sub(1);
        if self.isr_nesting == 0 && self.switch_pending {
            self.switch_pending = false;
            self.reschedule();
        }
    }

    pub fn in_isr(&self) -> bool {
        self.isr_nesting > 0
    }

    /// Number of live threads (idle included)
    pub fn active_thread_count(&self) -> usize {
        self.threads.iter().filter(|t| t.is_active()).count()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
