//! Kernel — top-level RTOS manager
//!
//! Combines scheduler + timeout queue + wait queues + clock + timers into a
//! single kernel instance and exposes the thread-control and blocking API
//! every synchronization object is built on.
//!
//! The kernel is driven from the outside: the port calls
//! [`announce_ticks`](Kernel::announce_ticks) from its tick interrupt and
//! brackets other interrupts with `isr_enter`/`isr_exit`. Calls made "by a
//! thread" act on [`current`](Kernel::current).
//!
//! A call that suspends its caller returns [`Blocking::Pended`]. Once that
//! thread runs again its result is read back with
//! [`swap_result`](Kernel::swap_result).
//!
//! Author: Moroya Sakamoto

use crate::config::{KernelConfig, MAX_THREADS, MAX_TIMEOUTS, MAX_TIMERS};
use crate::error::{KResult, KernelError};
use crate::fatal::{fatal_error, FatalReason};
use crate::irq::IrqGuard;
use crate::scheduler::{Scheduler, SwitchHook};
use crate::task::{Priority, SwapData, Thread, ThreadFn, ThreadId, ThreadOptions, ThreadState};
use crate::timeout::{Timeout, TimeoutId, TimeoutOwner, TimeoutQueue};
use crate::timer::{SysClock, Timer, TimerFn, TimerId};
use crate::wait_queue::{WaitQueueId, WaitQueues};

/// Outcome of a call that may suspend the caller
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blocking<T> {
    /// Finished without suspending
    Done(T),
    /// Caller was switched out; its result arrives through swap data
    Pended(ThreadId),
}

impl<T> Blocking<T> {
    pub fn is_pended(&self) -> bool {
        matches!(self, Blocking::Pended(_))
    }

    /// The immediate result, if the call did not suspend
    pub fn done(self) -> Option<T> {
        match self {
            Blocking::Done(v) => Some(v),
            Blocking::Pended(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Blocking<U> {
        match self {
            Blocking::Done(v) => Blocking::Done(f(v)),
            Blocking::Pended(tid) => Blocking::Pended(tid),
        }
    }
}

/// Timeout record embedded in a thread
fn thread_timeout(tid: ThreadId) -> TimeoutId {
    TimeoutId(tid.0)
}

/// Timeout record owned by a timer
fn timer_timeout(id: TimerId) -> TimeoutId {
    TimeoutId(MAX_THREADS + id.0)
}

/// Kernel instance
pub struct Kernel {
    /// Thread table and dispatcher
    pub scheduler: Scheduler,
    /// System clock
    pub clock: SysClock,
    timeouts: TimeoutQueue<MAX_TIMEOUTS>,
    wait_queues: WaitQueues,
    timers: [Timer; MAX_TIMERS],
    config: KernelConfig,
}

impl Kernel {
    /// Kernel with default configuration
    pub const fn new() -> Self {
        Self::with_config(KernelConfig::new())
    }

    pub const fn with_config(config: KernelConfig) -> Self {
        Self {
            scheduler: Scheduler::new(),
            clock: SysClock::new(config.ticks_per_sec),
            timeouts: TimeoutQueue::new(),
            wait_queues: WaitQueues::new(),
            timers: [Timer::empty(); MAX_TIMERS],
            config,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Start dispatching threads
    pub fn start(&mut self) {
        let _irq = IrqGuard::new();
        log::debug!("kernel start");
        self.scheduler.start();
    }

    /// Install the port's context-switch hook
    pub fn set_switch_hook(&mut self, hook: SwitchHook) {
        self.scheduler.set_switch_hook(hook);
    }

    // ---------------------------------------------------------------------
    // Thread control
    // ---------------------------------------------------------------------

    /// Create a thread
    ///
    /// `delay`: `NoWait` readies it now, `Ticks(n)` after `n` ticks,
    /// `Forever` leaves it in PRESTART until [`thread_start`](Self::thread_start).
    /// A priority outside the application range is fatal.
    pub fn thread_create(
        &mut self,
        name: &[u8],
        entry: Option<ThreadFn>,
        arg: usize,
        priority: Priority,
        options: ThreadOptions,
        delay: Timeout,
    ) -> KResult<ThreadId> {
        if !priority.is_valid_app() {
            fatal_error(FatalReason::InvalidPriority);
        }
        let _irq = IrqGuard::new();
        let tid = self
            .scheduler
            .register(Thread::new(name, entry, arg, priority, options))?;
        log::debug!("thread {:?} created at priority {}", tid, priority.0);

        match delay {
            Timeout::NoWait | Timeout::Ticks(0) => {
                self.scheduler.make_ready(tid);
                self.scheduler.reschedule();
            }
            Timeout::Ticks(n) => {
                self.timeouts
                    .add(thread_timeout(tid), TimeoutOwner::Thread(tid), None, n);
            }
            Timeout::Forever => {}
        }
        Ok(tid)
    }

    /// Start a thread still in PRESTART (cancels any pending start delay)
    pub fn thread_start(&mut self, tid: ThreadId) -> KResult<()> {
        let _irq = IrqGuard::new();
        if self.scheduler.get(tid)?.state != ThreadState::Prestart {
            return Ok(());
        }
        let _ = self.timeouts.abort(thread_timeout(tid));
        self.scheduler.make_ready(tid);
        self.scheduler.reschedule();
        Ok(())
    }

    /// Thread on the CPU
    pub fn current(&self) -> Option<ThreadId> {
        self.scheduler.current()
    }

    pub fn thread(&self, tid: ThreadId) -> KResult<&Thread> {
        self.scheduler.get(tid)
    }

    pub fn thread_state(&self, tid: ThreadId) -> KResult<ThreadState> {
        Ok(self.scheduler.get(tid)?.state)
    }

    /// Change a thread's priority; may preempt the caller
    pub fn priority_set(&mut self, tid: ThreadId, priority: Priority) -> KResult<()> {
        if !priority.is_valid_app() {
            fatal_error(FatalReason::InvalidPriority);
        }
        let _irq = IrqGuard::new();
        self.scheduler.get(tid)?;
        self.scheduler.set_priority(tid, priority);
        self.scheduler.reschedule();
        Ok(())
    }

    /// Let equal-priority threads run
    pub fn yield_now(&mut self) {
        let _irq = IrqGuard::new();
        self.scheduler.yield_current();
    }

    /// Sleep the current thread
    ///
    /// Completes with the ticks left to sleep: 0 when the full time elapsed,
    /// more when [`wakeup`](Self::wakeup) cut it short. `Forever` suspends;
    /// that call completes with `u32::MAX` once the thread is resumed.
    pub fn sleep(&mut self, timeout: Timeout) -> KResult<Blocking<u32>> {
        match timeout {
            Timeout::NoWait | Timeout::Ticks(0) => {
                self.yield_now();
                Ok(Blocking::Done(0))
            }
            Timeout::Forever => {
                let cur = self.blocking_caller()?;
                self.scheduler.thread_mut(cur).swap = SwapData::Value(u32::MAX as usize);
                self.suspend(cur)?;
                Ok(Blocking::Pended(cur))
            }
            Timeout::Ticks(_) => self.pend_current(None, timeout).map(Blocking::Pended),
        }
    }

    /// End a sleep early
    pub fn wakeup(&mut self, tid: ThreadId) -> KResult<()> {
        let _irq = IrqGuard::new();
        if self.scheduler.get(tid)?.state != ThreadState::Timing {
            return Ok(());
        }
        let left = self.timeouts.remaining(thread_timeout(tid)).unwrap_or(0);
        let _ = self.timeouts.abort(thread_timeout(tid));
        self.ready_with(tid, SwapData::Value(left as usize));
        self.scheduler.reschedule();
        Ok(())
    }

    /// Park a thread until [`resume`](Self::resume)
    ///
    /// A thread blocked on an object loses its place; its blocking call
    /// completes with `Timeout` once it runs again. A thread not yet
    /// started keeps what is left of its start delay. The idle thread
    /// cannot be suspended.
    pub fn suspend(&mut self, tid: ThreadId) -> KResult<()> {
        if tid == Scheduler::IDLE {
            return Err(KernelError::InvalidThread);
        }
        let _irq = IrqGuard::new();
        let state = self.scheduler.get(tid)?.state;
        match state {
            ThreadState::Suspended => return Ok(()),
            ThreadState::Dead => return Err(KernelError::InvalidThread),
            ThreadState::Ready => {
                self.scheduler.unready(tid);
            }
            ThreadState::Pending => {
                self.wait_queues.remove(tid);
                let _ = self.timeouts.abort(thread_timeout(tid));
                self.scheduler.thread_mut(tid).swap = SwapData::TimedOut;
            }
            ThreadState::Timing => {
                let left = self.timeouts.remaining(thread_timeout(tid)).unwrap_or(0);
                let _ = self.timeouts.abort(thread_timeout(tid));
                self.scheduler.thread_mut(tid).swap = SwapData::Value(left as usize);
            }
            ThreadState::Prestart => {
                let left = self.timeouts.remaining(thread_timeout(tid));
                let _ = self.timeouts.abort(thread_timeout(tid));
                self.scheduler.thread_mut(tid).start_delay = left;
            }
            ThreadState::Running => {}
        }
        self.scheduler.thread_mut(tid).state = ThreadState::Suspended;
        log::debug!("thread {:?} suspended", tid);
        if self.current() == Some(tid) {
            self.scheduler.swap_out();
        }
        Ok(())
    }

    /// Make a suspended thread ready again
    ///
    /// A thread suspended before it ever ran goes back to PRESTART with its
    /// remaining start delay re-armed.
    pub fn resume(&mut self, tid: ThreadId) -> KResult<()> {
        let _irq = IrqGuard::new();
        let t = self.scheduler.get(tid)?;
        if t.state != ThreadState::Suspended {
            return Ok(());
        }
        if !t.started {
            let t = self.scheduler.thread_mut(tid);
            t.state = ThreadState::Prestart;
            if let Some(n) = t.start_delay.take() {
                self.timeouts
                    .add(thread_timeout(tid), TimeoutOwner::Thread(tid), None, n);
            }
            return Ok(());
        }
        self.scheduler.make_ready(tid);
        self.scheduler.reschedule();
        Ok(())
    }

    /// Terminate a thread, taking it off every kernel queue
    ///
    /// Aborting an essential thread is fatal.
    pub fn abort(&mut self, tid: ThreadId) -> KResult<()> {
        let _irq = IrqGuard::new();
        let t = self.scheduler.get(tid)?;
        let (state, essential) = (t.state, t.is_essential());
        if state == ThreadState::Dead {
            return Ok(());
        }
        if essential {
            fatal_error(FatalReason::EssentialThreadExit);
        }
        match state {
            ThreadState::Ready => {
                self.scheduler.unready(tid);
            }
            ThreadState::Pending => {
                self.wait_queues.remove(tid);
                let _ = self.timeouts.abort(thread_timeout(tid));
            }
            ThreadState::Timing | ThreadState::Prestart => {
                let _ = self.timeouts.abort(thread_timeout(tid));
            }
            _ => {}
        }
        let t = self.scheduler.thread_mut(tid);
        t.state = ThreadState::Dead;
        t.swap = SwapData::Empty;
        log::debug!("thread {:?} aborted", tid);
        if self.current() == Some(tid) {
            self.scheduler.swap_out();
        }
        Ok(())
    }

    /// Terminate the current thread
    pub fn exit(&mut self) -> KResult<()> {
        let cur = self.current().ok_or(KernelError::InvalidThread)?;
        self.abort(cur)
    }

    /// Free a dead thread's slot for reuse
    pub fn thread_reap(&mut self, tid: ThreadId) -> KResult<()> {
        let _irq = IrqGuard::new();
        self.scheduler.release(tid)
    }

    /// Disable preemption of the current thread (nestable)
    pub fn sched_lock(&mut self) {
        self.scheduler.lock();
    }

    pub fn sched_unlock(&mut self) {
        let _irq = IrqGuard::new();
        self.scheduler.unlock();
    }

    /// Interrupt entry bracket
    pub fn isr_enter(&mut self) {
        self.scheduler.isr_enter();
    }

    /// Interrupt exit; returns through the scheduler
    pub fn isr_exit(&mut self) {
        let _irq = IrqGuard::new();
        self.scheduler.isr_exit();
    }

    pub fn in_isr(&self) -> bool {
        self.scheduler.in_isr()
    }

    // ---------------------------------------------------------------------
    // Time
    // ---------------------------------------------------------------------

    /// Tick announcement from the system timer interrupt
    ///
    /// Time advances deadline by deadline, so a periodic timer re-armed by
    /// an expiry inside this batch is measured from its own expiry.
    pub fn announce_ticks(&mut self, ticks: u32) {
        let _irq = IrqGuard::new();
        let mut left = ticks;
        loop {
            let step = match self.timeouts.earliest_deadline(None) {
                Some(d) if d <= left => d,
                _ => left,
            };
            self.timeouts.announce(step);
            self.clock.advance(step);
            left -= step;
            self.handle_expired();
            if left == 0 {
                break;
            }
        }
        self.scheduler.reschedule();
    }

    /// Act on every record whose deadline has arrived
    pub fn handle_expired(&mut self) {
        let _irq = IrqGuard::new();
        while let Some((id, rec)) = self.timeouts.pop_expired() {
            match rec.owner {
                Some(TimeoutOwner::Thread(tid)) => self.thread_timed_out(tid, rec.wait_q),
                Some(TimeoutOwner::Timer(t)) => self.timer_expired(t),
                None => fatal_error(FatalReason::CorruptedState("ownerless timeout")),
            }
            log::trace!("handled expiry of {:?}", id);
        }
    }

    fn thread_timed_out(&mut self, tid: ThreadId, wait_q: Option<WaitQueueId>) {
        match self.scheduler.get(tid).map(|t| t.state) {
            Ok(ThreadState::Pending) => {
                let removed = self.wait_queues.remove(tid);
                if removed.is_none() || (wait_q.is_some() && removed != wait_q) {
                    fatal_error(FatalReason::CorruptedState("waiter not on its wait queue"));
                }
                self.ready_with(tid, SwapData::TimedOut);
            }
            Ok(ThreadState::Timing) => self.ready_with(tid, SwapData::Value(0)),
            Ok(ThreadState::Prestart) => self.scheduler.make_ready(tid),
            _ => fatal_error(FatalReason::CorruptedState("timeout on unblocked thread")),
        }
    }

    /// Ticks since boot
    pub fn uptime_ticks(&self) -> u64 {
        self.clock.now_ticks()
    }

    /// How long the CPU may idle before the next deadline, capped by
    /// `idle_timeout_max`; None means nothing is scheduled
    pub fn next_timeout_expiry(&self) -> Option<u32> {
        self.timeouts.earliest_deadline(self.config.idle_timeout_max)
    }

    /// Ticks until a blocked thread's timeout fires
    pub fn timeout_remaining(&self, tid: ThreadId) -> Option<u32> {
        self.timeouts.remaining(thread_timeout(tid))
    }

    /// Queued timeout records
    pub fn timeout_queue_len(&self) -> usize {
        self.timeouts.len()
    }

    /// Snapshot of kernel counters
    pub fn stats(&self) -> KernelStats {
        KernelStats {
            uptime_ticks: self.clock.now_ticks(),
            context_switches: self.scheduler.context_switches as u64,
            active_threads: self.scheduler.active_thread_count(),
            ready_threads: self.scheduler.ready_queue().len(),
            queued_timeouts: self.timeouts.len(),
            wait_queues: self.wait_queues.allocated_count(),
        }
    }

    // ---------------------------------------------------------------------
    // Wait queues
    // ---------------------------------------------------------------------

    pub fn wait_queue_alloc(&mut self) -> KResult<WaitQueueId> {
        let _irq = IrqGuard::new();
        self.wait_queues.alloc()
    }

    pub fn wait_queue_free(&mut self, wq: WaitQueueId) -> KResult<()> {
        let _irq = IrqGuard::new();
        self.wait_queues.free(wq)
    }

    pub fn wait_queue_len(&self, wq: WaitQueueId) -> usize {
        self.wait_queues.len(wq)
    }

    pub fn wait_queue_head(&self, wq: WaitQueueId) -> Option<ThreadId> {
        self.wait_queues.head(wq)
    }

    /// The current thread, if it may block here
    fn blocking_caller(&self) -> KResult<ThreadId> {
        if self.in_isr() {
            log::warn!("blocking call from ISR context");
            return Err(KernelError::WouldBlock);
        }
        match self.current() {
            Some(cur) if cur != Scheduler::IDLE => Ok(cur),
            _ => {
                log::warn!("blocking call from idle or before start");
                Err(KernelError::WouldBlock)
            }
        }
    }

    /// Block the current thread on `wq` (or on time alone) and switch away
    ///
    /// `NoWait` never blocks and touches no queue.
    pub fn pend_current(&mut self, wq: Option<WaitQueueId>, timeout: Timeout) -> KResult<ThreadId> {
        if timeout.is_no_wait() {
            return Err(KernelError::WouldBlock);
        }
        let cur = self.blocking_caller()?;
        let _irq = IrqGuard::new();

        let t = self.scheduler.thread_mut(cur);
        t.swap = SwapData::Empty;
        t.state = match wq {
            Some(_) => ThreadState::Pending,
            None => ThreadState::Timing,
        };
        if let Some(wq) = wq {
            self.wait_queues.enqueue(wq, cur);
        }
        if let Timeout::Ticks(n) = timeout {
            self.timeouts
                .add(thread_timeout(cur), TimeoutOwner::Thread(cur), wq, n);
        }
        self.scheduler.swap_out();
        Ok(cur)
    }

    /// Take the longest waiter off `wq`, cancelling its timeout
    ///
    /// The thread is left PENDING; follow with [`ready_with`](Self::ready_with).
    pub fn unpend_first(&mut self, wq: WaitQueueId) -> Option<ThreadId> {
        let _irq = IrqGuard::new();
        let tid = self.wait_queues.dequeue_first(wq)?;
        let _ = self.timeouts.abort(thread_timeout(tid));
        Some(tid)
    }

    /// Deliver `swap` and make the thread ready (no reschedule)
    pub fn ready_with(&mut self, tid: ThreadId, swap: SwapData) {
        let _irq = IrqGuard::new();
        self.scheduler.thread_mut(tid).swap = swap;
        self.scheduler.make_ready(tid);
    }

    /// Hand `value` to the longest waiter on `wq` and reschedule
    pub fn wake_first(&mut self, wq: WaitQueueId, value: usize) -> Option<ThreadId> {
        let _irq = IrqGuard::new();
        let tid = self.unpend_first(wq)?;
        self.ready_with(tid, SwapData::Value(value));
        self.scheduler.reschedule();
        Some(tid)
    }

    /// Release every waiter on `wq` with the same result; returns how many
    pub fn unpend_all(&mut self, wq: WaitQueueId, swap: SwapData) -> usize {
        let _irq = IrqGuard::new();
        let mut n = 0;
        while let Some(tid) = self.unpend_first(wq) {
            self.ready_with(tid, swap);
            n += 1;
        }
        if n > 0 {
            self.scheduler.reschedule();
        }
        n
    }

    /// Collect the result of a call that returned `Pended`
    ///
    /// None while the thread is still blocked or suspended. The slot is
    /// consumed.
    pub fn swap_result(&mut self, tid: ThreadId) -> Option<KResult<usize>> {
        let t = self.scheduler.get(tid).ok()?;
        if t.state.is_blocked() || t.state == ThreadState::Suspended {
            return None;
        }
        let swap = core::mem::take(&mut self.scheduler.thread_mut(tid).swap);
        match swap {
            SwapData::Empty => None,
            SwapData::Value(v) => Some(Ok(v)),
            SwapData::TimedOut => Some(Err(KernelError::Timeout)),
        }
    }

    // ---------------------------------------------------------------------
    // Timers
    // ---------------------------------------------------------------------

    /// Claim a timer slot with optional expiry and stop callbacks
    pub fn timer_init(&mut self, expiry: Option<TimerFn>, stop: Option<TimerFn>) -> KResult<TimerId> {
        let _irq = IrqGuard::new();
        let idx = self
            .timers
            .iter()
            .position(|t| !t.in_use)
            .ok_or(KernelError::NoResources)?;
        let wq = self.wait_queues.alloc()?;
        self.timers[idx] = Timer {
            expiry_fn: expiry,
            stop_fn: stop,
            period: 0,
            status: 0,
            wait_q: Some(wq),
            in_use: true,
        };
        Ok(TimerId(idx))
    }

    fn timer(&self, id: TimerId) -> KResult<&Timer> {
        match self.timers.get(id.0) {
            Some(t) if t.in_use => Ok(t),
            _ => Err(KernelError::InvalidArgument),
        }
    }

    /// (Re)start a timer: first expiry after `duration`, then every `period` ticks
    pub fn timer_start(&mut self, id: TimerId, duration: Timeout, period: u32) -> KResult<()> {
        let _irq = IrqGuard::new();
        self.timer(id)?;
        let rec = timer_timeout(id);
        let _ = self.timeouts.abort(rec);
        let t = &mut self.timers[id.0];
        t.period = period;
        t.status = 0;
        match duration {
            Timeout::Forever => {}
            d => self
                .timeouts
                .add(rec, TimeoutOwner::Timer(id), None, d.ticks()),
        }
        Ok(())
    }

    /// Stop a running timer; runs its stop callback and releases a
    /// `timer_status_sync` waiter with status 0
    pub fn timer_stop(&mut self, id: TimerId) -> KResult<()> {
        let _irq = IrqGuard::new();
        let t = *self.timer(id)?;
        if self.timeouts.abort(timer_timeout(id)).is_err() {
            return Ok(());
        }
        if let Some(f) = t.stop_fn {
            f(id);
        }
        if let Some(wq) = t.wait_q {
            self.wake_first(wq, 0);
        }
        Ok(())
    }

    /// Expiries since the last read; resets the count
    pub fn timer_status_get(&mut self, id: TimerId) -> KResult<u32> {
        let _irq = IrqGuard::new();
        self.timer(id)?;
        Ok(core::mem::take(&mut self.timers[id.0].status))
    }

    /// Wait for the next expiry (or stop) of a timer
    ///
    /// Completes immediately with the pending count if it already expired,
    /// or with 0 if it is not running.
    pub fn timer_status_sync(&mut self, id: TimerId) -> KResult<Blocking<u32>> {
        let _irq = IrqGuard::new();
        let t = *self.timer(id)?;
        if t.status > 0 || !self.timeouts.is_queued(timer_timeout(id)) {
            self.timers[id.0].status = 0;
            return Ok(Blocking::Done(t.status));
        }
        let wq = t.wait_q.ok_or(KernelError::InvalidArgument)?;
        self.pend_current(Some(wq), Timeout::Forever)
            .map(Blocking::Pended)
    }

    /// Ticks until the timer's next expiry
    pub fn timer_remaining(&self, id: TimerId) -> Option<u32> {
        self.timeouts.remaining(timer_timeout(id))
    }

    fn timer_expired(&mut self, id: TimerId) {
        let t = self.timers[id.0];
        if t.period > 0 {
            self.timeouts
                .add(timer_timeout(id), TimeoutOwner::Timer(id), None, t.period);
        }
        self.timers[id.0].status = t.status.saturating_add(1);
        if let Some(f) = t.expiry_fn {
            f(id);
        }
        if let Some(wq) = t.wait_q {
            if let Some(tid) = self.unpend_first(wq) {
                let status = core::mem::take(&mut self.timers[id.0].status);
                self.ready_with(tid, SwapData::Value(status as usize));
            }
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

/// Kernel statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelStats {
    /// Ticks since boot
    pub uptime_ticks: u64,
    /// Context switches
    pub context_switches: u64,
    /// Live threads, idle included
    pub active_threads: usize,
    /// Threads on the ready queue
    pub ready_threads: usize,
    /// Pending timeout records
    pub queued_timeouts: usize,
    /// Wait queues handed out
    pub wait_queues: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    fn spawn(k: &mut Kernel, name: &[u8], prio: i8) -> ThreadId {
        k.thread_create(name, None, 0, Priority(prio), ThreadOptions::empty(), Timeout::NoWait)
            .unwrap()
    }

    /// Current thread blocks on `wq`, asserting it was switched out
    fn block_on(k: &mut Kernel, wq: WaitQueueId, timeout: Timeout) -> ThreadId {
        let cur = k.current().unwrap();
        let tid = k.pend_current(Some(wq), timeout).unwrap();
        assert_eq!(tid, cur);
        assert_ne!(k.current(), Some(cur));
        tid
    }

    #[test]
    fn test_kernel_creation() {
        let k = Kernel::new();
        assert_eq!(k.scheduler.active_thread_count(), 1);
        assert_eq!(k.current(), None);
        assert_eq!(k.timeout_queue_len(), 0);
    }

    #[test]
    fn test_start_dispatches_highest() {
        let mut k = Kernel::new();
        let b = spawn(&mut k, b"b", 5);
        let a = spawn(&mut k, b"a", 2);
        k.start();
        assert_eq!(k.current(), Some(a));
        assert_eq!(k.thread_state(b), Ok(ThreadState::Ready));
    }

    #[test]
    fn test_create_while_running_preempts() {
        let mut k = Kernel::new();
        let low = spawn(&mut k, b"low", 8);
        k.start();
        let hi = spawn(&mut k, b"hi", 1);
        assert_eq!(k.current(), Some(hi));
        assert_eq!(k.thread_state(low), Ok(ThreadState::Ready));
    }

    #[test]
    #[should_panic(expected = "invalid thread priority")]
    fn test_idle_priority_rejected() {
        let mut k = Kernel::new();
        let _ = k.thread_create(b"bad", None, 0, Priority::IDLE, ThreadOptions::empty(), Timeout::NoWait);
    }

    #[test]
    fn test_delayed_start() {
        let mut k = Kernel::new();
        k.start();
        let t = k
            .thread_create(b"late", None, 0, Priority(3), ThreadOptions::empty(), Timeout::Ticks(5))
            .unwrap();
        assert_eq!(k.thread_state(t), Ok(ThreadState::Prestart));
        k.announce_ticks(4);
        assert_eq!(k.thread_state(t), Ok(ThreadState::Prestart));
        k.announce_ticks(1);
        assert_eq!(k.current(), Some(t));
    }

    #[test]
    fn test_forever_delay_needs_start() {
        let mut k = Kernel::new();
        k.start();
        let t = k
            .thread_create(b"held", None, 0, Priority(3), ThreadOptions::empty(), Timeout::Forever)
            .unwrap();
        k.announce_ticks(100);
        assert_eq!(k.thread_state(t), Ok(ThreadState::Prestart));
        k.thread_start(t).unwrap();
        assert_eq!(k.current(), Some(t));
    }

    #[test]
    fn test_sleep_and_timeout() {
        let mut k = Kernel::new();
        let a = spawn(&mut k, b"a", 3);
        k.start();
        assert_eq!(k.sleep(Timeout::Ticks(10)), Ok(Blocking::Pended(a)));
        assert_eq!(k.thread_state(a), Ok(ThreadState::Timing));
        assert_eq!(k.current(), Some(Scheduler::IDLE));
        k.announce_ticks(9);
        assert_eq!(k.swap_result(a), None);
        k.announce_ticks(1);
        assert_eq!(k.current(), Some(a));
        assert_eq!(k.swap_result(a), Some(Ok(0)));
    }

    #[test]
    fn test_wakeup_reports_remaining() {
        let mut k = Kernel::new();
        let a = spawn(&mut k, b"a", 3);
        k.start();
        let _ = k.sleep(Timeout::Ticks(20)).unwrap();
        k.announce_ticks(5);
        k.wakeup(a).unwrap();
        assert_eq!(k.current(), Some(a));
        assert_eq!(k.swap_result(a), Some(Ok(15)));
        assert_eq!(k.timeout_queue_len(), 0);
    }

    #[test]
    fn test_sleep_no_wait_yields() {
        let mut k = Kernel::new();
        let a = spawn(&mut k, b"a", 3);
        let b = spawn(&mut k, b"b", 3);
        k.start();
        assert_eq!(k.sleep(Timeout::NoWait), Ok(Blocking::Done(0)));
        assert_eq!(k.current(), Some(b));
        assert_eq!(k.thread_state(a), Ok(ThreadState::Ready));
    }

    #[test]
    fn test_sleep_forever_suspends() {
        let mut k = Kernel::new();
        let a = spawn(&mut k, b"a", 3);
        k.start();
        assert!(k.sleep(Timeout::Forever).unwrap().is_pended());
        assert_eq!(k.thread_state(a), Ok(ThreadState::Suspended));
        assert_eq!(k.swap_result(a), None);
        k.resume(a).unwrap();
        assert_eq!(k.current(), Some(a));
        assert_eq!(k.swap_result(a), Some(Ok(u32::MAX as usize)));
    }

    #[test]
    fn test_resume_unstarted_thread_stays_prestart() {
        let mut k = Kernel::new();
        k.start();
        let t = k
            .thread_create(b"held", None, 0, Priority(3), ThreadOptions::empty(), Timeout::Forever)
            .unwrap();
        k.suspend(t).unwrap();
        k.resume(t).unwrap();
        assert_eq!(k.thread_state(t), Ok(ThreadState::Prestart));
        assert_eq!(k.current(), Some(Scheduler::IDLE));
        k.thread_start(t).unwrap();
        assert_eq!(k.current(), Some(t));
    }

    #[test]
    fn test_resume_keeps_remaining_start_delay() {
        let mut k = Kernel::new();
        k.start();
        let t = k
            .thread_create(b"late", None, 0, Priority(3), ThreadOptions::empty(), Timeout::Ticks(10))
            .unwrap();
        k.announce_ticks(4);
        k.suspend(t).unwrap();
        assert_eq!(k.timeout_queue_len(), 0);
        k.announce_ticks(20);
        k.resume(t).unwrap();
        assert_eq!(k.thread_state(t), Ok(ThreadState::Prestart));
        assert_eq!(k.timeout_remaining(t), Some(6));
        k.announce_ticks(5);
        assert_eq!(k.thread_state(t), Ok(ThreadState::Prestart));
        k.announce_ticks(1);
        assert_eq!(k.current(), Some(t));
    }

    #[test]
    fn test_suspend_idle_rejected() {
        let mut k = Kernel::new();
        k.start();
        assert_eq!(k.suspend(Scheduler::IDLE), Err(KernelError::InvalidThread));
        assert_eq!(k.current(), Some(Scheduler::IDLE));
    }

    #[test]
    fn test_suspend_resume_ready_thread() {
        let mut k = Kernel::new();
        let a = spawn(&mut k, b"a", 5);
        k.start();
        let b = spawn(&mut k, b"b", 6);
        k.suspend(b).unwrap();
        assert_eq!(k.thread_state(b), Ok(ThreadState::Suspended));
        k.exit().unwrap();
        assert_eq!(k.thread_state(a), Ok(ThreadState::Dead));
        assert_eq!(k.current(), Some(Scheduler::IDLE));
        k.resume(b).unwrap();
        assert_eq!(k.current(), Some(b));
    }

    #[test]
    fn test_suspend_pending_cancels_wait() {
        let mut k = Kernel::new();
        let wq = k.wait_queue_alloc().unwrap();
        let a = spawn(&mut k, b"a", 3);
        k.start();
        block_on(&mut k, wq, Timeout::Ticks(40));
        k.suspend(a).unwrap();
        assert_eq!(k.wait_queue_len(wq), 0);
        assert_eq!(k.timeout_queue_len(), 0);
        k.resume(a).unwrap();
        assert_eq!(k.swap_result(a), Some(Err(KernelError::Timeout)));
    }

    #[test]
    fn test_abort_removes_from_all_queues() {
        let mut k = Kernel::new();
        let wq = k.wait_queue_alloc().unwrap();
        let a = spawn(&mut k, b"a", 3);
        k.start();
        block_on(&mut k, wq, Timeout::Ticks(40));
        k.abort(a).unwrap();
        assert_eq!(k.thread_state(a), Ok(ThreadState::Dead));
        assert_eq!(k.wait_queue_len(wq), 0);
        assert_eq!(k.timeout_queue_len(), 0);
        assert_eq!(k.abort(a), Ok(()));
        k.thread_reap(a).unwrap();
        assert_eq!(k.thread(a).err(), Some(KernelError::InvalidThread));
    }

    #[test]
    #[should_panic(expected = "essential thread exited")]
    fn test_essential_abort_is_fatal() {
        let mut k = Kernel::new();
        let t = k
            .thread_create(b"main", None, 0, Priority(0), ThreadOptions::ESSENTIAL, Timeout::NoWait)
            .unwrap();
        let _ = k.abort(t);
    }

    #[test]
    fn test_priority_set_preempts() {
        let mut k = Kernel::new();
        let a = spawn(&mut k, b"a", 4);
        let b = spawn(&mut k, b"b", 6);
        k.start();
        assert_eq!(k.current(), Some(a));
        k.priority_set(b, Priority(2)).unwrap();
        assert_eq!(k.current(), Some(b));
        k.priority_set(b, Priority(9)).unwrap();
        assert_eq!(k.current(), Some(a));
    }

    #[test]
    fn test_pend_no_wait_touches_nothing() {
        let mut k = Kernel::new();
        let wq = k.wait_queue_alloc().unwrap();
        let a = spawn(&mut k, b"a", 3);
        k.start();
        assert_eq!(k.pend_current(Some(wq), Timeout::NoWait), Err(KernelError::WouldBlock));
        assert_eq!(k.current(), Some(a));
        assert_eq!(k.wait_queue_len(wq), 0);
        assert_eq!(k.timeout_queue_len(), 0);
    }

    #[test]
    fn test_pend_from_isr_refused() {
        let mut k = Kernel::new();
        let wq = k.wait_queue_alloc().unwrap();
        spawn(&mut k, b"a", 3);
        k.start();
        k.isr_enter();
        assert_eq!(k.pend_current(Some(wq), Timeout::Forever), Err(KernelError::WouldBlock));
        k.isr_exit();
        assert_eq!(k.wait_queue_len(wq), 0);
    }

    #[test]
    fn test_pend_from_idle_refused() {
        let mut k = Kernel::new();
        let wq = k.wait_queue_alloc().unwrap();
        k.start();
        assert_eq!(k.pend_current(Some(wq), Timeout::Ticks(3)), Err(KernelError::WouldBlock));
    }

    #[test]
    fn test_fifo_wake_order_equal_priority() {
        let mut k = Kernel::new();
        let wq = k.wait_queue_alloc().unwrap();
        let ids: [ThreadId; 4] = core::array::from_fn(|_| spawn(&mut k, b"w", 3));
        k.start();
        for &id in &ids {
            assert_eq!(block_on(&mut k, wq, Timeout::Forever), id);
        }
        for (n, &id) in ids.iter().enumerate() {
            assert_eq!(k.wake_first(wq, n), Some(id));
        }
        for (n, &id) in ids.iter().enumerate() {
            assert_eq!(k.swap_result(id), Some(Ok(n)));
        }
    }

    #[test]
    fn test_pended_timeout_unlinks_waiter() {
        let mut k = Kernel::new();
        let wq = k.wait_queue_alloc().unwrap();
        let a = spawn(&mut k, b"a", 3);
        let b = spawn(&mut k, b"b", 3);
        k.start();
        block_on(&mut k, wq, Timeout::Ticks(5));
        block_on(&mut k, wq, Timeout::Forever);
        k.announce_ticks(5);
        assert_eq!(k.swap_result(a), Some(Err(KernelError::Timeout)));
        assert_eq!(k.wait_queue_head(wq), Some(b));
        assert_eq!(k.wait_queue_len(wq), 1);
    }

    #[test]
    fn test_wake_from_isr_preempts_on_exit() {
        let mut k = Kernel::new();
        let wq = k.wait_queue_alloc().unwrap();
        let hi = spawn(&mut k, b"hi", 1);
        let lo = spawn(&mut k, b"lo", 7);
        k.start();
        block_on(&mut k, wq, Timeout::Forever);
        assert_eq!(k.current(), Some(lo));
        k.isr_enter();
        k.wake_first(wq, 42);
        assert_eq!(k.current(), Some(lo));
        k.isr_exit();
        assert_eq!(k.current(), Some(hi));
        assert_eq!(k.swap_result(hi), Some(Ok(42)));
    }

    #[test]
    fn test_unpend_all() {
        let mut k = Kernel::new();
        let wq = k.wait_queue_alloc().unwrap();
        let a = spawn(&mut k, b"a", 3);
        let b = spawn(&mut k, b"b", 3);
        k.start();
        block_on(&mut k, wq, Timeout::Ticks(10));
        block_on(&mut k, wq, Timeout::Forever);
        assert_eq!(k.unpend_all(wq, SwapData::TimedOut), 2);
        assert_eq!(k.timeout_queue_len(), 0);
        assert_eq!(k.swap_result(a), Some(Err(KernelError::Timeout)));
        assert_eq!(k.swap_result(b), Some(Err(KernelError::Timeout)));
    }

    #[test]
    fn test_thread_in_one_queue_at_a_time() {
        let mut k = Kernel::new();
        let wq = k.wait_queue_alloc().unwrap();
        let a = spawn(&mut k, b"a", 3);
        k.start();
        block_on(&mut k, wq, Timeout::Ticks(8));
        assert!(!k.scheduler.ready_queue().contains(a));
        assert!(k.timeout_remaining(a).is_some());
        k.wake_first(wq, 1);
        assert!(k.timeout_remaining(a).is_none());
        assert_eq!(k.wait_queue_len(wq), 0);
        assert_eq!(k.current(), Some(a));
    }

    #[test]
    fn test_next_timeout_expiry() {
        let mut k = Kernel::with_config(KernelConfig::new().idle_timeout_max(25));
        let a = spawn(&mut k, b"a", 3);
        k.start();
        assert_eq!(k.next_timeout_expiry(), Some(25));
        let _ = k.sleep(Timeout::Ticks(10)).unwrap();
        assert_eq!(k.next_timeout_expiry(), Some(10));
        k.announce_ticks(4);
        assert_eq!(k.next_timeout_expiry(), Some(6));
        assert_eq!(k.timeout_remaining(a), Some(6));
        assert_eq!(k.uptime_ticks(), 4);
    }

    #[test]
    fn test_stats() {
        let mut k = Kernel::new();
        let _wq = k.wait_queue_alloc().unwrap();
        spawn(&mut k, b"a", 3);
        spawn(&mut k, b"b", 4);
        k.start();
        let _ = k.sleep(Timeout::Ticks(5)).unwrap();
        k.announce_ticks(2);
        let stats = k.stats();
        assert_eq!(stats.uptime_ticks, 2);
        assert_eq!(stats.context_switches, 2);
        assert_eq!(stats.active_threads, 3);
        assert_eq!(stats.ready_threads, 1);
        assert_eq!(stats.queued_timeouts, 1);
        assert_eq!(stats.wait_queues, 1);
    }

    #[test]
    fn test_periodic_timer() {
        static FIRED: AtomicU32 = AtomicU32::new(0);
        fn on_expiry(_id: TimerId) {
            FIRED.fetch_add(1, Ordering::Relaxed);
        }
        let mut k = Kernel::new();
        k.start();
        let t = k.timer_init(Some(on_expiry), None).unwrap();
        k.timer_start(t, Timeout::Ticks(5), 3).unwrap();
        k.announce_ticks(4);
        assert_eq!(k.timer_status_get(t), Ok(0));
        k.announce_ticks(1);
        assert_eq!(k.timer_status_get(t), Ok(1));
        k.announce_ticks(7);
        assert_eq!(k.timer_status_get(t), Ok(2));
        assert_eq!(k.timer_remaining(t), Some(2));
        assert_eq!(FIRED.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_one_shot_timer_and_stop() {
        static STOPPED: AtomicU32 = AtomicU32::new(0);
        fn on_stop(_id: TimerId) {
            STOPPED.fetch_add(1, Ordering::Relaxed);
        }
        let mut k = Kernel::new();
        k.start();
        let t = k.timer_init(None, Some(on_stop)).unwrap();
        k.timer_start(t, Timeout::Ticks(2), 0).unwrap();
        k.announce_ticks(10);
        assert_eq!(k.timer_status_get(t), Ok(1));
        assert_eq!(k.timer_remaining(t), None);
        k.timer_stop(t).unwrap();
        assert_eq!(STOPPED.load(Ordering::Relaxed), 0);
        k.timer_start(t, Timeout::Ticks(9), 0).unwrap();
        k.timer_stop(t).unwrap();
        assert_eq!(STOPPED.load(Ordering::Relaxed), 1);
        assert_eq!(k.timeout_queue_len(), 0);
    }

    #[test]
    fn test_timer_status_saturates() {
        let mut k = Kernel::new();
        k.start();
        let t = k.timer_init(None, None).unwrap();
        k.timers[t.0].status = u32::MAX - 1;
        k.timer_start(t, Timeout::Ticks(1), 1).unwrap();
        k.timers[t.0].status = u32::MAX - 1;
        k.announce_ticks(3);
        assert_eq!(k.timer_status_get(t), Ok(u32::MAX));
    }

    #[test]
    fn test_timer_status_sync() {
        let mut k = Kernel::new();
        let a = spawn(&mut k, b"a", 3);
        k.start();
        let t = k.timer_init(None, None).unwrap();
        assert_eq!(k.timer_status_sync(t), Ok(Blocking::Done(0)));
        k.timer_start(t, Timeout::Ticks(6), 0).unwrap();
        assert_eq!(k.timer_status_sync(t), Ok(Blocking::Pended(a)));
        k.announce_ticks(6);
        assert_eq!(k.current(), Some(a));
        assert_eq!(k.swap_result(a), Some(Ok(1)));
    }

    #[test]
    fn test_timer_stop_releases_sync_waiter() {
        let mut k = Kernel::new();
        let a = spawn(&mut k, b"a", 3);
        k.start();
        let t = k.timer_init(None, None).unwrap();
        k.timer_start(t, Timeout::Ticks(50), 0).unwrap();
        let _ = k.timer_status_sync(t).unwrap();
        k.timer_stop(t).unwrap();
        assert_eq!(k.swap_result(a), Some(Ok(0)));
    }
}
