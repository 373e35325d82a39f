//! Bounded LIFO stack of machine words
//!
//! Author: Moroya Sakamoto

use crate::error::{KResult, KernelError};
use crate::irq::{IrqGuard, SpinLock};
use crate::kernel::{Blocking, Kernel};
use crate::timeout::Timeout;
use crate::wait_queue::WaitQueueId;

struct Slots<const N: usize> {
    items: [usize; N],
    len: usize,
}

/// Fixed-capacity stack; `pop` may block until a `push`
pub struct Stack<const N: usize> {
    slots: SpinLock<Slots<N>>,
    wait_q: WaitQueueId,
}

impl<const N: usize> Stack<N> {
    /// Create an empty stack, claiming a kernel wait queue
    pub fn new(k: &mut Kernel) -> KResult<Self> {
        Ok(Self {
            slots: SpinLock::new(Slots {
                items: [0; N],
                len: 0,
            }),
            wait_q: k.wait_queue_alloc()?,
        })
    }

    /// Push a value, or hand it straight to the longest waiter
    ///
    /// Fails with `NoSpace` when full and nobody waits. Safe from ISRs.
    pub fn push(&self, k: &mut Kernel, value: usize) -> KResult<()> {
        let _irq = IrqGuard::new();
        if let Some(tid) = k.wake_first(self.wait_q, value) {
            log::trace!("stack push handed to {:?}", tid);
            return Ok(());
        }
        let mut guard = self.slots.lock();
        let s = &mut *guard;
        if s.len == N {
            return Err(KernelError::NoSpace);
        }
        s.items[s.len] = value;
        s.len += 1;
        Ok(())
    }

    /// Pop the most recently pushed value, waiting up to `timeout`
    pub fn pop(&self, k: &mut Kernel, timeout: Timeout) -> KResult<Blocking<usize>> {
        let _irq = IrqGuard::new();
        {
            let mut guard = self.slots.lock();
            let s = &mut *guard;
            if s.len > 0 {
                s.len -= 1;
                return Ok(Blocking::Done(s.items[s.len]));
            }
        }
        super::pend(k, self.wait_q, timeout)
    }

    /// A pop would succeed without blocking
    pub fn is_ready(&self) -> bool {
        self.len() > 0
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        N
    }

    /// Return the wait queue to the kernel; `Busy` while threads wait
    pub fn cleanup(self, k: &mut Kernel) -> Result<(), (Self, KernelError)> {
        let wq = self.wait_q;
        super::release(k, wq, self)
    }
}
