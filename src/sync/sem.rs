//! Counting semaphore
//!
//! Author: Moroya Sakamoto

use crate::error::{KResult, KernelError};
use crate::irq::{IrqGuard, SpinLock};
use crate::kernel::{Blocking, Kernel};
use crate::task::SwapData;
use crate::timeout::Timeout;
use crate::wait_queue::WaitQueueId;

/// Counting semaphore with an upper limit
pub struct Semaphore {
    count: SpinLock<u32>,
    limit: u32,
    wait_q: WaitQueueId,
}

impl Semaphore {
    /// `limit` must be non-zero and `initial` at most `limit`
    pub fn new(k: &mut Kernel, initial: u32, limit: u32) -> KResult<Self> {
        if limit == 0 || initial > limit {
            return Err(KernelError::InvalidArgument);
        }
        Ok(Self {
            count: SpinLock::new(initial),
            limit,
            wait_q: k.wait_queue_alloc()?,
        })
    }

    /// Release one unit; a waiter takes it directly
    pub fn give(&self, k: &mut Kernel) -> KResult<()> {
        let _irq = IrqGuard::new();
        if k.wake_first(self.wait_q, 0).is_some() {
            return Ok(());
        }
        let mut count = self.count.lock();
        if *count >= self.limit {
            return Err(KernelError::NoSpace);
        }
        *count += 1;
        Ok(())
    }

    /// Acquire one unit, waiting up to `timeout`
    pub fn take(&self, k: &mut Kernel, timeout: Timeout) -> KResult<Blocking<()>> {
        let _irq = IrqGuard::new();
        {
            let mut count = self.count.lock();
            if *count > 0 {
                *count -= 1;
                return Ok(Blocking::Done(()));
            }
        }
        super::pend(k, self.wait_q, timeout)
    }

    /// Zero the count; every waiter's take completes with `Timeout`
    pub fn reset(&self, k: &mut Kernel) -> usize {
        let _irq = IrqGuard::new();
        *self.count.lock() = 0;
        k.unpend_all(self.wait_q, SwapData::TimedOut)
    }

    pub fn count(&self) -> u32 {
        *self.count.lock()
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Return the wait queue to the kernel; `Busy` while threads wait
    pub fn cleanup(self, k: &mut Kernel) -> Result<(), (Self, KernelError)> {
        let wq = self.wait_q;
        super::release(k, wq, self)
    }
}
