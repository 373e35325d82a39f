//! Non-recursive kernel mutex
//!
//! Unlock hands ownership straight to the longest waiter. There is no
//! priority inheritance: a low-priority owner keeps its priority while a
//! higher-priority thread waits.
//!
//! Author: Moroya Sakamoto

use crate::error::{KResult, KernelError};
use crate::irq::{IrqGuard, SpinLock};
use crate::kernel::{Blocking, Kernel};
use crate::task::ThreadId;
use crate::timeout::Timeout;
use crate::wait_queue::WaitQueueId;

pub struct Mutex {
    owner: SpinLock<Option<ThreadId>>,
    wait_q: WaitQueueId,
}

impl Mutex {
    pub fn new(k: &mut Kernel) -> KResult<Self> {
        Ok(Self {
            owner: SpinLock::new(None),
            wait_q: k.wait_queue_alloc()?,
        })
    }

    /// Lock for the current thread
    ///
    /// Locking a mutex the caller already owns is `Deadlock`. An ISR has
    /// no thread to own the mutex and gets `WouldBlock`.
    pub fn lock(&self, k: &mut Kernel, timeout: Timeout) -> KResult<Blocking<()>> {
        if k.in_isr() {
            return Err(KernelError::WouldBlock);
        }
        let cur = k.current().ok_or(KernelError::WouldBlock)?;
        let _irq = IrqGuard::new();
        {
            let mut owner = self.owner.lock();
            match *owner {
                None => {
                    *owner = Some(cur);
                    return Ok(Blocking::Done(()));
                }
                Some(o) if o == cur => return Err(KernelError::Deadlock),
                Some(_) => {}
            }
        }
        super::pend(k, self.wait_q, timeout)
    }

    /// Unlock; the next waiter (if any) becomes owner and is readied
    ///
    /// Only the owning thread may unlock, never an ISR.
    pub fn unlock(&self, k: &mut Kernel) -> KResult<()> {
        if k.in_isr() {
            return Err(KernelError::NotOwner);
        }
        let _irq = IrqGuard::new();
        let next = {
            let mut owner = self.owner.lock();
            if owner.is_none() || *owner != k.current() {
                return Err(KernelError::NotOwner);
            }
            *owner = k.wait_queue_head(self.wait_q);
            *owner
        };
        if let Some(tid) = next {
            log::trace!("mutex handed to {:?}", tid);
            k.wake_first(self.wait_q, 0);
        }
        Ok(())
    }

    pub fn owner(&self) -> Option<ThreadId> {
        *self.owner.lock()
    }

    pub fn is_locked(&self) -> bool {
        self.owner().is_some()
    }

    /// Return the wait queue to the kernel; `Busy` while threads wait
    pub fn cleanup(self, k: &mut Kernel) -> Result<(), (Self, KernelError)> {
        let wq = self.wait_q;
        super::release(k, wq, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Blocking::{Done, Pended};
    use crate::sync::testing::spawn;

    #[test]
    fn test_lock_unlock() {
        let mut k = Kernel::new();
        let m = Mutex::new(&mut k).unwrap();
        let a = spawn(&mut k, b"a", 3);
        k.start();
        assert_eq!(m.lock(&mut k, Timeout::NoWait), Ok(Done(())));
        assert_eq!(m.owner(), Some(a));
        m.unlock(&mut k).unwrap();
        assert!(!m.is_locked());
    }

    #[test]
    fn test_relock_by_owner_is_deadlock() {
        let mut k = Kernel::new();
        let m = Mutex::new(&mut k).unwrap();
        spawn(&mut k, b"a", 3);
        k.start();
        let _ = m.lock(&mut k, Timeout::Forever).unwrap();
        assert_eq!(m.lock(&mut k, Timeout::Forever), Err(KernelError::Deadlock));
    }

    #[test]
    fn test_unlock_by_non_owner() {
        let mut k = Kernel::new();
        let m = Mutex::new(&mut k).unwrap();
        let lo = spawn(&mut k, b"lo", 6);
        k.start();
        let _ = m.lock(&mut k, Timeout::Forever).unwrap();
        spawn(&mut k, b"hi", 2);
        assert_ne!(k.current(), Some(lo));
        assert_eq!(m.unlock(&mut k), Err(KernelError::NotOwner));
        assert_eq!(m.owner(), Some(lo));
    }

    #[test]
    fn test_unlock_hands_off_to_waiter() {
        let mut k = Kernel::new();
        let m = Mutex::new(&mut k).unwrap();
        let lo = spawn(&mut k, b"lo", 6);
        k.start();
        let _ = m.lock(&mut k, Timeout::Forever).unwrap();
        let hi = spawn(&mut k, b"hi", 2);
        assert_eq!(m.lock(&mut k, Timeout::Forever), Ok(Pended(hi)));
        assert_eq!(k.current(), Some(lo));
        m.unlock(&mut k).unwrap();
        assert_eq!(m.owner(), Some(hi));
        assert_eq!(k.current(), Some(hi));
        assert_eq!(k.swap_result(hi), Some(Ok(0)));
    }

    #[test]
    fn test_isr_cannot_lock() {
        let mut k = Kernel::new();
        let m = Mutex::new(&mut k).unwrap();
        spawn(&mut k, b"a", 3);
        k.start();
        k.isr_enter();
        assert_eq!(m.lock(&mut k, Timeout::NoWait), Err(KernelError::WouldBlock));
        k.isr_exit();
        assert_eq!(m.owner(), None);
    }

    #[test]
    fn test_isr_cannot_unlock() {
        let mut k = Kernel::new();
        let m = Mutex::new(&mut k).unwrap();
        let a = spawn(&mut k, b"a", 3);
        k.start();
        let _ = m.lock(&mut k, Timeout::NoWait).unwrap();
        k.isr_enter();
        assert_eq!(m.unlock(&mut k), Err(KernelError::NotOwner));
        k.isr_exit();
        assert_eq!(m.owner(), Some(a));
    }

    #[test]
    fn test_cleanup() {
        let mut k = Kernel::new();
        let m = Mutex::new(&mut k).unwrap();
        assert!(m.cleanup(&mut k).is_ok());
        assert_eq!(k.stats().wait_queues, 0);
    }

    #[test]
    fn test_lock_timeout_keeps_owner() {
        let mut k = Kernel::new();
        let m = Mutex::new(&mut k).unwrap();
        let lo = spawn(&mut k, b"lo", 6);
        k.start();
        let _ = m.lock(&mut k, Timeout::Forever).unwrap();
        let hi = spawn(&mut k, b"hi", 2);
        let _ = m.lock(&mut k, Timeout::Ticks(5)).unwrap();
        k.announce_ticks(5);
        assert_eq!(k.swap_result(hi), Some(Err(KernelError::Timeout)));
        assert_eq!(m.owner(), Some(lo));
    }
}
