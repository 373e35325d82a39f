//! Bounded FIFO of machine words
//!
//! The payload is a fixed ring indexed by read/write positions, no heap.
//! Unlike a lock-free SPSC ring it may have any number of producers and
//! consumers: the ring sits behind the object spinlock, and an empty ring
//! can block its reader.
//!
//! Author: Moroya Sakamoto

use crate::error::{KResult, KernelError};
use crate::irq::{IrqGuard, SpinLock};
use crate::kernel::{Blocking, Kernel};
use crate::timeout::Timeout;
use crate::wait_queue::WaitQueueId;

/// Ring storage; all `N` slots are usable
struct Ring<const N: usize> {
    buffer: [usize; N],
    /// Next slot to write
    write_idx: usize,
    /// Next slot to read
    read_idx: usize,
    len: usize,
}

impl<const N: usize> Ring<N> {
    const fn new() -> Self {
        Self {
            buffer: [0; N],
            write_idx: 0,
            read_idx: 0,
            len: 0,
        }
    }

    fn push(&mut self, value: usize) -> bool {
        if self.len == N {
            return false;
        }
        self.buffer[self.write_idx] = value;
        self.write_idx = (self.write_idx + 1) % N;
        self.len += 1;
        true
    }

    fn pop(&mut self) -> Option<usize> {
        if self.len == 0 {
            return None;
        }
        let value = self.buffer[self.read_idx];
        self.read_idx = (self.read_idx + 1) % N;
        self.len -= 1;
        Some(value)
    }
}

/// Bounded first-in first-out queue; `get` may block until a `put`
pub struct Fifo<const N: usize> {
    ring: SpinLock<Ring<N>>,
    wait_q: WaitQueueId,
}

impl<const N: usize> Fifo<N> {
    pub fn new(k: &mut Kernel) -> KResult<Self> {
        Ok(Self {
            ring: SpinLock::new(Ring::new()),
            wait_q: k.wait_queue_alloc()?,
        })
    }

    /// Append a value, or hand it to the longest waiter
    ///
    /// Fails with `NoSpace` when full and nobody waits.
    pub fn put(&self, k: &mut Kernel, value: usize) -> KResult<()> {
        let _irq = IrqGuard::new();
        if k.wake_first(self.wait_q, value).is_some() {
            return Ok(());
        }
        if self.ring.lock().push(value) {
            Ok(())
        } else {
            Err(KernelError::NoSpace)
        }
    }

    /// Remove the oldest value, waiting up to `timeout`
    pub fn get(&self, k: &mut Kernel, timeout: Timeout) -> KResult<Blocking<usize>> {
        let _irq = IrqGuard::new();
        if let Some(v) = self.ring.lock().pop() {
            return Ok(Blocking::Done(v));
        }
        super::pend(k, self.wait_q, timeout)
    }

    /// A get would succeed without blocking
    pub fn is_ready(&self) -> bool {
        self.len() > 0
    }

    pub fn len(&self) -> usize {
        self.ring.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == N
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Blocking::{Done, Pended};
    use crate::sync::testing::spawn;

    #[test]
    fn test_put_get_order() {
        let mut k = Kernel::new();
        let f = Fifo::<8>::new(&mut k).unwrap();
        assert!(f.is_empty());
        f.put(&mut k, 42).unwrap();
        f.put(&mut k, 43).unwrap();
        assert_eq!(f.len(), 2);
        assert_eq!(f.get(&mut k, Timeout::NoWait), Ok(Done(42)));
        assert_eq!(f.get(&mut k, Timeout::NoWait), Ok(Done(43)));
        assert!(!f.is_ready());
    }

    #[test]
    fn test_full() {
        let mut k = Kernel::new();
        let f = Fifo::<4>::new(&mut k).unwrap();
        for i in 0..4 {
            f.put(&mut k, i).unwrap();
        }
        assert!(f.is_full());
        assert_eq!(f.put(&mut k, 99), Err(KernelError::NoSpace));
        assert_eq!(f.capacity(), 4);
    }

    #[test]
    fn test_wraparound() {
        let mut k = Kernel::new();
        let f = Fifo::<4>::new(&mut k).unwrap();
        for round in 0..10 {
            f.put(&mut k, round).unwrap();
            f.put(&mut k, round + 100).unwrap();
            assert_eq!(f.get(&mut k, Timeout::NoWait), Ok(Done(round)));
            assert_eq!(f.get(&mut k, Timeout::NoWait), Ok(Done(round + 100)));
        }
        assert!(f.is_empty());
    }

    #[test]
    fn test_empty_no_wait() {
        let mut k = Kernel::new();
        let f = Fifo::<4>::new(&mut k).unwrap();
        spawn(&mut k, b"a", 3);
        k.start();
        assert_eq!(f.get(&mut k, Timeout::NoWait), Err(KernelError::WouldBlock));
        assert_eq!(k.wait_queue_len(f.wait_q), 0);
    }

    #[test]
    fn test_cleanup() {
        let mut k = Kernel::new();
        let f = Fifo::<4>::new(&mut k).unwrap();
        spawn(&mut k, b"reader", 3);
        k.start();
        let _ = f.get(&mut k, Timeout::Forever).unwrap();
        let (f, err) = f.cleanup(&mut k).unwrap_err();
        assert_eq!(err, KernelError::Busy);
        f.put(&mut k, 1).unwrap();
        assert!(f.cleanup(&mut k).is_ok());
        assert_eq!(k.stats().wait_queues, 0);
    }

    #[test]
    fn test_put_wakes_reader() {
        let mut k = Kernel::new();
        let f = Fifo::<4>::new(&mut k).unwrap();
        let reader = spawn(&mut k, b"reader", 2);
        let writer = spawn(&mut k, b"writer", 5);
        k.start();
        assert_eq!(f.get(&mut k, Timeout::Ticks(30)), Ok(Pended(reader)));
        assert_eq!(k.current(), Some(writer));
        f.put(&mut k, 7).unwrap();
        assert_eq!(k.current(), Some(reader));
        assert_eq!(k.swap_result(reader), Some(Ok(7)));
        assert!(f.is_empty());
        assert_eq!(k.timeout_queue_len(), 0);
    }
}
