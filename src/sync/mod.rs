//! Synchronization objects — stack, semaphore, mutex, fifo
//!
//! Every object owns one kernel wait queue and a small payload behind an
//! object-local [`SpinLock`](crate::irq::SpinLock), and follows the same
//! give/take protocol:
//!
//! - give: a waiting thread is handed the value directly (the payload never
//!   holds data while someone waits for it); otherwise the value goes into
//!   the payload, or the call fails with `NoSpace`.
//! - take: payload data is returned at once; with `NoWait` an empty object
//!   fails with `WouldBlock` and touches no queue; otherwise the caller is
//!   pended with its timeout and the call returns
//!   [`Blocking::Pended`](crate::kernel::Blocking). The delivered value (or
//!   `Timeout`) is read back with
//!   [`Kernel::swap_result`](crate::kernel::Kernel::swap_result).
//!
//! Author: Moroya Sakamoto

pub mod fifo;
pub mod mutex;
pub mod sem;
pub mod stack;

pub use fifo::Fifo;
pub use mutex::Mutex;
pub use sem::Semaphore;
pub use stack::Stack;

use crate::error::{KResult, KernelError};
use crate::kernel::{Blocking, Kernel};
use crate::timeout::Timeout;
use crate::wait_queue::WaitQueueId;

/// Slow path of every take: block the caller on `wq`
fn pend<T>(k: &mut Kernel, wq: WaitQueueId, timeout: Timeout) -> KResult<Blocking<T>> {
    k.pend_current(Some(wq), timeout).map(Blocking::Pended)
}

/// Hand an object's wait queue back to the kernel arena
///
/// While threads still wait the object is returned along with `Busy`.
fn release<T>(k: &mut Kernel, wq: WaitQueueId, obj: T) -> Result<(), (T, KernelError)> {
    match k.wait_queue_free(wq) {
        Ok(()) => Ok(()),
        Err(e) => Err((obj, e)),
    }
}
