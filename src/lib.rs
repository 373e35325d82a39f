//! tickos — priority-preemptive real-time kernel core
//!
//! Threads, ticks and the blocking protocol behind every sync object:
//! - Static thread table (no heap, no allocation)
//! - Ready queue: per-priority FIFOs + `u32` bitmap, O(1) pick
//! - Delta-encoded timeout queue, one tick touches only the head
//! - Wait queues with FIFO wake order and exact-tick timeouts
//! - Stack, semaphore, mutex and fifo on a shared give/take protocol
//!
//! Author: Moroya Sakamoto

#![no_std]

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod config;
pub mod error;
pub mod fatal;
pub mod irq;
pub mod kernel;
pub mod list;
pub mod ready;
pub mod scheduler;
pub mod sync;
pub mod task;
pub mod timeout;
pub mod timer;
pub mod wait_queue;

pub use config::KernelConfig;
pub use error::{KResult, KernelError};
pub use fatal::{fatal_error, set_fatal_handler, FatalReason};
pub use irq::{irq_lock, irq_unlock, IrqGuard, IrqKey, SpinLock};
pub use kernel::{Blocking, Kernel, KernelStats};
pub use scheduler::Scheduler;
pub use sync::{Fifo, Mutex, Semaphore, Stack};
pub use task::{Priority, SwapData, Thread, ThreadFn, ThreadId, ThreadOptions, ThreadState};
pub use timeout::Timeout;
pub use timer::{SysClock, TimerFn, TimerId};
pub use wait_queue::WaitQueueId;
