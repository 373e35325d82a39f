//! Interrupt lock — the kernel's one critical-section primitive
//!
//! `irq_lock()` masks maskable interrupts on the current CPU and returns a key
//! holding the previous mask state; `irq_unlock(key)` restores exactly that
//! state. Nested pairs therefore never re-enable interrupts early.
//!
//! Backends:
//! - `cortex-m` on ARM: PRIMASK for the lock, NVIC ISER/ICER for lines
//! - `riscv` on RISC-V: `mstatus.MIE` for the lock, `mie` for lines
//! - otherwise: a software mask, per OS thread when `std` is available so
//!   parallel host tests each see their own "CPU"
//!
//! Author: Moroya Sakamoto

use core::ops::{Deref, DerefMut};

/// Opaque token returned by [`irq_lock`], consumed by [`irq_unlock`]
#[must_use = "dropping an IrqKey leaves interrupts locked"]
#[derive(Debug)]
pub struct IrqKey {
    was_enabled: bool,
}

impl IrqKey {
    /// Were interrupts enabled when this key was taken?
    pub fn was_unlocked(&self) -> bool {
        self.was_enabled
    }
}

/// Mask interrupts, returning the previous state
#[inline]
pub fn irq_lock() -> IrqKey {
    IrqKey {
        was_enabled: backend::save_and_disable(),
    }
}

/// Restore the interrupt state captured by `key`
#[inline]
pub fn irq_unlock(key: IrqKey) {
    if key.was_enabled {
        backend::enable();
    }
}

/// Are maskable interrupts currently enabled on this CPU?
#[inline]
pub fn irq_is_enabled() -> bool {
    backend::is_enabled()
}

/// Unmask one interrupt line at the controller
pub fn irq_enable(line: u32) {
    backend::line_enable(line);
}

/// Mask one interrupt line at the controller
pub fn irq_disable(line: u32) {
    backend::line_disable(line);
}

/// Is this line unmasked at the controller?
pub fn irq_line_is_enabled(line: u32) -> bool {
    backend::line_is_enabled(line)
}

/// Scope guard: interrupts stay locked until it drops
#[must_use = "the lock is released as soon as the guard drops"]
pub struct IrqGuard {
    key: Option<IrqKey>,
}

impl IrqGuard {
    /// Lock interrupts for the lifetime of the guard
    #[inline]
    pub fn new() -> Self {
        Self {
            key: Some(irq_lock()),
        }
    }
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IrqGuard {
    #[inline]
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            irq_unlock(key);
        }
    }
}

/// Object-local lock for ISR-safe fast paths
///
/// Locks interrupts on this CPU, then spins for the inner mutex so another
/// CPU holding the same object cannot race us.
pub struct SpinLock<T> {
    inner: spin::Mutex<T>,
}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: spin::Mutex::new(value),
        }
    }

    /// Acquire with interrupts masked
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let irq = IrqGuard::new();
        let guard = self.inner.lock();
        SpinLockGuard { guard, _irq: irq }
    }

    /// Exclusive access without locking (`&mut self` proves no sharing)
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    /// Is the lock currently held?
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

/// Held [`SpinLock`]. Field order matters: the mutex is released before the
/// interrupt mask is restored.
pub struct SpinLockGuard<'a, T> {
    guard: spin::MutexGuard<'a, T>,
    _irq: IrqGuard,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

#[cfg(all(feature = "cortex-m", target_arch = "arm"))]
mod backend {
    use core::arch::asm;

    const NVIC_ISER: usize = 0xE000_E100;
    const NVIC_ICER: usize = 0xE000_E180;

    #[inline(always)]
    fn primask() -> u32 {
        let r: u32;
        // SAFETY: reading PRIMASK has no side effects
        unsafe { asm!("mrs {}, PRIMASK", out(reg) r, options(nomem, nostack, preserves_flags)) };
        r
    }

    #[inline(always)]
    pub fn save_and_disable() -> bool {
        let was_enabled = primask() & 1 == 0;
        // SAFETY: masking interrupts cannot break memory safety
        unsafe { asm!("cpsid i", options(nomem, nostack, preserves_flags)) };
        was_enabled
    }

    #[inline(always)]
    pub fn enable() {
        // SAFETY: only reached when restoring a previously-enabled state
        unsafe { asm!("cpsie i", options(nomem, nostack, preserves_flags)) };
    }

    #[inline(always)]
    pub fn is_enabled() -> bool {
        primask() & 1 == 0
    }

    fn reg(base: usize, line: u32) -> *mut u32 {
        (base + 4 * (line as usize / 32)) as *mut u32
    }

    pub fn line_enable(line: u32) {
        // SAFETY: ISER is write-one-to-set; other lines are unaffected
        unsafe { core::ptr::write_volatile(reg(NVIC_ISER, line), 1 << (line % 32)) };
    }

    pub fn line_disable(line: u32) {
        // SAFETY: ICER is write-one-to-clear; other lines are unaffected
        unsafe { core::ptr::write_volatile(reg(NVIC_ICER, line), 1 << (line % 32)) };
    }

    pub fn line_is_enabled(line: u32) -> bool {
        // SAFETY: ISER reads back the enable state
        let v = unsafe { core::ptr::read_volatile(reg(NVIC_ISER, line)) };
        v & (1 << (line % 32)) != 0
    }
}

#[cfg(all(feature = "riscv", any(target_arch = "riscv32", target_arch = "riscv64")))]
mod backend {
    use core::arch::asm;

    const MSTATUS_MIE: usize = 1 << 3;

    #[inline(always)]
    pub fn save_and_disable() -> bool {
        let prev: usize;
        // SAFETY: atomically clears MIE and returns the old mstatus
        unsafe { asm!("csrrci {}, mstatus, 8", out(reg) prev, options(nomem, nostack)) };
        prev & MSTATUS_MIE != 0
    }

    #[inline(always)]
    pub fn enable() {
        // SAFETY: only reached when restoring a previously-enabled state
        unsafe { asm!("csrsi mstatus, 8", options(nomem, nostack)) };
    }

    #[inline(always)]
    pub fn is_enabled() -> bool {
        let v: usize;
        // SAFETY: plain CSR read
        unsafe { asm!("csrr {}, mstatus", out(reg) v, options(nomem, nostack)) };
        v & MSTATUS_MIE != 0
    }

    pub fn line_enable(line: u32) {
        if (line as usize) < usize::BITS as usize {
            // SAFETY: sets one bit in mie
            unsafe { asm!("csrs mie, {}", in(reg) 1usize << line, options(nomem, nostack)) };
        }
    }

    pub fn line_disable(line: u32) {
        if (line as usize) < usize::BITS as usize {
            // SAFETY: clears one bit in mie
            unsafe { asm!("csrc mie, {}", in(reg) 1usize << line, options(nomem, nostack)) };
        }
    }

    pub fn line_is_enabled(line: u32) -> bool {
        if line >= usize::BITS {
            return false;
        }
        let v: usize;
        // SAFETY: plain CSR read
        unsafe { asm!("csrr {}, mie", out(reg) v, options(nomem, nostack)) };
        v & (1usize << line) != 0
    }
}

#[cfg(not(any(
    all(feature = "cortex-m", target_arch = "arm"),
    all(feature = "riscv", any(target_arch = "riscv32", target_arch = "riscv64"))
)))]
mod backend {
    use core::sync::atomic::{AtomicU64, Ordering};

    /// Lines beyond this are silently ignored by the software controller
    const SOFT_LINES: u32 = 64;

    static LINE_MASK: AtomicU64 = AtomicU64::new(0);

    #[cfg(any(test, feature = "std"))]
    mod mask {
        use core::cell::Cell;

        std::thread_local! {
            static ENABLED: Cell<bool> = const { Cell::new(true) };
        }

        pub fn swap(v: bool) -> bool {
            ENABLED.with(|e| e.replace(v))
        }

        pub fn get() -> bool {
            ENABLED.with(|e| e.get())
        }
    }

    #[cfg(not(any(test, feature = "std")))]
    mod mask {
        use core::sync::atomic::{AtomicBool, Ordering};

        static ENABLED: AtomicBool = AtomicBool::new(true);

        pub fn swap(v: bool) -> bool {
            ENABLED.swap(v, Ordering::AcqRel)
        }

        pub fn get() -> bool {
            ENABLED.load(Ordering::Acquire)
        }
    }

    pub fn save_and_disable() -> bool {
        mask::swap(false)
    }

    pub fn enable() {
        mask::swap(true);
    }

    pub fn is_enabled() -> bool {
        mask::get()
    }

    pub fn line_enable(line: u32) {
        if line < SOFT_LINES {
            LINE_MASK.fetch_or(1 << line, Ordering::AcqRel);
        }
    }

    pub fn line_disable(line: u32) {
        if line < SOFT_LINES {
            LINE_MASK.fetch_and(!(1 << line), Ordering::AcqRel);
        }
    }

    pub fn line_is_enabled(line: u32) -> bool {
        line < SOFT_LINES && LINE_MASK.load(Ordering::Acquire) & (1 << line) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_unlock() {
        assert!(irq_is_enabled());
        let key = irq_lock();
        assert!(!irq_is_enabled());
        assert!(key.was_unlocked());
        irq_unlock(key);
        assert!(irq_is_enabled());
    }

    #[test]
    fn test_nested_lock_does_not_reenable_early() {
        let outer = irq_lock();
        let inner = irq_lock();
        assert!(!inner.was_unlocked());
        irq_unlock(inner);
        assert!(!irq_is_enabled(), "inner unlock must keep interrupts masked");
        irq_unlock(outer);
        assert!(irq_is_enabled());
    }

    #[test]
    fn test_guard_restores_on_drop() {
        {
            let _g = IrqGuard::new();
            assert!(!irq_is_enabled());
            {
                let _g2 = IrqGuard::new();
            }
            assert!(!irq_is_enabled());
        }
        assert!(irq_is_enabled());
    }

    #[test]
    fn test_guard_released_on_early_return() {
        fn bail(input: Option<u32>) -> Option<u32> {
            let _g = IrqGuard::new();
            let v = input?;
            Some(v + 1)
        }
        assert_eq!(bail(None), None);
        assert!(irq_is_enabled());
    }

    #[test]
    fn test_line_mask() {
        irq_enable(17);
        assert!(irq_line_is_enabled(17));
        irq_disable(17);
        assert!(!irq_line_is_enabled(17));
        irq_enable(500);
        assert!(!irq_line_is_enabled(500));
    }

    #[test]
    fn test_spinlock_masks_interrupts() {
        let lock = SpinLock::new(5u32);
        {
            let mut g = lock.lock();
            *g += 1;
            assert!(!irq_is_enabled());
            assert!(lock.is_locked());
        }
        assert!(irq_is_enabled());
        assert!(!lock.is_locked());
        assert_eq!(*lock.lock(), 6);
    }
}
