use core::cell::UnsafeCell;
use core::fmt;
use core::hint::spin_loop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{fence, AtomicBool, AtomicUsize, Ordering};

use crate::proc::{cpuid, mycpu, Cpu};
use crate::riscv::{intr_get, intr_off, intr_on};

const NO_CPU: usize = 0;

// Identity of the calling hart's descriptor, recorded as the holder.
fn this_cpu() -> usize {
    mycpu() as *const Cpu as usize
}

/// Mutual exclusion spin lock.
///
/// Acquiring disables interrupts on the calling hart until the matching
/// release, so an interrupt handler can never spin on a lock its own hart
/// already holds.
pub struct RawSpinLock {
    locked: AtomicBool,
    name: &'static str, // for debugging
    // The cpu holding the lock, for the holding() checks. Only meaningful
    // while `locked` is set.
    cpu: AtomicUsize,
}

impl RawSpinLock {
    pub const fn new(name: &'static str) -> Self {
        Self {
            locked: AtomicBool::new(false),
            name,
            cpu: AtomicUsize::new(NO_CPU),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Acquire the lock.
    /// Loops (spins) until the lock is acquired.
    ///
    /// Panics if this hart already holds it.
    pub fn acquire(&self) {
        push_off(); // disable interrupts to avoid deadlock.

        if self.holding() {
            panic!("acquire {}: already held by hart {}", self.name, cpuid());
        }

        // On RISC-V, the swap compiles to an atomic swap instruction:
        //   amoswap.w.aq a5, a5, (s1)
        while self.locked.swap(true, Ordering::Acquire) {
            spin_loop();
        }

        // Critical section memory accesses happen strictly after the lock is
        // acquired. On RISC-V this emits a fence instruction.
        fence(Ordering::SeqCst);

        // Record info about lock acquisition for holding() and debugging.
        self.cpu.store(this_cpu(), Ordering::Relaxed);
    }

    /// Release the lock.
    ///
    /// Panics if this hart is not the holder.
    pub fn release(&self) {
        if !self.holding() {
            panic!("release {}: not held by hart {}", self.name, cpuid());
        }

        self.cpu.store(NO_CPU, Ordering::Relaxed);

        // All stores in the critical section become visible to other harts
        // before the lock is released.
        fence(Ordering::SeqCst);

        // On RISC-V this is an atomic swap:
        //   amoswap.w zero, zero, (s1)
        self.locked.store(false, Ordering::Release);

        pop_off();
    }

    /// Check whether this hart is holding the lock.
    /// Interrupts must be off.
    pub fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed) && self.cpu.load(Ordering::Relaxed) == this_cpu()
    }
}

/// A [`RawSpinLock`] that owns the data it protects.
pub struct SpinLock<T: ?Sized> {
    raw: RawSpinLock,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            raw: RawSpinLock::new(name),
            data: UnsafeCell::new(data),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.raw.acquire();
        SpinLockGuard { lock: self }
    }

    pub fn holding(&self) -> bool {
        self.raw.holding()
    }

    /// No locking needed: `&mut self` proves exclusive access.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: ?Sized> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinLock")
            .field("name", &self.raw.name)
            .field("locked", &self.raw.locked.load(Ordering::Relaxed))
            .finish()
    }
}

pub struct SpinLockGuard<'a, T: ?Sized> {
    lock: &'a SpinLock<T>,
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.raw.release();
    }
}

/// Disable interrupts and push one level of nesting.
///
/// push_off/pop_off are like intr_off()/intr_on() except that they are
/// matched: it takes two pop_off()s to undo two push_off()s. Also, if
/// interrupts are initially off, then push_off, pop_off leaves them off.
pub fn push_off() {
    let old = intr_get();
    intr_off();
    let cpu = mycpu();
    if cpu.noff.load(Ordering::Relaxed) == 0 {
        cpu.intena.store(old, Ordering::Relaxed);
    }
    cpu.noff.fetch_add(1, Ordering::Relaxed);
}

/// Pop one level of nesting; on the last level restore the interrupt
/// state recorded by the first push_off().
pub fn pop_off() {
    let cpu = mycpu();
    if intr_get() {
        panic!("pop_off: interruptible");
    }
    let noff = cpu.noff.load(Ordering::Relaxed);
    if noff < 1 {
        panic!("pop_off: not pushed");
    }
    cpu.noff.store(noff - 1, Ordering::Relaxed);
    if noff == 1 && cpu.intena.load(Ordering::Relaxed) {
        intr_on();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn nesting_restores_the_original_interrupt_state() {
        for initially_on in [true, false] {
            for depth in 1..=5 {
                if initially_on {
                    intr_on();
                } else {
                    intr_off();
                }
                for _ in 0..depth {
                    push_off();
                    assert!(!intr_get());
                }
                for remaining in (0..depth).rev() {
                    pop_off();
                    if remaining > 0 {
                        assert!(!intr_get());
                    }
                }
                assert_eq!(intr_get(), initially_on, "depth {}", depth);
                assert_eq!(mycpu().noff.load(Ordering::Relaxed), 0);
            }
        }
    }

    #[test]
    fn acquire_disables_and_release_restores_interrupts() {
        let lock = SpinLock::new("test", 0u32);
        intr_on();
        {
            let mut guard = lock.lock();
            assert!(!intr_get());
            assert!(lock.holding());
            *guard += 1;
        }
        assert!(intr_get());
        assert!(!lock.holding());
        intr_off();
    }

    #[test]
    #[should_panic(expected = "acquire selfish")]
    fn reacquire_by_holder_is_fatal() {
        let lock = RawSpinLock::new("selfish");
        lock.acquire();
        lock.acquire();
    }

    #[test]
    #[should_panic(expected = "release idle")]
    fn release_of_unheld_lock_is_fatal() {
        let lock = RawSpinLock::new("idle");
        lock.release();
    }

    #[test]
    fn release_by_another_hart_is_fatal() {
        let lock = Arc::new(RawSpinLock::new("shared"));
        sim::set_hart(0);
        lock.acquire();

        let other = Arc::clone(&lock);
        let result = thread::spawn(move || {
            sim::set_hart(1);
            other.release();
        })
        .join();

        assert!(result.is_err());
        assert!(lock.holding());
        lock.release();
    }

    #[test]
    #[should_panic(expected = "pop_off: not pushed")]
    fn unbalanced_pop_is_fatal() {
        intr_off();
        pop_off();
    }

    #[test]
    fn two_harts_never_share_the_lock() {
        const ROUNDS: usize = 2_000;

        let lock = Arc::new(SpinLock::new("counter", 0usize));
        let inside = Arc::new(AtomicUsize::new(0));

        let harts: Vec<_> = (0..2)
            .map(|hart| {
                let lock = Arc::clone(&lock);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    sim::set_hart(hart);
                    for _ in 0..ROUNDS {
                        let mut count = lock.lock();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        assert!(lock.holding());
                        *count += 1;
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for hart in harts {
            hart.join().unwrap();
        }
        assert_eq!(*lock.lock(), 2 * ROUNDS);
    }
}
