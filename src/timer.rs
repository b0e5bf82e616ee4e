//! Machine-mode timer setup on the core-local interruptor (CLINT).
//!
//! The CLINT raises a machine-mode timer interrupt whenever a hart's
//! `mtimecmp` falls below `mtime`. `timervec` (kernelvec.s) catches it,
//! re-arms the compare register from this hart's scratch area, and raises a
//! supervisor software interrupt, which the trap dispatcher counts as a tick.

use core::cell::UnsafeCell;

use crate::memlayout::{clint_mtimecmp, CLINT, CLINT_MTIME};
use crate::mmio;
use crate::param::NCPU;
use crate::riscv::{Mscratch, Register};

/// Words in each hart's scratch area.
pub const SCRATCH_WORDS: usize = 5;

/// Index of the compare-register address in a scratch area.
pub const SCRATCH_MTIMECMP: usize = 3;

/// Index of the tick interval in a scratch area.
pub const SCRATCH_INTERVAL: usize = 4;

/// A scratch area per hart for machine-mode timer interrupts.
///
/// scratch[0..=2]: space for timervec to save registers.
/// scratch[3]: address of CLINT MTIMECMP register.
/// scratch[4]: desired interval (in cycles) between timer interrupts.
pub struct TimerScratch {
    areas: [UnsafeCell<[u64; SCRATCH_WORDS]>; NCPU],
}

// Each area belongs to one hart: written once by that hart in start(),
// afterwards only by its own timervec.
unsafe impl Sync for TimerScratch {}

pub static TIMER_SCRATCH: TimerScratch = TimerScratch::new();

impl TimerScratch {
    pub const fn new() -> Self {
        const AREA: UnsafeCell<[u64; SCRATCH_WORDS]> = UnsafeCell::new([0; SCRATCH_WORDS]);
        Self {
            areas: [AREA; NCPU],
        }
    }

    /// Address of `hart`'s area, as loaded into mscratch.
    pub fn area(&self, hart: usize) -> *mut [u64; SCRATCH_WORDS] {
        self.areas[hart].get()
    }
}

impl Default for TimerScratch {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Clint {
    base: usize,
}

/// The machine's CLINT.
pub static CLINT0: Clint = unsafe { Clint::new(CLINT) };

impl Clint {
    /// # Safety
    /// `base` is the start of a CLINT register window.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    /// Cycles since boot.
    pub fn mtime(&self) -> u64 {
        unsafe { mmio::read64(self.base + CLINT_MTIME) }
    }

    pub fn mtimecmp(&self, hart: usize) -> u64 {
        unsafe { mmio::read64(self.base + clint_mtimecmp(hart)) }
    }

    /// Ask for `hart`'s first timer interrupt `interval` cycles from now,
    /// and prepare its scratch area so timervec can keep re-arming it.
    /// Points mscratch at that area.
    ///
    /// # Safety
    /// Called in machine mode by `hart` itself, before its timer interrupts
    /// are enabled.
    pub unsafe fn arm(&self, hart: usize, interval: u64, scratch: &TimerScratch) {
        let cmp = self.base + clint_mtimecmp(hart);
        let now = self.mtime();
        mmio::write64(cmp, now + interval);

        let area = scratch.area(hart);
        (*area)[SCRATCH_MTIMECMP] = cmp as u64;
        (*area)[SCRATCH_INTERVAL] = interval;
        Mscratch::write(area as u64);
    }
}

/// Arrange to receive timer interrupts.
/// They will arrive in machine mode at timervec in kernelvec.s,
/// which turns them into software interrupts for devintr() in trap.rs.
///
/// # Safety
/// Machine mode only; `timervec` is the address of the timer vector.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub unsafe fn timerinit(timervec: usize) {
    use crate::param::TIMER_INTERVAL;
    use crate::riscv::{set, Mhartid, Mie, Mstatus, Mtvec, MIE_MTIE, MSTATUS_MIE};

    // each CPU has a separate source of timer interrupts.
    let hart = Mhartid::read() as usize;
    CLINT0.arm(hart, TIMER_INTERVAL, &TIMER_SCRATCH);

    // set the machine-mode trap handler.
    Mtvec::write(timervec as u64);

    // enable machine-mode interrupts.
    set::<Mstatus>(MSTATUS_MIE);

    // enable machine-mode timer interrupts.
    set::<Mie>(MIE_MTIE);
}
