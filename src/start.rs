//! Machine-mode boot: entry.s jumps to the kernel binary's `start` symbol
//! on every hart, which lands in [`start`] here.

use crate::riscv::{
    set, Medeleg, Mepc, Mhartid, Mideleg, Mstatus, Pmpaddr0, Pmpcfg0, Register, Satp, Sie, Tp,
    MSTATUS_MPP_MASK, MSTATUS_MPP_S, PMPADDR_ALL, PMPCFG_A_TOR, PMPCFG_L, PMPCFG_R, PMPCFG_W,
    PMPCFG_X, SIE_SEIE, SIE_SSIE, SIE_STIE,
};

/// Everything start() does to prepare a hart for supervisor mode, short of
/// the timer and the `mret`.
///
/// # Safety
/// Machine mode, once per hart, before anything else runs on it.
pub unsafe fn configure_hart(main: usize) {
    // set M Previous Privilege mode to Supervisor, for mret.
    let x = Mstatus::read() & !MSTATUS_MPP_MASK;
    Mstatus::write(x | MSTATUS_MPP_S);

    // set M Exception Program Counter to main, for mret.
    Mepc::write(main as u64);

    // disable paging for now.
    Satp::write(0);

    // delegate all interrupts and exceptions to supervisor mode.
    Medeleg::write(0xffff);
    Mideleg::write(0xffff);
    set::<Sie>(SIE_SEIE | SIE_STIE | SIE_SSIE);

    // configure Physical Memory Protection to give supervisor mode
    // access to all of physical memory.
    Pmpaddr0::write(PMPADDR_ALL);
    Pmpcfg0::write(PMPCFG_L | PMPCFG_A_TOR | PMPCFG_R | PMPCFG_W | PMPCFG_X);

    // keep each CPU's hartid in its tp register, for cpuid().
    Tp::write(Mhartid::read());
}

/// Configure this hart, arm its timer, and drop to supervisor mode at
/// `main`.
///
/// # Safety
/// Called once per hart from entry.s, in machine mode, on its boot stack.
/// `main` and `timervec` are the addresses of the supervisor entry point
/// and the machine timer vector.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub unsafe fn start(main: usize, timervec: usize) -> ! {
    configure_hart(main);

    // ask for clock interrupts.
    crate::timer::timerinit(timervec);

    // switch to supervisor mode and jump to main().
    core::arch::asm!("mret", options(noreturn));
}
