// param.rs

pub const NPROC: usize = 64; // maximum number of processes
pub const NCPU: usize = 8; // maximum number of CPUs

/// Per-hart boot stack, used until the scheduler hands out kernel stacks.
/// Must match entry.s.
pub const BOOT_STACK_SIZE: usize = 4 * 4096;

/// Cycles between machine timer interrupts; about 1/10th second in qemu.
pub const TIMER_INTERVAL: u64 = 1_000_000;

/// The one hart that advances the global tick counter.
pub const TICK_HART: usize = 0;
