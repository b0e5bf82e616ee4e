// memlayout.rs

//! Physical memory layout
//!
//! qemu -machine virt is set up like this,
//! based on qemu's hw/riscv/virt.c:
//!
//! 00001000 -- boot ROM, provided by qemu
//! 02000000 -- CLINT
//! 0C000000 -- PLIC
//! 10000000 -- uart0
//! 10001000 -- virtio disk
//! 80000000 -- boot ROM jumps here in machine mode
//!             -kernel loads the kernel here
//! unused RAM after 80000000.
//!
//! The kernel uses physical memory thus:
//! 80000000 -- entry.s, then kernel text and data
//! end -- start of kernel page allocation area
//! PHYSTOP -- end RAM used by the kernel

use crate::riscv::{MAXVA, PGSIZE};

// qemu puts UART registers here in physical memory.
pub const UART0: usize = 0x1000_0000;
pub const UART0_IRQ: u32 = 10;

// virtio mmio interface
pub const VIRTIO0: usize = 0x1000_1000;
pub const VIRTIO0_IRQ: u32 = 1;

// core local interruptor (CLINT), which contains the timer.
pub const CLINT: usize = 0x0200_0000;
pub const CLINT_SIZE: usize = 0x1_0000;
pub const CLINT_MTIMECMP: usize = 0x4000; // offset of hart 0's compare register
pub const CLINT_MTIME: usize = 0xBFF8; // offset of the cycles-since-boot counter

/// Offset of the timer compare register for `hart` inside the CLINT window.
#[inline]
pub const fn clint_mtimecmp(hart: usize) -> usize {
    CLINT_MTIMECMP + 8 * hart
}

// qemu puts platform-level interrupt controller (PLIC) here.
pub const PLIC: usize = 0x0c00_0000;
pub const PLIC_SIZE: usize = 0x400_0000;
pub const PLIC_PRIORITY: usize = 0x0;
pub const PLIC_PENDING: usize = 0x1000;

/// Offset of the per-source priority register.
#[inline]
pub const fn plic_priority(irq: u32) -> usize {
    PLIC_PRIORITY + irq as usize * 4
}

/// Offset of the supervisor-mode enable bitmap for `hart`.
#[inline]
pub const fn plic_senable(hart: usize) -> usize {
    0x2080 + hart * 0x100
}

/// Offset of the supervisor-mode priority threshold for `hart`.
#[inline]
pub const fn plic_spriority(hart: usize) -> usize {
    0x20_1000 + hart * 0x2000
}

/// Offset of the supervisor-mode claim/complete register for `hart`.
#[inline]
pub const fn plic_sclaim(hart: usize) -> usize {
    0x20_1004 + hart * 0x2000
}

// The kernel expects there to be RAM
// for use by the kernel and user pages
// from physical address 0x80000000 to PHYSTOP.
pub const KERNBASE: usize = 0x8000_0000;
pub const PHYSTOP: usize = KERNBASE + 128 * 1024 * 1024;

// Map the trampoline page to the highest address,
// in both user and kernel space.
pub const TRAMPOLINE: usize = MAXVA - PGSIZE;

/// Kernel stack of process slot `slot`, beneath the trampoline.
/// Each stack is followed (downwards) by an unmapped guard page.
#[inline]
pub const fn kstack(slot: usize) -> usize {
    TRAMPOLINE - (slot + 1) * 2 * PGSIZE
}

// User memory layout.
// Address zero first:
//   text
//   original data and bss
//   fixed-size stack
//   expandable heap
//   ...
//   TRAPFRAME (p->trapframe, used by the trampoline)
//   TRAMPOLINE (the same page as in the kernel)
pub const TRAPFRAME: usize = TRAMPOLINE - PGSIZE;

/// Where the linker put the kernel image, plus the RAM the kernel manages.
///
/// On hardware these come from `kernel.ld` symbols; tests build one by hand.
#[derive(Debug, Clone, Copy)]
pub struct KernelLayout {
    /// Load address: first byte of kernel text.
    pub kernbase: usize,
    /// End of kernel text, page aligned by the linker script.
    pub etext: usize,
    /// First byte after the kernel image; the page allocator starts here.
    pub end: usize,
    /// End of the RAM the kernel uses.
    pub phystop: usize,
    /// Physical address of the trampoline code page.
    pub trampoline: usize,
}
