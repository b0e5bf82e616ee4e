//! A small xv6-style kernel for the qemu `virt` RISC-V machine.
//!
//! Built for `riscv64gc-unknown-none-elf` this is the body of the `kernel`
//! binary. Built for anything else it runs against a hosted machine model
//! (see [`sim`]) so the subsystems can be exercised by `cargo test`.

#![cfg_attr(target_os = "none", no_std)]

#[macro_use]
pub mod console;
pub mod error;
pub mod kalloc;
pub mod logging;
pub mod memlayout;
pub mod mmio;
pub mod param;
pub mod plic;
pub mod proc;
pub mod riscv;
pub mod spinlock;
pub mod start;
pub mod timer;
pub mod trap;
pub mod uart;
pub mod virtio;
pub mod vm;

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "riscv64", target_os = "none"))] {
        mod lang_items;
    } else {
        pub mod sim;
    }
}

use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::kalloc::KMEM;
use crate::memlayout::KernelLayout;
use crate::plic::PLIC0;
use crate::proc::cpuid;
use crate::riscv::{intr_on, wfi};
use crate::virtio::DISK;

static STARTED: AtomicBool = AtomicBool::new(false);

/// What the kernel binary learns from the linker and its assembly stubs.
#[derive(Debug, Clone, Copy)]
pub struct BootInfo {
    pub layout: KernelLayout,
    /// Address of the supervisor trap vector.
    pub kernelvec: usize,
}

/// start() jumps here in supervisor mode on all CPUs.
pub fn kmain(boot: &BootInfo) -> ! {
    let hart = cpuid();
    if hart == 0 {
        console::init();
        logging::init();
        println!();
        println!("riscv-os kernel is booting");
        println!();
        unsafe { KMEM.init(boot.layout.end, boot.layout.phystop) }; // physical page allocator
        log::info!("kinit: {} free pages", KMEM.free_pages());
        vm::kvminit(&KMEM, &boot.layout); // create kernel page table
        vm::kvminithart(); // turn on paging
        proc::procinit(); // process table
        trap::init(); // trap vectors
        trap::init_hart(boot.kernelvec); // install kernel trap vector
        PLIC0.init(); // set up interrupt controller
        PLIC0.init_hart(hart); // ask PLIC for device interrupts
        DISK.init(&KMEM); // emulated hard disk
        STARTED.store(true, Ordering::Release);
    } else {
        while !STARTED.load(Ordering::Acquire) {
            spin_loop();
        }
        log::info!("hart {} starting", hart);
        vm::kvminithart(); // turn on paging
        trap::init_hart(boot.kernelvec); // install kernel trap vector
        PLIC0.init_hart(hart); // ask PLIC for device interrupts
    }

    intr_on();
    loop {
        wfi();
    }
}
