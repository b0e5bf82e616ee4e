#![no_std]
#![no_main]

use core::arch::global_asm;
use core::ptr::addr_of;

use riscv_os::memlayout::{KernelLayout, KERNBASE, PHYSTOP};
use riscv_os::param::{BOOT_STACK_SIZE, NCPU};
use riscv_os::BootInfo;

global_asm!(include_str!("asm/entry.s"));
global_asm!(include_str!("asm/kernelvec.s"));
global_asm!(include_str!("asm/trampoline.s"));

extern "C" {
    fn kernelvec();
    fn timervec();

    static trampoline: u8; // trampoline.s
    static etext: u8; // kernel.ld sets this to end of kernel code.
    static end: u8; // first address after kernel. defined by kernel.ld.
}

/// entry.s needs one stack per CPU.
#[repr(C, align(16))]
struct BootStacks([u8; BOOT_STACK_SIZE * NCPU]);

#[no_mangle]
static mut STACK0: BootStacks = BootStacks([0; BOOT_STACK_SIZE * NCPU]);

/// entry.s jumps here in machine mode on STACK0.
#[no_mangle]
unsafe extern "C" fn start() -> ! {
    riscv_os::start::start(kernel_main as usize, timervec as usize)
}

/// start() mrets here, in supervisor mode, on every hart.
extern "C" fn kernel_main() -> ! {
    let boot = unsafe {
        BootInfo {
            layout: KernelLayout {
                kernbase: KERNBASE,
                etext: addr_of!(etext) as usize,
                end: addr_of!(end) as usize,
                phystop: PHYSTOP,
                trampoline: addr_of!(trampoline) as usize,
            },
            kernelvec: kernelvec as usize,
        }
    };
    riscv_os::kmain(&boot)
}
