//! Hosted machine model.
//!
//! Off target every host thread plays one hart: it owns a private register
//! file and a private core descriptor. TLB fences and `wfi` are counted or
//! yielded instead of executed. Physical memory and MMIO windows are plain
//! heap allocations handed to the drivers by address.

use std::alloc::{self, Layout};
use std::cell::{Cell, RefCell};

use crate::proc::Cpu;
use crate::riscv::{self, Tp, PGSIZE, REGISTER_COUNT};

thread_local! {
    static REGS: RefCell<[u64; REGISTER_COUNT]> = const { RefCell::new([0; REGISTER_COUNT]) };
    static SFENCES: Cell<usize> = const { Cell::new(0) };
    static CPU: &'static Cpu = Box::leak(Box::new(Cpu::new()));
}

pub fn read_reg(id: usize) -> u64 {
    REGS.with(|regs| regs.borrow()[id])
}

pub fn write_reg(id: usize, value: u64) {
    REGS.with(|regs| regs.borrow_mut()[id] = value);
}

pub fn sfence_vma() {
    SFENCES.with(|n| n.set(n.get() + 1));
}

/// How many `sfence.vma` this hart has executed.
pub fn sfence_count() -> usize {
    SFENCES.with(Cell::get)
}

pub fn wfi() {
    std::thread::yield_now();
}

/// Console output goes to the host's stdout.
pub fn console_putc(c: u8) {
    use std::io::Write;
    let _ = std::io::stdout().write_all(&[c]);
}

/// The calling thread's core descriptor.
pub fn this_cpu() -> &'static Cpu {
    CPU.with(|cpu| *cpu)
}

/// Make the calling thread answer to hart `id`.
pub fn set_hart(id: usize) {
    unsafe { riscv::write::<Tp>(id as u64) };
}

/// Page-aligned, zeroed block of host memory standing in for physical RAM.
pub struct PageArena {
    base: *mut u8,
    layout: Layout,
}

impl PageArena {
    pub fn new(pages: usize) -> Self {
        assert!(pages > 0, "empty arena");
        let layout = Layout::from_size_align(pages * PGSIZE, PGSIZE).expect("arena layout");
        let base = unsafe { alloc::alloc_zeroed(layout) };
        if base.is_null() {
            alloc::handle_alloc_error(layout);
        }
        Self { base, layout }
    }

    pub fn start(&self) -> usize {
        self.base as usize
    }

    pub fn end(&self) -> usize {
        self.start() + self.layout.size()
    }

    pub fn pages(&self) -> usize {
        self.layout.size() / PGSIZE
    }
}

impl Drop for PageArena {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.base, self.layout) };
    }
}

/// Zeroed device register window. Stores are remembered, so a register
/// reads back whatever was last written to it.
pub struct MmioWindow {
    mem: PageArena,
}

impl MmioWindow {
    pub fn new(bytes: usize) -> Self {
        Self {
            mem: PageArena::new(bytes.div_ceil(PGSIZE).max(1)),
        }
    }

    pub fn base(&self) -> usize {
        self.mem.start()
    }

    pub fn read32(&self, offset: usize) -> u32 {
        unsafe { crate::mmio::read32(self.base() + offset) }
    }

    pub fn write32(&self, offset: usize, value: u32) {
        unsafe { crate::mmio::write32(self.base() + offset, value) }
    }

    pub fn read64(&self, offset: usize) -> u64 {
        unsafe { crate::mmio::read64(self.base() + offset) }
    }

    pub fn write64(&self, offset: usize, value: u64) {
        unsafe { crate::mmio::write64(self.base() + offset, value) }
    }
}
