//! the riscv Platform Level Interrupt Controller (PLIC).

use crate::memlayout::{
    plic_priority, plic_sclaim, plic_senable, plic_spriority, PLIC, UART0_IRQ, VIRTIO0_IRQ,
};
use crate::mmio;
use crate::spinlock::SpinLock;

/// Where the trap dispatcher claims and completes external interrupts.
pub trait InterruptController {
    /// Ask which interrupt this hart should serve; 0 means none.
    fn claim(&self, hart: usize) -> u32;

    /// Tell the controller this hart has served `irq`.
    fn complete(&self, hart: usize, irq: u32);
}

pub struct Plic {
    base: usize,
    // Serialises configuration writes. Claim and complete touch only the
    // calling hart's registers and skip it.
    lock: SpinLock<()>,
}

/// The machine's PLIC.
pub static PLIC0: Plic = unsafe { Plic::new(PLIC) };

impl Plic {
    /// # Safety
    /// `base` is the start of a PLIC register window, mapped for as long as
    /// the driver is used.
    pub const unsafe fn new(base: usize) -> Self {
        Self {
            base,
            lock: SpinLock::new("plic", ()),
        }
    }

    fn read(&self, offset: usize) -> u32 {
        unsafe { mmio::read32(self.base + offset) }
    }

    fn write(&self, offset: usize, value: u32) {
        unsafe { mmio::write32(self.base + offset, value) }
    }

    /// Set desired IRQ priorities non-zero (otherwise disabled).
    pub fn init(&self) {
        let _guard = self.lock.lock();
        self.write(plic_priority(UART0_IRQ), 1);
        self.write(plic_priority(VIRTIO0_IRQ), 1);
    }

    /// Enable the uart and virtio disk for `hart`'s S-mode, and let every
    /// non-zero priority through.
    pub fn init_hart(&self, hart: usize) {
        let _guard = self.lock.lock();
        self.write(plic_senable(hart), (1 << UART0_IRQ) | (1 << VIRTIO0_IRQ));

        // set this hart's S-mode priority threshold to 0.
        self.write(plic_spriority(hart), 0);
    }

    /// Ask the PLIC what interrupt we should serve.
    pub fn claim(&self, hart: usize) -> u32 {
        self.read(plic_sclaim(hart))
    }

    /// Tell the PLIC we've served this IRQ.
    pub fn complete(&self, hart: usize, irq: u32) {
        self.write(plic_sclaim(hart), irq);
    }
}

impl InterruptController for Plic {
    fn claim(&self, hart: usize) -> u32 {
        Plic::claim(self, hart)
    }

    fn complete(&self, hart: usize, irq: u32) {
        Plic::complete(self, hart, irq)
    }
}
