//! Privileged register access and Sv39 helpers.
//!
//! Every register is a zero-sized marker type implementing [`Register`],
//! generated from one table below. On the bare-metal target the accessors
//! compile to a single `csrr`/`csrw` (or `mv` for `tp`); on any other target
//! they hit the per-thread register file of the hosted machine model.

use cfg_if::cfg_if;

/// One privileged (or per-hart general purpose) register.
pub trait Register {
    /// Slot in the hosted register file.
    const ID: usize;
    /// Assembler name of the register.
    const NAME: &'static str;

    fn read() -> u64;

    /// # Safety
    /// Writing a privileged register changes how this hart translates
    /// addresses, takes traps, or returns from them.
    unsafe fn write(value: u64);
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
macro_rules! access {
    (csr read $name:literal, $id:expr) => {{
        let x: u64;
        unsafe { core::arch::asm!(concat!("csrr {}, ", $name), out(reg) x) };
        x
    }};
    (csr write $name:literal, $id:expr, $v:expr) => {
        core::arch::asm!(concat!("csrw ", $name, ", {}"), in(reg) $v)
    };
    (gpr read $name:literal, $id:expr) => {{
        let x: u64;
        unsafe { core::arch::asm!(concat!("mv {}, ", $name), out(reg) x) };
        x
    }};
    (gpr write $name:literal, $id:expr, $v:expr) => {
        core::arch::asm!(concat!("mv ", $name, ", {}"), in(reg) $v)
    };
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
macro_rules! access {
    ($kind:ident read $name:literal, $id:expr) => {
        crate::sim::read_reg($id)
    };
    ($kind:ident write $name:literal, $id:expr, $v:expr) => {
        crate::sim::write_reg($id, $v)
    };
}

macro_rules! registers {
    ($($(#[$doc:meta])* $kind:ident $ty:ident = $id:literal, $name:literal;)*) => {
        $(
            $(#[$doc])*
            pub struct $ty;

            impl Register for $ty {
                const ID: usize = $id;
                const NAME: &'static str = $name;

                #[inline]
                fn read() -> u64 {
                    access!($kind read $name, $id)
                }

                #[inline]
                unsafe fn write(value: u64) {
                    access!($kind write $name, $id, value)
                }
            }
        )*

        /// Number of registers in the table, i.e. the hosted register file size.
        pub const REGISTER_COUNT: usize = [$($id),*].len();
    };
}

registers! {
    /// Hardware thread id.
    csr Mhartid = 0, "mhartid";
    /// Machine status; holds the previous-privilege field used by `mret`.
    csr Mstatus = 1, "mstatus";
    /// Machine exception program counter: where `mret` goes.
    csr Mepc = 2, "mepc";
    csr Mie = 3, "mie";
    /// Machine trap vector, used only for the timer.
    csr Mtvec = 4, "mtvec";
    /// Per-hart pointer to the machine timer scratch area.
    csr Mscratch = 5, "mscratch";
    csr Medeleg = 6, "medeleg";
    csr Mideleg = 7, "mideleg";
    csr Pmpaddr0 = 8, "pmpaddr0";
    csr Pmpcfg0 = 9, "pmpcfg0";
    csr Sstatus = 10, "sstatus";
    csr Sie = 11, "sie";
    csr Sip = 12, "sip";
    csr Sepc = 13, "sepc";
    /// Supervisor trap cause: top bit is the interrupt flag.
    csr Scause = 14, "scause";
    csr Stval = 15, "stval";
    csr Stvec = 16, "stvec";
    /// Address translation and protection; holds the root page table.
    csr Satp = 17, "satp";
    /// Thread pointer. The kernel keeps this hart's id here.
    gpr Tp = 18, "tp";
}

#[inline]
pub fn read<R: Register>() -> u64 {
    R::read()
}

/// # Safety
/// See [`Register::write`].
#[inline]
pub unsafe fn write<R: Register>(value: u64) {
    R::write(value)
}

/// Set `mask` bits in `R`.
///
/// # Safety
/// See [`Register::write`].
#[inline]
pub unsafe fn set<R: Register>(mask: u64) {
    R::write(R::read() | mask)
}

/// Clear `mask` bits in `R`.
///
/// # Safety
/// See [`Register::write`].
#[inline]
pub unsafe fn clear<R: Register>(mask: u64) {
    R::write(R::read() & !mask)
}

// Machine Status Register, mstatus
pub const MSTATUS_MPP_MASK: u64 = 3 << 11; // previous mode
pub const MSTATUS_MPP_M: u64 = 3 << 11;
pub const MSTATUS_MPP_S: u64 = 1 << 11;
pub const MSTATUS_MPP_U: u64 = 0 << 11;
pub const MSTATUS_MIE: u64 = 1 << 3; // machine-mode interrupt enable

// Machine-mode Interrupt Enable
pub const MIE_MTIE: u64 = 1 << 7; // machine timer

// Supervisor Status Register, sstatus
pub const SSTATUS_SPP: u64 = 1 << 8; // Previous mode, 1=Supervisor, 0=User
pub const SSTATUS_SPIE: u64 = 1 << 5; // Supervisor Previous Interrupt Enable
pub const SSTATUS_SIE: u64 = 1 << 1; // Supervisor Interrupt Enable

// Supervisor Interrupt Enable
pub const SIE_SEIE: u64 = 1 << 9; // external
pub const SIE_STIE: u64 = 1 << 5; // timer
pub const SIE_SSIE: u64 = 1 << 1; // software

// Supervisor Interrupt Pending
pub const SIP_SSIP: u64 = 1 << 1;

// Physical Memory Protection configuration bits
pub const PMPCFG_R: u64 = 1 << 0;
pub const PMPCFG_W: u64 = 1 << 1;
pub const PMPCFG_X: u64 = 1 << 2;
pub const PMPCFG_A_TOR: u64 = 1 << 3;
pub const PMPCFG_L: u64 = 1 << 7;

/// Top of the single PMP region: covers all physical memory.
pub const PMPADDR_ALL: u64 = 0x3f_ffff_ffff_ffff;

/// Top bit of scause: set for interrupts, clear for exceptions.
pub const SCAUSE_INTERRUPT: u64 = 1 << 63;

// use riscv's sv39 page table scheme
pub const SATP_SV39: u64 = 8 << 60;

#[inline]
pub fn make_satp(root: usize) -> u64 {
    SATP_SV39 | ((root as u64) >> PGSHIFT)
}

pub const PGSIZE: usize = 4096; // bytes per page
pub const PGSHIFT: usize = 12; // bits of offset within a page
pub const PXMASK: usize = 0x1FF; // 9 bits of index per level

/// One past the highest usable virtual address.
///
/// This is one bit less than Sv39 allows, so addresses never need to be
/// sign-extended: anything with bit 38 or above set is rejected.
pub const MAXVA: usize = 1 << (9 + 9 + 9 + 12 - 1);

/// Index into the page-table page at `level` for `va`.
#[inline]
pub fn px(level: usize, va: usize) -> usize {
    (va >> (PGSHIFT + 9 * level)) & PXMASK
}

#[inline]
pub fn pgroundup(sz: usize) -> usize {
    (sz + PGSIZE - 1) & !(PGSIZE - 1)
}

#[inline]
pub fn pgrounddown(addr: usize) -> usize {
    addr & !(PGSIZE - 1)
}

// shift a physical address to the right place for a PTE.
#[inline]
pub fn pa2pte(pa: usize) -> u64 {
    ((pa >> PGSHIFT) as u64) << 10
}

#[inline]
pub fn pte2pa(pte: u64) -> usize {
    ((pte >> 10) << PGSHIFT) as usize
}

// enable device interrupts
#[inline]
pub fn intr_on() {
    unsafe { set::<Sstatus>(SSTATUS_SIE) }
}

// disable device interrupts
#[inline]
pub fn intr_off() {
    unsafe { clear::<Sstatus>(SSTATUS_SIE) }
}

// are device interrupts enabled?
#[inline]
pub fn intr_get() -> bool {
    Sstatus::read() & SSTATUS_SIE != 0
}

cfg_if! {
    if #[cfg(all(target_arch = "riscv64", target_os = "none"))] {
        /// Flush the whole TLB; also orders earlier page-table stores
        /// before later translations.
        #[inline]
        pub fn sfence_vma() {
            // the zero, zero means flush all TLB entries.
            unsafe { core::arch::asm!("sfence.vma zero, zero") };
        }

        #[inline]
        pub fn wfi() {
            unsafe { core::arch::asm!("wfi") };
        }
    } else {
        #[inline]
        pub fn sfence_vma() {
            crate::sim::sfence_vma();
        }

        #[inline]
        pub fn wfi() {
            crate::sim::wfi();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_extraction_uses_nine_bits_per_level() {
        let va = (3 << 30) | (5 << 21) | (7 << 12) | 0x123;
        assert_eq!(px(2, va), 3);
        assert_eq!(px(1, va), 5);
        assert_eq!(px(0, va), 7);
    }

    #[test]
    fn pte_conversion_keeps_page_number() {
        let pa = 0x8020_3000;
        assert_eq!(pte2pa(pa2pte(pa)), pa);
        assert_eq!(pa2pte(pa) & 0x3ff, 0);
    }

    #[test]
    fn rounding() {
        assert_eq!(pgroundup(1), PGSIZE);
        assert_eq!(pgroundup(PGSIZE), PGSIZE);
        assert_eq!(pgrounddown(PGSIZE + 1), PGSIZE);
    }

    #[test]
    fn set_and_clear_touch_only_the_mask() {
        unsafe {
            write::<Sie>(0);
            set::<Sie>(SIE_SEIE | SIE_SSIE);
            clear::<Sie>(SIE_SSIE);
        }
        assert_eq!(read::<Sie>(), SIE_SEIE);
    }

    #[test]
    fn interrupt_enable_follows_sstatus() {
        intr_on();
        assert!(intr_get());
        intr_off();
        assert!(!intr_get());
        assert_eq!(Sstatus::read() & SSTATUS_SIE, 0);
    }

    #[test]
    fn satp_selects_sv39() {
        let satp = make_satp(0x8000_1000);
        assert_eq!(satp >> 60, 8);
        assert_eq!(satp & ((1 << 44) - 1), 0x8000_1000 >> 12);
    }
}
