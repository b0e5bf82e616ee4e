//! Sv39 page tables.
//!
//! The risc-v Sv39 scheme has three levels of page-table
//! pages. A page-table page contains 512 64-bit PTEs.
//! A 64-bit virtual address is split into five fields:
//!   39..63 -- must be zero.
//!   30..38 -- 9 bits of level-2 index.
//!   21..29 -- 9 bits of level-1 index.
//!   12..20 -- 9 bits of level-0 index.
//!    0..11 -- 12 bits of byte offset within the page.

use core::fmt;
use core::ptr::{self, NonNull};

use bitflags::bitflags;
use spin::Once;
use static_assertions::const_assert_eq;

use crate::error::{KernelError, Result};
use crate::kalloc::Kmem;
use crate::memlayout::{KernelLayout, PLIC, PLIC_SIZE, TRAMPOLINE, UART0, VIRTIO0};
use crate::proc::proc_mapstacks;
use crate::riscv::{
    make_satp, pa2pte, pgrounddown, pgroundup, pte2pa, px, sfence_vma, Register, Satp, MAXVA,
    PGSIZE,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u64 {
        const V = 1 << 0; // valid
        const R = 1 << 1;
        const W = 1 << 2;
        const X = 1 << 3;
        const U = 1 << 4; // user can access
        const G = 1 << 5;
        const A = 1 << 6;
        const D = 1 << 7;
    }
}

/// One page-table entry: physical page number above bit 10, flags below.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Pte(u64);

impl Pte {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn new(pa: usize, flags: PteFlags) -> Self {
        Self(pa2pte(pa) | flags.bits())
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn flags(self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0 & 0x3FF)
    }

    pub fn pa(self) -> usize {
        pte2pa(self.0)
    }

    pub fn is_valid(self) -> bool {
        self.flags().contains(PteFlags::V)
    }

    /// A valid entry with any of R/W/X maps a page; otherwise it points at
    /// the next level down.
    pub fn is_leaf(self) -> bool {
        self.is_valid() && self.flags().intersects(PteFlags::R | PteFlags::W | PteFlags::X)
    }
}

impl fmt::Debug for Pte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pte({:#x}, {:?})", self.pa(), self.flags())
    }
}

const PTES_PER_PAGE: usize = PGSIZE / core::mem::size_of::<Pte>();

#[repr(C, align(4096))]
struct PageTablePage {
    entries: [Pte; PTES_PER_PAGE],
}

const_assert_eq!(core::mem::size_of::<PageTablePage>(), PGSIZE);

/// A tree of page-table pages, identified by its root.
///
/// Every page in the tree came from the [`Kmem`] that was passed in when it
/// was created; [`PageTable::destroy`] gives them back.
pub struct PageTable {
    root: NonNull<PageTablePage>,
}

// The tree is only reachable through its owner.
unsafe impl Send for PageTable {}
unsafe impl Sync for PageTable {}

impl PageTable {
    /// An empty table: one zeroed root page.
    pub fn new(kmem: &Kmem) -> Result<Self> {
        let page = kmem.alloc().ok_or(KernelError::OutOfMemory)?;
        unsafe { ptr::write_bytes(page.as_ptr(), 0, PGSIZE) };
        Ok(Self { root: page.cast() })
    }

    /// Physical address of the root page, as loaded into satp.
    pub fn root(&self) -> usize {
        self.root.as_ptr() as usize
    }

    /// Return the PTE in this page table that corresponds to virtual
    /// address `va`. If `alloc` is given, create any required page-table
    /// pages from it.
    ///
    /// Errors: `BadAddress` for `va >= MAXVA`; `NotMapped` when an
    /// intermediate level is missing and no allocator was given;
    /// `OutOfMemory` when the allocator runs dry.
    pub fn walk(&mut self, va: usize, alloc: Option<&Kmem>) -> Result<&mut Pte> {
        unsafe { walk(self.root, va, alloc).map(|pte| &mut *pte) }
    }

    /// The valid leaf PTE for `va`, if there is one.
    pub fn lookup(&self, va: usize) -> Option<Pte> {
        let pte = unsafe { *walk(self.root, va, None).ok()? };
        pte.is_valid().then_some(pte)
    }

    /// Look up a virtual address, return the physical address it maps to,
    /// offset included.
    pub fn translate(&self, va: usize) -> Option<usize> {
        self.lookup(va).map(|pte| pte.pa() + (va - pgrounddown(va)))
    }

    /// Create PTEs for virtual addresses starting at va that refer to
    /// physical addresses starting at pa. The range is widened to whole
    /// pages: `va` and `pa` round down, `va + size` rounds up.
    ///
    /// Returns `BadAddress` without touching the table if any part of the
    /// range lies at or above MAXVA. Returns an error if walk() couldn't
    /// allocate a needed page-table page; pages mapped before that failure
    /// stay mapped.
    /// Panics if any page in the range is already mapped, or if size is 0.
    pub fn map_range(
        &mut self,
        kmem: &Kmem,
        va: usize,
        size: usize,
        pa: usize,
        perm: PteFlags,
    ) -> Result<()> {
        if size == 0 {
            panic!("mappages: size");
        }
        match va.checked_add(size) {
            Some(end) if end <= MAXVA => {}
            _ => return Err(KernelError::BadAddress(va)),
        }

        let mut a = pgrounddown(va);
        let last = pgrounddown(va + size - 1);
        let mut pa = pgrounddown(pa);
        loop {
            let pte = self.walk(a, Some(kmem))?;
            if pte.is_valid() {
                panic!("mappages: remap {:#x}", a);
            }
            *pte = Pte::new(pa, perm | PteFlags::V);
            if a == last {
                break;
            }
            a += PGSIZE;
            pa += PGSIZE;
        }
        Ok(())
    }

    /// Remove npages of mappings starting from va. va must be
    /// page-aligned. The mappings must exist.
    /// Optionally free the physical memory.
    pub fn unmap_range(&mut self, kmem: &Kmem, va: usize, npages: usize, free: bool) {
        if va % PGSIZE != 0 {
            panic!("uvmunmap: not aligned");
        }

        for a in (va..va + npages * PGSIZE).step_by(PGSIZE) {
            let pte = match self.walk(a, None) {
                Ok(pte) => pte,
                Err(_) => panic!("uvmunmap: walk {:#x}", a),
            };
            if !pte.is_valid() {
                panic!("uvmunmap: not mapped {:#x}", a);
            }
            if !pte.is_leaf() {
                panic!("uvmunmap: not a leaf");
            }
            if free {
                unsafe { kmem.free(pte.pa() as *mut u8) };
            }
            *pte = Pte::empty();
        }
    }

    /// Free every page-table page. All leaf mappings must already have
    /// been removed.
    pub fn destroy(self, kmem: &Kmem) {
        unsafe { freewalk(self.root, kmem) }
    }

    /// Free user memory pages `[0, sz)`, then free the page-table pages.
    pub fn uvm_free(mut self, kmem: &Kmem, sz: usize) {
        if sz > 0 {
            self.unmap_range(kmem, 0, pgroundup(sz) / PGSIZE, true);
        }
        self.destroy(kmem);
    }
}

unsafe fn walk(root: NonNull<PageTablePage>, va: usize, alloc: Option<&Kmem>) -> Result<*mut Pte> {
    if va >= MAXVA {
        return Err(KernelError::BadAddress(va));
    }

    let mut table = root.as_ptr();
    for level in (1..=2).rev() {
        let pte = &mut (*table).entries[px(level, va)];
        if pte.is_valid() {
            table = pte.pa() as *mut PageTablePage;
        } else {
            let kmem = alloc.ok_or(KernelError::NotMapped(va))?;
            let page = kmem.alloc().ok_or(KernelError::OutOfMemory)?;
            // Zero the new level before linking it in, so no walk ever sees
            // a table full of allocator junk.
            ptr::write_bytes(page.as_ptr(), 0, PGSIZE);
            *pte = Pte::new(page.as_ptr() as usize, PteFlags::V);
            log::trace!("walk: level {} table {:p} for va {:#x}", level - 1, page, va);
            table = page.as_ptr().cast();
        }
    }
    Ok(&mut (*table).entries[px(0, va)])
}

// Recursively free page-table pages.
unsafe fn freewalk(table: NonNull<PageTablePage>, kmem: &Kmem) {
    let table = table.as_ptr();
    for i in 0..PTES_PER_PAGE {
        let pte = (*table).entries[i];
        if pte.is_leaf() {
            panic!("freewalk: leaf");
        }
        if pte.is_valid() {
            // this PTE points to a lower-level page table.
            freewalk(NonNull::new_unchecked(pte.pa() as *mut PageTablePage), kmem);
            (*table).entries[i] = Pte::empty();
        }
    }
    kmem.free(table.cast());
}

/// the kernel's page table.
static KERNEL_PAGETABLE: Once<PageTable> = Once::new();

/// Make a direct-map page table for the kernel.
pub fn kvmmake(kmem: &Kmem, layout: &KernelLayout) -> PageTable {
    let mut kpgtbl = match PageTable::new(kmem) {
        Ok(pt) => pt,
        Err(e) => panic!("kvmmake: {}", e),
    };

    // uart registers
    kvmmap(&mut kpgtbl, kmem, UART0, UART0, PGSIZE, PteFlags::R | PteFlags::W);

    // map kernel text executable and read-only.
    kvmmap(
        &mut kpgtbl,
        kmem,
        layout.kernbase,
        layout.kernbase,
        layout.etext - layout.kernbase,
        PteFlags::R | PteFlags::X,
    );

    // map kernel data and the physical RAM we'll make use of.
    kvmmap(
        &mut kpgtbl,
        kmem,
        layout.etext,
        layout.etext,
        layout.phystop - layout.etext,
        PteFlags::R | PteFlags::W,
    );

    // PLIC
    kvmmap(&mut kpgtbl, kmem, PLIC, PLIC, PLIC_SIZE, PteFlags::R | PteFlags::W);

    // virtio mmio disk interface
    kvmmap(&mut kpgtbl, kmem, VIRTIO0, VIRTIO0, PGSIZE, PteFlags::R | PteFlags::W);

    // map the trampoline for trap entry/exit to
    // the highest virtual address in the kernel.
    kvmmap(
        &mut kpgtbl,
        kmem,
        TRAMPOLINE,
        layout.trampoline,
        PGSIZE,
        PteFlags::R | PteFlags::X,
    );

    // allocate and map a kernel stack for each process.
    proc_mapstacks(&mut kpgtbl, kmem);

    kpgtbl
}

/// add a mapping to the kernel page table.
/// only used when booting.
/// does not flush TLB or enable paging.
pub fn kvmmap(
    kpgtbl: &mut PageTable,
    kmem: &Kmem,
    va: usize,
    pa: usize,
    size: usize,
    perm: PteFlags,
) {
    if let Err(e) = kpgtbl.map_range(kmem, va, size, pa, perm) {
        panic!("kvmmap {:#x}: {}", va, e);
    }
}

/// Initialize the one kernel_pagetable.
pub fn kvminit(kmem: &Kmem, layout: &KernelLayout) {
    let kpgtbl = KERNEL_PAGETABLE.call_once(|| kvmmake(kmem, layout));
    log::info!("kvminit: kernel page table at {:#x}", kpgtbl.root());
}

pub fn kernel_pagetable() -> Option<&'static PageTable> {
    KERNEL_PAGETABLE.get()
}

/// Switch h/w page table register to the kernel's page table,
/// and enable paging.
pub fn kvminithart() {
    match KERNEL_PAGETABLE.get() {
        Some(kpgtbl) => install(kpgtbl),
        None => panic!("kvminithart: no kernel page table"),
    }
}

/// Point satp at `pagetable`, fenced on both sides.
pub fn install(pagetable: &PageTable) {
    // wait for any previous writes to the page table memory to finish.
    sfence_vma();

    unsafe { Satp::write(make_satp(pagetable.root())) };

    // flush stale entries from the TLB.
    sfence_vma();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::riscv::read;
    use crate::sim::{self, PageArena};

    fn arena_kmem(pages: usize) -> (PageArena, Kmem) {
        let arena = PageArena::new(pages);
        let kmem = Kmem::new();
        unsafe { kmem.init(arena.start(), arena.end()) };
        (arena, kmem)
    }

    #[test]
    fn walk_without_alloc_is_stable() {
        let (_arena, kmem) = arena_kmem(8);
        let mut pt = PageTable::new(&kmem).unwrap();
        let va = 0x4000_2000;

        assert_eq!(pt.walk(va, None).err(), Some(KernelError::NotMapped(va)));
        let created = pt.walk(va, Some(&kmem)).unwrap() as *mut Pte;
        let found = pt.walk(va, None).unwrap() as *mut Pte;
        let again = pt.walk(va, None).unwrap() as *mut Pte;
        assert_eq!(created, found);
        assert_eq!(found, again);
        // Root plus one page for each lower level.
        assert_eq!(kmem.free_pages(), 5);
    }

    #[test]
    fn walk_rejects_addresses_past_maxva() {
        let (_arena, kmem) = arena_kmem(4);
        let mut pt = PageTable::new(&kmem).unwrap();
        let free = kmem.free_pages();

        for va in (38..usize::BITS).map(|bit| 1usize << bit).chain([
            MAXVA | 0x1,
            MAXVA | 0x1234_5678,
            MAXVA | (MAXVA - 1),
            usize::MAX,
        ]) {
            assert_eq!(pt.walk(va, Some(&kmem)).err(), Some(KernelError::BadAddress(va)));
            assert_eq!(pt.walk(va, None).err(), Some(KernelError::BadAddress(va)));
            assert_eq!(pt.lookup(va), None);
        }
        assert_eq!(kmem.free_pages(), free);
    }

    #[test]
    fn map_range_rejects_overflowing_range() {
        let (_arena, kmem) = arena_kmem(4);
        let mut pt = PageTable::new(&kmem).unwrap();
        let free = kmem.free_pages();

        let va = usize::MAX - 10;
        assert_eq!(
            pt.map_range(&kmem, va, 100, 0x8000_0000, PteFlags::R),
            Err(KernelError::BadAddress(va))
        );
        assert_eq!(kmem.free_pages(), free);
    }

    #[test]
    fn map_range_straddling_maxva_maps_nothing() {
        let (_arena, kmem) = arena_kmem(8);
        let mut pt = PageTable::new(&kmem).unwrap();
        let free = kmem.free_pages();

        let va = MAXVA - PGSIZE;
        assert_eq!(
            pt.map_range(&kmem, va, 2 * PGSIZE, 0x8000_0000, PteFlags::R | PteFlags::W),
            Err(KernelError::BadAddress(va))
        );
        assert_eq!(pt.lookup(va), None);
        assert_eq!(kmem.free_pages(), free);

        // The last page below MAXVA on its own is fine.
        pt.map_range(&kmem, va, PGSIZE, 0x8000_0000, PteFlags::R).unwrap();
        assert_eq!(pt.translate(va), Some(0x8000_0000));
    }

    #[test]
    fn walk_reports_exhaustion() {
        let (_arena, kmem) = arena_kmem(2);
        let mut pt = PageTable::new(&kmem).unwrap();
        assert_eq!(pt.walk(0, Some(&kmem)).err(), Some(KernelError::OutOfMemory));
    }

    #[test]
    fn mapped_range_translates_page_by_page() {
        let (_arena, kmem) = arena_kmem(8);
        let mut pt = PageTable::new(&kmem).unwrap();
        let (va, pa) = (0x1000_0000, 0x8010_0000);

        pt.map_range(&kmem, va, 3 * PGSIZE, pa, PteFlags::R | PteFlags::W).unwrap();

        for i in 0..3 {
            let pte = pt.lookup(va + i * PGSIZE).unwrap();
            assert_eq!(pte.pa(), pa + i * PGSIZE);
            assert_eq!(pte.flags(), PteFlags::V | PteFlags::R | PteFlags::W);
        }
        assert_eq!(pt.translate(va + PGSIZE + 0x10), Some(pa + PGSIZE + 0x10));
        assert_eq!(pt.lookup(va + 3 * PGSIZE), None);
    }

    #[test]
    fn unaligned_request_covers_whole_pages() {
        let (_arena, kmem) = arena_kmem(8);
        let mut pt = PageTable::new(&kmem).unwrap();

        // Two bytes straddling a page boundary need two pages.
        pt.map_range(&kmem, 0x2fff, 2, 0x9000_0fff, PteFlags::R).unwrap();
        assert_eq!(pt.translate(0x2000), Some(0x9000_0000));
        assert_eq!(pt.translate(0x3000), Some(0x9000_1000));
        assert_eq!(pt.lookup(0x4000), None);
    }

    #[test]
    #[should_panic(expected = "remap")]
    fn mapping_twice_is_fatal() {
        let (_arena, kmem) = arena_kmem(8);
        let mut pt = PageTable::new(&kmem).unwrap();
        pt.map_range(&kmem, 0, 2 * PGSIZE, 0x8000_0000, PteFlags::R).unwrap();
        let _ = pt.map_range(&kmem, PGSIZE, PGSIZE, 0x8800_0000, PteFlags::R);
    }

    #[test]
    #[should_panic(expected = "mappages: size")]
    fn empty_mapping_is_fatal() {
        let (_arena, kmem) = arena_kmem(4);
        let mut pt = PageTable::new(&kmem).unwrap();
        let _ = pt.map_range(&kmem, 0, 0, 0, PteFlags::R);
    }

    #[test]
    fn unmap_then_destroy_returns_every_page() {
        let (_arena, kmem) = arena_kmem(16);
        let total = kmem.free_pages();
        let mut pt = PageTable::new(&kmem).unwrap();

        // Spans two level-0 tables.
        let va = 0x20_0000 - 2 * PGSIZE;
        pt.map_range(&kmem, va, 4 * PGSIZE, 0x8000_0000, PteFlags::R).unwrap();
        pt.unmap_range(&kmem, va, 4, false);
        assert_eq!(pt.lookup(va), None);

        pt.destroy(&kmem);
        assert_eq!(kmem.free_pages(), total);
    }

    #[test]
    fn uvm_free_releases_user_pages() {
        let (_arena, kmem) = arena_kmem(16);
        let total = kmem.free_pages();
        let mut pt = PageTable::new(&kmem).unwrap();

        for i in 0..2 {
            let page = kmem.alloc().unwrap().as_ptr() as usize;
            pt.map_range(&kmem, i * PGSIZE, PGSIZE, page, PteFlags::R | PteFlags::U)
                .unwrap();
        }
        pt.uvm_free(&kmem, PGSIZE + 1);
        assert_eq!(kmem.free_pages(), total);
    }

    #[test]
    #[should_panic(expected = "freewalk: leaf")]
    fn destroying_a_table_with_live_mappings_is_fatal() {
        let (_arena, kmem) = arena_kmem(8);
        let mut pt = PageTable::new(&kmem).unwrap();
        pt.map_range(&kmem, 0, PGSIZE, 0x8000_0000, PteFlags::R).unwrap();
        pt.destroy(&kmem);
    }

    #[test]
    fn install_fences_around_the_satp_write() {
        let (_arena, kmem) = arena_kmem(4);
        let pt = PageTable::new(&kmem).unwrap();
        let before = sim::sfence_count();

        install(&pt);

        assert_eq!(sim::sfence_count(), before + 2);
        assert_eq!(read::<Satp>(), make_satp(pt.root()));
    }
}
