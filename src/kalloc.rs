//! Physical memory allocator, for user processes,
//! kernel stacks, page-table pages,
//! and pipe buffers. Allocates whole 4096-byte pages.

use core::ptr::{self, NonNull};

use spin::Once;

use crate::riscv::{pgroundup, PGSIZE};
use crate::spinlock::SpinLock;

// Junk patterns, to catch dangling references and use of uninitialised pages.
const JUNK_ALLOC: u8 = 5;
const JUNK_FREE: u8 = 1;

/// Free memory node, stored in the first bytes of the free page itself.
#[repr(C)]
struct Run {
    next: Option<NonNull<Run>>,
}

struct FreeList {
    head: Option<NonNull<Run>>,
}

// The list only links pages the allocator owns.
unsafe impl Send for FreeList {}

pub struct Kmem {
    freelist: SpinLock<FreeList>,
    range: Once<(usize, usize)>, // pages handed to init(), [start, end)
}

/// The allocator for all RAM between the kernel image and PHYSTOP.
pub static KMEM: Kmem = Kmem::new();

impl Kmem {
    pub const fn new() -> Self {
        Self {
            freelist: SpinLock::new("kmem", FreeList { head: None }),
            range: Once::new(),
        }
    }

    /// Hand every whole page in `[start, end)` to the allocator.
    ///
    /// # Safety
    /// The range is RAM that nothing else uses, for as long as the allocator
    /// lives. Called once.
    pub unsafe fn init(&self, start: usize, end: usize) {
        let start = pgroundup(start);
        let &(start, end) = self.range.call_once(|| (start, end));

        let mut p = start;
        while p + PGSIZE <= end {
            self.free(p as *mut u8);
            p += PGSIZE;
        }
        log::debug!("kalloc: {:#x}..{:#x}, {} pages", start, end, self.free_pages());
    }

    /// Allocate one 4096-byte page of physical memory.
    /// Returns `None` if the memory cannot be allocated.
    ///
    /// The page is filled with junk, not zeroed.
    pub fn alloc(&self) -> Option<NonNull<u8>> {
        let r = {
            let mut list = self.freelist.lock();
            let r = list.head?;
            list.head = unsafe { r.as_ref().next };
            r
        };

        let page = r.cast::<u8>();
        unsafe { ptr::write_bytes(page.as_ptr(), JUNK_ALLOC, PGSIZE) };
        Some(page)
    }

    /// Free the page of physical memory pointed at by pa,
    /// which normally should have been returned by a call to alloc().
    /// (The exception is when initializing the allocator; see init.)
    ///
    /// Panics if `pa` is not a page-aligned address inside the managed range.
    ///
    /// # Safety
    /// Nothing references the page any more, and it is not already free.
    pub unsafe fn free(&self, pa: *mut u8) {
        let (start, end) = match self.range.get() {
            Some(range) => *range,
            None => panic!("kfree: allocator not initialised"),
        };
        let addr = pa as usize;
        if addr % PGSIZE != 0 || addr < start || addr >= end {
            panic!("kfree: bad page {:#x}", addr);
        }

        // Fill with junk to catch dangling refs.
        ptr::write_bytes(pa, JUNK_FREE, PGSIZE);

        let mut r = NonNull::new_unchecked(pa.cast::<Run>());
        let mut list = self.freelist.lock();
        r.as_mut().next = list.head;
        list.head = Some(r);
    }

    /// Number of pages currently on the free list.
    pub fn free_pages(&self) -> usize {
        let list = self.freelist.lock();
        let mut n = 0;
        let mut r = list.head;
        while let Some(run) = r {
            n += 1;
            r = unsafe { run.as_ref().next };
        }
        n
    }
}

impl Default for Kmem {
    fn default() -> Self {
        Self::new()
    }
}
