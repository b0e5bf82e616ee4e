use core::cell::UnsafeCell;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};

use cfg_if::cfg_if;
use static_assertions::const_assert;

use crate::error::{KernelError, Result};
use crate::kalloc::Kmem;
use crate::memlayout::{kstack, TRAMPOLINE, TRAPFRAME};
use crate::param::NPROC;
use crate::riscv::{Register, Tp, PGSIZE};
use crate::spinlock::SpinLock;
use crate::vm::{kvmmap, PageTable, PteFlags};

/// Saved registers for kernel context switches.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Context {
    pub ra: u64,
    pub sp: u64,

    // callee-saved
    pub s0: u64,
    pub s1: u64,
    pub s2: u64,
    pub s3: u64,
    pub s4: u64,
    pub s5: u64,
    pub s6: u64,
    pub s7: u64,
    pub s8: u64,
    pub s9: u64,
    pub s10: u64,
    pub s11: u64,
}

impl Context {
    pub const fn zeroed() -> Self {
        Self {
            ra: 0,
            sp: 0,
            s0: 0,
            s1: 0,
            s2: 0,
            s3: 0,
            s4: 0,
            s5: 0,
            s6: 0,
            s7: 0,
            s8: 0,
            s9: 0,
            s10: 0,
            s11: 0,
        }
    }
}

/// Whether a hart is inside the supervisor trap handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TrapState {
    Idle = 0,
    InTrap = 1,
}

const NO_PROC: usize = usize::MAX;

/// Per-CPU state.
///
/// Only the owning hart touches its descriptor, and only with interrupts
/// off, so the atomics here are for interior mutability, not ordering.
pub struct Cpu {
    proc: AtomicUsize,               // slot of the process running on this cpu
    pub context: UnsafeCell<Context>, // swtch() here to enter the scheduler
    pub noff: AtomicU32,             // Depth of push_off() nesting.
    pub intena: AtomicBool,          // Were interrupts enabled before push_off()?
    trap_state: AtomicU8,
}

unsafe impl Sync for Cpu {}

impl Cpu {
    pub const fn new() -> Self {
        Self {
            proc: AtomicUsize::new(NO_PROC),
            context: UnsafeCell::new(Context::zeroed()),
            noff: AtomicU32::new(0),
            intena: AtomicBool::new(false),
            trap_state: AtomicU8::new(TrapState::Idle as u8),
        }
    }

    pub fn proc(&self) -> Option<usize> {
        match self.proc.load(Ordering::Relaxed) {
            NO_PROC => None,
            slot => Some(slot),
        }
    }

    pub fn set_proc(&self, slot: Option<usize>) {
        self.proc.store(slot.unwrap_or(NO_PROC), Ordering::Relaxed);
    }

    pub fn trap_state(&self) -> TrapState {
        match self.trap_state.load(Ordering::Relaxed) {
            0 => TrapState::Idle,
            _ => TrapState::InTrap,
        }
    }

    /// Idle -> InTrap. A trap taken while already InTrap means the handler
    /// itself faulted.
    pub fn enter_trap(&self) {
        if self.trap_state() == TrapState::InTrap {
            panic!("kerneltrap: nested trap");
        }
        self.trap_state.store(TrapState::InTrap as u8, Ordering::Relaxed);
    }

    pub fn leave_trap(&self) {
        self.trap_state.store(TrapState::Idle as u8, Ordering::Relaxed);
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

/// This hart's id.
///
/// Reads `tp`, which start() loaded from mhartid. Must be called with
/// interrupts disabled once a scheduler can move code between harts.
#[inline]
pub fn cpuid() -> usize {
    Tp::read() as usize
}

cfg_if! {
    if #[cfg(all(target_arch = "riscv64", target_os = "none"))] {
        use crate::param::NCPU;

        const CPU_INIT: Cpu = Cpu::new();
        static CPUS: [Cpu; NCPU] = [CPU_INIT; NCPU];

        /// Return this CPU's cpu struct.
        /// Interrupts must be disabled.
        pub fn mycpu() -> &'static Cpu {
            &CPUS[cpuid()]
        }
    } else {
        /// Return this CPU's cpu struct. Each host thread is its own hart.
        pub fn mycpu() -> &'static Cpu {
            crate::sim::this_cpu()
        }
    }
}

/// Per-process state for the trampoline: user registers plus what the
/// kernel needs to get back into itself.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct TrapFrame {
    /*   0 */ pub kernel_satp: u64, // kernel page table
    /*   8 */ pub kernel_sp: u64, // top of process's kernel stack
    /*  16 */ pub kernel_trap: u64, // usertrap()
    /*  24 */ pub epc: u64, // saved user program counter
    /*  32 */ pub kernel_hartid: u64, // saved kernel tp
    /*  40 */ pub ra: u64,
    /*  48 */ pub sp: u64,
    /*  56 */ pub gp: u64,
    /*  64 */ pub tp: u64,
    /*  72 */ pub t0: u64,
    /*  80 */ pub t1: u64,
    /*  88 */ pub t2: u64,
    /*  96 */ pub s0: u64,
    /* 104 */ pub s1: u64,
    /* 112 */ pub a0: u64,
    /* 120 */ pub a1: u64,
    /* 128 */ pub a2: u64,
    /* 136 */ pub a3: u64,
    /* 144 */ pub a4: u64,
    /* 152 */ pub a5: u64,
    /* 160 */ pub a6: u64,
    /* 168 */ pub a7: u64,
    /* 176 */ pub s2: u64,
    /* 184 */ pub s3: u64,
    /* 192 */ pub s4: u64,
    /* 200 */ pub s5: u64,
    /* 208 */ pub s6: u64,
    /* 216 */ pub s7: u64,
    /* 224 */ pub s8: u64,
    /* 232 */ pub s9: u64,
    /* 240 */ pub s10: u64,
    /* 248 */ pub s11: u64,
    /* 256 */ pub t3: u64,
    /* 264 */ pub t4: u64,
    /* 272 */ pub t5: u64,
    /* 280 */ pub t6: u64,
}

const_assert!(core::mem::size_of::<TrapFrame>() == 288);
const_assert!(core::mem::size_of::<TrapFrame>() <= PGSIZE);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    /// Free slot.
    Inited,
    /// Claimed: trap frame and page table prepared, kernel stack mapped.
    Picked,
    Sleeping,
    Runnable,
    Running,
    Zombie,
}

/// Fields that may only be read or written with the process lock held.
#[derive(Debug)]
pub struct ProcInner {
    pub state: ProcState,
    pub chan: usize, // If non-zero, sleeping on chan
    pub killed: bool,
    pub xstate: i32, // Exit status to be returned to parent's wait
    pub pid: i32,
    pub parent: Option<usize>,
}

impl ProcInner {
    const fn new() -> Self {
        Self {
            state: ProcState::Inited,
            chan: 0,
            killed: false,
            xstate: 0,
            pid: 0,
            parent: None,
        }
    }
}

/// Fields private to whoever owns the slot; no lock needed.
pub struct ProcPrivate {
    pub sz: usize, // Size of process memory (bytes)
    pub pagetable: Option<PageTable>,
    pub trapframe: Option<NonNull<TrapFrame>>, // data page for trampoline
    pub context: Context, // swtch() here to run process
}

impl ProcPrivate {
    const fn new() -> Self {
        Self {
            sz: 0,
            pagetable: None,
            trapframe: None,
            context: Context::zeroed(),
        }
    }
}

/// Per-process state
pub struct Proc {
    pub inner: SpinLock<ProcInner>,
    private: UnsafeCell<ProcPrivate>,
}

// `private` is only touched by the slot's owner; see Proc::private.
unsafe impl Sync for Proc {}
unsafe impl Send for Proc {}

impl Proc {
    const fn new() -> Self {
        Self {
            inner: SpinLock::new("proc", ProcInner::new()),
            private: UnsafeCell::new(ProcPrivate::new()),
        }
    }

    pub fn state(&self) -> ProcState {
        self.inner.lock().state
    }

    pub fn pid(&self) -> i32 {
        self.inner.lock().pid
    }

    /// # Safety
    /// The caller owns the slot (it picked it and has not freed it) and
    /// holds no other reference into the private fields.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn private(&self) -> &mut ProcPrivate {
        &mut *self.private.get()
    }

    /// Give a freshly picked slot its trap frame, page table and context.
    /// `kstack` is the slot's kernel stack.
    unsafe fn prepare(&self, kstack: usize, kmem: &Kmem, trampoline: usize) -> Result<()> {
        let private = self.private();

        // Allocate a trapframe page.
        let tf = kmem.alloc().ok_or(KernelError::OutOfMemory)?;
        ptr::write_bytes(tf.as_ptr(), 0, PGSIZE);
        let tf = tf.cast::<TrapFrame>();
        private.trapframe = Some(tf);

        // An empty user page table.
        private.pagetable = Some(proc_pagetable(kmem, tf.as_ptr() as usize, trampoline)?);
        private.sz = 0;

        // Set up new context to start executing on the top of the kernel stack.
        private.context = Context::zeroed();
        private.context.sp = (kstack + PGSIZE) as u64;
        Ok(())
    }
}

/// Fixed-capacity arena of process slots, indexed by slot number.
/// Built in place: the table is far larger than a boot stack.
pub struct ProcTable {
    procs: [Proc; NPROC],
    next_pid: SpinLock<i32>,
}

impl ProcTable {
    pub const fn new() -> Self {
        Self {
            procs: [const { Proc::new() }; NPROC],
            next_pid: SpinLock::new("nextpid", 1),
        }
    }

    /// Virtual address of the kernel stack of `slot`.
    pub const fn kstack(&self, slot: usize) -> usize {
        kstack(slot)
    }

    pub fn get(&self, slot: usize) -> &Proc {
        &self.procs[slot]
    }

    fn alloc_pid(&self) -> i32 {
        let mut next = self.next_pid.lock();
        let pid = *next;
        *next += 1;
        pid
    }

    /// Look in the process table for an Inited slot. If found, claim it
    /// and prepare the state required to run in the kernel: a trap frame,
    /// a page table with the trampoline and trap frame mapped, and a
    /// context on the slot's kernel stack.
    ///
    /// Returns the slot index, now Picked.
    pub fn alloc(&self, kmem: &Kmem, trampoline: usize) -> Result<usize> {
        for (slot, p) in self.procs.iter().enumerate() {
            {
                let mut inner = p.inner.lock();
                if inner.state != ProcState::Inited {
                    continue;
                }
                inner.pid = self.alloc_pid();
                inner.state = ProcState::Picked;
            }

            // The slot is ours now.
            return match unsafe { p.prepare(kstack(slot), kmem, trampoline) } {
                Ok(()) => Ok(slot),
                Err(e) => {
                    self.free(slot, kmem);
                    Err(e)
                }
            };
        }
        Err(KernelError::NoFreeProc)
    }

    /// Free a slot and the data hanging from it, including user pages.
    pub fn free(&self, slot: usize, kmem: &Kmem) {
        let p = &self.procs[slot];
        let mut inner = p.inner.lock();
        if inner.state == ProcState::Inited {
            panic!("freeproc: slot {} not in use", slot);
        }

        let private = unsafe { p.private() };
        if let Some(tf) = private.trapframe.take() {
            unsafe { kmem.free(tf.as_ptr().cast()) };
        }
        if let Some(pagetable) = private.pagetable.take() {
            proc_freepagetable(pagetable, kmem, private.sz);
        }
        private.sz = 0;
        private.context = Context::zeroed();

        *inner = ProcInner::new();
    }

    /// Print a process listing to the console. For debugging.
    /// Runs when user types ^P on console.
    pub fn dump(&self) {
        crate::println!();
        for (slot, p) in self.procs.iter().enumerate() {
            let inner = p.inner.lock();
            if inner.state == ProcState::Inited {
                continue;
            }
            crate::println!("{} {} {:?}", slot, inner.pid, inner.state);
        }
    }
}

impl Default for ProcTable {
    fn default() -> Self {
        Self::new()
    }
}

pub static PROCS: ProcTable = ProcTable::new();

/// initialize the proc table.
pub fn procinit() {
    log::info!("procinit: {} process slots", NPROC);
}

/// Allocate a page for each process's kernel stack.
/// Map it high in memory, followed by an invalid guard page.
pub fn proc_mapstacks(kpgtbl: &mut PageTable, kmem: &Kmem) {
    for slot in 0..NPROC {
        let pa = match kmem.alloc() {
            Some(pa) => pa,
            None => panic!("proc_mapstacks: kalloc"),
        };
        kvmmap(
            kpgtbl,
            kmem,
            kstack(slot),
            pa.as_ptr() as usize,
            PGSIZE,
            PteFlags::R | PteFlags::W,
        );
    }
}

/// Create a user page table for a given process, with no user memory,
/// but with the trampoline and trap frame pages.
pub fn proc_pagetable(kmem: &Kmem, trapframe: usize, trampoline: usize) -> Result<PageTable> {
    let mut pagetable = PageTable::new(kmem)?;

    // map the trampoline code (for system call return)
    // at the highest user virtual address.
    // only the supervisor uses it, on the way
    // to/from user space, so not PTE_U.
    if let Err(e) = pagetable.map_range(
        kmem,
        TRAMPOLINE,
        PGSIZE,
        trampoline,
        PteFlags::R | PteFlags::X,
    ) {
        pagetable.destroy(kmem);
        return Err(e);
    }

    // map the trapframe page just below the trampoline page, for
    // trampoline.s.
    if let Err(e) = pagetable.map_range(
        kmem,
        TRAPFRAME,
        PGSIZE,
        trapframe,
        PteFlags::R | PteFlags::W,
    ) {
        pagetable.unmap_range(kmem, TRAMPOLINE, 1, false);
        pagetable.destroy(kmem);
        return Err(e);
    }

    Ok(pagetable)
}

/// Free a process's page table, and free the
/// physical memory it refers to.
pub fn proc_freepagetable(mut pagetable: PageTable, kmem: &Kmem, sz: usize) {
    pagetable.unmap_range(kmem, TRAMPOLINE, 1, false);
    pagetable.unmap_range(kmem, TRAPFRAME, 1, false);
    pagetable.uvm_free(kmem, sz);
}
