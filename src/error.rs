use core::fmt;

/// Failures the memory and process primitives hand back to their caller.
///
/// Invariant violations (double mapping, foreign frees, lock misuse) are not
/// represented here: those panic on the spot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// The physical page allocator is exhausted.
    OutOfMemory,
    /// The virtual address is at or above `MAXVA`.
    BadAddress(usize),
    /// The walk reached an intermediate level that is not present.
    NotMapped(usize),
    /// Every process slot is in use.
    NoFreeProc,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::OutOfMemory => write!(f, "out of physical memory"),
            KernelError::BadAddress(va) => write!(f, "virtual address {:#x} out of range", va),
            KernelError::NotMapped(va) => write!(f, "virtual address {:#x} not mapped", va),
            KernelError::NoFreeProc => write!(f, "no free process slot"),
        }
    }
}

pub type Result<T> = core::result::Result<T, KernelError>;
