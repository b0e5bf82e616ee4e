//! Volatile access to memory-mapped device registers.
//!
//! # Safety
//! Every function here dereferences `addr`; the caller guarantees it lies in
//! a mapped register window and is aligned for the access width.

use volatile::Volatile;

#[inline]
pub unsafe fn read32(addr: usize) -> u32 {
    (*(addr as *const Volatile<u32>)).read()
}

#[inline]
pub unsafe fn write32(addr: usize, value: u32) {
    (*(addr as *mut Volatile<u32>)).write(value)
}

#[inline]
pub unsafe fn read64(addr: usize) -> u64 {
    (*(addr as *const Volatile<u64>)).read()
}

#[inline]
pub unsafe fn write64(addr: usize, value: u64) {
    (*(addr as *mut Volatile<u64>)).write(value)
}

#[inline]
pub unsafe fn read8(addr: usize) -> u8 {
    (*(addr as *const Volatile<u8>)).read()
}

#[inline]
pub unsafe fn write8(addr: usize, value: u8) {
    (*(addr as *mut Volatile<u8>)).write(value)
}
