//! driver for qemu's virtio disk device.
//! uses qemu's mmio interface to virtio.
//!
//! qemu ... -drive file=fs.img,if=none,format=raw,id=x0 -device virtio-blk-device,drive=x0,bus=virtio-mmio-bus.0
//!
//! The virtio 1.1 document:
//! https://docs.oasis-open.org/virtio/virtio/v1.1/virtio-v1.1.pdf

use core::mem::size_of;
use core::ptr::{self, addr_of_mut};
use core::sync::atomic::{fence, Ordering};

use crate::kalloc::Kmem;
use crate::memlayout::VIRTIO0;
use crate::mmio;
use crate::riscv::PGSIZE;
use crate::spinlock::SpinLock;

// virtio mmio control registers, mapped starting at 0x10001000.
// from qemu virtio_mmio.h
const VIRTIO_MMIO_MAGIC_VALUE: usize = 0x000; // 0x74726976
const VIRTIO_MMIO_VERSION: usize = 0x004; // version; should be 2
const VIRTIO_MMIO_DEVICE_ID: usize = 0x008; // device type; 1 is net, 2 is disk
const VIRTIO_MMIO_VENDOR_ID: usize = 0x00c; // 0x554d4551
const VIRTIO_MMIO_DEVICE_FEATURES: usize = 0x010;
const VIRTIO_MMIO_DRIVER_FEATURES: usize = 0x020;
const VIRTIO_MMIO_QUEUE_SEL: usize = 0x030; // select queue, write-only
const VIRTIO_MMIO_QUEUE_NUM_MAX: usize = 0x034; // max size of current queue, read-only
const VIRTIO_MMIO_QUEUE_NUM: usize = 0x038; // size of current queue, write-only
const VIRTIO_MMIO_QUEUE_READY: usize = 0x044; // ready bit
const VIRTIO_MMIO_QUEUE_NOTIFY: usize = 0x050; // write-only
const VIRTIO_MMIO_INTERRUPT_STATUS: usize = 0x060; // read-only
const VIRTIO_MMIO_INTERRUPT_ACK: usize = 0x064; // write-only
const VIRTIO_MMIO_STATUS: usize = 0x070; // read/write
const VIRTIO_MMIO_QUEUE_DESC_LOW: usize = 0x080; // physical address for descriptor table, write-only
const VIRTIO_MMIO_QUEUE_DESC_HIGH: usize = 0x084;
const VIRTIO_MMIO_DRIVER_DESC_LOW: usize = 0x090; // physical address for available ring, write-only
const VIRTIO_MMIO_DRIVER_DESC_HIGH: usize = 0x094;
const VIRTIO_MMIO_DEVICE_DESC_LOW: usize = 0x0a0; // physical address for used ring, write-only
const VIRTIO_MMIO_DEVICE_DESC_HIGH: usize = 0x0a4;

const MAGIC: u32 = 0x7472_6976;
const VERSION: u32 = 2;
const DEVICE_ID_BLOCK: u32 = 2;
const VENDOR_ID_QEMU: u32 = 0x554d_4551;

// status register bits, from qemu virtio_config.h
const VIRTIO_CONFIG_S_ACKNOWLEDGE: u32 = 1;
const VIRTIO_CONFIG_S_DRIVER: u32 = 2;
const VIRTIO_CONFIG_S_DRIVER_OK: u32 = 4;
const VIRTIO_CONFIG_S_FEATURES_OK: u32 = 8;

// device feature bits
const VIRTIO_BLK_F_RO: u32 = 5; // Disk is read-only
const VIRTIO_BLK_F_SCSI: u32 = 7; // Supports scsi command passthru
const VIRTIO_BLK_F_CONFIG_WCE: u32 = 11; // Writeback mode available in config
const VIRTIO_BLK_F_MQ: u32 = 12; // support more than one vq
const VIRTIO_F_ANY_LAYOUT: u32 = 27;
const VIRTIO_RING_F_INDIRECT_DESC: u32 = 28;
const VIRTIO_RING_F_EVENT_IDX: u32 = 29;

/// this many virtio descriptors.
/// must be a power of two.
pub const NUM: usize = 8;

/// Bytes moved by one request.
pub const BSIZE: usize = 1024;

// descriptor flags
const VRING_DESC_F_NEXT: u16 = 1; // chained with another descriptor
const VRING_DESC_F_WRITE: u16 = 2; // device writes (vs read)

/// a single descriptor, from the virtio document.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct VirtqDesc {
    addr: u64,
    len: u32,
    flags: u16,
    next: u16,
}

/// the (entire) avail ring, from the virtio document.
#[repr(C)]
#[allow(dead_code)]
struct VirtqAvail {
    flags: u16,       // always zero
    idx: u16,         // driver will write ring[idx] next
    ring: [u16; NUM], // descriptor numbers of chain heads
    unused: u16,
}

/// one entry in the "used" ring, with which the
/// device tells the driver about completed requests.
#[repr(C)]
#[allow(dead_code)]
struct VirtqUsedElem {
    id: u32, // index of start of completed descriptor chain
    len: u32,
}

#[repr(C)]
#[allow(dead_code)]
struct VirtqUsed {
    flags: u16, // always zero
    idx: u16,   // device increments when it adds a ring[] entry
    ring: [VirtqUsedElem; NUM],
}

// these are specific to virtio block devices, e.g. disks,
// described in Section 5.2 of the virtio document.
const VIRTIO_BLK_T_IN: u32 = 0; // read the disk
const VIRTIO_BLK_T_OUT: u32 = 1; // write the disk

/// the format of the first descriptor in a disk request.
/// to be followed by two more descriptors containing
/// the block, and a one-byte status.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct VirtioBlkReq {
    type_: u32, // VIRTIO_BLK_T_IN or ..._OUT
    reserved: u32,
    sector: u64,
}

#[derive(Debug, Clone, Copy)]
struct Info {
    status: u8, // device writes 0 on success
    in_flight: bool,
    done: bool,
}

struct Disk {
    // a set (not a ring) of DMA descriptors, with which the
    // driver tells the device where to read and write individual
    // disk operations. there are NUM descriptors.
    desc: *mut VirtqDesc,

    // a ring in which the driver writes descriptor numbers
    // that the driver would like the device to process.
    avail: *mut VirtqAvail,

    // a ring in which the device writes descriptor numbers that
    // the device has finished processing.
    used: *mut VirtqUsed,

    free: [bool; NUM], // is a descriptor free?
    used_idx: u16,     // we've looked this far in used->ring.

    // track info about in-flight operations,
    // for use when completion interrupt arrives.
    // indexed by first descriptor index of chain.
    info: [Info; NUM],

    // disk command headers.
    // one-for-one with descriptors, for convenience.
    ops: [VirtioBlkReq; NUM],
}

// The rings are pages this driver allocated and shares only with the device.
unsafe impl Send for Disk {}

impl Disk {
    const fn new() -> Self {
        Self {
            desc: ptr::null_mut(),
            avail: ptr::null_mut(),
            used: ptr::null_mut(),
            free: [false; NUM],
            used_idx: 0,
            info: [Info {
                status: 0,
                in_flight: false,
                done: false,
            }; NUM],
            ops: [VirtioBlkReq {
                type_: 0,
                reserved: 0,
                sector: 0,
            }; NUM],
        }
    }

    /// find a free descriptor, mark it non-free, return its index.
    fn alloc_desc(&mut self) -> Option<usize> {
        let i = self.free.iter().position(|&free| free)?;
        self.free[i] = false;
        Some(i)
    }

    /// mark a descriptor as free.
    fn free_desc(&mut self, i: usize) {
        if i >= NUM {
            panic!("free_desc: index {}", i);
        }
        if self.free[i] {
            panic!("free_desc: descriptor {} already free", i);
        }
        unsafe {
            *self.desc.add(i) = VirtqDesc {
                addr: 0,
                len: 0,
                flags: 0,
                next: 0,
            };
        }
        self.free[i] = true;
    }

    /// free a chain of descriptors.
    fn free_chain(&mut self, mut i: usize) {
        loop {
            let desc = unsafe { *self.desc.add(i) };
            self.free_desc(i);
            if desc.flags & VRING_DESC_F_NEXT == 0 {
                break;
            }
            i = desc.next as usize;
        }
    }

    /// allocate three descriptors (they need not be contiguous).
    /// disk transfers always use three descriptors.
    fn alloc3_desc(&mut self) -> Option<[usize; 3]> {
        let mut idx = [0; 3];
        for i in 0..3 {
            match self.alloc_desc() {
                Some(d) => idx[i] = d,
                None => {
                    for &d in &idx[..i] {
                        self.free_desc(d);
                    }
                    return None;
                }
            }
        }
        Some(idx)
    }

    fn free_count(&self) -> usize {
        self.free.iter().filter(|&&free| free).count()
    }
}

pub struct VirtioBlk {
    base: usize,
    disk: SpinLock<Disk>,
}

/// The machine's disk.
pub static DISK: VirtioBlk = unsafe { VirtioBlk::new(VIRTIO0) };

/// Block-device interrupt service routine.
pub fn intr() {
    DISK.intr();
}

impl VirtioBlk {
    /// # Safety
    /// `base` is the start of a virtio mmio register window.
    pub const unsafe fn new(base: usize) -> Self {
        Self {
            base,
            disk: SpinLock::new("virtio_disk", Disk::new()),
        }
    }

    fn read_reg(&self, offset: usize) -> u32 {
        unsafe { mmio::read32(self.base + offset) }
    }

    fn write_reg(&self, offset: usize, value: u32) {
        unsafe { mmio::write32(self.base + offset, value) }
    }

    fn write_addr(&self, low: usize, high: usize, addr: usize) {
        self.write_reg(low, addr as u32);
        self.write_reg(high, (addr as u64 >> 32) as u32);
    }

    /// Check the device is a virtio disk, negotiate features, and hand it
    /// queue 0. Any mismatch is fatal.
    pub fn init(&self, kmem: &Kmem) {
        let mut disk = self.disk.lock();

        if self.read_reg(VIRTIO_MMIO_MAGIC_VALUE) != MAGIC
            || self.read_reg(VIRTIO_MMIO_VERSION) != VERSION
            || self.read_reg(VIRTIO_MMIO_DEVICE_ID) != DEVICE_ID_BLOCK
            || self.read_reg(VIRTIO_MMIO_VENDOR_ID) != VENDOR_ID_QEMU
        {
            panic!("could not find virtio disk");
        }

        let mut status = 0;

        // reset device
        self.write_reg(VIRTIO_MMIO_STATUS, status);

        // set ACKNOWLEDGE status bit
        status |= VIRTIO_CONFIG_S_ACKNOWLEDGE;
        self.write_reg(VIRTIO_MMIO_STATUS, status);

        // set DRIVER status bit
        status |= VIRTIO_CONFIG_S_DRIVER;
        self.write_reg(VIRTIO_MMIO_STATUS, status);

        // negotiate features
        let mut features = self.read_reg(VIRTIO_MMIO_DEVICE_FEATURES);
        for bit in [
            VIRTIO_BLK_F_RO,
            VIRTIO_BLK_F_SCSI,
            VIRTIO_BLK_F_CONFIG_WCE,
            VIRTIO_BLK_F_MQ,
            VIRTIO_F_ANY_LAYOUT,
            VIRTIO_RING_F_EVENT_IDX,
            VIRTIO_RING_F_INDIRECT_DESC,
        ] {
            features &= !(1 << bit);
        }
        self.write_reg(VIRTIO_MMIO_DRIVER_FEATURES, features);

        // tell device that feature negotiation is complete.
        status |= VIRTIO_CONFIG_S_FEATURES_OK;
        self.write_reg(VIRTIO_MMIO_STATUS, status);

        // re-read status to ensure FEATURES_OK is set.
        status = self.read_reg(VIRTIO_MMIO_STATUS);
        if status & VIRTIO_CONFIG_S_FEATURES_OK == 0 {
            panic!("virtio disk FEATURES_OK unset");
        }

        // initialize queue 0.
        self.write_reg(VIRTIO_MMIO_QUEUE_SEL, 0);

        // ensure queue 0 is not in use.
        if self.read_reg(VIRTIO_MMIO_QUEUE_READY) != 0 {
            panic!("virtio disk should not be ready");
        }

        // check maximum queue size.
        let max = self.read_reg(VIRTIO_MMIO_QUEUE_NUM_MAX);
        if max == 0 {
            panic!("virtio disk has no queue 0");
        }
        if (max as usize) < NUM {
            panic!("virtio disk max queue too short");
        }

        // allocate and zero queue memory.
        let page = || match kmem.alloc() {
            Some(p) => {
                unsafe { ptr::write_bytes(p.as_ptr(), 0, PGSIZE) };
                p.as_ptr()
            }
            None => panic!("virtio disk kalloc"),
        };
        disk.desc = page().cast();
        disk.avail = page().cast();
        disk.used = page().cast();

        // set queue size.
        self.write_reg(VIRTIO_MMIO_QUEUE_NUM, NUM as u32);

        // write physical addresses.
        self.write_addr(VIRTIO_MMIO_QUEUE_DESC_LOW, VIRTIO_MMIO_QUEUE_DESC_HIGH, disk.desc as usize);
        self.write_addr(VIRTIO_MMIO_DRIVER_DESC_LOW, VIRTIO_MMIO_DRIVER_DESC_HIGH, disk.avail as usize);
        self.write_addr(VIRTIO_MMIO_DEVICE_DESC_LOW, VIRTIO_MMIO_DEVICE_DESC_HIGH, disk.used as usize);

        // queue is ready.
        self.write_reg(VIRTIO_MMIO_QUEUE_READY, 1);

        // all NUM descriptors start out unused.
        disk.free = [true; NUM];

        // tell device we're completely ready.
        status |= VIRTIO_CONFIG_S_DRIVER_OK;
        self.write_reg(VIRTIO_MMIO_STATUS, status);

        log::info!("virtio disk: queue of {} descriptors", NUM);
    }

    /// Queue one BSIZE transfer between `buf` and disk sector `sector`.
    ///
    /// Returns the request id to pass to [`VirtioBlk::finish`], or `None`
    /// when fewer than three descriptors are free.
    ///
    /// # Safety
    /// `buf` points to BSIZE bytes that stay valid, and that nothing else
    /// touches, until `finish` reports the request done.
    pub unsafe fn submit(&self, sector: u64, buf: *mut u8, write: bool) -> Option<usize> {
        let mut guard = self.disk.lock();
        let disk = &mut *guard;
        if disk.desc.is_null() {
            panic!("virtio disk: submit before init");
        }

        // Section 5.2 of the virtio document says that legacy block operations use
        // three descriptors: one for type/reserved/sector, one for the
        // data, one for a 1-byte status result.
        let idx = disk.alloc3_desc()?;

        // format the three descriptors.
        // qemu's virtio-blk.c reads them.
        disk.ops[idx[0]] = VirtioBlkReq {
            type_: if write { VIRTIO_BLK_T_OUT } else { VIRTIO_BLK_T_IN },
            reserved: 0,
            sector,
        };

        *disk.desc.add(idx[0]) = VirtqDesc {
            addr: addr_of_mut!(disk.ops[idx[0]]) as u64,
            len: size_of::<VirtioBlkReq>() as u32,
            flags: VRING_DESC_F_NEXT,
            next: idx[1] as u16,
        };

        *disk.desc.add(idx[1]) = VirtqDesc {
            addr: buf as u64,
            len: BSIZE as u32,
            flags: if write {
                VRING_DESC_F_NEXT // device reads buf
            } else {
                VRING_DESC_F_NEXT | VRING_DESC_F_WRITE // device writes buf
            },
            next: idx[2] as u16,
        };

        disk.info[idx[0]] = Info {
            status: 0xff, // device writes 0 on success
            in_flight: true,
            done: false,
        };
        *disk.desc.add(idx[2]) = VirtqDesc {
            addr: addr_of_mut!(disk.info[idx[0]].status) as u64,
            len: 1,
            flags: VRING_DESC_F_WRITE, // device writes the status
            next: 0,
        };

        // tell the device the first index in our chain of descriptors.
        let avail = disk.avail;
        let slot = (*avail).idx as usize % NUM;
        (*avail).ring[slot] = idx[0] as u16;

        fence(Ordering::SeqCst);

        // tell the device another avail ring entry is available.
        ptr::write_volatile(addr_of_mut!((*avail).idx), (*avail).idx.wrapping_add(1)); // not % NUM

        fence(Ordering::SeqCst);

        self.write_reg(VIRTIO_MMIO_QUEUE_NOTIFY, 0); // value is queue number

        Some(idx[0])
    }

    /// If request `id` has completed, release its descriptors and return
    /// true. The request's buffer then belongs to the caller again.
    pub fn finish(&self, id: usize) -> bool {
        let mut disk = self.disk.lock();
        let info = disk.info[id];
        if !info.in_flight {
            panic!("virtio disk: request {} not in flight", id);
        }
        if !info.done {
            return false;
        }
        disk.info[id].in_flight = false;
        disk.info[id].done = false;
        disk.free_chain(id);
        true
    }

    /// Acknowledge the device and mark every request it has put on the
    /// used ring as done.
    pub fn intr(&self) {
        let mut disk = self.disk.lock();
        if disk.used.is_null() {
            log::warn!("virtio disk: interrupt before init");
            return;
        }

        // the device won't raise another interrupt until we tell it
        // we've seen this interrupt, which the following line does.
        // this may race with the device writing new entries to
        // the "used" ring, in which case we may process the new
        // completion entries in this interrupt, and have nothing to do
        // in the next interrupt, which is harmless.
        self.write_reg(
            VIRTIO_MMIO_INTERRUPT_ACK,
            self.read_reg(VIRTIO_MMIO_INTERRUPT_STATUS) & 0x3,
        );

        fence(Ordering::SeqCst);

        // the device increments disk.used->idx when it
        // adds an entry to the used ring.
        let used = disk.used;
        while disk.used_idx != unsafe { ptr::read_volatile(addr_of_mut!((*used).idx)) } {
            fence(Ordering::SeqCst);
            let id = unsafe { (*used).ring[disk.used_idx as usize % NUM].id } as usize;
            if id >= NUM {
                panic!("virtio_disk_intr id {}", id);
            }

            if disk.info[id].status != 0 {
                panic!("virtio_disk_intr status");
            }
            disk.info[id].done = true;

            disk.used_idx = disk.used_idx.wrapping_add(1);
        }
    }

    /// Number of unused descriptors.
    pub fn free_descriptors(&self) -> usize {
        self.disk.lock().free_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{MmioWindow, PageArena};

    fn qemu_disk() -> MmioWindow {
        let regs = MmioWindow::new(0x100);
        regs.write32(VIRTIO_MMIO_MAGIC_VALUE, MAGIC);
        regs.write32(VIRTIO_MMIO_VERSION, VERSION);
        regs.write32(VIRTIO_MMIO_DEVICE_ID, DEVICE_ID_BLOCK);
        regs.write32(VIRTIO_MMIO_VENDOR_ID, VENDOR_ID_QEMU);
        regs.write32(VIRTIO_MMIO_DEVICE_FEATURES, u32::MAX);
        regs.write32(VIRTIO_MMIO_QUEUE_NUM_MAX, NUM as u32);
        regs
    }

    fn arena_kmem(pages: usize) -> (PageArena, Kmem) {
        let arena = PageArena::new(pages);
        let kmem = Kmem::new();
        unsafe { kmem.init(arena.start(), arena.end()) };
        (arena, kmem)
    }

    fn read_addr(regs: &MmioWindow, low: usize, high: usize) -> usize {
        (regs.read32(low) as usize) | ((regs.read32(high) as usize) << 32)
    }

    /// Play the device: complete chain `head` with status 0.
    unsafe fn complete(blk: &VirtioBlk, head: usize) {
        let disk = blk.disk.lock();
        let status = (*disk.desc.add((*disk.desc.add((*disk.desc.add(head)).next as usize)).next as usize)).addr;
        *(status as *mut u8) = 0;
        let used = disk.used;
        let slot = (*used).idx as usize % NUM;
        (*used).ring[slot].id = head as u32;
        (*used).idx += 1;
    }

    #[test]
    fn init_negotiates_and_installs_queue() {
        let regs = qemu_disk();
        let (_arena, kmem) = arena_kmem(4);
        let blk = unsafe { VirtioBlk::new(regs.base()) };

        blk.init(&kmem);

        let status = regs.read32(VIRTIO_MMIO_STATUS);
        assert_eq!(
            status,
            VIRTIO_CONFIG_S_ACKNOWLEDGE
                | VIRTIO_CONFIG_S_DRIVER
                | VIRTIO_CONFIG_S_FEATURES_OK
                | VIRTIO_CONFIG_S_DRIVER_OK
        );
        let features = regs.read32(VIRTIO_MMIO_DRIVER_FEATURES);
        assert_eq!(features & (1 << VIRTIO_BLK_F_RO), 0);
        assert_eq!(features & (1 << VIRTIO_RING_F_EVENT_IDX), 0);
        assert_ne!(features & 1, 0);
        assert_eq!(regs.read32(VIRTIO_MMIO_QUEUE_NUM), NUM as u32);
        assert_eq!(regs.read32(VIRTIO_MMIO_QUEUE_READY), 1);

        let disk = blk.disk.lock();
        assert_eq!(
            read_addr(&regs, VIRTIO_MMIO_QUEUE_DESC_LOW, VIRTIO_MMIO_QUEUE_DESC_HIGH),
            disk.desc as usize
        );
        assert_eq!(
            read_addr(&regs, VIRTIO_MMIO_DEVICE_DESC_LOW, VIRTIO_MMIO_DEVICE_DESC_HIGH),
            disk.used as usize
        );
        assert_eq!(disk.free_count(), NUM);
    }

    #[test]
    #[should_panic(expected = "could not find virtio disk")]
    fn wrong_magic_is_fatal() {
        let regs = qemu_disk();
        regs.write32(VIRTIO_MMIO_MAGIC_VALUE, 0x1234);
        let (_arena, kmem) = arena_kmem(4);
        unsafe { VirtioBlk::new(regs.base()) }.init(&kmem);
    }

    #[test]
    #[should_panic(expected = "could not find virtio disk")]
    fn network_device_is_fatal() {
        let regs = qemu_disk();
        regs.write32(VIRTIO_MMIO_DEVICE_ID, 1);
        let (_arena, kmem) = arena_kmem(4);
        unsafe { VirtioBlk::new(regs.base()) }.init(&kmem);
    }

    #[test]
    fn request_completes_through_the_used_ring() {
        let regs = qemu_disk();
        let (_arena, kmem) = arena_kmem(4);
        let blk = unsafe { VirtioBlk::new(regs.base()) };
        blk.init(&kmem);
        let mut buf = [0u8; BSIZE];

        let id = unsafe { blk.submit(42, buf.as_mut_ptr(), false) }.unwrap();
        assert_eq!(blk.free_descriptors(), NUM - 3);
        {
            let disk = blk.disk.lock();
            assert_eq!(disk.ops[id].sector, 42);
            assert_eq!(disk.ops[id].type_, VIRTIO_BLK_T_IN);
            unsafe {
                assert_eq!((*disk.avail).idx, 1);
                assert_eq!((*disk.avail).ring[0] as usize, id);
                let data = *disk.desc.add((*disk.desc.add(id)).next as usize);
                assert_eq!(data.addr, buf.as_ptr() as u64);
                assert_eq!(data.flags, VRING_DESC_F_NEXT | VRING_DESC_F_WRITE);
            }
        }
        assert!(!blk.finish(id));

        unsafe { complete(&blk, id) };
        blk.intr();

        assert!(blk.finish(id));
        assert_eq!(blk.free_descriptors(), NUM);
    }

    #[test]
    fn submit_backs_off_when_descriptors_run_out() {
        let regs = qemu_disk();
        let (_arena, kmem) = arena_kmem(4);
        let blk = unsafe { VirtioBlk::new(regs.base()) };
        blk.init(&kmem);
        let mut bufs = [[0u8; BSIZE]; 3];

        let first = unsafe { blk.submit(0, bufs[0].as_mut_ptr(), true) };
        let second = unsafe { blk.submit(2, bufs[1].as_mut_ptr(), true) };
        assert!(first.is_some() && second.is_some());
        // 8 - 6 = 2 left: not enough for a third request, and none leak.
        assert_eq!(unsafe { blk.submit(4, bufs[2].as_mut_ptr(), true) }, None);
        assert_eq!(blk.free_descriptors(), 2);
    }

    #[test]
    #[should_panic(expected = "virtio_disk_intr status")]
    fn failed_request_is_fatal() {
        let regs = qemu_disk();
        let (_arena, kmem) = arena_kmem(4);
        let blk = unsafe { VirtioBlk::new(regs.base()) };
        blk.init(&kmem);
        let mut buf = [0u8; BSIZE];

        let id = unsafe { blk.submit(0, buf.as_mut_ptr(), false) }.unwrap();
        unsafe {
            let disk = blk.disk.lock();
            let used = disk.used;
            (*used).ring[0].id = id as u32;
            (*used).idx = 1;
        }
        blk.intr();
    }

    #[test]
    #[should_panic(expected = "virtio_disk_intr id 200")]
    fn used_ring_id_out_of_range_is_fatal() {
        let regs = qemu_disk();
        let (_arena, kmem) = arena_kmem(4);
        let blk = unsafe { VirtioBlk::new(regs.base()) };
        blk.init(&kmem);

        unsafe {
            let disk = blk.disk.lock();
            let used = disk.used;
            (*used).ring[0].id = 200;
            (*used).idx = 1;
        }
        blk.intr();
    }
}
