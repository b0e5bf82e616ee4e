//! Supervisor trap handling.
//!
//! kernelvec (kernelvec.s) saves the interrupted registers and calls
//! [`kerneltrap`], which classifies `scause` and hands interrupts to
//! [`devintr`]. Exceptions taken in the kernel are fatal.

use crate::memlayout::{UART0_IRQ, VIRTIO0_IRQ};
use crate::param::TICK_HART;
use crate::plic::{InterruptController, PLIC0};
use crate::proc::{cpuid, mycpu, ProcState, PROCS};
use crate::riscv::{
    clear, intr_get, Register, Scause, Sepc, Sip, Sstatus, Stval, Stvec, SCAUSE_INTERRUPT,
    SIP_SSIP, SSTATUS_SPP,
};
use crate::spinlock::SpinLock;

/// Interrupt codes in scause.
pub const IRQ_S_SOFT: u64 = 1;
pub const IRQ_S_TIMER: u64 = 5;
pub const IRQ_S_EXT: u64 = 9;

/// Timer ticks since boot, counted on [`TICK_HART`].
pub static TICKS: SpinLock<u64> = SpinLock::new("time", 0);

/// One external interrupt source and its service routine.
pub struct IrqRoute {
    pub irq: u32,
    pub name: &'static str,
    pub isr: fn(),
}

/// Devices this kernel serves.
pub static ROUTES: [IrqRoute; 2] = [
    IrqRoute {
        irq: UART0_IRQ,
        name: "uart",
        isr: crate::console::intr,
    },
    IrqRoute {
        irq: VIRTIO0_IRQ,
        name: "virtio",
        isr: crate::virtio::intr,
    },
];

/// scause, split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    Interrupt(u64),
    Exception(u64),
}

impl Cause {
    pub fn from_scause(scause: u64) -> Self {
        let code = scause & !SCAUSE_INTERRUPT;
        if scause & SCAUSE_INTERRUPT != 0 {
            Cause::Interrupt(code)
        } else {
            Cause::Exception(code)
        }
    }
}

/// Synchronous exception codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    InstructionMisaligned,
    InstructionFault,
    IllegalInstruction,
    Breakpoint,
    LoadMisaligned,
    LoadFault,
    StoreMisaligned,
    StoreFault,
    UserEnvCall,
    SupervisorEnvCall,
    MachineEnvCall,
    InstructionPageFault,
    LoadPageFault,
    StorePageFault,
    Unknown(u64),
}

impl From<u64> for Exception {
    fn from(code: u64) -> Self {
        match code {
            0 => Exception::InstructionMisaligned,
            1 => Exception::InstructionFault,
            2 => Exception::IllegalInstruction,
            3 => Exception::Breakpoint,
            4 => Exception::LoadMisaligned,
            5 => Exception::LoadFault,
            6 => Exception::StoreMisaligned,
            7 => Exception::StoreFault,
            8 => Exception::UserEnvCall,
            9 => Exception::SupervisorEnvCall,
            11 => Exception::MachineEnvCall,
            12 => Exception::InstructionPageFault,
            13 => Exception::LoadPageFault,
            15 => Exception::StorePageFault,
            code => Exception::Unknown(code),
        }
    }
}

/// What [`devintr`] did with a trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// External interrupt: the claimed IRQ, `None` if the claim was empty.
    Device(Option<u32>),
    /// Timer tick. `preempt` is set when a process was running on this
    /// hart and should give up the CPU.
    Tick { preempt: bool },
    /// An interrupt code this kernel does not use. Ignored.
    UnknownInterrupt(u64),
    /// Not an interrupt at all.
    Exception(Exception),
}

pub fn init() {
    log::info!("trap init: tick on hart {}", TICK_HART);
}

/// set up to take exceptions and traps while in the kernel.
pub fn init_hart(kernelvec: usize) {
    unsafe { Stvec::write(kernelvec as u64) };
}

/// Entry from kernelvec.s. A panic must not unwind through the C ABI, so
/// the work is done in [`kernel_trap`].
#[no_mangle]
pub extern "C" fn kerneltrap() {
    kernel_trap()
}

/// Interrupts and exceptions from kernel code go here via kernelvec,
/// on whatever the current kernel stack is.
pub fn kernel_trap() {
    let sepc = Sepc::read();
    let sstatus = Sstatus::read();
    let scause = Scause::read();

    if sstatus & SSTATUS_SPP == 0 {
        panic!("kerneltrap: not from supervisor mode");
    }
    if intr_get() {
        panic!("kerneltrap: interrupts enabled");
    }

    let cpu = mycpu();
    cpu.enter_trap();

    match devintr(Cause::from_scause(scause), cpuid(), &PLIC0, &ROUTES) {
        Handled::Exception(e) => panic!(
            "kerneltrap: {:?} scause={:#x} sepc={:#x} stval={:#x}",
            e,
            scause,
            sepc,
            Stval::read()
        ),
        Handled::Tick { preempt: true } => {
            // no scheduler yet; the process keeps the CPU.
            log::trace!("tick: process on hart {} not preempted", cpuid());
        }
        _ => {}
    }

    // the handlers may have caused some traps to occur,
    // so restore trap registers for use by kernelvec.s's sret instruction.
    unsafe {
        Sepc::write(sepc);
        Sstatus::write(sstatus);
    }
    cpu.leave_trap();
}

/// Check if it's an external interrupt or software interrupt,
/// and handle it.
pub fn devintr<C: InterruptController>(
    cause: Cause,
    hart: usize,
    ctl: &C,
    routes: &[IrqRoute],
) -> Handled {
    match cause {
        // this is a supervisor external interrupt, via PLIC.
        Cause::Interrupt(IRQ_S_EXT) => {
            // irq indicates which device interrupted.
            let irq = ctl.claim(hart);
            if irq == 0 {
                return Handled::Device(None);
            }

            match routes.iter().find(|route| route.irq == irq) {
                Some(route) => {
                    log::trace!("irq {} ({})", irq, route.name);
                    (route.isr)();
                }
                None => log::warn!("unexpected interrupt irq={}", irq),
            }

            // the PLIC allows each device to raise at most one
            // interrupt at a time; tell the PLIC the device is
            // now allowed to interrupt again.
            ctl.complete(hart, irq);
            Handled::Device(Some(irq))
        }

        // software interrupt from a machine-mode timer interrupt,
        // forwarded by timervec in kernelvec.s.
        Cause::Interrupt(IRQ_S_SOFT) => {
            if hart == TICK_HART {
                clockintr();
            }

            // acknowledge the software interrupt by clearing
            // the SSIP bit in sip.
            unsafe { clear::<Sip>(SIP_SSIP) };

            Handled::Tick {
                preempt: running_here(),
            }
        }

        Cause::Interrupt(code) => {
            log::warn!("unexpected interrupt scause code={}", code);
            Handled::UnknownInterrupt(code)
        }

        Cause::Exception(code) => Handled::Exception(Exception::from(code)),
    }
}

fn clockintr() {
    let mut ticks = TICKS.lock();
    *ticks += 1;
}

fn running_here() -> bool {
    match mycpu().proc() {
        Some(slot) => PROCS.get(slot).state() == ProcState::Running,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::NPROC;
    use crate::riscv::{read, write};
    use crate::sim;
    use std::cell::RefCell;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records every claim/complete, in order.
    struct FakePlic {
        pending: u32,
        log: RefCell<Vec<String>>,
    }

    impl FakePlic {
        fn new(pending: u32) -> Self {
            Self {
                pending,
                log: RefCell::new(Vec::new()),
            }
        }
    }

    impl InterruptController for FakePlic {
        fn claim(&self, hart: usize) -> u32 {
            self.log.borrow_mut().push(format!("claim {}", hart));
            self.pending
        }

        fn complete(&self, hart: usize, irq: u32) {
            self.log.borrow_mut().push(format!("complete {} {}", hart, irq));
        }
    }

    static SERVED: AtomicUsize = AtomicUsize::new(0);

    fn count_service() {
        SERVED.fetch_add(1, Ordering::SeqCst);
    }

    const TEST_ROUTES: [IrqRoute; 1] = [IrqRoute {
        irq: UART0_IRQ,
        name: "uart",
        isr: count_service,
    }];

    #[test]
    fn scause_splits_into_interrupt_and_code() {
        assert_eq!(Cause::from_scause(SCAUSE_INTERRUPT | 9), Cause::Interrupt(9));
        assert_eq!(Cause::from_scause(13), Cause::Exception(13));
    }

    #[test]
    fn external_interrupt_claims_services_completes() {
        let plic = FakePlic::new(UART0_IRQ);
        let before = SERVED.load(Ordering::SeqCst);

        let handled = devintr(Cause::Interrupt(IRQ_S_EXT), 1, &plic, &TEST_ROUTES);

        assert_eq!(handled, Handled::Device(Some(UART0_IRQ)));
        assert_eq!(SERVED.load(Ordering::SeqCst), before + 1);
        assert_eq!(*plic.log.borrow(), ["claim 1", "complete 1 10"]);
    }

    #[test]
    fn unrouted_irq_is_still_completed() {
        let plic = FakePlic::new(VIRTIO0_IRQ);
        let handled = devintr(Cause::Interrupt(IRQ_S_EXT), 0, &plic, &TEST_ROUTES);

        assert_eq!(handled, Handled::Device(Some(VIRTIO0_IRQ)));
        assert_eq!(*plic.log.borrow(), ["claim 0", "complete 0 1"]);
    }

    #[test]
    fn empty_claim_completes_nothing() {
        let plic = FakePlic::new(0);
        let handled = devintr(Cause::Interrupt(IRQ_S_EXT), 0, &plic, &TEST_ROUTES);

        assert_eq!(handled, Handled::Device(None));
        assert_eq!(*plic.log.borrow(), ["claim 0"]);
    }

    #[test]
    fn software_interrupt_ticks_and_acknowledges() {
        let plic = FakePlic::new(0);
        unsafe { write::<Sip>(SIP_SSIP) };
        let before = *TICKS.lock();

        let handled = devintr(Cause::Interrupt(IRQ_S_SOFT), TICK_HART, &plic, &TEST_ROUTES);

        assert_eq!(handled, Handled::Tick { preempt: false });
        assert!(*TICKS.lock() > before);
        assert_eq!(read::<Sip>() & SIP_SSIP, 0);
        assert!(plic.log.borrow().is_empty());
    }

    #[test]
    fn other_harts_acknowledge_without_ticking() {
        let plic = FakePlic::new(0);
        unsafe { write::<Sip>(SIP_SSIP) };

        let handled = devintr(Cause::Interrupt(IRQ_S_SOFT), TICK_HART + 1, &plic, &TEST_ROUTES);

        assert_eq!(handled, Handled::Tick { preempt: false });
        assert_eq!(read::<Sip>() & SIP_SSIP, 0);
    }

    #[test]
    fn tick_over_a_running_process_asks_for_preemption() {
        let plic = FakePlic::new(0);
        let slot = NPROC - 1;
        PROCS.get(slot).inner.lock().state = ProcState::Running;
        mycpu().set_proc(Some(slot));

        let handled = devintr(Cause::Interrupt(IRQ_S_SOFT), TICK_HART + 1, &plic, &TEST_ROUTES);

        mycpu().set_proc(None);
        PROCS.get(slot).inner.lock().state = ProcState::Inited;
        assert_eq!(handled, Handled::Tick { preempt: true });
    }

    #[test]
    fn tick_over_a_picked_process_does_not_preempt() {
        let plic = FakePlic::new(0);
        let slot = NPROC - 2;
        PROCS.get(slot).inner.lock().state = ProcState::Picked;
        mycpu().set_proc(Some(slot));

        let handled = devintr(Cause::Interrupt(IRQ_S_SOFT), TICK_HART + 1, &plic, &TEST_ROUTES);

        mycpu().set_proc(None);
        PROCS.get(slot).inner.lock().state = ProcState::Inited;
        assert_eq!(handled, Handled::Tick { preempt: false });
    }

    #[test]
    fn unknown_interrupt_is_ignored() {
        let plic = FakePlic::new(0);
        let handled = devintr(Cause::Interrupt(IRQ_S_TIMER), 0, &plic, &TEST_ROUTES);
        assert_eq!(handled, Handled::UnknownInterrupt(IRQ_S_TIMER));
        assert!(plic.log.borrow().is_empty());
    }

    #[test]
    fn exceptions_are_classified() {
        let plic = FakePlic::new(0);
        let handled = devintr(Cause::Exception(13), 0, &plic, &TEST_ROUTES);
        assert_eq!(handled, Handled::Exception(Exception::LoadPageFault));
        assert_eq!(Exception::from(10), Exception::Unknown(10));
    }

    fn enter_from_supervisor(scause: u64, sepc: u64) {
        sim::set_hart(TICK_HART);
        unsafe {
            write::<Scause>(scause);
            write::<Sepc>(sepc);
            write::<Sstatus>(SSTATUS_SPP);
        }
    }

    #[test]
    fn kerneltrap_restores_sepc_and_sstatus() {
        enter_from_supervisor(SCAUSE_INTERRUPT | IRQ_S_SOFT, 0x8000_1234);

        kernel_trap();

        assert_eq!(read::<Sepc>(), 0x8000_1234);
        assert_eq!(read::<Sstatus>(), SSTATUS_SPP);
        assert_eq!(mycpu().trap_state(), crate::proc::TrapState::Idle);
    }

    #[test]
    #[should_panic(expected = "LoadPageFault")]
    fn kernel_exception_is_fatal() {
        enter_from_supervisor(13, 0x8000_0040);
        unsafe { write::<Stval>(0xdead_0000) };
        kernel_trap();
    }

    #[test]
    #[should_panic(expected = "not from supervisor mode")]
    fn trap_from_user_mode_is_fatal() {
        enter_from_supervisor(SCAUSE_INTERRUPT | IRQ_S_SOFT, 0);
        unsafe { write::<Sstatus>(0) };
        kernel_trap();
    }

    #[test]
    fn init_hart_points_stvec_at_kernelvec() {
        init_hart(0x8000_2000);
        assert_eq!(read::<Stvec>(), 0x8000_2000);
    }
}
