//! An external interrupt from the console, end to end through the PLIC.

use std::sync::Mutex;

use riscv_os::memlayout::{plic_sclaim, UART0_IRQ};
use riscv_os::param::NCPU;
use riscv_os::plic::{InterruptController, Plic};
use riscv_os::riscv::SCAUSE_INTERRUPT;
use riscv_os::sim::MmioWindow;
use riscv_os::trap::{devintr, Cause, Handled, IrqRoute};

static EVENTS: Mutex<Vec<String>> = Mutex::new(Vec::new());

fn record(event: String) {
    EVENTS.lock().unwrap().push(event);
}

fn console_isr() {
    record("console".to_string());
}

/// The real PLIC driver, with every call written down.
struct Traced<'a>(&'a Plic);

impl InterruptController for Traced<'_> {
    fn claim(&self, hart: usize) -> u32 {
        let irq = self.0.claim(hart);
        record(format!("claim {}", irq));
        irq
    }

    fn complete(&self, hart: usize, irq: u32) {
        record(format!("complete {}", irq));
        self.0.complete(hart, irq);
    }
}

#[test]
fn console_irq_is_serviced_once_then_completed() {
    let regs = MmioWindow::new(plic_sclaim(NCPU) + 4);
    let plic = unsafe { Plic::new(regs.base()) };
    plic.init();
    plic.init_hart(0);
    regs.write32(plic_sclaim(0), UART0_IRQ);

    let routes = [IrqRoute {
        irq: UART0_IRQ,
        name: "uart",
        isr: console_isr,
    }];
    let cause = Cause::from_scause(SCAUSE_INTERRUPT | 9);

    let handled = devintr(cause, 0, &Traced(&plic), &routes);

    assert_eq!(handled, Handled::Device(Some(UART0_IRQ)));
    assert_eq!(
        *EVENTS.lock().unwrap(),
        ["claim 10", "console", "complete 10"]
    );
    assert_eq!(regs.read32(plic_sclaim(0)), UART0_IRQ);
}
