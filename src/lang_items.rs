use core::panic::PanicInfo;

use crate::console;
use crate::println;
use crate::riscv::{intr_off, wfi};

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    intr_off();
    console::begin_panic();
    match info.location() {
        Some(location) => println!(
            "panicked at {}:{}: {}",
            location.file(),
            location.line(),
            info.message()
        ),
        None => println!("panicked: {}", info.message()),
    }
    console::end_panic(); // freeze uart output from other CPUs
    loop {
        wfi();
    }
}
