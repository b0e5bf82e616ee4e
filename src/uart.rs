//! low-level driver routines for 16550a UART.

use core::hint::spin_loop;

use crate::memlayout::UART0;
use crate::mmio;
use crate::spinlock::{pop_off, push_off};

// the UART control registers.
// some have different meanings for
// read vs write.
// see http://byterunner.com/16550.html
const RHR: usize = 0; // receive holding register (for input bytes)
const THR: usize = 0; // transmit holding register (for output bytes)
const DLL: usize = 0; // Divisor Latch Low Byte, when LCR_BAUD_LATCH is set
const DLM: usize = 1; // Divisor Latch High Byte, when LCR_BAUD_LATCH is set
const IER: usize = 1; // interrupt enable register
const IER_RX_ENABLE: u8 = 1 << 0;
const FCR: usize = 2; // FIFO control register
const FCR_FIFO_ENABLE: u8 = 1 << 0;
const FCR_FIFO_CLEAR: u8 = 3 << 1; // clear the content of the two FIFOs
const LCR: usize = 3; // line control register
const LCR_EIGHT_BITS: u8 = 3;
const LCR_BAUD_LATCH: u8 = 1 << 7; // special mode to set baud rate
const LSR: usize = 5; // line status register
const LSR_RX_READY: u8 = 1 << 0; // input is waiting to be read from RHR
const LSR_TX_IDLE: u8 = 1 << 5; // THR can accept another character to send

pub struct Uart {
    base: usize,
}

/// The console UART.
pub static UART: Uart = unsafe { Uart::new(UART0) };

impl Uart {
    /// # Safety
    /// `base` is the start of a 16550 register window.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    fn read_reg(&self, reg: usize) -> u8 {
        unsafe { mmio::read8(self.base + reg) }
    }

    fn write_reg(&self, reg: usize, value: u8) {
        unsafe { mmio::write8(self.base + reg, value) }
    }

    pub fn init(&self) {
        // disable interrupts.
        self.write_reg(IER, 0x00);

        // special mode to set baud rate.
        self.write_reg(LCR, LCR_BAUD_LATCH);

        // LSB for baud rate of 38.4K.
        self.write_reg(DLL, 0x03);

        // MSB for baud rate of 38.4K.
        self.write_reg(DLM, 0x00);

        // leave set-baud mode,
        // and set word length to 8 bits, no parity.
        self.write_reg(LCR, LCR_EIGHT_BITS);

        // reset and enable FIFOs.
        self.write_reg(FCR, FCR_FIFO_ENABLE | FCR_FIFO_CLEAR);

        // enable receive interrupts.
        self.write_reg(IER, IER_RX_ENABLE);
    }

    /// Send one byte, spinning until the UART can take it.
    /// Used by print! and to echo characters. Interrupts stay off while
    /// spinning so a console interrupt can't interleave its echo.
    pub fn putc_sync(&self, c: u8) {
        push_off();

        if crate::console::panicked() {
            loop {
                spin_loop();
            }
        }

        // wait for Transmit Holding Empty to be set in LSR.
        while self.read_reg(LSR) & LSR_TX_IDLE == 0 {
            spin_loop();
        }
        self.write_reg(THR, c);

        pop_off();
    }

    /// read one input character from the UART.
    pub fn getc(&self) -> Option<u8> {
        if self.read_reg(LSR) & LSR_RX_READY != 0 {
            // input data is ready.
            Some(self.read_reg(RHR))
        } else {
            None
        }
    }
}
