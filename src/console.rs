//! Console input and output, to the uart.
//!
//! Output goes out one byte at a time through [`putc`]. Input arrives via
//! the uart interrupt, is edited in a [`LineBuffer`], and becomes readable a
//! line at a time.
//!
//! special input characters:
//!   newline -- end of line
//!   control-h -- backspace
//!   control-u -- kill line
//!   control-d -- end of file
//!   control-p -- print process list

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use cfg_if::cfg_if;

use crate::proc::PROCS;
use crate::spinlock::SpinLock;
use crate::uart::UART;

const INPUT_BUF_SIZE: usize = 128;
const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7f;

/// Control-x
pub const fn ctrl(x: u8) -> u8 {
    x - b'@'
}

/// What the console should do after one input byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    Nothing,
    Char(u8),
    /// Rub out this many characters.
    Erase(usize),
    /// ^P: print the process list.
    ProcDump,
}

/// Circular input buffer with line editing.
///
/// `r` trails `w` trails `e`: bytes in `[r, w)` are committed and readable,
/// bytes in `[w, e)` are still being edited.
pub struct LineBuffer {
    buf: [u8; INPUT_BUF_SIZE],
    r: usize, // Read index
    w: usize, // Write index
    e: usize, // Edit index
}

impl LineBuffer {
    pub const fn new() -> Self {
        Self {
            buf: [0; INPUT_BUF_SIZE],
            r: 0,
            w: 0,
            e: 0,
        }
    }

    /// Feed one byte typed at the console.
    pub fn input(&mut self, c: u8) -> Echo {
        match c {
            c if c == ctrl(b'P') => Echo::ProcDump,
            c if c == ctrl(b'U') => {
                // Kill line.
                let mut erased = 0;
                while self.e != self.w && self.buf[(self.e - 1) % INPUT_BUF_SIZE] != b'\n' {
                    self.e -= 1;
                    erased += 1;
                }
                Echo::Erase(erased)
            }
            c if c == ctrl(b'H') || c == DELETE => {
                if self.e != self.w {
                    self.e -= 1;
                    Echo::Erase(1)
                } else {
                    Echo::Nothing
                }
            }
            0 => Echo::Nothing,
            c if self.e - self.r < INPUT_BUF_SIZE => {
                let c = if c == b'\r' { b'\n' } else { c };

                // store for consumption by read().
                self.buf[self.e % INPUT_BUF_SIZE] = c;
                self.e += 1;

                if c == b'\n' || c == ctrl(b'D') || self.e - self.r == INPUT_BUF_SIZE {
                    // a whole line (or end-of-file) has arrived.
                    self.w = self.e;
                }
                Echo::Char(c)
            }
            _ => Echo::Nothing,
        }
    }

    /// Copy committed input into `dst`, stopping after a newline.
    /// Never waits: returns 0 when no whole line has arrived.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let mut n = 0;
        while n < dst.len() && self.r != self.w {
            let c = self.buf[self.r % INPUT_BUF_SIZE];
            self.r += 1;

            if c == ctrl(b'D') {
                // end-of-file
                if n > 0 {
                    // Save ^D for next time, to make sure
                    // caller gets a 0-byte result.
                    self.r -= 1;
                }
                break;
            }

            dst[n] = c;
            n += 1;

            if c == b'\n' {
                break;
            }
        }
        n
    }

    /// Number of committed bytes not yet read.
    pub fn committed(&self) -> usize {
        self.w - self.r
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

pub static CONS: SpinLock<LineBuffer> = SpinLock::new("cons", LineBuffer::new());

// Keeps print! lines from different harts apart.
static PRINT_LOCK: SpinLock<()> = SpinLock::new("pr", ());

// A panic message is being printed: skip PRINT_LOCK, which this hart may hold.
static PANICKING: AtomicBool = AtomicBool::new(false);

// The message is out: freeze uart output from other harts.
static PANICKED: AtomicBool = AtomicBool::new(false);

pub fn init() {
    UART.init();
}

cfg_if! {
    if #[cfg(all(target_arch = "riscv64", target_os = "none"))] {
        /// Send one byte to the console.
        pub fn putc(c: u8) {
            UART.putc_sync(c);
        }
    } else {
        /// Send one byte to the console.
        pub fn putc(c: u8) {
            crate::sim::console_putc(c);
        }
    }
}

fn echo(echo: Echo) {
    match echo {
        Echo::Nothing => {}
        Echo::Char(c) => putc(c),
        Echo::Erase(n) => {
            for _ in 0..n {
                // overwrite with a space.
                putc(BACKSPACE);
                putc(b' ');
                putc(BACKSPACE);
            }
        }
        Echo::ProcDump => PROCS.dump(),
    }
}

/// The console input interrupt handler.
/// Drains the uart, doing erase/kill processing and echoing.
pub fn intr() {
    while let Some(c) = UART.getc() {
        let e = CONS.lock().input(c);
        echo(e);
    }
}

/// Read whatever whole line is available into `dst`.
pub fn read(dst: &mut [u8]) -> usize {
    CONS.lock().read(dst)
}

pub struct Stdout;

impl fmt::Write for Stdout {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.bytes() {
            putc(c);
        }
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use fmt::Write;

    if PANICKING.load(Ordering::Relaxed) {
        let _ = Stdout.write_fmt(args);
        return;
    }
    let _guard = PRINT_LOCK.lock();
    let _ = Stdout.write_fmt(args);
}

/// Called by the panic handler before it prints.
pub fn begin_panic() {
    PANICKING.store(true, Ordering::Relaxed);
}

/// Called by the panic handler once its message is out.
pub fn end_panic() {
    PANICKED.store(true, Ordering::Relaxed);
}

pub fn panicked() -> bool {
    PANICKED.load(Ordering::Relaxed)
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::console::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}
