//! PL011 UART driver
//!
//! The console doubles as the proxy transport. Console text goes through
//! [`uart_print!`](crate::uart_print) with `\n` translated; proxy frames go
//! through [`ConsoleTransport`] byte for byte.

use core::fmt;

use volatile::{ReadOnly, Volatile, WriteOnly};

use super::board::UART_BASE;
use super::counter::Deadline;
use crate::error::TransportError;
use crate::proxy::framer::Transport;

/// Flag register bits
const FR_TXFF: u32 = 1 << 5; // Transmit FIFO full
const FR_RXFE: u32 = 1 << 4; // Receive FIFO empty
const FR_BUSY: u32 = 1 << 3;

const LCR_H_WLEN8: u32 = 3 << 5;
const LCR_H_FEN: u32 = 1 << 4;

const CR_UARTEN: u32 = 1 << 0;
const CR_TXE: u32 = 1 << 8;
const CR_RXE: u32 = 1 << 9;

/// 115200 baud from the 24 MHz reference clock QEMU models
const IBRD_115200: u32 = 13;
const FBRD_115200: u32 = 1;

/// Error bits in the data register
const DR_ERRORS: u32 = 0xF00;

#[repr(C)]
#[allow(dead_code)]
struct Registers {
    dr: Volatile<u32>,
    rsr: Volatile<u32>,
    _reserved0: [u32; 4],
    fr: ReadOnly<u32>,
    _reserved1: u32,
    ilpr: Volatile<u32>,
    ibrd: Volatile<u32>,
    fbrd: Volatile<u32>,
    lcr_h: Volatile<u32>,
    cr: Volatile<u32>,
    ifls: Volatile<u32>,
    imsc: Volatile<u32>,
    ris: ReadOnly<u32>,
    mis: ReadOnly<u32>,
    icr: WriteOnly<u32>,
}

/// PL011 UART driver
pub struct Pl011 {
    base: usize,
}

impl Pl011 {
    pub const fn new(base: usize) -> Self {
        Pl011 { base }
    }

    fn regs(&mut self) -> &mut Registers {
        // SAFETY: `base` is the PL011 MMIO block, mapped as device memory
        unsafe { &mut *(self.base as *mut Registers) }
    }

    /// Program 115200 8N1 with FIFOs, interrupts masked
    pub fn init(&mut self) {
        let regs = self.regs();
        regs.cr.write(0);
        while regs.fr.read() & FR_BUSY != 0 {
            core::hint::spin_loop();
        }
        regs.imsc.write(0);
        regs.icr.write(0x7FF);
        regs.rsr.write(0);
        regs.ibrd.write(IBRD_115200);
        regs.fbrd.write(FBRD_115200);
        regs.lcr_h.write(LCR_H_WLEN8 | LCR_H_FEN);
        regs.cr.write(CR_UARTEN | CR_TXE | CR_RXE);
    }

    pub fn write_byte(&mut self, byte: u8) {
        let regs = self.regs();
        // Wait while transmit FIFO is full
        while regs.fr.read() & FR_TXFF != 0 {
            core::hint::spin_loop();
        }
        regs.dr.write(byte as u32);
    }

    pub fn try_read_byte(&mut self) -> Option<u8> {
        let regs = self.regs();
        if regs.fr.read() & FR_RXFE != 0 {
            return None;
        }
        let data = regs.dr.read();
        if data & DR_ERRORS != 0 {
            regs.rsr.write(0);
        }
        Some(data as u8)
    }

    /// Wait until the transmitter has drained
    pub fn flush(&mut self) {
        let regs = self.regs();
        while regs.fr.read() & FR_BUSY != 0 {
            core::hint::spin_loop();
        }
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        for &byte in data {
            self.write_byte(byte);
        }
    }

    /// Write a string, converting `\n` to `\r\n`
    pub fn write_string(&mut self, s: &str) {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
    }
}

impl fmt::Write for Pl011 {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_string(s);
        Ok(())
    }
}

/// Global UART instance
pub static UART: spin::Mutex<Pl011> = spin::Mutex::new(Pl011::new(UART_BASE));

/// Initialize UART
pub fn init() {
    UART.lock().init();
}

/// Log sink: raw bytes, the logger adds line endings
pub fn write_bytes(data: &[u8]) {
    UART.lock().write_bytes(data);
}

/// Write without taking the lock, for fault paths that may have
/// interrupted a holder
pub fn emergency_write(s: &str) {
    let mut uart = Pl011::new(UART_BASE);
    uart.write_string(s);
}

/// The console UART as a proxy link
pub struct ConsoleTransport;

impl Transport for ConsoleTransport {
    fn read_byte(&mut self, timeout_us: Option<u64>) -> Result<u8, TransportError> {
        let deadline = Deadline::after_us(timeout_us);
        loop {
            if let Some(byte) = UART.lock().try_read_byte() {
                return Ok(byte);
            }
            if deadline.expired() {
                return Err(TransportError::Timeout);
            }
            core::hint::spin_loop();
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        UART.lock().write_bytes(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        UART.lock().flush();
        Ok(())
    }

    fn is_console(&self) -> bool {
        true
    }
}

/// Print macro for ARM
#[macro_export]
macro_rules! uart_print {
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let _ = write!($crate::arch::aarch64::uart::UART.lock(), $($arg)*);
    }};
}

/// Println macro for ARM
#[macro_export]
macro_rules! uart_println {
    () => ($crate::uart_print!("\n"));
    ($($arg:tt)*) => ($crate::uart_print!("{}\n", format_args!($($arg)*)));
}
