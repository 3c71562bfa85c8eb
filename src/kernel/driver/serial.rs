// src/kernel/driver/serial.rs
//! COM1 UART driver used for debug output (`debug_print!`/`debug_println!`).
//!
//! Mirrors the legacy top-level `serial` module's register layout but is
//! exposed as a single lockable singleton so `console::write_debug` can
//! treat it like any other `fmt::Write` sink.

use core::fmt;

use spin::Mutex;
use x86_64::instructions::port::Port;

const SERIAL_IO_PORT: u16 = 0x3F8;

mod register_offset {
    pub const DATA: u16 = 0;
    pub const INTERRUPT_ENABLE: u16 = 1;
    pub const FIFO_CONTROL: u16 = 2;
    pub const LINE_CONTROL: u16 = 3;
    pub const MODEM_CONTROL: u16 = 4;
    pub const LINE_STATUS: u16 = 5;
}

mod line_control {
    pub const DLAB_ENABLE: u8 = 0x80;
    pub const CONFIG_8N1: u8 = 0x03;
}

mod line_status {
    pub const TRANSMIT_EMPTY: u8 = 0x20;
}

const BAUD_RATE_DIVISOR: u16 = 3;

/// A single initialized COM1 port.
pub struct SerialPort {
    data: Port<u8>,
    line_status: Port<u8>,
    initialized: bool,
}

impl SerialPort {
    const fn new() -> Self {
        Self {
            data: Port::new(SERIAL_IO_PORT + register_offset::DATA),
            line_status: Port::new(SERIAL_IO_PORT + register_offset::LINE_STATUS),
            initialized: false,
        }
    }

    /// Program the UART for 38400 8N1 with FIFO enabled. Idempotent.
    pub fn init(&mut self) {
        if self.initialized {
            return;
        }
        unsafe {
            let mut int_en: Port<u8> = Port::new(SERIAL_IO_PORT + register_offset::INTERRUPT_ENABLE);
            let mut fifo: Port<u8> = Port::new(SERIAL_IO_PORT + register_offset::FIFO_CONTROL);
            let mut line_ctrl: Port<u8> = Port::new(SERIAL_IO_PORT + register_offset::LINE_CONTROL);
            let mut modem_ctrl: Port<u8> = Port::new(SERIAL_IO_PORT + register_offset::MODEM_CONTROL);

            int_en.write(0x00);
            line_ctrl.write(line_control::DLAB_ENABLE);
            self.data.write((BAUD_RATE_DIVISOR & 0xFF) as u8);
            int_en.write(((BAUD_RATE_DIVISOR >> 8) & 0xFF) as u8);
            line_ctrl.write(line_control::CONFIG_8N1);
            fifo.write(0xC7);
            modem_ctrl.write(0x0B);
        }
        self.initialized = true;
    }

    fn wait_transmit_empty(&mut self) {
        unsafe {
            while (self.line_status.read() & line_status::TRANSMIT_EMPTY) == 0 {
                core::hint::spin_loop();
            }
        }
    }

    fn write_byte(&mut self, byte: u8) {
        if !self.initialized {
            return;
        }
        self.wait_transmit_empty();
        unsafe {
            self.data.write(byte);
        }
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.write_byte(byte);
        }
        Ok(())
    }
}

/// The kernel's sole COM1 instance, used for `debug_print!`/`debug_println!`.
pub static SERIAL1: Mutex<SerialPort> = Mutex::new(SerialPort::new());

/// Initialize COM1. Safe to call more than once.
pub fn init() {
    SERIAL1.lock().init();
}
