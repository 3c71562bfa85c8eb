// src/kernel/driver/keyboard.rs
//! PS/2 キーボードドライバ
//!
//! CharDevice trait に基づいた型安全な実装。

use spin::Mutex;

use pc_keyboard::{DecodedKey, HandleControl, Keyboard, ScancodeSet1, layouts::Us104Key};

use crate::kernel::core::{Device, CharDevice, KernelResult};
use crate::arch::x86_64::port::{PortReadOnly, PortWriteOnly};

/// PS/2 キーボード
pub struct PS2Keyboard {
    data: PortReadOnly<u8>,
    status: PortReadOnly<u8>,
    command: PortWriteOnly<u8>,
}

impl PS2Keyboard {
    /// 新しいキーボードドライバを作成
    pub const fn new() -> Self {
        Self {
            data: PortReadOnly::new(0x60),
            status: PortReadOnly::new(0x64),
            command: PortWriteOnly::new(0x64),
        }
    }
    
    /// ステータスレジスタを読み取り
    fn read_status(&self) -> u8 {
        unsafe { self.status.read() }
    }
}

impl Device for PS2Keyboard {
    fn name(&self) -> &str {
        "PS/2 Keyboard"
    }
    
    fn init(&mut self) -> KernelResult<()> {
        // 初期化ロジック（必要なら）
        // コントローラのリセットなどはここで行う
        Ok(())
    }
    
    fn reset(&mut self) -> KernelResult<()> {
        self.init()
    }
}

impl CharDevice for PS2Keyboard {
    fn read_byte(&self) -> KernelResult<Option<u8>> {
        let status = self.read_status();
        // 出力バッファフルビット (bit 0) を確認
        if status & 0x01 != 0 {
            let scancode = unsafe { self.data.read() };
            Ok(Some(scancode))
        } else {
            Ok(None)
        }
    }
    
    fn write_byte(&mut self, _byte: u8) -> KernelResult<()> {
        // キーボードへの書き込みは通常コマンド送信だが、
        // CharDevice としてはサポートしない（またはLED制御などに使う）
        Ok(())
    }
}

impl PS2Keyboard {
    /// Read one raw scancode if the controller has one buffered.
    pub fn read_scancode(&mut self) -> Option<u8> {
        self.read_byte().ok().flatten()
    }
}

impl Default for PS2Keyboard {
    fn default() -> Self {
        Self::new()
    }
}

/// The PS/2 keyboard device, polled by the IRQ1 handler.
pub static KEYBOARD: Mutex<PS2Keyboard> = Mutex::new(PS2Keyboard::new());

const SCANCODE_BUF_LEN: usize = 256;

/// A small ring buffer of raw scancodes handed off from the IRQ1 handler to
/// whichever context later drains them, since there is no async executor
/// wired into the interrupt path itself.
pub struct ScancodeQueue {
    buf: [u8; SCANCODE_BUF_LEN],
    head: usize,
    tail: usize,
    len: usize,
}

impl ScancodeQueue {
    const fn new() -> Self {
        Self {
            buf: [0; SCANCODE_BUF_LEN],
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    /// Push a scancode, dropping the oldest entry if the buffer is full.
    pub fn add_scancode(&mut self, scancode: u8) {
        if self.len == SCANCODE_BUF_LEN {
            self.head = (self.head + 1) % SCANCODE_BUF_LEN;
            self.len -= 1;
        }
        self.buf[self.tail] = scancode;
        self.tail = (self.tail + 1) % SCANCODE_BUF_LEN;
        self.len += 1;
    }

    pub fn pop(&mut self) -> Option<u8> {
        if self.len == 0 {
            return None;
        }
        let code = self.buf[self.head];
        self.head = (self.head + 1) % SCANCODE_BUF_LEN;
        self.len -= 1;
        Some(code)
    }
}

/// Raw scancodes queued by the IRQ1 handler, awaiting decode.
pub static SCANCODE_QUEUE: Mutex<ScancodeQueue> = Mutex::new(ScancodeQueue::new());

/// Decode queued scancodes into the next printable character, spin-waiting
/// until the queue (fed by the IRQ1 handler) produces one. Stands in for the
/// blocking `input_getc` collaborator the syscall dispatcher's `read(0, ...)`
/// path needs; there is no scheduler here to block a thread on instead.
pub fn blocking_getc() -> u8 {
    let mut decoder = Keyboard::new(ScancodeSet1::new(), Us104Key, HandleControl::Ignore);
    loop {
        let Some(scancode) = SCANCODE_QUEUE.lock().pop() else {
            core::hint::spin_loop();
            continue;
        };
        if let Ok(Some(event)) = decoder.add_byte(scancode) {
            if let Some(DecodedKey::Unicode(c)) = decoder.process_keyevent(event) {
                let mut utf8_buf = [0u8; 4];
                return c.encode_utf8(&mut utf8_buf).as_bytes()[0];
            }
        }
    }
}
