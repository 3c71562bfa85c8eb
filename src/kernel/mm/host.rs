// src/kernel/mm/host.rs
//! Concrete collaborators wiring [`VmSystem`] to this kernel's own drivers.
//!
//! `VmSystem` is generic over its collaborators so the core could be dropped
//! into any embedding kernel; this module is where *this* kernel supplies
//! them, the way the teacher's boot sequence wires `LockedHeap` to a real
//! heap region. Every type here is a minimal, single-kernel-instance stand-in
//! for hardware this crate does not have a driver for (a real disk, a real
//! physical-frame allocator): heap-backed, not meant to generalize.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::constants::{FRAME_TABLE_SIZE, PAGE_SIZE, SECTORS_PER_PAGE};
use crate::kernel::core::{BlockDevice, Device, KernelResult};
use crate::kernel::fs::{FileError, FileResult};
use crate::kernel::mm::collaborators::{Console, FileSystem, OpenFile, PageAllocator};
use crate::kernel::mm::system::VmSystem;

/// A block device backing the swap area, held entirely in heap memory.
///
/// Sized for a handful of swap slots beyond [`FRAME_TABLE_SIZE`] frames worth
/// of anonymous pages -- enough to exercise real eviction-to-swap cycles
/// without modeling an actual disk.
pub struct RamSwapDevice {
    blocks: Vec<[u8; 512]>,
}

impl RamSwapDevice {
    #[must_use]
    pub fn new() -> Self {
        let slot_count = FRAME_TABLE_SIZE + 16;
        let block_count = slot_count * SECTORS_PER_PAGE;
        Self {
            blocks: vec![[0u8; 512]; block_count],
        }
    }
}

impl Default for RamSwapDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for RamSwapDevice {
    fn name(&self) -> &str {
        "ram-swap"
    }
    fn init(&mut self) -> KernelResult<()> {
        Ok(())
    }
    fn reset(&mut self) -> KernelResult<()> {
        for block in &mut self.blocks {
            *block = [0u8; 512];
        }
        Ok(())
    }
}

impl BlockDevice for RamSwapDevice {
    fn block_size(&self) -> usize {
        512
    }

    fn read_block(&self, block: u64, buf: &mut [u8]) -> KernelResult<usize> {
        let data = &self.blocks[block as usize];
        let len = buf.len().min(data.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }

    fn write_block(&mut self, block: u64, buf: &[u8]) -> KernelResult<usize> {
        let data = &mut self.blocks[block as usize];
        let len = buf.len().min(data.len());
        data[..len].copy_from_slice(&buf[..len]);
        Ok(len)
    }

    fn total_blocks(&self) -> u64 {
        self.blocks.len() as u64
    }
}

/// The external user-frame allocator: a fixed heap-backed pool of
/// [`FRAME_TABLE_SIZE`] pages, handed out and reclaimed by a free bitmap.
///
/// A real kernel would hand out physical frames discovered from the
/// bootloader's memory map; this crate has no physical-memory enumeration of
/// its own, so the pool is heap memory the global allocator already owns.
pub struct PoolPageAllocator {
    pages: Vec<[u8; PAGE_SIZE]>,
    free: Vec<bool>,
}

impl PoolPageAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pages: vec![[0u8; PAGE_SIZE]; FRAME_TABLE_SIZE],
            free: vec![true; FRAME_TABLE_SIZE],
        }
    }
}

impl Default for PoolPageAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PageAllocator for PoolPageAllocator {
    fn get_page(&mut self) -> Option<usize> {
        let idx = self.free.iter().position(|&f| f)?;
        self.free[idx] = false;
        let addr = self.pages[idx].as_mut_ptr() as usize;
        // SAFETY: the index is ours until `free_page` returns it; zeroing
        // before handing it out matches the fault path's zero-fill contract.
        unsafe {
            core::ptr::write_bytes(addr as *mut u8, 0, PAGE_SIZE);
        }
        Some(addr)
    }

    fn free_page(&mut self, kernel_addr: usize) {
        let base = self.pages.as_ptr() as usize;
        if kernel_addr < base {
            return;
        }
        let idx = (kernel_addr - base) / PAGE_SIZE;
        if idx < self.free.len() {
            self.free[idx] = true;
        }
    }
}

/// One file in [`RamFileSystem`]: name, bytes, and independent open handles.
struct RamFile {
    data: Vec<u8>,
}

/// An in-memory file system: the simplest `FileSystem` collaborator that
/// satisfies the syscall dispatcher's `create`/`remove`/`open` contract
/// without a block-device-backed directory format, which is out of scope
/// for this core (see the spec's external-collaborator list).
pub struct RamFileSystem {
    files: BTreeMap<String, Arc<Mutex<RamFile>>>,
}

impl RamFileSystem {
    #[must_use]
    pub fn new() -> Self {
        Self {
            files: BTreeMap::new(),
        }
    }
}

impl Default for RamFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for RamFileSystem {
    fn create(&mut self, name: &str, initial_size: u64) -> bool {
        if self.files.contains_key(name) {
            return false;
        }
        self.files.insert(
            name.into(),
            Arc::new(Mutex::new(RamFile {
                data: vec![0u8; initial_size as usize],
            })),
        );
        true
    }

    fn remove(&mut self, name: &str) -> bool {
        self.files.remove(name).is_some()
    }

    fn open(&mut self, name: &str) -> Option<Box<dyn OpenFile>> {
        let file = self.files.get(name)?.clone();
        Some(Box::new(RamOpenFile { file, pos: 0 }))
    }
}

/// One open handle onto a [`RamFile`]; its own read/write position is
/// independent of any other handle open on the same file, per the file
/// system's reopen-for-mmap contract.
struct RamOpenFile {
    file: Arc<Mutex<RamFile>>,
    pos: u64,
}

impl OpenFile for RamOpenFile {
    fn read(&mut self, buf: &mut [u8]) -> FileResult<usize> {
        let n = self.read_at(self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> FileResult<usize> {
        let n = self.write_at(self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> FileResult<usize> {
        let file = self.file.lock();
        let start = offset as usize;
        if start >= file.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(file.data.len() - start);
        buf[..n].copy_from_slice(&file.data[start..start + n]);
        Ok(n)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> FileResult<usize> {
        let mut file = self.file.lock();
        let start = offset as usize;
        let end = start.checked_add(buf.len()).ok_or(FileError::InvalidInput)?;
        if end > file.data.len() {
            file.data.resize(end, 0);
        }
        file.data[start..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn seek(&mut self, pos: u64) {
        self.pos = pos;
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn length(&self) -> u64 {
        self.file.lock().data.len() as u64
    }

    fn close(&mut self) {}
}

/// The console collaborator: `putbuf` to the VGA/serial console, `input_getc`
/// from the keyboard's decoded scancode stream.
pub struct DriverConsole;

impl Console for DriverConsole {
    fn putbuf(&mut self, buf: &[u8]) {
        for &byte in buf {
            crate::kernel::driver::write_console(format_args!("{}", byte as char));
        }
    }

    fn input_getc(&mut self) -> u8 {
        crate::kernel::driver::keyboard::blocking_getc()
    }
}

lazy_static::lazy_static! {
    /// The kernel's single virtual-memory system, wired to this kernel's
    /// heap-backed swap device, page pool, and in-memory file system.
    pub static ref VM_SYSTEM: VmSystem<RamSwapDevice> = VmSystem::new(
        RamSwapDevice::new(),
        Box::new(PoolPageAllocator::new()),
        Box::new(RamFileSystem::new()),
    );

    /// The kernel's single console collaborator.
    pub static ref CONSOLE: Mutex<DriverConsole> = Mutex::new(DriverConsole);
}
