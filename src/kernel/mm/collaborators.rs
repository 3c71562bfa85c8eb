// src/kernel/mm/collaborators.rs
//! External collaborator traits for the virtual memory core.
//!
//! The frame table, supplemental page table, and syscall dispatcher do not
//! talk to hardware, a scheduler, or a filesystem directly. Every boundary
//! the spec calls out as "out of scope" is expressed here as a trait the
//! embedding kernel implements once and plugs in via [`super::system::VmSystem`].

use crate::kernel::fs::{FileError, FileResult};
use crate::kernel::mm::page_table::SupplementalPageTable;

pub use crate::kernel::core::traits::BlockDevice as SwapDevice;

/// A process's hardware page directory (or the software stand-in for one).
///
/// Installs and removes user-page mappings and reports/clears the hardware
/// accessed bit consulted by second-chance eviction.
pub trait PageDirectory: Send + Sync {
    /// Install `user_addr` mapped to `kernel_addr`, with `writable` controlling
    /// the write-protect bit. Replaces any prior mapping at `user_addr`.
    fn install_mapping(&mut self, user_addr: usize, kernel_addr: usize, writable: bool);

    /// Remove whatever mapping exists at `user_addr`, if any.
    fn clear_mapping(&mut self, user_addr: usize);

    /// Look up the kernel-mapped physical address currently installed at
    /// `user_addr`, or `None` if unmapped.
    fn translate(&self, user_addr: usize) -> Option<usize>;

    /// Read the hardware accessed bit for the page containing `user_addr`.
    fn accessed(&self, user_addr: usize) -> bool;

    /// Clear the hardware accessed bit for the page containing `user_addr`.
    fn clear_accessed(&mut self, user_addr: usize);

    /// Read the hardware dirty bit for the page containing `user_addr`.
    fn dirty(&self, user_addr: usize) -> bool;
}

/// The external physical-frame source backing newly allocated user frames.
pub trait PageAllocator: Send + Sync {
    /// Obtain one zeroed, kernel-mapped physical frame. Returns the frame's
    /// kernel-accessible address, or `None` if physical memory is exhausted.
    fn get_page(&mut self) -> Option<usize>;

    /// Return a previously obtained frame to the allocator.
    fn free_page(&mut self, kernel_addr: usize);
}

/// tid -> thread/process lookup, standing in for the scheduler.
///
/// Eviction needs more than liveness: a victim frame it selects may belong
/// to a process other than the one currently faulting, so it must be able
/// to reach that owner's hardware page directory and supplemental page
/// table through nothing but the frame's recorded `owner_tid`.
pub trait ThreadRegistry: Send + Sync {
    /// Identifier type for a schedulable thread/process, opaque to this crate.
    fn is_alive(&self, owner_tid: u64) -> bool;

    /// Look up `owner_tid` and hand its page directory and supplemental page
    /// table to `f`. Returns `false` (without calling `f`) if no process with
    /// that tid is registered, which the evictor treats as a dead-owner
    /// frame it can reclaim without writeback.
    fn with_owner(
        &mut self,
        owner_tid: u64,
        f: &mut dyn FnMut(&mut dyn PageDirectory, &mut SupplementalPageTable),
    ) -> bool;
}

/// The host filesystem: open/create/remove plus per-file operations.
///
/// `OpenFile` instances are independent of the fd they may be attached to;
/// the mmap manager reopens a file to give a mapping its own lifetime.
pub trait FileSystem: Send + Sync {
    /// Create a file of the given size. Returns `false` on failure.
    fn create(&mut self, name: &str, initial_size: u64) -> bool;

    /// Remove a file by name. Returns `false` on failure.
    fn remove(&mut self, name: &str) -> bool;

    /// Open a file by name, returning a fresh handle decoupled from any fd.
    fn open(&mut self, name: &str) -> Option<alloc::boxed::Box<dyn OpenFile>>;
}

/// One open file handle, independent of the process-local fd that may name it.
pub trait OpenFile: Send + Sync {
    /// Read up to `buf.len()` bytes at the file's current position.
    fn read(&mut self, buf: &mut [u8]) -> FileResult<usize>;

    /// Write `buf` at the file's current position.
    fn write(&mut self, buf: &[u8]) -> FileResult<usize>;

    /// Read `buf.len()` bytes starting at absolute file `offset`, without
    /// disturbing the file's current position. Used by lazy loading and mmap.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> FileResult<usize>;

    /// Write `buf` starting at absolute file `offset`. Used by `munmap` write-back.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> FileResult<usize>;

    /// Move the file's current position.
    fn seek(&mut self, pos: u64);

    /// Report the file's current position.
    fn tell(&self) -> u64;

    /// Report the file's length in bytes.
    fn length(&self) -> u64;

    /// Close the handle. Errors are logged by the caller, never propagated
    /// to the syscall return value (closing cannot fail the user's `close`).
    fn close(&mut self);
}

/// The console: `putbuf`/`input_getc` for fd 1 / fd 0.
pub trait Console: Send + Sync {
    /// Write `buf` to the console (fd 1).
    fn putbuf(&mut self, buf: &[u8]);

    /// Read one character from the console (fd 0), blocking if none is ready.
    fn input_getc(&mut self) -> u8;
}

/// Helper converting a `FileSystem::open` miss into the dispatcher's sentinel
/// reporting convention without leaking a panicking `unwrap`.
pub fn open_or_not_found<'a>(
    fs: &'a mut dyn FileSystem,
    name: &str,
) -> Result<alloc::boxed::Box<dyn OpenFile>, FileError> {
    fs.open(name).ok_or(FileError::Other)
}
