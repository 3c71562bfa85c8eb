// src/kernel/mm/frame.rs
//! Frame table: a fixed-size arena of physical frames shared by every
//! process's user pages.
//!
//! The table stores no pointers into a process's address space. A busy
//! frame is credited to an owner tid and a user address; the evictor reaches
//! the rest of the owner's state (page directory, supplemental page table)
//! through [`super::collaborators::ThreadRegistry`], never through a
//! back-reference held here.

use core::fmt;

use spin::Mutex;

use crate::constants::FRAME_TABLE_SIZE;

/// Index of a slot in the frame table's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameIndex(usize);

impl FrameIndex {
    #[must_use]
    pub const fn raw(self) -> usize {
        self.0
    }
}

/// Errors a frame table operation can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// No frame is free and eviction could not create one.
    Exhausted,
    /// The requested frame index is not currently busy.
    NotBusy,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => write!(f, "frame table exhausted"),
            Self::NotBusy => write!(f, "frame is not busy"),
        }
    }
}

/// One slot in the frame table.
#[derive(Debug, Clone, Copy)]
struct Frame {
    busy: bool,
    owner_tid: u64,
    user_addr: usize,
    kernel_addr: usize,
    pin_count: u32,
}

impl Frame {
    const fn free() -> Self {
        Self {
            busy: false,
            owner_tid: 0,
            user_addr: 0,
            kernel_addr: 0,
            pin_count: 0,
        }
    }
}

/// A read-only view of a busy frame's bookkeeping, returned to callers that
/// need to inspect ownership without reaching into the table's internals.
#[derive(Debug, Clone, Copy)]
pub struct FrameInfo {
    pub owner_tid: u64,
    pub user_addr: usize,
    pub kernel_addr: usize,
    pub pin_count: u32,
}

/// Fixed-size pool of physical frames, indexed by [`FrameIndex`].
pub struct FrameTable {
    frames: alloc::vec::Vec<Frame>,
    /// Where the next free-slot scan should start; purely an optimization,
    /// second-chance eviction still scans the whole table when this misses.
    next_hint: usize,
}

impl FrameTable {
    /// Build a table with `capacity` frames, all initially free.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: alloc::vec![Frame::free(); capacity],
            next_hint: 0,
        }
    }

    /// Build a table sized per [`FRAME_TABLE_SIZE`].
    #[must_use]
    pub fn with_default_capacity() -> Self {
        Self::new(FRAME_TABLE_SIZE)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn busy_count(&self) -> usize {
        self.frames.iter().filter(|f| f.busy).count()
    }

    /// Reserve the next free slot for `owner_tid`/`user_addr`, with no frame
    /// content yet installed. Returns `None` if the table is full; the
    /// caller (`VmSystem::alloc_frame`) is responsible for running eviction
    /// and retrying.
    pub fn try_alloc(&mut self, owner_tid: u64, user_addr: usize) -> Option<FrameIndex> {
        let len = self.frames.len();
        for offset in 0..len {
            let i = (self.next_hint + offset) % len;
            if !self.frames[i].busy {
                self.frames[i] = Frame {
                    busy: true,
                    owner_tid,
                    user_addr,
                    kernel_addr: 0,
                    pin_count: 0,
                };
                self.next_hint = (i + 1) % len;
                return Some(FrameIndex(i));
            }
        }
        None
    }

    /// Record the physical frame's kernel-mapped address once the caller has
    /// obtained one from the `PageAllocator` collaborator.
    pub fn set_kernel_addr(&mut self, idx: FrameIndex, kernel_addr: usize) {
        self.frames[idx.0].kernel_addr = kernel_addr;
    }

    /// Free a busy frame, returning its kernel address so the caller can
    /// release it back to the `PageAllocator`.
    pub fn free(&mut self, idx: FrameIndex) -> Result<usize, FrameError> {
        let frame = &mut self.frames[idx.0];
        if !frame.busy {
            return Err(FrameError::NotBusy);
        }
        let kernel_addr = frame.kernel_addr;
        *frame = Frame::free();
        Ok(kernel_addr)
    }

    pub fn info(&self, idx: FrameIndex) -> Option<FrameInfo> {
        let frame = self.frames[idx.0];
        frame.busy.then_some(FrameInfo {
            owner_tid: frame.owner_tid,
            user_addr: frame.user_addr,
            kernel_addr: frame.kernel_addr,
            pin_count: frame.pin_count,
        })
    }

    pub fn find_by_kernel_addr(&self, kernel_addr: usize) -> Option<FrameIndex> {
        self.frames
            .iter()
            .position(|f| f.busy && f.kernel_addr == kernel_addr)
            .map(FrameIndex)
    }

    /// Pin `idx`, preventing eviction from selecting it. Returns the new
    /// pin count.
    pub fn pin(&mut self, idx: FrameIndex) -> u32 {
        let frame = &mut self.frames[idx.0];
        frame.pin_count += 1;
        frame.pin_count
    }

    /// Unpin `idx`. Returns the new pin count.
    pub fn unpin(&mut self, idx: FrameIndex) -> u32 {
        let frame = &mut self.frames[idx.0];
        frame.pin_count = frame.pin_count.saturating_sub(1);
        frame.pin_count
    }

    /// Busy, unpinned frames starting at the eviction clock hand, wrapping
    /// once around the table. Used by second-chance eviction.
    pub fn eviction_candidates(&self) -> alloc::vec::Vec<FrameIndex> {
        let len = self.frames.len();
        (0..len)
            .map(|offset| (self.next_hint + offset) % len)
            .filter(|&i| self.frames[i].busy && self.frames[i].pin_count == 0)
            .map(FrameIndex)
            .collect()
    }
}

/// RAII guard pinning a frame against eviction for as long as it lives.
///
/// Held across a blocking I/O operation (file read, swap-in) so the frame
/// that operation is filling cannot itself be chosen as an eviction victim.
pub struct FramePin<'a> {
    table: &'a Mutex<FrameTable>,
    idx: FrameIndex,
}

impl<'a> FramePin<'a> {
    #[must_use]
    pub fn new(table: &'a Mutex<FrameTable>, idx: FrameIndex) -> Self {
        table.lock().pin(idx);
        Self { table, idx }
    }

    #[must_use]
    pub fn index(&self) -> FrameIndex {
        self.idx
    }
}

impl Drop for FramePin<'_> {
    fn drop(&mut self) {
        self.table.lock().unpin(self.idx);
    }
}

#[cfg(all(test, feature = "std-tests"))]
mod tests {
    use super::*;

    #[test]
    fn alloc_reserves_distinct_slots() {
        let mut table = FrameTable::new(4);
        let a = table.try_alloc(1, 0x1000).unwrap();
        let b = table.try_alloc(1, 0x2000).unwrap();
        assert_ne!(a, b);
        assert_eq!(table.busy_count(), 2);
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut table = FrameTable::new(2);
        table.try_alloc(1, 0x1000).unwrap();
        table.try_alloc(1, 0x2000).unwrap();
        assert!(table.try_alloc(1, 0x3000).is_none());
    }

    #[test]
    fn free_releases_the_slot_for_reuse() {
        let mut table = FrameTable::new(1);
        let idx = table.try_alloc(1, 0x1000).unwrap();
        table.set_kernel_addr(idx, 0xffff_8000_0000_0000);
        let kernel_addr = table.free(idx).unwrap();
        assert_eq!(kernel_addr, 0xffff_8000_0000_0000);
        assert!(table.try_alloc(2, 0x4000).is_some());
    }

    #[test]
    fn pinned_frames_are_not_eviction_candidates() {
        let table = Mutex::new(FrameTable::new(2));
        let idx = table.lock().try_alloc(1, 0x1000).unwrap();
        let _pin = FramePin::new(&table, idx);
        assert!(table.lock().eviction_candidates().is_empty());
    }

    #[test]
    fn double_free_is_rejected() {
        let mut table = FrameTable::new(1);
        let idx = table.try_alloc(1, 0x1000).unwrap();
        table.free(idx).unwrap();
        assert_eq!(table.free(idx), Err(FrameError::NotBusy));
    }
}
