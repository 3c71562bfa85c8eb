// src/kernel/mm/page_table.rs
//! Supplemental page table: per-process metadata for every user virtual
//! page that has no live hardware mapping of its own right to explain it.
//!
//! A descriptor's residency is derived, not stored twice: a page is
//! `Loaded` exactly when it has a frame, and `Swapped` otherwise. For
//! anonymous pages `Swapped` always carries a real swap slot; for
//! file-backed and mmap pages it may carry none, meaning "not yet faulted
//! in, or evicted without needing swap, reload from the file on next
//! fault." Both are the same descriptor-level state, distinguished only by
//! whether a slot happens to be attached.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::fmt;

use spin::Mutex;

use crate::kernel::mm::collaborators::OpenFile;
use crate::kernel::mm::frame::FrameIndex;
use crate::kernel::mm::swap::SwapSlot;

/// What backs a page descriptor's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// Zero-filled on first touch, backed only by swap once evicted.
    Anonymous,
    /// Backed by a file region loaded once, read-only once paged in
    /// (process image segments).
    FileBacked,
    /// Backed by a file region installed via `mmap`; write faults mark it
    /// dirty for write-back at `munmap` or process exit.
    Mmap,
}

/// A page descriptor's residency, derived from whether it currently has a
/// frame. See the module docs for why `Swapped` does double duty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Loaded,
    Swapped,
}

/// Errors the supplemental page table can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageTableError {
    /// A descriptor already exists at this user address.
    Collision,
    /// No descriptor exists at this user address.
    NotFound,
}

impl fmt::Display for PageTableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Collision => write!(f, "page descriptor collision"),
            Self::NotFound => write!(f, "page descriptor not found"),
        }
    }
}

/// Per-page metadata tracked by the supplemental page table.
pub struct PageDescriptor {
    pub kind: PageKind,
    pub writable: bool,
    pub frame: Option<FrameIndex>,
    pub swap_slot: Option<SwapSlot>,
    /// Shared so every page of the same mmap region or loaded segment
    /// reuses one open handle instead of reopening per page.
    pub file: Option<Arc<Mutex<Box<dyn OpenFile>>>>,
    pub file_offset: u64,
    pub read_bytes: usize,
    pub zero_bytes: usize,
    /// Set by the page-fault write path the first time a writable mmap page
    /// is touched for write; never set by the `write` syscall directly.
    pub dirty: bool,
}

impl PageDescriptor {
    #[must_use]
    pub fn state(&self) -> PageState {
        if self.frame.is_some() {
            PageState::Loaded
        } else {
            PageState::Swapped
        }
    }

    fn anonymous(frame: FrameIndex, writable: bool) -> Self {
        Self {
            kind: PageKind::Anonymous,
            writable,
            frame: Some(frame),
            swap_slot: None,
            file: None,
            file_offset: 0,
            read_bytes: 0,
            zero_bytes: 0,
            dirty: false,
        }
    }

    fn file_backed(
        kind: PageKind,
        file: Arc<Mutex<Box<dyn OpenFile>>>,
        file_offset: u64,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
    ) -> Self {
        Self {
            kind,
            writable,
            frame: None,
            swap_slot: None,
            file: Some(file),
            file_offset,
            read_bytes,
            zero_bytes,
            dirty: false,
        }
    }

    /// A descriptor standing in for a page the evictor is about to swap
    /// out: no frame, no slot yet, both attached once `swap_out` returns.
    fn evicted_placeholder(kind: PageKind, writable: bool) -> Self {
        Self {
            kind,
            writable,
            frame: None,
            swap_slot: None,
            file: None,
            file_offset: 0,
            read_bytes: 0,
            zero_bytes: 0,
            dirty: false,
        }
    }
}

/// Per-process map from user virtual address (page-aligned) to descriptor.
#[derive(Default)]
pub struct SupplementalPageTable {
    entries: BTreeMap<usize, PageDescriptor>,
}

impl SupplementalPageTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, user_addr: usize) -> Option<&PageDescriptor> {
        self.entries.get(&user_addr)
    }

    pub fn get_mut(&mut self, user_addr: usize) -> Option<&mut PageDescriptor> {
        self.entries.get_mut(&user_addr)
    }

    pub fn contains(&self, user_addr: usize) -> bool {
        self.entries.contains_key(&user_addr)
    }

    /// Insert a resident anonymous page (stack growth, `sbrk`-style heap
    /// extension): the frame already exists before the descriptor does.
    pub fn insert_anonymous(
        &mut self,
        user_addr: usize,
        frame: FrameIndex,
        writable: bool,
    ) -> Result<(), PageTableError> {
        self.insert(user_addr, PageDescriptor::anonymous(frame, writable))
    }

    /// Insert a lazily-loaded file-backed or mmap page: not resident until
    /// the first fault reads it in.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_file_backed(
        &mut self,
        user_addr: usize,
        kind: PageKind,
        file: Arc<Mutex<Box<dyn OpenFile>>>,
        file_offset: u64,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
    ) -> Result<(), PageTableError> {
        self.insert(
            user_addr,
            PageDescriptor::file_backed(kind, file, file_offset, read_bytes, zero_bytes, writable),
        )
    }

    /// Create a not-yet-resident placeholder for a page the evictor is
    /// about to move out. Used only by eviction, immediately followed by
    /// attaching a swap slot.
    pub fn insert_evicted_placeholder(
        &mut self,
        user_addr: usize,
        kind: PageKind,
        writable: bool,
    ) -> Result<(), PageTableError> {
        self.insert(user_addr, PageDescriptor::evicted_placeholder(kind, writable))
    }

    fn insert(&mut self, user_addr: usize, descriptor: PageDescriptor) -> Result<(), PageTableError> {
        if self.entries.contains_key(&user_addr) {
            return Err(PageTableError::Collision);
        }
        self.entries.insert(user_addr, descriptor);
        Ok(())
    }

    pub fn remove(&mut self, user_addr: usize) -> Result<PageDescriptor, PageTableError> {
        self.entries.remove(&user_addr).ok_or(PageTableError::NotFound)
    }

    /// All descriptors within `[base, base + len)`, used by `munmap` to
    /// find every page of a region without the caller tracking them
    /// separately.
    pub fn range(&self, base: usize, len: usize) -> alloc::vec::Vec<usize> {
        self.entries
            .range(base..base + len)
            .map(|(&addr, _)| addr)
            .collect()
    }

    /// Remove and return every remaining descriptor. Used by process
    /// teardown to reclaim every frame and swap slot the process still
    /// owns once its mmap region (if any) has already been unwound.
    pub fn drain(&mut self) -> alloc::vec::Vec<(usize, PageDescriptor)> {
        core::mem::take(&mut self.entries).into_iter().collect()
    }
}

#[cfg(all(test, feature = "std-tests"))]
mod tests {
    use super::*;
    use crate::kernel::mm::frame::FrameTable;

    #[test]
    fn insert_anonymous_reports_loaded() {
        let mut frames = FrameTable::new(4);
        let frame = frames.try_alloc(1, 0x1000).unwrap();
        let mut spt = SupplementalPageTable::new();
        spt.insert_anonymous(0x1000, frame, true).unwrap();
        assert_eq!(spt.get(0x1000).unwrap().state(), PageState::Loaded);
    }

    #[test]
    fn evicted_placeholder_reports_swapped() {
        let mut spt = SupplementalPageTable::new();
        spt.insert_evicted_placeholder(0x2000, PageKind::Anonymous, true)
            .unwrap();
        assert_eq!(spt.get(0x2000).unwrap().state(), PageState::Swapped);
    }

    #[test]
    fn duplicate_insert_is_a_collision() {
        let mut spt = SupplementalPageTable::new();
        spt.insert_evicted_placeholder(0x3000, PageKind::Anonymous, true)
            .unwrap();
        let err = spt.insert_evicted_placeholder(0x3000, PageKind::Anonymous, true);
        assert_eq!(err, Err(PageTableError::Collision));
    }

    #[test]
    fn range_finds_every_page_of_a_region() {
        let mut spt = SupplementalPageTable::new();
        for addr in [0x4000usize, 0x5000, 0x6000, 0x9000] {
            spt.insert_evicted_placeholder(addr, PageKind::Mmap, true).unwrap();
        }
        let found = spt.range(0x4000, 0x3000);
        assert_eq!(found, alloc::vec![0x4000, 0x5000, 0x6000]);
    }

    #[test]
    fn remove_missing_is_not_found() {
        let mut spt = SupplementalPageTable::new();
        assert!(matches!(spt.remove(0x1000), Err(PageTableError::NotFound)));
    }
}
