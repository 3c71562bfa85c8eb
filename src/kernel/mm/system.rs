// src/kernel/mm/system.rs
//! `VmSystem`: the single value that threads the frame table, swap area,
//! and external collaborators through fault and syscall handling.
//!
//! There is deliberately no crate-internal global here (contrast with the
//! display subsystem's `static LOCK_MANAGER` in `crate::sync`). Each boot
//! constructs exactly one `VmSystem` and passes it to whatever owns the
//! process table.

use alloc::boxed::Box;

use spin::Mutex;

use crate::constants::PAGE_SIZE;
use crate::debug_println;
use crate::kernel::core::result::VmError;
use crate::kernel::mm::collaborators::{FileSystem, PageAllocator, SwapDevice, ThreadRegistry};
use crate::kernel::mm::frame::{FrameIndex, FrameTable};
use crate::kernel::mm::page_table::PageKind;
use crate::kernel::mm::swap::{SwapArea, SwapError, SwapSlot};

/// Aggregates the VM core's shared state: the frame table, the swap area,
/// and the collaborators an embedding kernel supplies once at boot.
pub struct VmSystem<D: SwapDevice> {
    frame_table: Mutex<FrameTable>,
    swap_area: Mutex<SwapArea<D>>,
    /// Held for the entire select-and-evict critical section (spec's
    /// eviction lock), separate from the frame table lock so eviction can
    /// release and reacquire the frame table lock between candidate scans
    /// without letting a second evictor interleave.
    eviction_lock: Mutex<()>,
    page_allocator: Mutex<Box<dyn PageAllocator>>,
    filesystem: Mutex<Box<dyn FileSystem>>,
}

impl<D: SwapDevice> VmSystem<D> {
    #[must_use]
    pub fn new(
        swap_device: D,
        page_allocator: Box<dyn PageAllocator>,
        filesystem: Box<dyn FileSystem>,
    ) -> Self {
        Self {
            frame_table: Mutex::new(FrameTable::with_default_capacity()),
            swap_area: Mutex::new(SwapArea::new(swap_device)),
            eviction_lock: Mutex::new(()),
            page_allocator: Mutex::new(page_allocator),
            filesystem: Mutex::new(filesystem),
        }
    }

    #[must_use]
    pub fn frame_table(&self) -> &Mutex<FrameTable> {
        &self.frame_table
    }

    #[must_use]
    pub fn filesystem(&self) -> &Mutex<Box<dyn FileSystem>> {
        &self.filesystem
    }

    #[must_use]
    pub fn page_allocator(&self) -> &Mutex<Box<dyn PageAllocator>> {
        &self.page_allocator
    }

    pub fn swap_in(&self, slot: SwapSlot, page: &mut [u8; PAGE_SIZE]) -> Result<(), VmError> {
        self.swap_area.lock().swap_in(slot, page).map_err(vm_swap_error)
    }

    pub fn swap_free(&self, slot: SwapSlot) -> Result<(), VmError> {
        self.swap_area.lock().swap_free(slot).map_err(vm_swap_error)
    }

    /// Reserve a frame for `owner_tid`/`user_addr`, running eviction passes
    /// until one succeeds or the system is genuinely out of both physical
    /// memory and evictable frames.
    pub fn alloc_frame(
        &self,
        owner_tid: u64,
        user_addr: usize,
        registry: &mut dyn ThreadRegistry,
    ) -> Result<(FrameIndex, usize), VmError> {
        loop {
            if let Some(idx) = self.frame_table.lock().try_alloc(owner_tid, user_addr) {
                match self.page_allocator.lock().get_page() {
                    Some(kernel_addr) => {
                        self.frame_table.lock().set_kernel_addr(idx, kernel_addr);
                        return Ok((idx, kernel_addr));
                    }
                    None => {
                        let _ = self.frame_table.lock().free(idx);
                    }
                }
            }
            self.evict_one(registry)?;
        }
    }

    /// Run one second-chance eviction pass, freeing exactly one unpinned
    /// frame. The whole pass runs under the eviction lock so two callers
    /// can never pick the same victim.
    pub fn evict_one(&self, registry: &mut dyn ThreadRegistry) -> Result<(), VmError> {
        let _eviction_guard = self.eviction_lock.lock();

        let candidates = self.frame_table.lock().eviction_candidates();
        if candidates.is_empty() {
            return Err(VmError::FrameExhausted);
        }

        let mut victim = None;
        for pass in 0..2 {
            for &idx in &candidates {
                let info = match self.frame_table.lock().info(idx) {
                    Some(info) => info,
                    None => continue,
                };
                let mut accessed = false;
                let alive = registry.with_owner(info.owner_tid, &mut |dir, _spt| {
                    accessed = dir.accessed(info.user_addr);
                    if accessed && pass == 0 {
                        dir.clear_accessed(info.user_addr);
                    }
                });
                if !alive || pass == 1 || !accessed {
                    victim = Some(idx);
                    break;
                }
            }
            if victim.is_some() {
                break;
            }
        }

        let idx = victim.ok_or(VmError::FrameExhausted)?;
        self.evict_frame(idx, registry)
    }

    fn evict_frame(&self, idx: FrameIndex, registry: &mut dyn ThreadRegistry) -> Result<(), VmError> {
        let info = self
            .frame_table
            .lock()
            .info(idx)
            .ok_or(VmError::FrameExhausted)?;

        let mut page_bytes = [0u8; PAGE_SIZE];
        // SAFETY: `kernel_addr` came from the `PageAllocator` collaborator
        // as a kernel-mapped physical frame and stays mapped until we hand
        // it back via `free_page` below.
        unsafe {
            core::ptr::copy_nonoverlapping(
                info.kernel_addr as *const u8,
                page_bytes.as_mut_ptr(),
                PAGE_SIZE,
            );
        }

        let mut kind = PageKind::Anonymous;
        let mut dirty = false;
        registry.with_owner(info.owner_tid, &mut |dir, spt| {
            dir.clear_mapping(info.user_addr);
            if let Some(desc) = spt.get(info.user_addr) {
                kind = desc.kind;
                dirty = desc.dirty || dir.dirty(info.user_addr);
            }
        });

        if matches!(kind, PageKind::Mmap) && dirty {
            let reached = registry.with_owner(info.owner_tid, &mut |_dir, spt| {
                if let Some(desc) = spt.get_mut(info.user_addr) {
                    if let Some(file) = desc.file.clone() {
                        let len = desc.read_bytes.min(PAGE_SIZE);
                        let _ = file.lock().write_at(desc.file_offset, &page_bytes[..len]);
                    }
                    desc.frame = None;
                    desc.dirty = false;
                }
            });
            if !reached {
                debug_println!(
                    "[vm] eviction: owner tid {} gone, dropping dirty mmap page at {:#x}",
                    info.owner_tid,
                    info.user_addr
                );
            }
        } else {
            let slot = self.swap_area.lock().swap_out(&page_bytes).map_err(vm_swap_error)?;
            registry.with_owner(info.owner_tid, &mut |_dir, spt| {
                if let Some(desc) = spt.get_mut(info.user_addr) {
                    desc.frame = None;
                    desc.swap_slot = Some(slot);
                }
            });
        }

        let kernel_addr = self
            .frame_table
            .lock()
            .free(idx)
            .map_err(|_| VmError::FrameExhausted)?;
        self.page_allocator.lock().free_page(kernel_addr);
        debug_println!(
            "[vm] evicted frame owned by tid {} at user addr {:#x}",
            info.owner_tid,
            info.user_addr
        );
        Ok(())
    }
}

fn vm_swap_error(e: SwapError) -> VmError {
    match e {
        SwapError::Exhausted => VmError::SwapExhausted,
        SwapError::DeviceError | SwapError::NotReserved => VmError::SwapDeviceError,
    }
}
