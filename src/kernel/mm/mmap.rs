// src/kernel/mm/mmap.rs
//! `mmap`/`munmap` orchestration.
//!
//! Each process tracks at most one mapped region at a time (see
//! `kernel::process::Process::mmap_region`); a second `mmap` call is
//! rejected rather than layered. Pages are inserted lazily as file-backed
//! descriptors and loaded by the ordinary page-fault path in
//! `kernel::mm::fault`; `mmap` itself never touches a frame.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::constants::{PAGE_SIZE, USER_STACK_TOP};
use crate::kernel::core::result::VmError;
use crate::kernel::mm::collaborators::{OpenFile, PageDirectory, SwapDevice};
use crate::kernel::mm::page_table::{PageKind, SupplementalPageTable};
use crate::kernel::mm::system::VmSystem;

fn div_ceil(n: usize, d: usize) -> usize {
    (n + d - 1) / d
}

/// A process's single active `mmap` mapping.
pub struct MmapRegion {
    pub base: usize,
    pub length: usize,
    file: Arc<Mutex<Box<dyn OpenFile>>>,
}

/// Map `file` (already open, length known) into the process at `base`.
///
/// Fails without mutating the supplemental page table if the file is
/// empty, `base` is unaligned, `base` runs past the stack region, or any
/// page of the range collides with an existing descriptor. A collision
/// discovered partway through rolls back every descriptor already
/// inserted for this call.
pub fn mmap(
    spt: &mut SupplementalPageTable,
    existing_region: &Option<MmapRegion>,
    base: usize,
    file: Arc<Mutex<Box<dyn OpenFile>>>,
) -> Result<MmapRegion, VmError> {
    if existing_region.is_some() {
        return Err(VmError::MmapAlreadyMapped);
    }
    if base % PAGE_SIZE != 0 || base == 0 {
        return Err(VmError::MmapInvalid);
    }
    let length = file.lock().length();
    if length == 0 {
        return Err(VmError::MmapInvalid);
    }
    let length = length as usize;
    let page_count = div_ceil(length, PAGE_SIZE);
    if base.saturating_add(page_count * PAGE_SIZE) > USER_STACK_TOP {
        return Err(VmError::MmapInvalid);
    }

    let mut inserted: Vec<usize> = Vec::with_capacity(page_count);
    for i in 0..page_count {
        let page_addr = base + i * PAGE_SIZE;
        if spt.contains(page_addr) {
            rollback(spt, &inserted);
            return Err(VmError::MmapOverlap);
        }
        let offset = (i * PAGE_SIZE) as u64;
        let remaining = length - i * PAGE_SIZE;
        let read_bytes = remaining.min(PAGE_SIZE);
        let zero_bytes = PAGE_SIZE - read_bytes;
        if spt
            .insert_file_backed(page_addr, PageKind::Mmap, file.clone(), offset, read_bytes, zero_bytes, true)
            .is_err()
        {
            rollback(spt, &inserted);
            return Err(VmError::MmapOverlap);
        }
        inserted.push(page_addr);
    }

    Ok(MmapRegion { base, length, file })
}

fn rollback(spt: &mut SupplementalPageTable, inserted: &[usize]) {
    for &addr in inserted {
        let _ = spt.remove(addr);
    }
}

/// Tear down `region`: write back every dirty loaded page, free its frame
/// or swap slot, and close the underlying file handle.
pub fn munmap<D: SwapDevice>(
    vm: &VmSystem<D>,
    dir: &mut dyn PageDirectory,
    spt: &mut SupplementalPageTable,
    region: MmapRegion,
) -> Result<(), VmError> {
    let page_count = div_ceil(region.length, PAGE_SIZE);
    for i in 0..page_count {
        let page_addr = region.base + i * PAGE_SIZE;
        let Ok(desc) = spt.remove(page_addr) else {
            continue;
        };

        if let Some(frame) = desc.frame {
            let kernel_addr = vm.frame_table().lock().info(frame).map(|info| info.kernel_addr);
            let dirty = desc.dirty || dir.dirty(page_addr);
            if dirty {
                if let (Some(file), Some(kernel_addr)) = (desc.file.as_ref(), kernel_addr) {
                    let mut buf = vec![0u8; desc.read_bytes];
                    // SAFETY: `kernel_addr` is this frame's kernel mapping
                    // and stays valid until we free it a few lines below.
                    unsafe {
                        core::ptr::copy_nonoverlapping(
                            kernel_addr as *const u8,
                            buf.as_mut_ptr(),
                            desc.read_bytes,
                        );
                    }
                    let _ = file.lock().write_at(desc.file_offset, &buf);
                }
            }
            dir.clear_mapping(page_addr);
            if let Ok(kernel_addr) = vm.frame_table().lock().free(frame) {
                vm.page_allocator().lock().free_page(kernel_addr);
            }
        } else if let Some(slot) = desc.swap_slot {
            let _ = vm.swap_free(slot);
        }
    }

    region.file.lock().close();
    Ok(())
}

/// Reclaim every frame and swap slot still owned by `spt`'s remaining
/// descriptors (§4.3's `destroy()`): called at process exit, after any
/// active mmap region has already been unwound through [`munmap`], to free
/// the stack, heap-growth, and loaded-segment pages `munmap` never saw.
/// No write-back: anonymous pages have no file, and the only file-backed
/// kind left by this point is read-only process-image segments.
pub fn destroy<D: SwapDevice>(vm: &VmSystem<D>, dir: &mut dyn PageDirectory, spt: &mut SupplementalPageTable) {
    for (page_addr, desc) in spt.drain() {
        dir.clear_mapping(page_addr);
        if let Some(frame) = desc.frame {
            if let Ok(kernel_addr) = vm.frame_table().lock().free(frame) {
                vm.page_allocator().lock().free_page(kernel_addr);
            }
        } else if let Some(slot) = desc.swap_slot {
            let _ = vm.swap_free(slot);
        }
    }
}

#[cfg(all(test, feature = "std-tests"))]
mod tests {
    use super::*;

    struct StubFile {
        len: u64,
    }

    impl OpenFile for StubFile {
        fn read(&mut self, _buf: &mut [u8]) -> crate::kernel::fs::FileResult<usize> {
            Ok(0)
        }
        fn write(&mut self, _buf: &[u8]) -> crate::kernel::fs::FileResult<usize> {
            Ok(0)
        }
        fn read_at(&mut self, _offset: u64, _buf: &mut [u8]) -> crate::kernel::fs::FileResult<usize> {
            Ok(0)
        }
        fn write_at(&mut self, _offset: u64, _buf: &[u8]) -> crate::kernel::fs::FileResult<usize> {
            Ok(0)
        }
        fn seek(&mut self, _pos: u64) {}
        fn tell(&self) -> u64 {
            0
        }
        fn length(&self) -> u64 {
            self.len
        }
        fn close(&mut self) {}
    }

    fn stub(len: u64) -> Arc<Mutex<Box<dyn OpenFile>>> {
        Arc::new(Mutex::new(Box::new(StubFile { len })))
    }

    #[test]
    fn mmap_inserts_one_descriptor_per_page() {
        let mut spt = SupplementalPageTable::new();
        let region = mmap(&mut spt, &None, 0x1000_0000, stub((PAGE_SIZE * 2 + 10) as u64)).unwrap();
        assert_eq!(region.length, PAGE_SIZE * 2 + 10);
        assert!(spt.contains(0x1000_0000));
        assert!(spt.contains(0x1000_0000 + PAGE_SIZE));
        assert!(spt.contains(0x1000_0000 + PAGE_SIZE * 2));
    }

    #[test]
    fn mmap_rejects_a_second_region() {
        let mut spt = SupplementalPageTable::new();
        let region = mmap(&mut spt, &None, 0x1000_0000, stub(PAGE_SIZE as u64)).unwrap();
        let err = mmap(&mut spt, &Some(region), 0x2000_0000, stub(PAGE_SIZE as u64));
        assert_eq!(err.unwrap_err(), VmError::MmapAlreadyMapped);
    }

    #[test]
    fn mmap_rolls_back_on_overlap() {
        let mut spt = SupplementalPageTable::new();
        spt.insert_evicted_placeholder(0x1000_0000 + PAGE_SIZE, PageKind::Anonymous, true)
            .unwrap();
        let err = mmap(&mut spt, &None, 0x1000_0000, stub((PAGE_SIZE * 2) as u64));
        assert_eq!(err.unwrap_err(), VmError::MmapOverlap);
        assert!(!spt.contains(0x1000_0000));
    }

    #[test]
    fn mmap_rejects_unaligned_base() {
        let mut spt = SupplementalPageTable::new();
        let err = mmap(&mut spt, &None, 0x1234, stub(PAGE_SIZE as u64));
        assert_eq!(err.unwrap_err(), VmError::MmapInvalid);
    }

    #[test]
    fn mmap_rejects_empty_file() {
        let mut spt = SupplementalPageTable::new();
        let err = mmap(&mut spt, &None, 0x1000_0000, stub(0));
        assert_eq!(err.unwrap_err(), VmError::MmapInvalid);
    }

    #[test]
    fn destroy_frees_every_remaining_frame() {
        use crate::kernel::mm::host::{PoolPageAllocator, RamFileSystem, RamSwapDevice};
        use crate::kernel::process::{ProcessTable, SoftwarePageDirectory};

        let vm = VmSystem::new(RamSwapDevice::new(), Box::new(PoolPageAllocator::new()), Box::new(RamFileSystem::new()));
        let mut registry = ProcessTable::new();
        let mut dir = SoftwarePageDirectory::new();
        let mut spt = SupplementalPageTable::new();

        let (frame_a, addr_a) = vm.alloc_frame(1, 0x2000_0000, &mut registry).unwrap();
        dir.install_mapping(0x2000_0000, addr_a, true);
        spt.insert_anonymous(0x2000_0000, frame_a, true).unwrap();

        let (frame_b, addr_b) = vm.alloc_frame(1, 0x2000_1000, &mut registry).unwrap();
        dir.install_mapping(0x2000_1000, addr_b, true);
        spt.insert_anonymous(0x2000_1000, frame_b, true).unwrap();

        assert_eq!(vm.frame_table().lock().busy_count(), 2);
        destroy(&vm, &mut dir, &mut spt);
        assert_eq!(vm.frame_table().lock().busy_count(), 0);
        assert!(spt.is_empty());
        assert!(dir.translate(0x2000_0000).is_none());
    }
}
