// src/kernel/mm/fault.rs
//! Page-fault resolution: the single entry point that turns a hardware
//! not-present or write-protection fault into either a newly loaded page, a
//! promoted-to-dirty mapping, or a fatal segfault.
//!
//! A freshly loaded `Mmap` page that is logically writable is installed
//! read-only the first time; the write that follows re-enters here as a
//! protection fault on an already-`Loaded` descriptor, which is exactly the
//! hardware dirty-bit observation the spec calls for (see
//! `PageDescriptor::dirty`'s docs). No other caller ever sets that flag.

use alloc::vec;

use crate::constants::{MAX_STACK_SIZE, PAGE_SIZE, STACK_GROWTH_MARGIN, USER_STACK_TOP, USER_VADDR_LIMIT};
use crate::kernel::core::result::VmError;
use crate::kernel::mm::collaborators::{PageDirectory, SwapDevice, ThreadRegistry};
use crate::kernel::mm::frame::FramePin;
use crate::kernel::mm::page_table::{PageKind, SupplementalPageTable};
use crate::kernel::mm::system::VmSystem;

/// Why page-fault resolution failed to produce a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// No descriptor exists for the address and it isn't plausible stack
    /// growth either; the caller should terminate the faulting process.
    SegFault,
    /// An already-loaded page faulted again (stale TLB entry aside, this
    /// means a write to a read-only page); also fatal.
    ProtectionViolation,
    Vm(VmError),
}

/// Resolve a user page fault at `fault_addr` for `owner_tid`, whose page
/// directory is `dir` and whose page table is `spt`.
///
/// `user_stack_pointer` is the faulting thread's user-mode `esp` at the
/// time of the fault, used only to decide whether an unmapped address below
/// the stack is legitimate growth. `caused_by_write` is the hardware fault
/// error code's write bit (`PageFaultErrorCode::CAUSED_BY_WRITE` on x86_64);
/// it is what lets a re-fault on an already-`Loaded` mmap descriptor be told
/// apart from a genuine protection violation.
pub fn resolve_page_fault<D: SwapDevice>(
    vm: &VmSystem<D>,
    registry: &mut dyn ThreadRegistry,
    dir: &mut dyn PageDirectory,
    spt: &mut SupplementalPageTable,
    owner_tid: u64,
    fault_addr: usize,
    user_stack_pointer: usize,
    caused_by_write: bool,
) -> Result<(), FaultError> {
    if fault_addr >= USER_VADDR_LIMIT {
        return Err(FaultError::SegFault);
    }
    let page_addr = fault_addr & !(PAGE_SIZE - 1);

    if spt.contains(page_addr) {
        return resolve_existing(vm, registry, dir, spt, owner_tid, page_addr, caused_by_write);
    }

    if is_plausible_stack_growth(fault_addr, user_stack_pointer) {
        return grow_stack(vm, registry, dir, spt, owner_tid, page_addr);
    }

    Err(FaultError::SegFault)
}

fn resolve_existing<D: SwapDevice>(
    vm: &VmSystem<D>,
    registry: &mut dyn ThreadRegistry,
    dir: &mut dyn PageDirectory,
    spt: &mut SupplementalPageTable,
    owner_tid: u64,
    page_addr: usize,
    caused_by_write: bool,
) -> Result<(), FaultError> {
    {
        let desc = spt.get(page_addr).ok_or(FaultError::SegFault)?;
        if desc.frame.is_some() {
            // Already resident: the only legitimate re-fault is the first
            // write to a writable mmap page we deliberately installed
            // read-only, to observe that write as a dirty-bit event.
            if caused_by_write && desc.writable && matches!(desc.kind, PageKind::Mmap) {
                let kernel_addr = vm
                    .frame_table()
                    .lock()
                    .info(desc.frame.expect("checked Some above"))
                    .map(|info| info.kernel_addr)
                    .ok_or(FaultError::SegFault)?;
                dir.install_mapping(page_addr, kernel_addr, true);
                spt.get_mut(page_addr).ok_or(FaultError::SegFault)?.dirty = true;
                return Ok(());
            }
            return Err(FaultError::ProtectionViolation);
        }
    }
    let (kind, writable) = {
        let desc = spt.get(page_addr).ok_or(FaultError::SegFault)?;
        (desc.kind, desc.writable)
    };
    // Install a fresh writable Mmap page read-only the first time so the
    // write that dirties it re-enters above instead of passing silently.
    let install_writable = writable && !matches!(kind, PageKind::Mmap);

    let (frame, kernel_addr) = vm
        .alloc_frame(owner_tid, page_addr, registry)
        .map_err(FaultError::Vm)?;
    let _pin = FramePin::new(vm.frame_table(), frame);

    let swap_slot = spt.get(page_addr).and_then(|d| d.swap_slot);
    if let Some(slot) = swap_slot {
        let mut page = [0u8; PAGE_SIZE];
        vm.swap_in(slot, &mut page).map_err(FaultError::Vm)?;
        // SAFETY: `kernel_addr` is the frame we just allocated; nothing else
        // can reach it until we install the mapping below.
        unsafe {
            core::ptr::copy_nonoverlapping(page.as_ptr(), kernel_addr as *mut u8, PAGE_SIZE);
        }
    } else {
        load_from_file_or_zero(spt, page_addr, kernel_addr);
    }

    dir.install_mapping(page_addr, kernel_addr, install_writable);
    let desc = spt.get_mut(page_addr).ok_or(FaultError::SegFault)?;
    desc.frame = Some(frame);
    desc.swap_slot = None;
    Ok(())
}

fn load_from_file_or_zero(spt: &mut SupplementalPageTable, page_addr: usize, kernel_addr: usize) {
    let Some(desc) = spt.get_mut(page_addr) else {
        return;
    };
    if let Some(file) = desc.file.clone() {
        let mut buf = vec![0u8; desc.read_bytes];
        let _ = file.lock().read_at(desc.file_offset, &mut buf);
        // SAFETY: `kernel_addr` names the freshly allocated frame; `buf`'s
        // length is exactly `read_bytes`, and `read_bytes + zero_bytes` is
        // maintained by the mmap/loader insert paths to equal `PAGE_SIZE`.
        unsafe {
            core::ptr::copy_nonoverlapping(buf.as_ptr(), kernel_addr as *mut u8, desc.read_bytes);
            core::ptr::write_bytes(
                (kernel_addr + desc.read_bytes) as *mut u8,
                0,
                desc.zero_bytes,
            );
        }
    } else if matches!(desc.kind, PageKind::Anonymous) {
        // SAFETY: same frame as above, whole page is ours to zero.
        unsafe {
            core::ptr::write_bytes(kernel_addr as *mut u8, 0, PAGE_SIZE);
        }
    }
}

fn grow_stack<D: SwapDevice>(
    vm: &VmSystem<D>,
    registry: &mut dyn ThreadRegistry,
    dir: &mut dyn PageDirectory,
    spt: &mut SupplementalPageTable,
    owner_tid: u64,
    page_addr: usize,
) -> Result<(), FaultError> {
    let (frame, kernel_addr) = vm
        .alloc_frame(owner_tid, page_addr, registry)
        .map_err(FaultError::Vm)?;
    // SAFETY: fresh frame, nothing else can observe it yet.
    unsafe {
        core::ptr::write_bytes(kernel_addr as *mut u8, 0, PAGE_SIZE);
    }
    dir.install_mapping(page_addr, kernel_addr, true);
    spt.insert_anonymous(page_addr, frame, true)
        .map_err(|_| FaultError::SegFault)?;
    Ok(())
}

fn is_plausible_stack_growth(fault_addr: usize, user_stack_pointer: usize) -> bool {
    if fault_addr >= USER_VADDR_LIMIT {
        return false;
    }
    let lower_bound = USER_STACK_TOP.saturating_sub(MAX_STACK_SIZE);
    if fault_addr < lower_bound || fault_addr > USER_STACK_TOP {
        return false;
    }
    fault_addr + STACK_GROWTH_MARGIN >= user_stack_pointer
}

#[cfg(all(test, feature = "std-tests"))]
mod dirty_tracking_tests {
    use super::*;
    use alloc::boxed::Box;
    use alloc::sync::Arc;

    use spin::Mutex;

    use crate::kernel::mm::collaborators::OpenFile;
    use crate::kernel::mm::host::{PoolPageAllocator, RamFileSystem, RamSwapDevice};
    use crate::kernel::mm::page_table::PageKind;
    use crate::kernel::process::ProcessTable;

    fn stub_file(len: u64) -> Arc<Mutex<Box<dyn OpenFile>>> {
        let mut fs = RamFileSystem::new();
        fs.create("backing", len);
        Arc::new(Mutex::new(fs.open("backing").unwrap()))
    }

    /// Eviction never runs in these tests (the pool starts with plenty of
    /// free frames), so the registry handed to `resolve_page_fault` is never
    /// actually consulted; an empty table satisfies the type.
    fn unused_registry() -> ProcessTable {
        ProcessTable::new()
    }

    #[test]
    fn first_write_to_a_loaded_mmap_page_sets_dirty_and_promotes_writable() {
        let vm = VmSystem::new(RamSwapDevice::new(), Box::new(PoolPageAllocator::new()), Box::new(RamFileSystem::new()));
        let mut table = ProcessTable::new();
        let pid = table.spawn(None);
        let state = table.get(pid).unwrap().page_state();
        let mut guard = state.lock();

        let page_addr = 0x5000_0000;
        guard
            .table
            .insert_file_backed(page_addr, PageKind::Mmap, stub_file(PAGE_SIZE as u64), 0, PAGE_SIZE, 0, true)
            .unwrap();

        // Not-yet-resident load: installed read-only despite `writable: true`.
        resolve_page_fault(&vm, &mut unused_registry(), &mut guard.directory, &mut guard.table, pid.0, page_addr, 0, false)
            .unwrap();
        assert!(!guard.table.get(page_addr).unwrap().dirty);

        // The write that follows re-enters as a protection re-fault on an
        // already-`Loaded` descriptor; `caused_by_write` tells it apart from
        // a genuine violation.
        resolve_page_fault(&vm, &mut unused_registry(), &mut guard.directory, &mut guard.table, pid.0, page_addr, 0, true)
            .unwrap();
        assert!(guard.table.get(page_addr).unwrap().dirty);
    }

    #[test]
    fn write_fault_on_a_read_only_segment_is_a_protection_violation() {
        let vm = VmSystem::new(RamSwapDevice::new(), Box::new(PoolPageAllocator::new()), Box::new(RamFileSystem::new()));
        let mut table = ProcessTable::new();
        let pid = table.spawn(None);
        let state = table.get(pid).unwrap().page_state();
        let mut guard = state.lock();

        let page_addr = 0x5000_1000;
        guard
            .table
            .insert_file_backed(page_addr, PageKind::FileBacked, stub_file(PAGE_SIZE as u64), 0, PAGE_SIZE, 0, false)
            .unwrap();
        resolve_page_fault(&vm, &mut unused_registry(), &mut guard.directory, &mut guard.table, pid.0, page_addr, 0, false)
            .unwrap();

        let err = resolve_page_fault(&vm, &mut unused_registry(), &mut guard.directory, &mut guard.table, pid.0, page_addr, 0, true);
        assert_eq!(err, Err(FaultError::ProtectionViolation));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_past_stack_top_is_not_growth() {
        assert!(!is_plausible_stack_growth(USER_STACK_TOP + PAGE_SIZE, USER_STACK_TOP));
    }

    #[test]
    fn address_just_below_stack_pointer_is_growth() {
        let sp = USER_STACK_TOP - PAGE_SIZE;
        assert!(is_plausible_stack_growth(sp - 4, sp));
    }

    #[test]
    fn address_far_below_stack_pointer_is_not_growth() {
        let sp = USER_STACK_TOP - PAGE_SIZE;
        assert!(!is_plausible_stack_growth(sp - 4096, sp));
    }

    #[test]
    fn kernel_address_is_never_growth() {
        assert!(!is_plausible_stack_growth(USER_VADDR_LIMIT, USER_VADDR_LIMIT));
    }
}
