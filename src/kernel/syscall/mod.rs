// src/kernel/syscall/mod.rs
//! The user/kernel syscall boundary: argument fetch from the user stack,
//! user-pointer validation, and the fifteen operations of the standard
//! syscall set.
//!
//! Entry is `int 0x30`, not `syscall`/`sysret` (see
//! `crate::arch::x86_64::syscall`); arguments live on the user stack rather
//! than in registers, so [`dispatch_trap`] takes the saved user `esp` and
//! reads everything else through it.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::constants::{PAGE_SIZE, USER_VADDR_LIMIT};
use crate::debug_println;
use crate::kernel::fs::{STDIN_FD, STDOUT_FD};
use crate::kernel::mm::{destroy, mmap, munmap, resolve_page_fault, Console, FileSystem, OpenFile, PageDirectory};
use crate::kernel::mm::host::{CONSOLE, VM_SYSTEM};
use crate::kernel::process::{ProcessId, PROCESS_TABLE};

/// Return value for every path that terminates the calling process.
const KILLED: i64 = -1;

/// Longest name `read_cstr` will scan before giving up. Generous for a
/// teaching file system's names; bounds the scan against a user pointer
/// that never hits a NUL.
const MAX_CSTR_LEN: usize = 512;

/// The standard project syscall set, in the order the spec fixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyscallNumber {
    Halt,
    Exit,
    Exec,
    Wait,
    Create,
    Remove,
    Open,
    Filesize,
    Read,
    Write,
    Seek,
    Tell,
    Close,
    Mmap,
    Munmap,
}

impl SyscallNumber {
    fn from_u64(n: u64) -> Option<Self> {
        Some(match n {
            0 => Self::Halt,
            1 => Self::Exit,
            2 => Self::Exec,
            3 => Self::Wait,
            4 => Self::Create,
            5 => Self::Remove,
            6 => Self::Open,
            7 => Self::Filesize,
            8 => Self::Read,
            9 => Self::Write,
            10 => Self::Seek,
            11 => Self::Tell,
            12 => Self::Close,
            13 => Self::Mmap,
            14 => Self::Munmap,
            _ => return None,
        })
    }
}

/// Translate `user_addr` through `pid`'s page directory to the exact
/// kernel-accessible byte, not just its containing page.
fn translate_byte(pid: ProcessId, user_addr: usize) -> Option<usize> {
    let table = PROCESS_TABLE.lock();
    let state = table.get(pid)?.page_state();
    drop(table);
    let guard = state.lock();
    let page_base = guard.directory.translate(user_addr)?;
    Some(page_base + (user_addr & (PAGE_SIZE - 1)))
}

fn validate_user_addr(pid: ProcessId, addr: usize) -> bool {
    addr != 0 && addr < USER_VADDR_LIMIT && translate_byte(pid, addr).is_some()
}

/// Validate that `[addr, addr+len)` is non-null, within user space, and
/// every page it spans is currently mapped. Used by `write`'s buffer
/// validation and `copy_from_user`/`copy_to_user`'s precondition.
fn validate_range(pid: ProcessId, addr: usize, len: usize) -> bool {
    if addr == 0 {
        return false;
    }
    let Some(end) = addr.checked_add(len) else {
        return false;
    };
    if end > USER_VADDR_LIMIT {
        return false;
    }
    if len == 0 {
        return true;
    }
    let mut page = addr & !(PAGE_SIZE - 1);
    let last_page = (end - 1) & !(PAGE_SIZE - 1);
    while page <= last_page {
        if translate_byte(pid, page).is_none() {
            return false;
        }
        page += PAGE_SIZE;
    }
    true
}

/// Walk `[addr, addr+len)` page by page, resolving any not-yet-resident page
/// through the ordinary page-fault path -- exactly the stack-growth-or-fatal
/// decision `kernel::mm::fault` already makes, reused here so `read`'s
/// pre-fault walk doesn't duplicate that logic.
fn prefault_buffer(pid: ProcessId, addr: usize, len: usize, user_esp: usize) -> bool {
    if addr == 0 {
        return false;
    }
    let Some(end) = addr.checked_add(len) else {
        return false;
    };
    if end > USER_VADDR_LIMIT {
        return false;
    }
    if len == 0 {
        return true;
    }

    let Some(state) = PROCESS_TABLE.lock().get(pid).map(|p| p.page_state()) else {
        return false;
    };
    let mut guard = state.lock();

    let mut page = addr & !(PAGE_SIZE - 1);
    let last_page = (end - 1) & !(PAGE_SIZE - 1);
    while page <= last_page {
        if guard.directory.translate(page).is_none() {
            let mut table = PROCESS_TABLE.lock();
            let resolved = resolve_page_fault(
                &VM_SYSTEM,
                &mut *table,
                &mut guard.directory,
                &mut guard.table,
                pid.0,
                page,
                user_esp,
                false,
            );
            drop(table);
            if resolved.is_err() {
                return false;
            }
        }
        page += PAGE_SIZE;
    }
    true
}

fn copy_from_user(pid: ProcessId, addr: usize, len: usize) -> Option<Vec<u8>> {
    if !validate_range(pid, addr, len) {
        return None;
    }
    let mut buf = vec![0u8; len];
    for (i, slot) in buf.iter_mut().enumerate() {
        let kernel_addr = translate_byte(pid, addr + i)?;
        // SAFETY: `kernel_addr` was just translated from a page this
        // process's own directory maps; nothing else holds that page
        // exclusively while we read it.
        *slot = unsafe { core::ptr::read(kernel_addr as *const u8) };
    }
    Some(buf)
}

fn copy_to_user(pid: ProcessId, addr: usize, data: &[u8]) -> bool {
    if !validate_range(pid, addr, data.len()) {
        return false;
    }
    for (i, &byte) in data.iter().enumerate() {
        let Some(kernel_addr) = translate_byte(pid, addr + i) else {
            return false;
        };
        // SAFETY: same page-mapped guarantee as `copy_from_user`.
        unsafe {
            core::ptr::write(kernel_addr as *mut u8, byte);
        }
    }
    true
}

fn read_user_u64(pid: ProcessId, addr: usize) -> Option<u64> {
    let kernel_addr = translate_byte(pid, addr)?;
    // SAFETY: 8-byte stack slots never straddle a page boundary (slots are
    // 8-byte aligned and PAGE_SIZE is a multiple of 8), so one translated
    // byte address stands for the whole slot.
    Some(unsafe { core::ptr::read(kernel_addr as *const u64) })
}

fn read_cstr(pid: ProcessId, addr: usize) -> Option<String> {
    if addr == 0 || addr >= USER_VADDR_LIMIT {
        return None;
    }
    let mut bytes = Vec::new();
    for i in 0..MAX_CSTR_LEN {
        let kernel_addr = translate_byte(pid, addr + i)?;
        // SAFETY: translated from a page this process's directory maps.
        let byte = unsafe { core::ptr::read(kernel_addr as *const u8) };
        if byte == 0 {
            return String::from_utf8(bytes).ok();
        }
        bytes.push(byte);
    }
    None
}

fn lookup_fd(pid: ProcessId, fd: i32) -> Option<Arc<Mutex<alloc::boxed::Box<dyn OpenFile>>>> {
    PROCESS_TABLE.lock().get(pid)?.files().get(fd)
}

/// Tear down any active mmap region, reclaim every frame and swap slot the
/// process still owns, and record `status` -- the shared tail of both a
/// clean `exit` and a kernel-forced termination (bad pointer, bad syscall
/// number, unrecoverable allocation failure). Satisfies §8 invariant 5: no
/// reserved swap slot and no busy frame is left owned by a terminated tid.
fn kill_process(pid: ProcessId, status: i32) -> i64 {
    let region = PROCESS_TABLE.lock().get_mut(pid).and_then(|p| p.take_mmap_region());
    if let Some(state) = PROCESS_TABLE.lock().get(pid).map(|p| p.page_state()) {
        let mut guard = state.lock();
        if let Some(region) = region {
            let _ = munmap(&VM_SYSTEM, &mut guard.directory, &mut guard.table, region);
        }
        destroy(&VM_SYSTEM, &mut guard.directory, &mut guard.table);
    }
    let _ = PROCESS_TABLE.lock().terminate(pid, status);
    status as i64
}

/// The entry point called from `arch::x86_64::syscall::syscall_trap_handler`
/// with the user-mode `esp` captured at the `int 0x30` trap.
///
/// Reads and validates `esp[0..3]` (syscall number plus three argument
/// slots) before looking at the syscall number at all, per the dispatcher's
/// fixed entry contract; any failure in that walk, or an unrecognized
/// syscall number, terminates the process with status `-1`.
pub fn dispatch_trap(user_esp: usize) -> i64 {
    let Some(pid) = PROCESS_TABLE.lock().current_pid() else {
        debug_println!("[syscall] trap at esp={:#x} with no current process", user_esp);
        return KILLED;
    };

    for slot in 0..4 {
        if !validate_user_addr(pid, user_esp + slot * 8) {
            debug_println!("[syscall] bad stack pointer {:#x} (slot {})", user_esp, slot);
            return kill_process(pid, -1);
        }
    }

    let Some(number) = read_user_u64(pid, user_esp) else {
        return kill_process(pid, -1);
    };
    let Some(op) = SyscallNumber::from_u64(number) else {
        debug_println!("[syscall] unknown syscall number {}", number);
        return kill_process(pid, -1);
    };
    let arg1 = read_user_u64(pid, user_esp + 8).unwrap_or(0);
    let arg2 = read_user_u64(pid, user_esp + 16).unwrap_or(0);
    let arg3 = read_user_u64(pid, user_esp + 24).unwrap_or(0);

    match op {
        SyscallNumber::Halt => sys_halt(),
        SyscallNumber::Exit => kill_process(pid, arg1 as i64 as i32),
        SyscallNumber::Exec => sys_exec(pid, arg1 as usize),
        SyscallNumber::Wait => sys_wait(pid, arg1),
        SyscallNumber::Create => sys_create(pid, arg1 as usize, arg2),
        SyscallNumber::Remove => sys_remove(pid, arg1 as usize),
        SyscallNumber::Open => sys_open(pid, arg1 as usize),
        SyscallNumber::Filesize => sys_filesize(pid, arg1 as i32),
        SyscallNumber::Read => sys_read(pid, arg1 as i32, arg2 as usize, arg3 as usize, user_esp),
        SyscallNumber::Write => sys_write(pid, arg1 as i32, arg2 as usize, arg3 as usize),
        SyscallNumber::Seek => sys_seek(pid, arg1 as i32, arg2),
        SyscallNumber::Tell => sys_tell(pid, arg1 as i32),
        SyscallNumber::Close => sys_close(pid, arg1 as i32),
        SyscallNumber::Mmap => sys_mmap(pid, arg1 as i32, arg2 as usize),
        SyscallNumber::Munmap => sys_munmap(pid, arg1 as usize),
    }
}

/// `halt`: power off the machine. Never returns.
fn sys_halt() -> i64 {
    crate::qemu::exit_qemu(crate::qemu::QemuExitCode::Success)
}

fn sys_exec(pid: ProcessId, cmdline_ptr: usize) -> i64 {
    let Some(_cmdline) = read_cstr(pid, cmdline_ptr) else {
        return kill_process(pid, -1);
    };
    // No loader lives in this crate (see `kernel::process::ProcessTable::spawn`'s
    // docs): `exec` reduces to spawning a fresh, empty child address space.
    PROCESS_TABLE.lock().spawn(Some(pid)).0 as i64
}

fn sys_wait(pid: ProcessId, child_pid: u64) -> i64 {
    let child = ProcessId(child_pid);
    let mut table = PROCESS_TABLE.lock();
    match table.reap_child(pid, child) {
        Some(code) => code as i64,
        None => {
            if table.is_pending_child(pid, child) {
                debug_println!(
                    "[syscall] wait: pid {} has not exited yet (no blocking primitive here)",
                    child_pid
                );
            }
            -1
        }
    }
}

fn sys_create(pid: ProcessId, name_ptr: usize, size: u64) -> i64 {
    let Some(name) = read_cstr(pid, name_ptr) else {
        return kill_process(pid, -1);
    };
    VM_SYSTEM.filesystem().lock().create(&name, size) as i64
}

fn sys_remove(pid: ProcessId, name_ptr: usize) -> i64 {
    let Some(name) = read_cstr(pid, name_ptr) else {
        return kill_process(pid, -1);
    };
    VM_SYSTEM.filesystem().lock().remove(&name) as i64
}

fn sys_open(pid: ProcessId, name_ptr: usize) -> i64 {
    let Some(name) = read_cstr(pid, name_ptr) else {
        return kill_process(pid, -1);
    };
    let Some(file) = VM_SYSTEM.filesystem().lock().open(&name) else {
        return -1;
    };
    let mut table = PROCESS_TABLE.lock();
    let Some(process) = table.get_mut(pid) else {
        return -1;
    };
    process.files_mut().insert(Arc::new(Mutex::new(file))) as i64
}

fn sys_filesize(pid: ProcessId, fd: i32) -> i64 {
    match lookup_fd(pid, fd) {
        Some(file) => file.lock().length() as i64,
        None => -1,
    }
}

/// `read`'s own pre-fault walk happens before any lock is taken; the file
/// read itself runs under the file-system lock, matching the spec's
/// "validation happens before acquiring that lock" ordering rule.
fn sys_read(pid: ProcessId, fd: i32, buf: usize, len: usize, user_esp: usize) -> i64 {
    if fd == STDOUT_FD {
        return -1;
    }
    if !prefault_buffer(pid, buf, len, user_esp) {
        return kill_process(pid, -1);
    }

    if fd == STDIN_FD {
        let mut data = vec![0u8; len];
        for slot in &mut data {
            *slot = CONSOLE.lock().input_getc();
        }
        return if copy_to_user(pid, buf, &data) {
            len as i64
        } else {
            kill_process(pid, -1)
        };
    }

    let Some(file) = lookup_fd(pid, fd) else {
        return -1;
    };
    let mut data = vec![0u8; len];
    let result = {
        let _fs_guard = VM_SYSTEM.filesystem().lock();
        file.lock().read(&mut data)
    };
    match result {
        Ok(n) => {
            if copy_to_user(pid, buf, &data[..n]) {
                n as i64
            } else {
                kill_process(pid, -1)
            }
        }
        Err(_) => -1,
    }
}

/// `write` only ever reads from user memory into a file or the console; it
/// never writes through a user mapping, so it has nothing to do with mmap
/// dirty tracking. That lives entirely in the page-fault path now (see
/// `kernel::mm::fault`'s module docs).
fn sys_write(pid: ProcessId, fd: i32, buf: usize, len: usize) -> i64 {
    if fd == STDIN_FD {
        return -1;
    }
    if !validate_range(pid, buf, len) {
        return kill_process(pid, -1);
    }

    let Some(data) = copy_from_user(pid, buf, len) else {
        return kill_process(pid, -1);
    };

    if fd == STDOUT_FD {
        CONSOLE.lock().putbuf(&data);
        return len as i64;
    }

    let Some(file) = lookup_fd(pid, fd) else {
        return -1;
    };
    let _fs_guard = VM_SYSTEM.filesystem().lock();
    match file.lock().write(&data) {
        Ok(n) => n as i64,
        Err(_) => -1,
    }
}

fn sys_seek(pid: ProcessId, fd: i32, pos: u64) -> i64 {
    if let Some(file) = lookup_fd(pid, fd) {
        let _fs_guard = VM_SYSTEM.filesystem().lock();
        file.lock().seek(pos);
    }
    0
}

fn sys_tell(pid: ProcessId, fd: i32) -> i64 {
    match lookup_fd(pid, fd) {
        Some(file) => file.lock().tell() as i64,
        None => -1,
    }
}

fn sys_close(pid: ProcessId, fd: i32) -> i64 {
    if let Some(process) = PROCESS_TABLE.lock().get_mut(pid) {
        process.files_mut().close(fd);
    }
    0
}

/// `mmap`'s preconditions (`fd` not a console fd, already-open file, no
/// existing mapping, alignment, non-empty file) are all enforced by
/// `kernel::mm::mmap::mmap` itself; this wrapper only resolves `fd` to a
/// handle and stores the resulting region.
fn sys_mmap(pid: ProcessId, fd: i32, addr: usize) -> i64 {
    if fd == STDIN_FD || fd == STDOUT_FD {
        return -1;
    }
    let Some(file) = lookup_fd(pid, fd) else {
        return -1;
    };

    let mut table = PROCESS_TABLE.lock();
    let Some(process) = table.get_mut(pid) else {
        return -1;
    };
    let state = process.page_state();
    let mut guard = state.lock();
    match mmap(&mut guard.table, process.mmap_region(), addr, file) {
        Ok(region) => {
            let base = region.base as i64;
            process.set_mmap_region(region);
            base
        }
        Err(_) => -1,
    }
}

fn sys_munmap(pid: ProcessId, mapid: usize) -> i64 {
    let mut table = PROCESS_TABLE.lock();
    let Some(process) = table.get_mut(pid) else {
        return 0;
    };
    let Some(base) = process.mmap_region().as_ref().map(|r| r.base) else {
        return 0;
    };
    if base != mapid {
        return 0;
    }
    let region = process.take_mmap_region().expect("checked Some above");
    let state = process.page_state();
    let mut guard = state.lock();
    let _ = munmap(&VM_SYSTEM, &mut guard.directory, &mut guard.table, region);
    0
}

#[cfg(all(test, feature = "std-tests"))]
mod tests {
    use super::*;

    #[test]
    fn syscall_number_round_trip() {
        assert_eq!(SyscallNumber::from_u64(0), Some(SyscallNumber::Halt));
        assert_eq!(SyscallNumber::from_u64(9), Some(SyscallNumber::Write));
        assert_eq!(SyscallNumber::from_u64(14), Some(SyscallNumber::Munmap));
        assert_eq!(SyscallNumber::from_u64(15), None);
    }

    /// Installs `bytes.len()` worth of mapping at `user_base`, backed by a
    /// real heap buffer so raw reads/writes through it are sound.
    fn map_buffer(pid: ProcessId, user_base: usize, bytes: &mut [u8]) {
        let state = PROCESS_TABLE.lock().get(pid).unwrap().page_state();
        let mut guard = state.lock();
        let mut page = user_base & !(PAGE_SIZE - 1);
        let kernel_base = bytes.as_mut_ptr() as usize;
        let mut offset = 0;
        while offset < bytes.len() {
            guard.directory.install_mapping(page, kernel_base + offset, true);
            page += PAGE_SIZE;
            offset += PAGE_SIZE;
        }
    }

    #[test]
    fn validate_user_addr_respects_installed_mappings() {
        let pid = PROCESS_TABLE.lock().spawn(None);
        let mut buf = vec![0u8; PAGE_SIZE];
        map_buffer(pid, 0x4000_0000, &mut buf);

        assert!(validate_user_addr(pid, 0x4000_0000));
        assert!(validate_user_addr(pid, 0x4000_0010));
        assert!(!validate_user_addr(pid, 0x5000_0000));
        assert!(!validate_user_addr(pid, 0));
    }

    #[test]
    fn copy_to_user_then_copy_from_user_round_trips() {
        let pid = PROCESS_TABLE.lock().spawn(None);
        let mut buf = vec![0u8; PAGE_SIZE];
        map_buffer(pid, 0x4100_0000, &mut buf);

        let payload = b"hello kernel";
        assert!(copy_to_user(pid, 0x4100_0000, payload));
        let read_back = copy_from_user(pid, 0x4100_0000, payload.len()).unwrap();
        assert_eq!(&read_back, payload);
    }

    #[test]
    fn validate_range_rejects_partially_unmapped_span() {
        let pid = PROCESS_TABLE.lock().spawn(None);
        let mut buf = vec![0u8; PAGE_SIZE];
        map_buffer(pid, 0x4200_0000, &mut buf);

        assert!(validate_range(pid, 0x4200_0000, PAGE_SIZE));
        assert!(!validate_range(pid, 0x4200_0000, PAGE_SIZE * 2));
    }

    #[test]
    fn validate_range_rejects_overflowing_span() {
        let pid = PROCESS_TABLE.lock().spawn(None);
        assert!(!validate_range(pid, usize::MAX - 4, 16));
    }
}
