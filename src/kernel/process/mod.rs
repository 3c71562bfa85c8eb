// src/kernel/process/mod.rs
//! Process table and per-process virtual-memory state.
//!
//! Real hardware context-switching (saved register sets, CR3 reloads, the
//! ring-3 trampoline) belongs to the embedding kernel's scheduler, which
//! this crate does not implement -- see [`crate::kernel::mm::collaborators`].
//! What lives here is the bookkeeping the VM core and syscall dispatcher
//! actually touch: a process's supplemental page table, its software page
//! directory, its open files, and its single mmap region.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::kernel::fs::FileDescriptorTable;
use crate::kernel::mm::collaborators::PageDirectory;
use crate::kernel::mm::mmap::MmapRegion;
use crate::kernel::mm::page_table::SupplementalPageTable;

/// Process identifier, also used as the VM core's `owner_tid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

/// A process's run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Ready,
    Blocked,
    Terminated,
}

/// A bookkeeping stand-in for a hardware page directory.
///
/// Tracks the same information real page-table hardware would expose to
/// [`PageDirectory`] -- the mapping itself, plus accessed/dirty bits -- in a
/// plain `BTreeMap`, without touching CR3 or the MMU. An embedding kernel
/// with real per-process address spaces replaces this with a type backed
/// by `x86_64::structures::paging::Mapper`.
#[derive(Default)]
pub struct SoftwarePageDirectory {
    mappings: BTreeMap<usize, (usize, bool)>,
    accessed: BTreeMap<usize, bool>,
    dirty: BTreeMap<usize, bool>,
}

impl SoftwarePageDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn page_of(addr: usize) -> usize {
        addr & !(crate::constants::PAGE_SIZE - 1)
    }
}

impl PageDirectory for SoftwarePageDirectory {
    fn install_mapping(&mut self, user_addr: usize, kernel_addr: usize, writable: bool) {
        let page = Self::page_of(user_addr);
        self.mappings.insert(page, (kernel_addr, writable));
        self.accessed.insert(page, true);
    }

    fn clear_mapping(&mut self, user_addr: usize) {
        let page = Self::page_of(user_addr);
        self.mappings.remove(&page);
        self.accessed.remove(&page);
        self.dirty.remove(&page);
    }

    fn translate(&self, user_addr: usize) -> Option<usize> {
        self.mappings.get(&Self::page_of(user_addr)).map(|(addr, _)| *addr)
    }

    fn accessed(&self, user_addr: usize) -> bool {
        self.accessed.get(&Self::page_of(user_addr)).copied().unwrap_or(false)
    }

    fn clear_accessed(&mut self, user_addr: usize) {
        self.accessed.insert(Self::page_of(user_addr), false);
    }

    fn dirty(&self, user_addr: usize) -> bool {
        self.dirty.get(&Self::page_of(user_addr)).copied().unwrap_or(false)
    }
}

/// A process's page directory and supplemental page table, held behind
/// their own lock so [`ThreadRegistry::with_owner`] can reach one process's
/// VM state without needing exclusive access to the whole
/// [`ProcessTable`] -- the table's own lock and a process's page-state lock
/// are independent, which is what lets the evictor visit other processes
/// while the faulting process's own state is already in hand.
#[derive(Default)]
pub struct ProcessPageState {
    pub directory: SoftwarePageDirectory,
    pub table: SupplementalPageTable,
}

/// One process: bookkeeping only, no hardware context.
pub struct Process {
    pid: ProcessId,
    state: ProcessState,
    parent_pid: Option<ProcessId>,
    exit_code: Option<i32>,
    page_state: Arc<Mutex<ProcessPageState>>,
    files: FileDescriptorTable,
    mmap_region: Option<MmapRegion>,
}

impl Process {
    fn new(pid: ProcessId, parent_pid: Option<ProcessId>) -> Self {
        Self {
            pid,
            state: ProcessState::Ready,
            parent_pid,
            exit_code: None,
            page_state: Arc::new(Mutex::new(ProcessPageState::default())),
            files: FileDescriptorTable::new(),
            mmap_region: None,
        }
    }

    #[must_use]
    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    #[must_use]
    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn set_state(&mut self, state: ProcessState) {
        self.state = state;
    }

    #[must_use]
    pub fn parent_pid(&self) -> Option<ProcessId> {
        self.parent_pid
    }

    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn set_exit_code(&mut self, code: i32) {
        self.exit_code = Some(code);
    }

    /// Clone of this process's page-state handle. Cheap (an `Arc` bump);
    /// lets a caller lock the directory/table independently of the
    /// [`ProcessTable`]'s own lock, e.g. while also passing the table as a
    /// [`ThreadRegistry`] to the same VM call.
    #[must_use]
    pub fn page_state(&self) -> Arc<Mutex<ProcessPageState>> {
        self.page_state.clone()
    }

    #[must_use]
    pub fn files(&self) -> &FileDescriptorTable {
        &self.files
    }

    pub fn files_mut(&mut self) -> &mut FileDescriptorTable {
        &mut self.files
    }

    #[must_use]
    pub fn mmap_region(&self) -> &Option<MmapRegion> {
        &self.mmap_region
    }

    pub fn take_mmap_region(&mut self) -> Option<MmapRegion> {
        self.mmap_region.take()
    }

    pub fn set_mmap_region(&mut self, region: MmapRegion) {
        self.mmap_region = Some(region);
    }
}

/// Error returned when a process table operation can't find its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    NotFound,
}

/// The process table: every live process, keyed by pid.
///
/// Implements [`crate::kernel::mm::collaborators::ThreadRegistry`] so the
/// VM core's evictor can reach any process's page directory and
/// supplemental page table by `owner_tid` alone.
pub struct ProcessTable {
    processes: Vec<Process>,
    next_pid: u64,
    current_pid: Option<ProcessId>,
}

impl ProcessTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            processes: Vec::new(),
            next_pid: 1,
            current_pid: None,
        }
    }

    fn allocate_pid(&mut self) -> ProcessId {
        let pid = ProcessId(self.next_pid);
        self.next_pid += 1;
        pid
    }

    /// Create a new process. With no loader in this crate, `exec` and the
    /// initial boot process both reduce to this: a fresh, empty address
    /// space the caller populates via syscalls.
    pub fn spawn(&mut self, parent_pid: Option<ProcessId>) -> ProcessId {
        let pid = self.allocate_pid();
        self.processes.push(Process::new(pid, parent_pid));
        pid
    }

    pub fn get(&self, pid: ProcessId) -> Option<&Process> {
        self.processes.iter().find(|p| p.pid == pid)
    }

    pub fn get_mut(&mut self, pid: ProcessId) -> Option<&mut Process> {
        self.processes.iter_mut().find(|p| p.pid == pid)
    }

    #[must_use]
    pub fn current_pid(&self) -> Option<ProcessId> {
        self.current_pid
    }

    pub fn set_current(&mut self, pid: ProcessId) {
        self.current_pid = Some(pid);
    }

    pub fn current(&self) -> Option<&Process> {
        self.current_pid.and_then(|pid| self.get(pid))
    }

    pub fn current_mut(&mut self) -> Option<&mut Process> {
        self.current_pid.and_then(move |pid| self.get_mut(pid))
    }

    /// Mark `pid` terminated with `exit_code`, closing its files. Frees no
    /// VM state -- the caller (`kernel::syscall::kill_process`) must run
    /// `kernel::mm::destroy` against the process's page state first, since
    /// that needs the `VmSystem` this table doesn't have a handle to. If
    /// its parent is alive and blocked in `wait`, the caller is responsible
    /// for waking it; this table only records the exit.
    pub fn terminate(&mut self, pid: ProcessId, exit_code: i32) -> Result<(), ProcessError> {
        let process = self.get_mut(pid).ok_or(ProcessError::NotFound)?;
        process.files_mut().close_all();
        process.set_exit_code(exit_code);
        process.set_state(ProcessState::Terminated);
        Ok(())
    }

    /// The first terminated child of `parent`, if any, removed from the
    /// table and returned. `wait` is implemented as a single non-blocking
    /// check against this: a process with no external scheduler to block on
    /// either finds its child already exited here, or hasn't -- polling is
    /// the right model for a crate with no blocking primitive of its own.
    pub fn reap_terminated_child(&mut self, parent: ProcessId) -> Option<(ProcessId, i32)> {
        let pos = self.processes.iter().position(|p| {
            p.parent_pid == Some(parent) && p.state == ProcessState::Terminated
        })?;
        let child = self.processes.remove(pos);
        Some((child.pid, child.exit_code.unwrap_or(-1)))
    }

    #[must_use]
    pub fn has_children(&self, parent: ProcessId) -> bool {
        self.processes.iter().any(|p| p.parent_pid == Some(parent))
    }

    /// Reap `child` specifically if it is a terminated child of `parent`.
    /// The `wait` syscall names the child it's waiting for, unlike the
    /// generic poll in [`Self::reap_terminated_child`].
    pub fn reap_child(&mut self, parent: ProcessId, child: ProcessId) -> Option<i32> {
        let pos = self.processes.iter().position(|p| {
            p.pid == child && p.parent_pid == Some(parent) && p.state == ProcessState::Terminated
        })?;
        let removed = self.processes.remove(pos);
        Some(removed.exit_code.unwrap_or(-1))
    }

    /// Whether `child` is a live (not-yet-terminated) child of `parent`,
    /// i.e. `wait` should report `-1` rather than block forever.
    #[must_use]
    pub fn is_pending_child(&self, parent: ProcessId, child: ProcessId) -> bool {
        self.processes
            .iter()
            .any(|p| p.pid == child && p.parent_pid == Some(parent))
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl crate::kernel::mm::collaborators::ThreadRegistry for ProcessTable {
    fn is_alive(&self, owner_tid: u64) -> bool {
        self.processes
            .iter()
            .any(|p| p.pid.0 == owner_tid && p.state != ProcessState::Terminated)
    }

    fn with_owner(
        &mut self,
        owner_tid: u64,
        f: &mut dyn FnMut(&mut dyn PageDirectory, &mut SupplementalPageTable),
    ) -> bool {
        let Some(process) = self.processes.iter().find(|p| p.pid.0 == owner_tid) else {
            return false;
        };
        let state = process.page_state();
        let mut guard = state.lock();
        f(&mut guard.directory, &mut guard.table);
        true
    }
}

lazy_static::lazy_static! {
    /// The kernel's single process table.
    pub static ref PROCESS_TABLE: Mutex<ProcessTable> = Mutex::new(ProcessTable::new());
}

#[cfg(all(test, feature = "std-tests"))]
mod tests {
    use super::*;
    use crate::kernel::mm::collaborators::ThreadRegistry;

    #[test]
    fn spawn_assigns_increasing_pids() {
        let mut table = ProcessTable::new();
        let a = table.spawn(None);
        let b = table.spawn(None);
        assert_ne!(a, b);
        assert!(table.get(a).is_some());
        assert!(table.get(b).is_some());
    }

    #[test]
    fn terminate_marks_state_and_exit_code() {
        let mut table = ProcessTable::new();
        let pid = table.spawn(None);
        table.terminate(pid, 7).unwrap();
        let process = table.get(pid).unwrap();
        assert_eq!(process.state(), ProcessState::Terminated);
        assert_eq!(process.exit_code(), Some(7));
    }

    #[test]
    fn reap_terminated_child_removes_it_once() {
        let mut table = ProcessTable::new();
        let parent = table.spawn(None);
        let child = table.spawn(Some(parent));
        assert!(table.reap_terminated_child(parent).is_none());
        table.terminate(child, 0).unwrap();
        let (reaped, code) = table.reap_terminated_child(parent).unwrap();
        assert_eq!(reaped, child);
        assert_eq!(code, 0);
        assert!(table.reap_terminated_child(parent).is_none());
    }

    #[test]
    fn with_owner_reaches_process_page_state() {
        let mut table = ProcessTable::new();
        let pid = table.spawn(None);
        let reached = table.with_owner(pid.0, &mut |dir, _spt| {
            dir.install_mapping(0x1000, 0xffff_8000_0000_0000, true);
        });
        assert!(reached);
        let state = table.get(pid).unwrap().page_state();
        assert!(state.lock().directory.translate(0x1000).is_some());
    }

    #[test]
    fn with_owner_misses_unknown_tid() {
        let mut table = ProcessTable::new();
        let reached = table.with_owner(999, &mut |_dir, _spt| {});
        assert!(!reached);
    }
}
