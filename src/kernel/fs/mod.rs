//! File System and IPC module

pub mod pipe;

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use spin::Mutex;

use crate::kernel::mm::collaborators::OpenFile;

/// The reserved stdin descriptor. Never appears in a [`FileDescriptorTable`].
pub const STDIN_FD: i32 = 0;
/// The reserved stdout descriptor. Never appears in a [`FileDescriptorTable`].
pub const STDOUT_FD: i32 = 1;
/// The first fd a process's own `open` calls may allocate.
pub const FIRST_USER_FD: i32 = 3;

/// Per-process table of open files, keyed by fd.
///
/// fd 0 and 1 are reserved for the console and never stored here; `open`
/// allocates fds starting at 3, monotonically increasing for the lifetime
/// of the process (a closed fd is never reused).
#[derive(Default)]
pub struct FileDescriptorTable {
    next_fd: i32,
    files: BTreeMap<i32, Arc<Mutex<Box<dyn OpenFile>>>>,
}

impl FileDescriptorTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_fd: FIRST_USER_FD,
            files: BTreeMap::new(),
        }
    }

    /// Record `file` under a freshly allocated fd and return it.
    pub fn insert(&mut self, file: Arc<Mutex<Box<dyn OpenFile>>>) -> i32 {
        let fd = self.next_fd;
        self.next_fd += 1;
        self.files.insert(fd, file);
        fd
    }

    pub fn get(&self, fd: i32) -> Option<Arc<Mutex<Box<dyn OpenFile>>>> {
        self.files.get(&fd).cloned()
    }

    /// Remove and close `fd`'s handle. No-op if `fd` is not open.
    pub fn close(&mut self, fd: i32) {
        if let Some(file) = self.files.remove(&fd) {
            file.lock().close();
        }
    }

    /// Close every remaining fd, e.g. on process exit.
    pub fn close_all(&mut self) {
        for (_, file) in core::mem::take(&mut self.files) {
            file.lock().close();
        }
    }
}

/// Result type for file operations
pub type FileResult<T> = Result<T, FileError>;

/// File operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileError {
    NotImplemented,
    BrokenPipe,
    WouldBlock,
    InvalidInput,
    Other,
}

/// File Descriptor Trait
/// 
/// Represents an open file, pipe, or other resource that can be read/written.
pub trait FileDescriptor: Send + Sync {
    /// Read bytes from the file into the buffer
    /// Returns the number of bytes read
    fn read(&mut self, buf: &mut [u8]) -> FileResult<usize>;
    
    /// Write bytes to the file from the buffer
    /// Returns the number of bytes written
    fn write(&mut self, buf: &[u8]) -> FileResult<usize>;
    
    /// Close the file descriptor
    fn close(&mut self) -> FileResult<()>;
    
    /// Poll for readiness (optional, for non-blocking I/O)
    fn poll(&self) -> bool {
        true
    }
}
