// src/kernel/mm/mod.rs
//! Memory management: the kernel heap allocator, plus the user-process
//! virtual memory core (frame table, supplemental page table, swap area,
//! page-fault resolution, and `mmap`/`munmap`).

pub mod allocator;
pub mod collaborators;
pub mod fault;
pub mod frame;
pub mod host;
pub mod mmap;
pub mod page_table;
pub mod swap;
pub mod system;
pub mod types;

pub use allocator::{LinkedListAllocator, LockedHeap};
pub use collaborators::{Console, FileSystem, OpenFile, PageAllocator, PageDirectory, SwapDevice, ThreadRegistry};
pub use fault::{resolve_page_fault, FaultError};
pub use frame::{FrameError, FrameIndex, FramePin, FrameTable};
pub use host::{PoolPageAllocator, RamFileSystem, RamSwapDevice, DriverConsole, VM_SYSTEM, CONSOLE};
pub use mmap::{destroy, mmap, munmap, MmapRegion};
pub use page_table::{PageDescriptor, PageKind, PageState, PageTableError, SupplementalPageTable};
pub use swap::{SwapArea, SwapError, SwapSlot};
pub use system::VmSystem;
pub use types::{LayoutSize, MemoryError, PageFrameNumber, PhysAddr, VirtAddr};
