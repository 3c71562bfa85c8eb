// src/constants.rs

//! Kernel constants and configuration values
//!
//! This module centralizes all constant values used throughout the kernel,
//! including feature descriptions, system information, and UI messages.

/// List of major kernel features and improvements
///
/// These features are displayed during boot to inform the user
/// about the kernel's capabilities.
pub const FEATURES: &[&str] = &[
    "Replaced static mut with Mutex (SAFE!)",
    "Interrupt-safe locking (no deadlock!)",
    "Implemented fmt::Write trait",
    "Optimized scroll with copy_nonoverlapping",
    "Modular code structure (vga_buffer, serial)",
    "Serial FIFO transmit check",
    "VGA color support (16 colors)",
    "VGA auto-scroll",
    "CPU hlt instruction",
    "Detailed panic handler",
];

/// System component information
///
/// Each tuple contains a (label, value) pair describing
/// a kernel component or configuration.
pub const SYSTEM_INFO: &[(&str, &str)] = &[
    ("Bootloader", "0.9.33"),
    ("Serial", "COM1 (0x3F8) with FIFO check"),
];

/// Usage hints displayed to serial output
///
/// These messages provide guidance on interacting with
/// the kernel when running under QEMU or similar emulators.
pub const SERIAL_HINTS: &[&str] = &[
    "Kernel running. System in low-power hlt loop.",
    "Press Ctrl+A, X to exit QEMU.",
];

/// Size in bytes of one virtual-memory page.
pub const PAGE_SIZE: usize = 4096;

/// Size in bytes of one block-device sector.
pub const SECTOR_SIZE: usize = 512;

/// Number of sectors a single page occupies on a block device.
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

/// Number of physical frames the frame table manages.
///
/// Modest on purpose: small enough that eviction is exercised by ordinary
/// test workloads instead of only by deliberately adversarial ones.
pub const FRAME_TABLE_SIZE: usize = 380;

/// First address outside user space; everything at or above this belongs
/// to the kernel half of the address space.
pub const USER_VADDR_LIMIT: usize = 0x0000_8000_0000_0000;

/// Top of a process's initial user stack, one page below the user/kernel
/// boundary.
pub const USER_STACK_TOP: usize = USER_VADDR_LIMIT - PAGE_SIZE;

/// Largest a user stack is allowed to grow to.
pub const MAX_STACK_SIZE: usize = 8 * 1024 * 1024;

/// How far below the current user stack pointer a fault address may still
/// be considered legitimate stack growth (covers `push`-family instructions
/// that write below `esp` before adjusting it).
pub const STACK_GROWTH_MARGIN: usize = 32;
