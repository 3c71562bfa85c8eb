//! System Call Mechanism for x86_64
//!
//! Syscalls enter through a software interrupt gate (vector `0x30`, DPL 3),
//! not `syscall`/`sysret`: the standard syscall set passes its arguments on
//! the user stack rather than in registers, so the trap gate's automatic
//! ring-0 stack switch (via the TSS `RSP0`) is all the privilege transition
//! this needs -- there is no user RSP to rescue by hand the way `syscall`
//! requires.

#![allow(unsafe_op_in_unsafe_fn)] // naked_asm! requires this

use x86_64::structures::idt::InterruptDescriptorTable;
use x86_64::PrivilegeLevel;

/// Syscall interrupt vector, matching the user-mode `int $0x30` instruction.
pub const SYSCALL_INTERRUPT_VECTOR: u8 = 0x30;

/// Install the vector `0x30` gate at DPL 3 so ring-3 code may trap into it.
pub fn register(idt: &mut InterruptDescriptorTable) {
    unsafe {
        idt[SYSCALL_INTERRUPT_VECTOR as usize]
            .set_handler_fn(core::mem::transmute::<*const (), extern "x86-interrupt" fn()>(
                syscall_interrupt_entry as *const (),
            ))
            .set_privilege_level(PrivilegeLevel::Ring3);
    }
}

/// Entry stub for `int 0x30`.
///
/// The CPU's ring-3 -> ring-0 transition already switched to the TSS
/// `RSP0` kernel stack and pushed `SS:RSP:RFLAGS:CS:RIP` (no error code for
/// this vector). We save the callee-saved registers a C function would be
/// expected to preserve, recover the saved user `RSP` from the trap frame,
/// and hand it to the real dispatcher in Rust. The dispatcher's return
/// value ends up in `rax`, which `iretq` leaves for the user program.
#[unsafe(naked)]
pub unsafe extern "C" fn syscall_interrupt_entry() -> ! {
    core::arch::naked_asm!(
        "push rbx",
        "push rbp",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        // The trap frame begins right above our 6 pushes (48 bytes):
        // RIP, CS, RFLAGS, RSP, SS in that order -- user RSP sits 24 bytes
        // past RIP.
        "mov rdi, [rsp + 48 + 24]",
        "mov r10, rsp",
        "and rsp, -16",
        "call {handler}",
        "mov rsp, r10",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbp",
        "pop rbx",
        "iretq",
        handler = sym syscall_trap_handler,
    );
}

/// Rust-side trampoline: hands the saved user stack pointer to the
/// kernel's syscall dispatcher.
///
/// # Safety
///
/// Must only be reached from [`syscall_interrupt_entry`], immediately
/// after a ring-3 -> ring-0 transition through the vector `0x30` gate.
#[unsafe(no_mangle)]
extern "C" fn syscall_trap_handler(user_esp: u64) -> i64 {
    crate::kernel::syscall::dispatch_trap(user_esp as usize)
}
