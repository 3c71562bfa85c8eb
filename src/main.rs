// src/main.rs
//! Kernel entry point: brings up the GDT/IDT/PIC, hands the heap allocator a
//! static region, and spawns the first process before handing off to the
//! interrupt-driven steady state. There is no loader in this crate (see
//! `kernel::process::ProcessTable::spawn`'s docs), so the init process never
//! runs user code of its own -- it exists so the syscall dispatcher and page
//! fault handler always have a current process to attribute work to.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use bootloader::{entry_point, BootInfo};

use campus_kernel::arch::x86_64::{gdt, interrupts, pic::PICS};
use campus_kernel::arch::{ArchCpu, Cpu};
use campus_kernel::kernel::mm::{LayoutSize, VirtAddr};
use campus_kernel::kernel::process::PROCESS_TABLE;
use campus_kernel::{debug_println, hlt_loop, init_heap};

entry_point!(kernel_main);

const HEAP_SIZE: usize = 1024 * 1024;

#[repr(align(4096))]
struct Heap([u8; HEAP_SIZE]);

static mut HEAP: Heap = Heap([0; HEAP_SIZE]);

fn kernel_main(_boot_info: &'static BootInfo) -> ! {
    gdt::init();
    interrupts::init_idt();

    // SAFETY: PIC initialization and the keyboard unmask both run once,
    // before interrupts are enabled below.
    unsafe {
        PICS.lock().initialize();
        PICS.lock().unmask_irq(1);
    }

    let heap_start = VirtAddr::new(core::ptr::addr_of!(HEAP) as usize);
    // SAFETY: `HEAP` is a static region this kernel owns outright; nothing
    // else touches it before or after this call.
    unsafe {
        init_heap(heap_start, LayoutSize::new(HEAP_SIZE)).expect("heap already initialized");
    }

    let pid = PROCESS_TABLE.lock().spawn(None);
    PROCESS_TABLE.lock().set_current(pid);
    debug_println!("[boot] campus_kernel up, init process pid={}", pid.0);

    ArchCpu::enable_interrupts();
    hlt_loop();
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    debug_println!("[panic] {}", info);
    hlt_loop();
}
