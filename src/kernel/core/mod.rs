// src/kernel/core/mod.rs
//! カーネル共通の型・trait・エラーハンドリング

pub mod result;
pub mod traits;
pub mod types;

pub use result::{DeviceError, ErrorKind, KernelError, KernelResult, MemoryError, TaskError, VmError};
pub use traits::{BlockDevice, CharDevice, Device, Scheduler, Task, TaskState};
pub use types::{DeviceId, Priority, ProcessId, TaskId};
