//! trapgate kernel/user ABI types
//!
//! Single source of truth for every structure whose layout is fixed either by
//! the hardware (gate and segment descriptors, the task state segment) or by
//! the user-kernel contract (the trap frame and the page-fault record pushed
//! on the user exception stack). Everything here is `#[repr(C)]` and carries
//! compile-time size assertions.

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

pub mod arch;
pub mod env;
pub mod memlayout;
pub mod trap;
pub mod trapframe;

pub use arch::x86_64::gdt::{GdtDescriptor, GdtLayout, GdtTssEntry, SegmentSelector, Tss64};
pub use arch::x86_64::idt::{IDT_ENTRIES, IdtDescriptor, IdtEntry};
pub use env::{EnvId, EnvStatus, PteFlags};
pub use trap::{IrqLine, PageFaultError, TrapVector, trapname};
pub use trapframe::{PushRegs, Trapframe, UTrapframe};

/// Maximum number of CPUs the kernel brings up.
pub const MAX_CPUS: usize = 8;
