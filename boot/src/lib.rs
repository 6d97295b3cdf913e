//! Hardware glue for the trap core.
//!
//! Owns the machine-wide statics (kernel lock, CPU states, descriptor
//! tables), the assembly entry stubs and the COM1 console, and turns the
//! dispatcher's [`trapgate_core::TrapExit`] into the actual control transfer.
//!
//! Bring-up order on the BSP: [`console_init`], [`register_services`],
//! [`trap_init`]. Each application processor calls [`trap_init_percpu`] on
//! itself before enabling interrupts.

#![no_std]

pub mod console;
pub mod entry;
pub mod gdt;
pub mod idt;
pub mod services;

pub use console::console_init;
pub use entry::pop_frame;
pub use gdt::trap_init_percpu;
pub use idt::trap_init;
pub use services::{KernelServices, register_services, sched_halt};

use trapgate_core::CpuStates;
use trapgate_lib::{KernelLock, X86Machine};

pub(crate) static MACHINE: X86Machine = X86Machine;

/// The big kernel lock.
pub static KERNEL_LOCK: KernelLock = KernelLock::new();

/// Per-CPU status, last dispatched frame and the machine-halted flag.
pub static CPU_STATES: CpuStates = CpuStates::new();
