//! Privileged CPU operations the trap core depends on.
//!
//! The trap core never executes these instructions directly; it goes through
//! [`Machine`] so the same code runs against real hardware ([`X86Machine`])
//! and against a recording double in host tests.

mod x86;

pub use x86::X86Machine;

use trapgate_abi::{GdtDescriptor, IdtDescriptor, SegmentSelector};

use crate::percpu::CpuId;

pub trait Machine {
    /// Dense index of the executing CPU.
    fn cpu_id(&self) -> CpuId;

    /// Whether the interrupt-enable flag is set on the executing CPU.
    fn interrupts_enabled(&self) -> bool;

    /// The faulting linear address latched by the last page fault.
    fn fault_address(&self) -> u64;

    /// Load the global descriptor table register.
    fn load_gdt(&self, descriptor: &GdtDescriptor);

    /// Load the task register with a TSS selector.
    fn load_task_register(&self, selector: SegmentSelector);

    /// Load the interrupt descriptor table register.
    fn load_idt(&self, descriptor: &IdtDescriptor);
}
