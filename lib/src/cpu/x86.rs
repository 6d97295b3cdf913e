use x86_64::VirtAddr;
use x86_64::instructions::{interrupts, tables};
use x86_64::registers::control::Cr2;
use x86_64::structures::DescriptorTablePointer;
use x86_64::structures::gdt::SegmentSelector as HwSelector;

use trapgate_abi::{GdtDescriptor, IdtDescriptor, SegmentSelector};

use super::Machine;
use crate::percpu::{CpuId, cpu_index_from_apic_id};

/// The executing x86_64 processor.
#[derive(Clone, Copy, Debug, Default)]
pub struct X86Machine;

impl X86Machine {
    /// Initial LAPIC ID from CPUID leaf 1.
    #[inline(always)]
    #[allow(unused_unsafe)]
    pub fn apic_id() -> u8 {
        let res = unsafe { core::arch::x86_64::__cpuid(1) };
        (res.ebx >> 24) as u8
    }

    /// Dense index of the executing CPU, or `None` before it registered
    /// its LAPIC ID.
    pub fn current_cpu() -> Option<CpuId> {
        cpu_index_from_apic_id(Self::apic_id())
    }
}

impl Machine for X86Machine {
    /// Only meaningful once the CPU has registered; the trap entry refuses
    /// to dispatch for an unregistered CPU (see [`X86Machine::current_cpu`]).
    /// Before that only the BSP runs, so it is the fallback.
    fn cpu_id(&self) -> CpuId {
        Self::current_cpu().unwrap_or(CpuId::BSP)
    }

    fn interrupts_enabled(&self) -> bool {
        interrupts::are_enabled()
    }

    fn fault_address(&self) -> u64 {
        Cr2::read_raw()
    }

    fn load_gdt(&self, descriptor: &GdtDescriptor) {
        let pointer = DescriptorTablePointer {
            limit: descriptor.limit,
            base: VirtAddr::new_truncate(descriptor.base),
        };
        // SAFETY: descriptors handed to the machine describe 'static tables.
        unsafe { tables::lgdt(&pointer) };
    }

    fn load_task_register(&self, selector: SegmentSelector) {
        // SAFETY: the registrar writes a present, available TSS descriptor
        // into the slot before asking for it to be loaded.
        unsafe { tables::load_tss(HwSelector(selector.bits())) };
    }

    fn load_idt(&self, descriptor: &IdtDescriptor) {
        let pointer = DescriptorTablePointer {
            limit: descriptor.limit,
            base: VirtAddr::new_truncate(descriptor.base),
        };
        // SAFETY: see `load_gdt`.
        unsafe { tables::lidt(&pointer) };
    }
}
