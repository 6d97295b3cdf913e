use x86_64::instructions::segmentation::{CS, DS, ES, SS, Segment};
use x86_64::structures::gdt::SegmentSelector as HwSelector;

use trapgate_abi::SegmentSelector;
use trapgate_core::TssTable;
use trapgate_lib::percpu::{CpuId, register_apic_id};
use trapgate_lib::{X86Machine, klog_debug};

use crate::MACHINE;
use crate::idt::idt_descriptor;

static TSS_TABLE: TssTable = TssTable::new();

/// Give the executing CPU the dense index `cpu`, then install its TSS and
/// load the GDT, task register and IDT.
///
/// Runs once per CPU, on that CPU, after [`crate::trap_init`]. The TSS slot
/// follows from the LAPIC mapping, so a CPU can only ever load its own
/// selector. Any failure leaves the CPU unable to take a trap from user
/// mode, so it is fatal.
pub fn trap_init_percpu(cpu: CpuId) {
    let Some(idt) = idt_descriptor() else {
        panic!("TSS: cpu {} registered before the IDT was built", cpu);
    };
    register_apic_id(cpu, X86Machine::apic_id());

    match TSS_TABLE.register_cpu(&MACHINE, &idt) {
        Ok(selector) => {
            // SAFETY: the freshly loaded GDT keeps the standard kernel
            // selectors at the same indices.
            unsafe { reload_segments() };
            klog_debug!("GDT: cpu {} online, tr={:#x}", cpu, selector.bits());
        }
        Err(err) => panic!("TSS: cpu {}: {}", cpu, err),
    }
}

/// Refresh the cached segment descriptors after `lgdt`.
unsafe fn reload_segments() {
    let code = HwSelector(SegmentSelector::KERNEL_CODE.bits());
    let data = HwSelector(SegmentSelector::KERNEL_DATA.bits());
    // SAFETY: forwarded from the caller.
    unsafe {
        CS::set_reg(code);
        DS::set_reg(data);
        ES::set_reg(data);
        SS::set_reg(data);
    }
}
