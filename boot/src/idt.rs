use spin::Once;

use trapgate_abi::IdtDescriptor;
use trapgate_core::Idt;
use trapgate_core::idt::GATE_COUNT;
use trapgate_lib::percpu::CpuId;
use trapgate_lib::{klog_debug, klog_error};

use crate::entry::gate_handlers;
use crate::gdt::trap_init_percpu;

static IDT: Once<Idt> = Once::new();

/// Build the shared IDT and register the BSP.
pub fn trap_init() {
    #[cfg(feature = "verbose-traps")]
    trapgate_lib::klog_set_level(trapgate_lib::KlogLevel::Trace);

    let idt = match IDT.try_call_once(|| Idt::build(&gate_handlers())) {
        Ok(idt) => idt,
        Err(err) => {
            klog_error!("IDT: {}", err);
            panic!("IDT: {}", err);
        }
    };
    let base = idt.descriptor().base;
    klog_debug!("IDT: {} gates at {:#x}", GATE_COUNT, base);

    trap_init_percpu(CpuId::BSP);
}

pub(crate) fn idt_descriptor() -> Option<IdtDescriptor> {
    IDT.get().map(Idt::descriptor)
}
