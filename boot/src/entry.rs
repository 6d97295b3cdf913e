//! Assembly entry stubs and the Rust trap entry point.

use core::arch::global_asm;

use trapgate_abi::{SegmentSelector, Trapframe};
use trapgate_core::{Collaborators, FatalTrap, GateHandlers, TrapDispatcher, TrapExit, kdiag};
use trapgate_lib::{KlogLevel, KlogWriter, Machine, X86Machine, klog_debug, klog_error};

use crate::services::{self, KernelServices, Registered};
use crate::{CPU_STATES, KERNEL_LOCK, MACHINE};

global_asm!(
    include_str!("../trap_entry.s"),
    kernel_data = const SegmentSelector::KERNEL_DATA.bits(),
    trap = sym trap,
);

unsafe extern "C" {
    fn trap_pop_frame(tf: *const Trapframe) -> !;
}

macro_rules! trap_entries {
    ($($gate:ident),* $(,)?) => {
        paste::paste! {
            unsafe extern "C" {
                $(fn [<trap_entry_ $gate>]();)*
                fn trap_entry_default();
            }

            /// Stub addresses, in [`trapgate_abi::TrapVector::GATES`] order.
            pub fn gate_handlers() -> GateHandlers {
                GateHandlers {
                    default: trap_entry_default as *const () as u64,
                    vectors: [$([<trap_entry_ $gate>] as *const () as u64),*],
                }
            }
        }
    };
}

trap_entries!(
    divide,
    debug,
    nmi,
    brkpt,
    oflow,
    bound,
    illop,
    device,
    dblflt,
    tss,
    segnp,
    stack,
    gpflt,
    pgflt,
    fperr,
    align,
    mchk,
    simderr,
    syscall,
    irq_timer,
    irq_kbd,
    irq_serial,
    irq_spurious,
    irq_ide,
    irq_error,
);

/// Restore every register from `tf` and return to the code it describes.
///
/// # Safety
/// `tf` must describe a valid return context (selectors, rip, rsp) and stay
/// live until the `iretq` completes. The caller must not hold any lock it
/// expects to release afterwards.
pub unsafe fn pop_frame(tf: &Trapframe) -> ! {
    // SAFETY: forwarded from the caller.
    unsafe { trap_pop_frame(tf) }
}

extern "C" fn trap(tf: *mut Trapframe) -> ! {
    // SAFETY: trap_alltraps passes the frame it just built on this CPU's
    // kernel stack; nothing else refers to it.
    let tf = unsafe { &mut *tf };
    // An unregistered CPU has no per-CPU slots of its own to record into.
    if X86Machine::current_cpu().is_none() {
        early_trap(tf, "on an unregistered CPU")
    }
    let Some(kernel) = services::registered() else {
        early_trap(tf, "before services")
    };
    let exit = dispatch(tf, kernel);
    finish(exit, kernel)
}

fn dispatch(tf: &mut Trapframe, kernel: &'static KernelServices) -> TrapExit<'static> {
    let (mut envs, mut syscalls, mut memory, mut irq, mut debugger) = (
        Registered(kernel),
        Registered(kernel),
        Registered(kernel),
        Registered(kernel),
        Registered(kernel),
    );
    let mut console = KlogWriter::new(KlogLevel::Info);
    let dispatcher = TrapDispatcher::new(&MACHINE, &KERNEL_LOCK, &CPU_STATES);
    let exit = dispatcher.dispatch(
        tf,
        &mut Collaborators {
            envs: &mut envs,
            syscalls: &mut syscalls,
            memory: &mut memory,
            irq: &mut irq,
            debugger: &mut debugger,
            console: &mut console,
        },
    );
    // Every exit below diverges, so flush before leaving.
    console.finish();
    exit
}

fn finish(exit: TrapExit<'static>, kernel: &'static KernelServices) -> ! {
    let cpu = MACHINE.cpu_id();
    match exit {
        TrapExit::Resume { env, lock } => {
            // SAFETY: the kernel code this trap interrupted is abandoned, so
            // it never gets to release a lock it took.
            let lock = lock.or_else(|| unsafe { KERNEL_LOCK.adopt(cpu) });
            (kernel.resume)(env, lock)
        }
        TrapExit::Yield { lock } => {
            // SAFETY: as above.
            let lock = lock
                .or_else(|| unsafe { KERNEL_LOCK.adopt(cpu) })
                .unwrap_or_else(|| KERNEL_LOCK.lock(cpu));
            (kernel.sched_yield)(lock)
        }
        TrapExit::Park => {
            klog_debug!("trap: cpu {} parked, machine halted", cpu);
            services::halt_forever()
        }
        TrapExit::Halt(fatal) => {
            klog_debug!("trap: cpu {} stopped the machine: {}", cpu, fatal);
            services::halt_forever()
        }
    }
}

/// A trap the dispatcher cannot take: the kernel services are not
/// registered yet, or the CPU has no dense index. Report and stop.
fn early_trap(tf: &mut Trapframe, when: &str) -> ! {
    let cpu = MACHINE.cpu_id();
    let fatal = FatalTrap::UnhandledKernelTrap { trapno: tf.trapno };
    CPU_STATES.halt_machine();
    let mut out = KlogWriter::new(KlogLevel::Error);
    let _ = kdiag::print_trapframe(&mut out, tf, cpu, None);
    out.finish();
    klog_error!(
        "kernel panic on APIC {:#x}: {} {}",
        X86Machine::apic_id(),
        fatal,
        when
    );
    services::halt_forever()
}
