//! Kernel services registered by the rest of the kernel.
//!
//! The trap path reaches the environment manager, scheduler, system-call
//! table, page tables, LAPIC and monitor through a single table of function
//! pointers, registered once during bring-up.

use core::arch::asm;

use spin::Once;
use x86_64::instructions::{hlt, interrupts};

use trapgate_abi::memlayout::kstack_top;
use trapgate_abi::{EnvId, PteFlags, Trapframe, UTrapframe};
use trapgate_core::{Debugger, Env, EnvManager, InterruptController, SyscallTable, UserMemory};
use trapgate_lib::{KernelLockHeld, klog_debug, klog_warn};

use crate::CPU_STATES;

pub struct KernelServices {
    /// The environment running on the executing CPU. Only called with the
    /// kernel lock held.
    pub current_env: fn() -> Option<&'static mut Env>,
    pub clear_current: fn(),
    pub reclaim: fn(EnvId),
    pub destroy: fn(EnvId),
    /// Switch to `env`'s address space, release the lock and replay its
    /// saved frame (usually through [`crate::pop_frame`]).
    pub resume: fn(EnvId, Option<KernelLockHeld<'static>>) -> !,
    /// Pick the next environment to run, or [`sched_halt`] if none.
    pub sched_yield: fn(KernelLockHeld<'static>) -> !,
    pub syscall: fn(u64, [u64; 5]) -> i64,
    pub user_mem_check: fn(&Env, u64, u64, PteFlags) -> bool,
    pub lapic_eoi: fn(),
    pub monitor: fn(&mut Trapframe),
}

static SERVICES: Once<KernelServices> = Once::new();

pub fn register_services(services: KernelServices) {
    if SERVICES.is_completed() {
        klog_warn!("trap: kernel services already registered, ignoring");
        return;
    }
    SERVICES.call_once(|| services);
    klog_debug!("trap: kernel services registered");
}

pub(crate) fn registered() -> Option<&'static KernelServices> {
    SERVICES.get()
}

/// Adapter from the registered table to the dispatcher's service traits.
#[derive(Clone, Copy)]
pub(crate) struct Registered(pub(crate) &'static KernelServices);

impl EnvManager for Registered {
    fn current(&mut self) -> Option<&mut Env> {
        (self.0.current_env)()
    }

    fn clear_current(&mut self) {
        (self.0.clear_current)()
    }

    fn reclaim(&mut self, id: EnvId) {
        (self.0.reclaim)(id)
    }

    fn destroy(&mut self, id: EnvId) {
        (self.0.destroy)(id)
    }
}

impl SyscallTable for Registered {
    fn invoke(&mut self, num: u64, args: [u64; 5]) -> i64 {
        (self.0.syscall)(num, args)
    }
}

impl UserMemory for Registered {
    fn assert_writable(&mut self, env: &Env, va: u64, len: u64, perm: PteFlags) -> bool {
        (self.0.user_mem_check)(env, va, len, perm)
    }

    fn write_fault_record(&mut self, _env: &Env, va: u64, record: &UTrapframe) {
        // SAFETY: the range passed the user memory check against the
        // faulting environment, whose page table is the one loaded. The
        // user stack pointer need not be aligned.
        unsafe { (va as *mut UTrapframe).write_unaligned(*record) };
    }
}

impl InterruptController for Registered {
    fn eoi(&mut self) {
        (self.0.lapic_eoi)()
    }
}

impl Debugger for Registered {
    fn enter(&mut self, tf: &mut Trapframe) {
        (self.0.monitor)(tf)
    }
}

/// Idle the executing CPU until an interrupt arrives.
///
/// Marks the CPU halted and releases the kernel lock; the next trap on this
/// CPU retakes the lock before running anything. The kernel stack is reset,
/// so nothing on it survives.
pub fn sched_halt(held: KernelLockHeld<'static>) -> ! {
    let top = kstack_top(held.cpu().index());
    CPU_STATES.halt_cpu(held);
    // SAFETY: this CPU's kernel stack holds nothing live past this point.
    unsafe {
        asm!(
            "xor ebp, ebp",
            "mov rsp, {top}",
            "push 0",
            "push 0",
            "sti",
            "2:",
            "hlt",
            "jmp 2b",
            top = in(reg) top,
            options(noreturn),
        )
    }
}

/// Stop the executing CPU for good.
pub(crate) fn halt_forever() -> ! {
    loop {
        interrupts::disable();
        hlt();
    }
}
