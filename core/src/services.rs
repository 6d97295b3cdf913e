//! Kernel services the trap path calls into.
//!
//! Scheduling policy, environment lifecycle, the system-call table, page
//! tables, the local APIC and the kernel monitor all live outside the trap
//! core. The dispatcher reaches them only through these traits, bundled per
//! trap into [`Collaborators`].
//!
//! None of these calls diverge. Resuming an environment and yielding to the
//! scheduler are expressed as [`crate::TrapExit`] values that the boot glue
//! acts on after the dispatcher returns.

use core::fmt;

use trapgate_abi::{EnvId, PteFlags, Trapframe, UTrapframe};

use crate::env::Env;

pub trait EnvManager {
    /// The environment running on the executing CPU.
    fn current(&mut self) -> Option<&mut Env>;

    /// Forget the executing CPU's current environment.
    fn clear_current(&mut self);

    /// Free a dying environment's resources and return its slot.
    fn reclaim(&mut self, id: EnvId);

    /// Destroy an environment. If it is running on another CPU it is only
    /// marked dying; if it is this CPU's current environment, it is freed
    /// and the current reference cleared.
    fn destroy(&mut self, id: EnvId);
}

pub trait SyscallTable {
    fn invoke(&mut self, num: u64, args: [u64; 5]) -> i64;
}

pub trait UserMemory {
    /// Whether `env` may access `[va, va + len)` with `perm`.
    fn assert_writable(&mut self, env: &Env, va: u64, len: u64, perm: PteFlags) -> bool;

    /// Store a page-fault record at `va` in `env`'s address space. Only
    /// called on a range that passed [`UserMemory::assert_writable`].
    fn write_fault_record(&mut self, env: &Env, va: u64, record: &UTrapframe);
}

pub trait InterruptController {
    /// Signal end-of-interrupt to the local interrupt controller.
    fn eoi(&mut self);
}

pub trait Debugger {
    /// Enter the kernel monitor with the trapping frame.
    fn enter(&mut self, tf: &mut Trapframe);
}

/// Everything the dispatcher may touch while handling one trap.
///
/// Each service is a separate borrow so the dispatcher can hold the current
/// environment's frame while calling into another service.
pub struct Collaborators<'a> {
    pub envs: &'a mut dyn EnvManager,
    pub syscalls: &'a mut dyn SyscallTable,
    pub memory: &'a mut dyn UserMemory,
    pub irq: &'a mut dyn InterruptController,
    pub debugger: &'a mut dyn Debugger,
    /// Sink for trap diagnostics and fault log lines.
    pub console: &'a mut dyn fmt::Write,
}
