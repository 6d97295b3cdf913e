//! The trap dispatcher.
//!
//! One call to [`TrapDispatcher::dispatch`] per hardware trap. The dispatcher
//! never diverges: it returns a [`TrapExit`] describing what the CPU must do
//! next, and the boot glue carries that out (replaying a frame, entering the
//! scheduler, or stopping the CPU).

use core::fmt::{self, Write};

use trapgate_abi::trap::{IRQ_SPURIOUS, T_PGFLT};
use trapgate_abi::{EnvId, EnvStatus, IrqLine, Trapframe, TrapVector, trapname};
use trapgate_lib::percpu::CpuId;
use trapgate_lib::{KernelLock, KernelLockHeld, Machine, klog_debug, klog_trace};

use crate::coordinator::{Coordinator, CpuStates};
use crate::kdiag;
use crate::services::{Collaborators, EnvManager};

/// Conditions that stop the whole machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FatalTrap {
    KernelPageFault { va: u64, rip: u64 },
    UnhandledKernelTrap { trapno: u64 },
    /// The interrupt flag was set on trap entry. Never patched with `cli`.
    InterruptsEnabled,
    NoCurrentEnvironment,
    UnsetGate { vector: u8 },
}

impl fmt::Display for FatalTrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::KernelPageFault { va, rip } => {
                write!(f, "kernel mode page fault va {:#x} ip {:#x}", va, rip)
            }
            Self::UnhandledKernelTrap { trapno } => {
                write!(f, "unhandled trap in kernel: {} ({})", trapno, trapname(trapno))
            }
            Self::InterruptsEnabled => write!(f, "interrupts enabled on trap entry"),
            Self::NoCurrentEnvironment => write!(f, "user trap with no current environment"),
            Self::UnsetGate { vector } => write!(f, "IDT gate {} not present", vector),
        }
    }
}

/// What the CPU does after a trap.
#[derive(Debug)]
#[must_use]
pub enum TrapExit<'a> {
    /// Release the lock (if this trap holds it) and replay `env`'s saved
    /// frame.
    Resume {
        env: EnvId,
        lock: Option<KernelLockHeld<'a>>,
    },
    /// Enter the scheduler, which expects the kernel lock.
    Yield { lock: Option<KernelLockHeld<'a>> },
    /// Another CPU already stopped the machine; halt this one forever.
    Park,
    /// Stop the machine. The diagnostic has already been printed and the
    /// kernel lock, if this trap held it, stays held for good.
    Halt(FatalTrap),
}

/// The frame the rest of the trap works on: the environment's saved copy for
/// traps from user mode, the on-stack frame otherwise.
pub(crate) fn active_frame<'t>(
    stack: &'t mut Trapframe,
    envs: &'t mut dyn EnvManager,
    from_user: bool,
) -> &'t mut Trapframe {
    if from_user {
        if let Some(env) = envs.current() {
            return &mut env.tf;
        }
    }
    stack
}

pub struct TrapDispatcher<'a> {
    pub(crate) machine: &'a dyn Machine,
    pub(crate) states: &'a CpuStates,
    coordinator: Coordinator<'a>,
}

impl<'a> TrapDispatcher<'a> {
    pub fn new(machine: &'a dyn Machine, lock: &'a KernelLock, states: &'a CpuStates) -> Self {
        Self {
            machine,
            states,
            coordinator: Coordinator::new(lock, states),
        }
    }

    /// Handle one trap whose raw state is `tf`.
    pub fn dispatch(&self, tf: &mut Trapframe, services: &mut Collaborators<'_>) -> TrapExit<'a> {
        if self.states.machine_halted() {
            return TrapExit::Park;
        }

        let cpu = self.machine.cpu_id();
        let mut held = self.coordinator.enter_trap(cpu);

        if self.machine.interrupts_enabled() {
            return self.fatal(services, cpu, held, FatalTrap::InterruptsEnabled);
        }

        let from_user = tf.from_user();
        if from_user {
            held = Some(self.coordinator.lock_for_user_trap(cpu, held.take()));
            // Another CPU may have stopped the machine while this one spun.
            if self.states.machine_halted() {
                core::mem::forget(held);
                return TrapExit::Park;
            }

            let Some(env) = services.envs.current() else {
                return self.fatal(services, cpu, held, FatalTrap::NoCurrentEnvironment);
            };
            if env.status == EnvStatus::Dying {
                let id = env.id;
                klog_debug!("[{}] reclaiming dying environment on cpu {}", id, cpu);
                services.envs.reclaim(id);
                services.envs.clear_current();
                return TrapExit::Yield { lock: held };
            }
            env.tf = *tf;
        }

        let frame = active_frame(tf, &mut *services.envs, from_user);
        self.states.record_frame(cpu, frame as *const Trapframe as usize);
        klog_trace!(
            "trap {:#x} ({}) on cpu {} from {}",
            frame.trapno,
            trapname(frame.trapno),
            cpu,
            if from_user { "user" } else { "kernel" }
        );

        self.route(cpu, tf, services, held)
    }

    fn route(
        &self,
        cpu: CpuId,
        tf: &mut Trapframe,
        services: &mut Collaborators<'_>,
        held: Option<KernelLockHeld<'a>>,
    ) -> TrapExit<'a> {
        let from_user = tf.from_user();
        let frame = *active_frame(tf, &mut *services.envs, from_user);

        match TrapVector::from_trapno(frame.trapno) {
            TrapVector::PageFault => return self.page_fault(tf, services, held),
            TrapVector::Breakpoint => {
                services
                    .debugger
                    .enter(active_frame(tf, &mut *services.envs, from_user));
            }
            TrapVector::Syscall => {
                let r = frame.regs;
                let ret = services
                    .syscalls
                    .invoke(r.rax, [r.rdx, r.rcx, r.rbx, r.rdi, r.rsi]);
                active_frame(tf, &mut *services.envs, from_user).regs.rax = ret as u64;
            }
            TrapVector::Irq(IrqLine::Spurious) => {
                let _ = writeln!(services.console, "Spurious interrupt on irq {}", IRQ_SPURIOUS);
                self.print_frame(cpu, tf, services);
            }
            TrapVector::Irq(IrqLine::Timer) => {
                services.irq.eoi();
                return TrapExit::Yield { lock: held };
            }
            _ => {
                self.print_frame(cpu, tf, services);
                if frame.from_kernel() {
                    return self.fatal(
                        services,
                        cpu,
                        held,
                        FatalTrap::UnhandledKernelTrap {
                            trapno: frame.trapno,
                        },
                    );
                }
                if let Some(id) = services.envs.current().map(|env| env.id) {
                    services.envs.destroy(id);
                }
            }
        }

        self.epilogue(services, held)
    }

    /// Resume the current environment if it is still running here, otherwise
    /// hand the CPU to the scheduler.
    pub(crate) fn epilogue(
        &self,
        services: &mut Collaborators<'_>,
        held: Option<KernelLockHeld<'a>>,
    ) -> TrapExit<'a> {
        match services.envs.current() {
            Some(env) if env.is_running() => TrapExit::Resume {
                env: env.id,
                lock: held,
            },
            _ => TrapExit::Yield { lock: held },
        }
    }

    /// Dump the active frame. The fault address is included only for a page
    /// fault on the frame this CPU dispatched last.
    pub(crate) fn print_frame(
        &self,
        cpu: CpuId,
        tf: &mut Trapframe,
        services: &mut Collaborators<'_>,
    ) {
        let from_user = tf.from_user();
        let frame = active_frame(tf, &mut *services.envs, from_user);
        let is_last = self.states.last_frame(cpu) == Some(frame as *const Trapframe as usize);
        let cr2 = (is_last && frame.trapno == T_PGFLT).then(|| self.machine.fault_address());
        let _ = kdiag::print_trapframe(&mut *services.console, frame, cpu, cr2);
    }

    /// Raise the machine-wide halt flag and report `fatal`.
    ///
    /// A held kernel lock is leaked, never released: no other CPU may enter
    /// the kernel once the machine is halted.
    pub(crate) fn fatal(
        &self,
        services: &mut Collaborators<'_>,
        cpu: CpuId,
        held: Option<KernelLockHeld<'a>>,
        fatal: FatalTrap,
    ) -> TrapExit<'a> {
        core::mem::forget(held);
        self.states.halt_machine();
        let _ = writeln!(services.console, "kernel panic on CPU {}: {}", cpu, fatal);
        TrapExit::Halt(fatal)
    }
}
