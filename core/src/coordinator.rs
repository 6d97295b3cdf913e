//! Per-CPU execution state and the kernel lock protocol.
//!
//! A CPU that parks itself in the scheduler's idle loop marks itself
//! [`CpuStatus::Halted`] and drops the kernel lock. The next trap on that CPU
//! flips it back to [`CpuStatus::Started`] and, only when it observed
//! `Halted`, takes the lock again before touching anything shared.

use core::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use trapgate_lib::percpu::{CpuId, MAX_CPUS};
use trapgate_lib::{KernelLock, KernelLockHeld};

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuStatus {
    /// Never entered the trap path.
    Unused = 0,
    Started = 1,
    /// Parked in the idle loop without the kernel lock.
    Halted = 2,
}

impl CpuStatus {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Started,
            2 => Self::Halted,
            _ => Self::Unused,
        }
    }
}

const NO_FRAME: usize = 0;

/// Status, last dispatched frame, and the machine-wide halt flag.
pub struct CpuStates {
    status: [AtomicU8; MAX_CPUS],
    last_frame: [AtomicUsize; MAX_CPUS],
    machine_halted: AtomicBool,
}

impl CpuStates {
    pub const fn new() -> Self {
        Self {
            status: [const { AtomicU8::new(CpuStatus::Unused as u8) }; MAX_CPUS],
            last_frame: [const { AtomicUsize::new(NO_FRAME) }; MAX_CPUS],
            machine_halted: AtomicBool::new(false),
        }
    }

    pub fn status(&self, cpu: CpuId) -> CpuStatus {
        self.status
            .get(cpu.0)
            .map_or(CpuStatus::Unused, |s| CpuStatus::from_raw(s.load(Ordering::Acquire)))
    }

    /// Atomically mark `cpu` started; returns what it was before.
    pub fn mark_started(&self, cpu: CpuId) -> CpuStatus {
        self.status.get(cpu.0).map_or(CpuStatus::Unused, |s| {
            CpuStatus::from_raw(s.swap(CpuStatus::Started as u8, Ordering::AcqRel))
        })
    }

    /// Park `cpu`: mark it halted, then give up the kernel lock.
    pub fn halt_cpu(&self, held: KernelLockHeld<'_>) {
        if let Some(s) = self.status.get(held.cpu().0) {
            s.store(CpuStatus::Halted as u8, Ordering::Release);
        }
        held.release();
    }

    /// Remember the frame most recently dispatched on `cpu`.
    pub fn record_frame(&self, cpu: CpuId, frame: usize) {
        if let Some(slot) = self.last_frame.get(cpu.0) {
            slot.store(frame, Ordering::Relaxed);
        }
    }

    pub fn last_frame(&self, cpu: CpuId) -> Option<usize> {
        match self.last_frame.get(cpu.0)?.load(Ordering::Relaxed) {
            NO_FRAME => None,
            frame => Some(frame),
        }
    }

    /// Raise the machine-wide halt flag. Returns `false` if it was already up.
    pub fn halt_machine(&self) -> bool {
        !self.machine_halted.swap(true, Ordering::AcqRel)
    }

    pub fn machine_halted(&self) -> bool {
        self.machine_halted.load(Ordering::Acquire)
    }
}

impl Default for CpuStates {
    fn default() -> Self {
        Self::new()
    }
}

/// The lock protocol at trap entry.
pub struct Coordinator<'a> {
    lock: &'a KernelLock,
    states: &'a CpuStates,
}

impl<'a> Coordinator<'a> {
    pub const fn new(lock: &'a KernelLock, states: &'a CpuStates) -> Self {
        Self { lock, states }
    }

    /// Mark `cpu` started; if it had been halted, take the kernel lock.
    pub fn enter_trap(&self, cpu: CpuId) -> Option<KernelLockHeld<'a>> {
        match self.states.mark_started(cpu) {
            CpuStatus::Halted => Some(self.lock.lock(cpu)),
            CpuStatus::Started | CpuStatus::Unused => None,
        }
    }

    /// Guarantee the lock is held for a trap from user mode, reusing the
    /// handle from [`Coordinator::enter_trap`] instead of locking twice.
    pub fn lock_for_user_trap(
        &self,
        cpu: CpuId,
        held: Option<KernelLockHeld<'a>>,
    ) -> KernelLockHeld<'a> {
        match held {
            Some(held) => held,
            None => self.lock.lock(cpu),
        }
    }

    pub fn lock(&self) -> &'a KernelLock {
        self.lock
    }
}
