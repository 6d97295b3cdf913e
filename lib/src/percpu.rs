//! Per-CPU identity and claim-once slots.
//!
//! CPUs are numbered densely from 0 (the BSP) in bring-up order. Hardware
//! reports LAPIC IDs, which are mapped to dense indices when each CPU
//! registers itself.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

pub use trapgate_abi::MAX_CPUS;

/// Dense CPU index in `0..MAX_CPUS`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpuId(pub usize);

impl CpuId {
    pub const BSP: Self = Self(0);

    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 < MAX_CPUS
    }
}

impl core::fmt::Display for CpuId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a per-CPU slot could not be claimed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClaimError {
    OutOfRange(CpuId),
    AlreadyClaimed(CpuId),
}

/// One flag per CPU, each of which can be claimed exactly once.
///
/// Hands out exclusive ownership of per-CPU hardware structures without a
/// lock: whoever wins the flag for a CPU owns that CPU's slot.
pub struct PerCpuClaims {
    claimed: [AtomicBool; MAX_CPUS],
}

impl PerCpuClaims {
    pub const fn new() -> Self {
        Self {
            claimed: [const { AtomicBool::new(false) }; MAX_CPUS],
        }
    }

    pub fn claim(&self, cpu: CpuId) -> Result<(), ClaimError> {
        let flag = self.claimed.get(cpu.0).ok_or(ClaimError::OutOfRange(cpu))?;
        if flag.swap(true, Ordering::AcqRel) {
            return Err(ClaimError::AlreadyClaimed(cpu));
        }
        Ok(())
    }

    #[inline]
    pub fn is_claimed(&self, cpu: CpuId) -> bool {
        self.claimed
            .get(cpu.0)
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }
}

impl Default for PerCpuClaims {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// LAPIC ID mapping
// ---------------------------------------------------------------------------

const UNMAPPED: u32 = u32::MAX;

static APIC_ID_TO_CPU: [AtomicU32; 256] = [const { AtomicU32::new(UNMAPPED) }; 256];

/// Record that the CPU with LAPIC ID `apic_id` is dense index `cpu`.
pub fn register_apic_id(cpu: CpuId, apic_id: u8) {
    APIC_ID_TO_CPU[apic_id as usize].store(cpu.0 as u32, Ordering::Release);
}

pub fn cpu_index_from_apic_id(apic_id: u8) -> Option<CpuId> {
    match APIC_ID_TO_CPU[apic_id as usize].load(Ordering::Acquire) {
        UNMAPPED => None,
        cpu => Some(CpuId(cpu as usize)),
    }
}
