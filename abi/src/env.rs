//! Environment identity and status as seen by the trap path.

use bitflags::bitflags;

/// Environment identifier. Printed in fault logs as eight hex digits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct EnvId(pub u32);

impl core::fmt::Display for EnvId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Lifecycle state of an environment.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EnvStatus {
    /// Slot is free and may be reused.
    #[default]
    Free = 0,
    /// Destroyed while running on another core; reclaimed at its next trap.
    Dying = 1,
    Runnable = 2,
    /// Currently executing on some core.
    Running = 3,
    NotRunnable = 4,
}

impl EnvStatus {
    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Dying,
            2 => Self::Runnable,
            3 => Self::Running,
            4 => Self::NotRunnable,
            _ => Self::Free,
        }
    }
}

bitflags! {
    /// Page permission bits checked before the kernel writes into user memory.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PteFlags: u64 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
    }
}
