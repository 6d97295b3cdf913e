//! Kernel-wide primitives shared by the trap core and the boot glue.

#![cfg_attr(not(test), no_std)]

pub mod cpu;
pub mod klog;
pub mod percpu;
pub mod spinlock;

pub use cpu::{Machine, X86Machine};
pub use klog::{
    KlogLevel, KlogWriter, klog_get_level, klog_init, klog_is_enabled, klog_register_backend,
    klog_set_level,
};
pub use percpu::{ClaimError, CpuId, MAX_CPUS, PerCpuClaims};
pub use spinlock::{KernelLock, KernelLockHeld};
