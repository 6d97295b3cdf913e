use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::percpu::CpuId;

const NO_HOLDER: u32 = u32::MAX;

/// The big kernel lock.
///
/// One global mutual-exclusion lock held while any core runs kernel code on
/// behalf of an environment. It is not recursive: a core that already holds
/// it and asks again spins forever. Acquisition records the holding core so
/// callers (and tests) can check who owns it.
///
/// The lock does not touch the interrupt flag; trap entry runs with
/// interrupts already disabled.
pub struct KernelLock {
    locked: AtomicBool,
    holder: AtomicU32,
}

/// Proof that the calling core holds the [`KernelLock`].
///
/// Dropping the handle (or calling [`KernelLockHeld::release`]) unlocks.
#[must_use = "dropping the handle releases the kernel lock"]
pub struct KernelLockHeld<'a> {
    lock: &'a KernelLock,
    cpu: CpuId,
}

impl KernelLock {
    #[inline]
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            holder: AtomicU32::new(NO_HOLDER),
        }
    }

    #[inline]
    pub fn lock(&self, cpu: CpuId) -> KernelLockHeld<'_> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spin_loop();
        }
        self.holder.store(cpu.0 as u32, Ordering::Relaxed);
        KernelLockHeld { lock: self, cpu }
    }

    #[inline]
    pub fn try_lock(&self, cpu: CpuId) -> Option<KernelLockHeld<'_>> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.holder.store(cpu.0 as u32, Ordering::Relaxed);
            Some(KernelLockHeld { lock: self, cpu })
        } else {
            None
        }
    }

    /// Take over the lock `cpu` already holds without a handle, as when a
    /// nested trap abandons the critical section it interrupted.
    ///
    /// # Safety
    /// The code that acquired the lock on `cpu` must never release it itself.
    pub unsafe fn adopt(&self, cpu: CpuId) -> Option<KernelLockHeld<'_>> {
        (self.holder() == Some(cpu)).then_some(KernelLockHeld { lock: self, cpu })
    }

    /// Check if the lock is currently held.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// The core that holds the lock, if any.
    #[inline]
    pub fn holder(&self) -> Option<CpuId> {
        if !self.is_locked() {
            return None;
        }
        match self.holder.load(Ordering::Relaxed) {
            NO_HOLDER => None,
            cpu => Some(CpuId(cpu as usize)),
        }
    }

    #[inline]
    fn unlock(&self) {
        self.holder.store(NO_HOLDER, Ordering::Relaxed);
        self.locked.store(false, Ordering::Release);
    }
}

impl Default for KernelLock {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> KernelLockHeld<'a> {
    #[inline]
    pub fn cpu(&self) -> CpuId {
        self.cpu
    }

    #[inline]
    pub fn lock(&self) -> &'a KernelLock {
        self.lock
    }

    #[inline]
    pub fn release(self) {
        drop(self);
    }
}

impl core::fmt::Debug for KernelLockHeld<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KernelLockHeld").field("cpu", &self.cpu).finish()
    }
}

impl Drop for KernelLockHeld<'_> {
    #[inline]
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn handle_records_holder_and_releases_on_drop() {
        let lock = KernelLock::new();
        assert_eq!(lock.holder(), None);
        let held = lock.lock(CpuId(3));
        assert_eq!(lock.holder(), Some(CpuId(3)));
        assert_eq!(held.cpu(), CpuId(3));
        assert!(lock.try_lock(CpuId(1)).is_none());
        held.release();
        assert!(!lock.is_locked());
        assert_eq!(lock.holder(), None);
    }

    #[test]
    fn adopt_only_succeeds_for_the_holder() {
        let lock = KernelLock::new();
        core::mem::forget(lock.lock(CpuId(2)));
        assert!(unsafe { lock.adopt(CpuId(1)) }.is_none());
        let adopted = unsafe { lock.adopt(CpuId(2)) }.unwrap();
        assert_eq!(adopted.cpu(), CpuId(2));
        drop(adopted);
        assert!(!lock.is_locked());
    }

    #[test]
    fn excludes_concurrent_holders() {
        let lock = Arc::new(KernelLock::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let mut workers = Vec::new();
        for cpu in 0..4 {
            let lock = Arc::clone(&lock);
            let inside = Arc::clone(&inside);
            workers.push(thread::spawn(move || {
                for _ in 0..1000 {
                    let held = lock.lock(CpuId(cpu));
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    assert_eq!(lock.holder(), Some(CpuId(cpu)));
                    inside.fetch_sub(1, Ordering::SeqCst);
                    drop(held);
                }
            }));
        }
        for w in workers {
            w.join().unwrap();
        }
        assert!(!lock.is_locked());
    }
}
