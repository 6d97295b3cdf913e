//! Virtual memory layout constants.
//!
//! ```text
//!  KSTACKTOP ---------> +------------------------------+
//!                       |      CPU0's Kernel Stack     | KSTKSIZE
//!                       | - - - - - - - - - - - - - - -|
//!                       |      Invalid Memory (guard)  | KSTKGAP
//!                       +------------------------------+
//!                       |      CPU1's Kernel Stack     | KSTKSIZE
//!                       | - - - - - - - - - - - - - - -|
//!                       :              ...             :
//!
//!  UXSTACKTOP, UTOP --> +------------------------------+
//!                       |   User Exception Stack       | PGSIZE
//!                       +------------------------------+ UXSTACKTOP - PGSIZE
//!                       |       Empty Memory (guard)   | PGSIZE
//!  USTACKTOP  --------> +------------------------------+
//!                       |      Normal User Stack       |
//! ```

use crate::MAX_CPUS;

pub const PGSIZE: u64 = 0x1000;

/// Kernel virtual base.
pub const KERNBASE: u64 = 0x0000_0080_0400_0000;

/// Top of CPU 0's kernel stack; every other core's stack sits below it.
pub const KSTACKTOP: u64 = KERNBASE;

/// Size of one per-CPU kernel stack.
pub const KSTKSIZE: u64 = 16 * PGSIZE;

/// Unmapped gap between adjacent per-CPU kernel stacks.
pub const KSTKGAP: u64 = 8 * PGSIZE;

/// Distance between the tops of two adjacent per-CPU kernel stacks.
pub const KSTK_STRIDE: u64 = KSTKSIZE + KSTKGAP;

/// Highest user-accessible address (exclusive).
pub const UTOP: u64 = 0x0000_0080_0000_0000;

/// Top of the one-page user exception stack.
pub const UXSTACKTOP: u64 = UTOP;

/// Lowest address of the user exception stack.
pub const UXSTACKBOTTOM: u64 = UXSTACKTOP - PGSIZE;

/// Top of the normal user stack, one guard page below the exception stack.
pub const USTACKTOP: u64 = UTOP - 2 * PGSIZE;

/// Top of `cpu`'s privileged (ring 0) stack.
#[inline]
pub const fn kstack_top(cpu: usize) -> u64 {
    KSTACKTOP - (cpu as u64) * KSTK_STRIDE
}

/// Lowest usable address of `cpu`'s privileged stack.
#[inline]
pub const fn kstack_bottom(cpu: usize) -> u64 {
    kstack_top(cpu) - KSTKSIZE
}

/// Whether `va` lies inside the user exception stack.
#[inline]
pub const fn in_exception_stack(va: u64) -> bool {
    va >= UXSTACKBOTTOM && va < UXSTACKTOP
}

const _: () = {
    // The lowest CPU's stack must not wrap below zero.
    assert!(KSTACKTOP > (MAX_CPUS as u64) * KSTK_STRIDE);
    assert!(USTACKTOP + PGSIZE == UXSTACKBOTTOM);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_stacks_are_disjoint_and_separated_by_the_gap() {
        for cpu in 0..MAX_CPUS {
            assert_eq!(kstack_top(cpu), KSTACKTOP - cpu as u64 * (KSTKSIZE + KSTKGAP));
            if cpu + 1 < MAX_CPUS {
                assert_eq!(kstack_bottom(cpu) - kstack_top(cpu + 1), KSTKGAP);
            }
        }
        for a in 0..MAX_CPUS {
            for b in (a + 1)..MAX_CPUS {
                let (a_lo, a_hi) = (kstack_bottom(a), kstack_top(a));
                let (b_lo, b_hi) = (kstack_bottom(b), kstack_top(b));
                assert!(a_hi <= b_lo || b_hi <= a_lo, "cpu {a} and cpu {b} overlap");
            }
        }
    }

    #[test]
    fn exception_stack_bounds() {
        assert!(in_exception_stack(UXSTACKTOP - 1));
        assert!(in_exception_stack(UXSTACKBOTTOM));
        assert!(!in_exception_stack(UXSTACKTOP));
        assert!(!in_exception_stack(UXSTACKBOTTOM - 1));
        assert!(!in_exception_stack(USTACKTOP - 8));
    }
}
