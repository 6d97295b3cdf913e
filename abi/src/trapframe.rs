//! Trap frame and user fault record layouts.
//!
//! # Layout contracts
//!
//! [`Trapframe`] is built field by field by the assembly trap prologue in
//! `boot/src/entry.rs` and replayed verbatim when an environment resumes.
//! [`UTrapframe`] is the page-fault record the kernel pushes on the user
//! exception stack; user-level fault handlers index into it by offset, so its
//! field order is part of the user ABI.

/// General-purpose registers in the order the trap prologue pushes them
/// (the last register pushed sits at the lowest address).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PushRegs {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rax: u64,
}

impl PushRegs {
    pub const fn zeroed() -> Self {
        Self {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            r11: 0,
            r10: 0,
            r9: 0,
            r8: 0,
            rdi: 0,
            rsi: 0,
            rbp: 0,
            rbx: 0,
            rdx: 0,
            rcx: 0,
            rax: 0,
        }
    }
}

/// Complete machine state captured at trap entry.
///
/// `rsp` and `ss` are only meaningful when the trap crossed from user to
/// kernel privilege (`cs` RPL of 3).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Trapframe {
    pub regs: PushRegs,
    pub es: u64,
    pub ds: u64,
    pub trapno: u64,
    /// Hardware error code, or 0 for vectors that do not push one.
    pub err: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl Trapframe {
    pub const fn zeroed() -> Self {
        Self {
            regs: PushRegs::zeroed(),
            es: 0,
            ds: 0,
            trapno: 0,
            err: 0,
            rip: 0,
            cs: 0,
            rflags: 0,
            rsp: 0,
            ss: 0,
        }
    }

    /// Privilege level the CPU was running at when the trap fired.
    #[inline]
    pub const fn privilege(&self) -> u8 {
        (self.cs & 0x3) as u8
    }

    #[inline]
    pub const fn from_user(&self) -> bool {
        self.privilege() == 3
    }

    #[inline]
    pub const fn from_kernel(&self) -> bool {
        self.privilege() == 0
    }
}

/// Page-fault record pushed on the user exception stack.
///
/// Field order: fault address, error code, registers, rip, rflags, rsp.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UTrapframe {
    pub fault_va: u64,
    pub err: u64,
    pub regs: PushRegs,
    pub rip: u64,
    pub rflags: u64,
    /// User stack pointer at the time of the fault, before redirection.
    pub rsp: u64,
}

impl UTrapframe {
    /// Size of one record on the exception stack.
    pub const SIZE: u64 = core::mem::size_of::<Self>() as u64;

    /// Record describing a fault at `fault_va` taken with trap state `tf`.
    pub const fn from_trapframe(fault_va: u64, tf: &Trapframe) -> Self {
        Self {
            fault_va,
            err: tf.err,
            regs: tf.regs,
            rip: tf.rip,
            rflags: tf.rflags,
            rsp: tf.rsp,
        }
    }
}

const _: () = {
    use core::mem::{offset_of, size_of};

    assert!(size_of::<PushRegs>() == 15 * 8);
    assert!(size_of::<Trapframe>() == 24 * 8);
    assert!(offset_of!(Trapframe, trapno) == 0x88);
    assert!(offset_of!(Trapframe, err) == 0x90);
    assert!(offset_of!(Trapframe, rip) == 0x98);
    assert!(offset_of!(Trapframe, ss) == 0xB8);

    assert!(size_of::<UTrapframe>() == 20 * 8);
    assert!(offset_of!(UTrapframe, fault_va) == 0x00);
    assert!(offset_of!(UTrapframe, err) == 0x08);
    assert!(offset_of!(UTrapframe, regs) == 0x10);
    assert!(offset_of!(UTrapframe, rip) == 0x88);
    assert!(offset_of!(UTrapframe, rflags) == 0x90);
    assert!(offset_of!(UTrapframe, rsp) == 0x98);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_copies_fault_state_from_frame() {
        let mut tf = Trapframe::default();
        tf.regs.rax = 7;
        tf.regs.r15 = 9;
        tf.err = 0x6;
        tf.rip = 0x80_0020;
        tf.rflags = 0x202;
        tf.rsp = 0xEEBF_DF00;
        tf.cs = 0x1B;

        let rec = UTrapframe::from_trapframe(0xDEAD_B000, &tf);
        assert_eq!(rec.fault_va, 0xDEAD_B000);
        assert_eq!(rec.err, 0x6);
        assert_eq!(rec.regs, tf.regs);
        assert_eq!(rec.rip, 0x80_0020);
        assert_eq!(rec.rflags, 0x202);
        assert_eq!(rec.rsp, 0xEEBF_DF00);
    }

    #[test]
    fn privilege_comes_from_cs_low_bits() {
        let tf = Trapframe { cs: 0x1B, ..Default::default() };
        assert!(tf.from_user());
        let tf = Trapframe { cs: 0x08, ..Default::default() };
        assert!(tf.from_kernel());
        assert_eq!(tf.privilege(), 0);
    }
}
