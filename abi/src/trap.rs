//! Trap numbering and classification.
//!
//! Vectors 0-31 are CPU exceptions, hardware IRQ lines are remapped to start
//! at [`IRQ_OFFSET`], and the system call gate sits at [`T_SYSCALL`].

use bitflags::bitflags;

// =============================================================================
// CPU Exception Vectors
// =============================================================================

pub const T_DIVIDE: u64 = 0;
pub const T_DEBUG: u64 = 1;
pub const T_NMI: u64 = 2;
pub const T_BRKPT: u64 = 3;
pub const T_OFLOW: u64 = 4;
pub const T_BOUND: u64 = 5;
pub const T_ILLOP: u64 = 6;
pub const T_DEVICE: u64 = 7;
pub const T_DBLFLT: u64 = 8;
// 9 is reserved (coprocessor segment overrun)
pub const T_TSS: u64 = 10;
pub const T_SEGNP: u64 = 11;
pub const T_STACK: u64 = 12;
pub const T_GPFLT: u64 = 13;
pub const T_PGFLT: u64 = 14;
// 15 is reserved
pub const T_FPERR: u64 = 16;
pub const T_ALIGN: u64 = 17;
pub const T_MCHK: u64 = 18;
pub const T_SIMDERR: u64 = 19;

/// System call gate (`int $0x30`).
pub const T_SYSCALL: u64 = 48;

/// Pushed by the catch-all entry stub. Outside the hardware vector range, so
/// it always classifies as unknown.
pub const T_DEFAULT: u64 = 500;

// =============================================================================
// Hardware IRQ Lines
// =============================================================================

/// IRQ 0 is delivered on this vector.
pub const IRQ_OFFSET: u64 = 32;

pub const IRQ_TIMER: u64 = 0;
pub const IRQ_KBD: u64 = 1;
pub const IRQ_SERIAL: u64 = 4;
pub const IRQ_SPURIOUS: u64 = 7;
pub const IRQ_IDE: u64 = 14;
pub const IRQ_ERROR: u64 = 19;

/// Hardware interrupt lines the kernel installs gates for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IrqLine {
    Timer,
    Keyboard,
    Serial,
    Spurious,
    Ide,
    Error,
}

impl IrqLine {
    #[inline]
    pub const fn line(self) -> u64 {
        match self {
            Self::Timer => IRQ_TIMER,
            Self::Keyboard => IRQ_KBD,
            Self::Serial => IRQ_SERIAL,
            Self::Spurious => IRQ_SPURIOUS,
            Self::Ide => IRQ_IDE,
            Self::Error => IRQ_ERROR,
        }
    }

    #[inline]
    pub const fn from_line(line: u64) -> Option<Self> {
        match line {
            IRQ_TIMER => Some(Self::Timer),
            IRQ_KBD => Some(Self::Keyboard),
            IRQ_SERIAL => Some(Self::Serial),
            IRQ_SPURIOUS => Some(Self::Spurious),
            IRQ_IDE => Some(Self::Ide),
            IRQ_ERROR => Some(Self::Error),
            _ => None,
        }
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Every trap the kernel knows by name, plus a fallback for everything else.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrapVector {
    DivideError,
    Debug,
    Nmi,
    Breakpoint,
    Overflow,
    BoundRange,
    InvalidOpcode,
    DeviceNotAvailable,
    DoubleFault,
    InvalidTss,
    SegmentNotPresent,
    StackFault,
    GeneralProtection,
    PageFault,
    FpuError,
    AlignmentCheck,
    MachineCheck,
    SimdError,
    Syscall,
    Irq(IrqLine),
    Unknown(u64),
}

impl TrapVector {
    /// Vectors that get a dedicated gate; every other vector gets the
    /// default gate.
    pub const GATES: [TrapVector; 25] = [
        Self::DivideError,
        Self::Debug,
        Self::Nmi,
        Self::Breakpoint,
        Self::Overflow,
        Self::BoundRange,
        Self::InvalidOpcode,
        Self::DeviceNotAvailable,
        Self::DoubleFault,
        Self::InvalidTss,
        Self::SegmentNotPresent,
        Self::StackFault,
        Self::GeneralProtection,
        Self::PageFault,
        Self::FpuError,
        Self::AlignmentCheck,
        Self::MachineCheck,
        Self::SimdError,
        Self::Syscall,
        Self::Irq(IrqLine::Timer),
        Self::Irq(IrqLine::Keyboard),
        Self::Irq(IrqLine::Serial),
        Self::Irq(IrqLine::Spurious),
        Self::Irq(IrqLine::Ide),
        Self::Irq(IrqLine::Error),
    ];

    pub const fn from_trapno(trapno: u64) -> Self {
        match trapno {
            T_DIVIDE => Self::DivideError,
            T_DEBUG => Self::Debug,
            T_NMI => Self::Nmi,
            T_BRKPT => Self::Breakpoint,
            T_OFLOW => Self::Overflow,
            T_BOUND => Self::BoundRange,
            T_ILLOP => Self::InvalidOpcode,
            T_DEVICE => Self::DeviceNotAvailable,
            T_DBLFLT => Self::DoubleFault,
            T_TSS => Self::InvalidTss,
            T_SEGNP => Self::SegmentNotPresent,
            T_STACK => Self::StackFault,
            T_GPFLT => Self::GeneralProtection,
            T_PGFLT => Self::PageFault,
            T_FPERR => Self::FpuError,
            T_ALIGN => Self::AlignmentCheck,
            T_MCHK => Self::MachineCheck,
            T_SIMDERR => Self::SimdError,
            T_SYSCALL => Self::Syscall,
            n if n >= IRQ_OFFSET => match IrqLine::from_line(n - IRQ_OFFSET) {
                Some(irq) => Self::Irq(irq),
                None => Self::Unknown(n),
            },
            n => Self::Unknown(n),
        }
    }

    pub const fn trapno(self) -> u64 {
        match self {
            Self::DivideError => T_DIVIDE,
            Self::Debug => T_DEBUG,
            Self::Nmi => T_NMI,
            Self::Breakpoint => T_BRKPT,
            Self::Overflow => T_OFLOW,
            Self::BoundRange => T_BOUND,
            Self::InvalidOpcode => T_ILLOP,
            Self::DeviceNotAvailable => T_DEVICE,
            Self::DoubleFault => T_DBLFLT,
            Self::InvalidTss => T_TSS,
            Self::SegmentNotPresent => T_SEGNP,
            Self::StackFault => T_STACK,
            Self::GeneralProtection => T_GPFLT,
            Self::PageFault => T_PGFLT,
            Self::FpuError => T_FPERR,
            Self::AlignmentCheck => T_ALIGN,
            Self::MachineCheck => T_MCHK,
            Self::SimdError => T_SIMDERR,
            Self::Syscall => T_SYSCALL,
            Self::Irq(irq) => IRQ_OFFSET + irq.line(),
            Self::Unknown(n) => n,
        }
    }

    /// Whether user code may reach this gate with a software `int`.
    #[inline]
    pub const fn user_invocable(self) -> bool {
        matches!(self, Self::Breakpoint | Self::Syscall)
    }
}

/// Symbolic name of a trap number, for diagnostics.
pub fn trapname(trapno: u64) -> &'static str {
    const EXCNAMES: [&str; 20] = [
        "Divide error",
        "Debug",
        "Non-Maskable Interrupt",
        "Breakpoint",
        "Overflow",
        "BOUND Range Exceeded",
        "Invalid Opcode",
        "Device Not Available",
        "Double Fault",
        "Coprocessor Segment Overrun",
        "Invalid TSS",
        "Segment Not Present",
        "Stack Fault",
        "General Protection",
        "Page Fault",
        "(unknown trap)",
        "x87 FPU Floating-Point Error",
        "Alignment Check",
        "Machine-Check",
        "SIMD Floating-Point Exception",
    ];

    if let Some(name) = EXCNAMES.get(trapno as usize) {
        return name;
    }
    if trapno == T_SYSCALL {
        return "System call";
    }
    if (IRQ_OFFSET..IRQ_OFFSET + 16).contains(&trapno) {
        return "Hardware Interrupt";
    }
    "(unknown trap)"
}

bitflags! {
    /// Low bits of the page-fault error code.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PageFaultError: u64 {
        /// Protection violation (clear: page not present).
        const PROTECTION = 1 << 0;
        /// Caused by a write (clear: read).
        const WRITE = 1 << 1;
        /// Raised in user mode (clear: kernel mode).
        const USER = 1 << 2;
    }
}

impl PageFaultError {
    /// `[user|kernel, write|read, protection|not-present]`.
    pub fn describe(self) -> (&'static str, &'static str, &'static str) {
        (
            if self.contains(Self::USER) { "user" } else { "kernel" },
            if self.contains(Self::WRITE) { "write" } else { "read" },
            if self.contains(Self::PROTECTION) {
                "protection"
            } else {
                "not-present"
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trapno_classification_is_stable() {
        for n in 0..256u64 {
            assert_eq!(TrapVector::from_trapno(n).trapno(), n);
        }
        assert_eq!(TrapVector::from_trapno(39), TrapVector::Irq(IrqLine::Spurious));
        assert_eq!(TrapVector::from_trapno(32), TrapVector::Irq(IrqLine::Timer));
        assert_eq!(TrapVector::from_trapno(9), TrapVector::Unknown(9));
        assert_eq!(TrapVector::from_trapno(33 + 2), TrapVector::Unknown(35));
        assert_eq!(TrapVector::from_trapno(T_DEFAULT), TrapVector::Unknown(T_DEFAULT));
    }

    #[test]
    fn only_breakpoint_and_syscall_are_user_invocable() {
        let user: Vec<_> = TrapVector::GATES
            .iter()
            .filter(|v| v.user_invocable())
            .collect();
        assert_eq!(user, [&TrapVector::Breakpoint, &TrapVector::Syscall]);
    }

    #[test]
    fn names() {
        assert_eq!(trapname(T_PGFLT), "Page Fault");
        assert_eq!(trapname(T_SYSCALL), "System call");
        assert_eq!(trapname(IRQ_OFFSET + IRQ_SPURIOUS), "Hardware Interrupt");
        assert_eq!(trapname(15), "(unknown trap)");
        assert_eq!(trapname(200), "(unknown trap)");
        assert_eq!(trapname(T_DEFAULT), "(unknown trap)");
    }

    #[test]
    fn page_fault_error_decoding() {
        let err = PageFaultError::from_bits_truncate(0x7);
        assert_eq!(err.describe(), ("user", "write", "protection"));
        let err = PageFaultError::from_bits_truncate(0x0);
        assert_eq!(err.describe(), ("kernel", "read", "not-present"));
    }
}
