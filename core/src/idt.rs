//! Interrupt descriptor table construction.
//!
//! The table is assembled once at boot from the addresses of the assembly
//! entry stubs and never modified afterwards. Every slot is present: vectors
//! without a dedicated stub route to the catch-all entry.

use core::fmt;

use trapgate_abi::arch::x86_64::idt::{IDT_DPL_KERNEL, IDT_DPL_USER, IDT_TYPE_INTERRUPT};
use trapgate_abi::{IDT_ENTRIES, IdtDescriptor, IdtEntry, SegmentSelector, TrapVector};

use crate::trap::FatalTrap;

/// Number of vectors with a dedicated entry stub.
pub const GATE_COUNT: usize = TrapVector::GATES.len();

/// Entry stub addresses: `vectors[i]` handles `TrapVector::GATES[i]`.
#[derive(Clone, Copy, Debug)]
pub struct GateHandlers {
    pub default: u64,
    pub vectors: [u64; GATE_COUNT],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdtBuildError {
    /// The catch-all stub address is null.
    NullDefaultHandler,
    /// A named vector's stub address is null.
    NullHandler(TrapVector),
    /// A vector was given two stubs.
    DuplicateGate(TrapVector),
    /// A vector outside `0..256` was given a stub.
    VectorOutOfRange(TrapVector),
}

impl fmt::Display for IdtBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NullDefaultHandler => write!(f, "default trap handler is null"),
            Self::NullHandler(v) => write!(f, "handler for vector {} is null", v.trapno()),
            Self::DuplicateGate(v) => write!(f, "vector {} installed twice", v.trapno()),
            Self::VectorOutOfRange(v) => write!(f, "vector {} out of range", v.trapno()),
        }
    }
}

/// Incremental builder; [`Idt::build`] is the usual entry point.
pub struct IdtBuilder {
    entries: [IdtEntry; IDT_ENTRIES],
    named: [bool; IDT_ENTRIES],
}

impl IdtBuilder {
    /// Start a table with every slot pointing at `default`.
    pub fn new(default: u64) -> Result<Self, IdtBuildError> {
        if default == 0 {
            return Err(IdtBuildError::NullDefaultHandler);
        }
        let fallback = IdtEntry::new(
            default,
            SegmentSelector::KERNEL_CODE,
            IDT_TYPE_INTERRUPT,
            IDT_DPL_KERNEL,
        );
        Ok(Self {
            entries: [fallback; IDT_ENTRIES],
            named: [false; IDT_ENTRIES],
        })
    }

    /// Install `handler` for `vector`. Only breakpoint and system call may be
    /// raised directly from user mode.
    pub fn gate(mut self, vector: TrapVector, handler: u64) -> Result<Self, IdtBuildError> {
        let slot = usize::try_from(vector.trapno())
            .ok()
            .filter(|&slot| slot < IDT_ENTRIES)
            .ok_or(IdtBuildError::VectorOutOfRange(vector))?;
        if handler == 0 {
            return Err(IdtBuildError::NullHandler(vector));
        }
        if self.named[slot] {
            return Err(IdtBuildError::DuplicateGate(vector));
        }

        let dpl = if vector.user_invocable() {
            IDT_DPL_USER
        } else {
            IDT_DPL_KERNEL
        };
        self.entries[slot] =
            IdtEntry::new(handler, SegmentSelector::KERNEL_CODE, IDT_TYPE_INTERRUPT, dpl);
        self.named[slot] = true;
        Ok(self)
    }

    pub fn finish(self) -> Idt {
        Idt {
            entries: self.entries,
        }
    }
}

/// The finished, read-only descriptor table.
#[repr(C, align(16))]
pub struct Idt {
    entries: [IdtEntry; IDT_ENTRIES],
}

impl Idt {
    /// Build the standard table: every architectural exception, the system
    /// call gate and the hardware IRQ lines, with the catch-all everywhere
    /// else.
    pub fn build(handlers: &GateHandlers) -> Result<Self, IdtBuildError> {
        let mut builder = IdtBuilder::new(handlers.default)?;
        for (vector, &handler) in TrapVector::GATES.iter().zip(handlers.vectors.iter()) {
            builder = builder.gate(*vector, handler)?;
        }
        Ok(builder.finish())
    }

    /// Look up a gate. A slot without the present bit is a configuration
    /// error the caller must treat as fatal.
    pub fn gate(&self, vector: u8) -> Result<&IdtEntry, FatalTrap> {
        let entry = &self.entries[vector as usize];
        if !entry.is_present() {
            return Err(FatalTrap::UnsetGate { vector });
        }
        Ok(entry)
    }

    pub fn entries(&self) -> &[IdtEntry; IDT_ENTRIES] {
        &self.entries
    }

    /// Pointer for `lidt`. Only meaningful once the table is at its final
    /// address.
    pub fn descriptor(&self) -> IdtDescriptor {
        IdtDescriptor::for_table(self.entries.as_ptr() as u64)
    }
}
