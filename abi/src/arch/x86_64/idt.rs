//! Interrupt Descriptor Table (IDT) gate layout.
//!
//! Only the hardware format lives here. Which vector gets which gate is the
//! business of the descriptor table builder in `trapgate-core`.

use super::gdt::SegmentSelector;

// =============================================================================
// Gate Types
// =============================================================================

/// 64-bit interrupt gate. Clears IF on entry, which the trap path relies on.
pub const IDT_TYPE_INTERRUPT: u8 = 0xE;

/// 64-bit trap gate. Leaves IF untouched.
pub const IDT_TYPE_TRAP: u8 = 0xF;

/// Present bit of the type/attribute byte.
pub const IDT_ATTR_PRESENT: u8 = 1 << 7;

/// Descriptor privilege level for gates only the kernel may invoke with `int`.
pub const IDT_DPL_KERNEL: u8 = 0;

/// Descriptor privilege level for gates user code may invoke with `int`.
pub const IDT_DPL_USER: u8 = 3;

/// Number of entries in the IDT (256 vectors).
pub const IDT_ENTRIES: usize = 256;

// =============================================================================
// IDT Entry
// =============================================================================

/// x86-64 IDT gate descriptor.
///
/// Layout must match the hardware-defined format (Intel SDM Vol. 3A, 6.14.1).
#[repr(C, packed)]
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct IdtEntry {
    pub offset_low: u16,
    pub selector: u16,
    pub ist: u8,
    pub type_attr: u8,
    pub offset_mid: u16,
    pub offset_high: u32,
    pub zero: u32,
}

impl IdtEntry {
    /// A not-present gate. Any vector still holding this after boot is a
    /// configuration error.
    pub const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            ist: 0,
            type_attr: 0,
            offset_mid: 0,
            offset_high: 0,
            zero: 0,
        }
    }

    /// Build a present gate pointing at `handler`.
    pub const fn new(handler: u64, selector: SegmentSelector, gate_type: u8, dpl: u8) -> Self {
        Self {
            offset_low: (handler & 0xFFFF) as u16,
            selector: selector.bits(),
            ist: 0,
            type_attr: IDT_ATTR_PRESENT | ((dpl & 0x3) << 5) | (gate_type & 0xF),
            offset_mid: ((handler >> 16) & 0xFFFF) as u16,
            offset_high: (handler >> 32) as u32,
            zero: 0,
        }
    }

    /// Reassembled handler address.
    #[inline]
    pub const fn handler(&self) -> u64 {
        (self.offset_low as u64) | ((self.offset_mid as u64) << 16) | ((self.offset_high as u64) << 32)
    }

    #[inline]
    pub const fn is_present(&self) -> bool {
        self.type_attr & IDT_ATTR_PRESENT != 0
    }

    /// Privilege level required to reach this gate with a software `int`.
    #[inline]
    pub const fn dpl(&self) -> u8 {
        (self.type_attr >> 5) & 0x3
    }

    #[inline]
    pub const fn gate_type(&self) -> u8 {
        self.type_attr & 0xF
    }

    #[inline]
    pub const fn code_selector(&self) -> SegmentSelector {
        SegmentSelector(self.selector)
    }
}

impl core::fmt::Debug for IdtEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IdtEntry")
            .field("handler", &format_args!("{:#x}", self.handler()))
            .field("selector", &format_args!("{:#x}", { self.selector }))
            .field("type_attr", &format_args!("{:#x}", { self.type_attr }))
            .finish()
    }
}

/// `lidt` operand: limit (byte count - 1) + linear base address.
#[repr(C, packed)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IdtDescriptor {
    pub limit: u16,
    pub base: u64,
}

impl IdtDescriptor {
    /// Descriptor covering a full 256-gate table at `base`.
    pub const fn for_table(base: u64) -> Self {
        Self {
            limit: (core::mem::size_of::<IdtEntry>() * IDT_ENTRIES - 1) as u16,
            base,
        }
    }
}

const _: () = {
    assert!(core::mem::size_of::<IdtEntry>() == 16);
    assert!(core::mem::size_of::<IdtDescriptor>() == 10);
    assert!(core::mem::size_of::<IdtEntry>() * IDT_ENTRIES - 1 == 0xFFF);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_round_trips_handler_address() {
        let gate = IdtEntry::new(
            0xFFFF_8000_1234_5678,
            SegmentSelector::KERNEL_CODE,
            IDT_TYPE_INTERRUPT,
            IDT_DPL_USER,
        );
        assert_eq!(gate.handler(), 0xFFFF_8000_1234_5678);
        assert!(gate.is_present());
        assert_eq!(gate.dpl(), 3);
        assert_eq!(gate.gate_type(), IDT_TYPE_INTERRUPT);
        assert_eq!(gate.code_selector(), SegmentSelector::KERNEL_CODE);
        assert_eq!({ gate.type_attr }, 0xEE);
    }

    #[test]
    fn missing_gate_is_not_present() {
        assert!(!IdtEntry::missing().is_present());
    }
}
