//! Global Descriptor Table (GDT) and Task State Segment (TSS) layouts.
//!
//! The GDT is shared by every core: five standard segment descriptors
//! followed by one 16-byte TSS descriptor per CPU. Core `i` owns the TSS
//! descriptor at GDT index `5 + 2 * i` and loads selector
//! [`SegmentSelector::tss`]`(i)`; nothing else ever writes that slot.
//!
//! | Item | Purpose |
//! |------|---------|
//! | [`SegmentSelector`] | Type-safe segment selector with named constants |
//! | [`Tss64`] | 64-bit Task State Segment |
//! | [`GdtTssEntry`] | 16-byte TSS descriptor inside the GDT |
//! | [`GdtLayout`] | Complete GDT: 5 standard entries + one TSS slot per CPU |
//! | [`GdtDescriptor`] | `lgdt` operand (limit + base) |

use crate::MAX_CPUS;

// =========================================================================
// Segment Selector
// =========================================================================

/// x86_64 segment selector.
///
/// Layout (16 bits):
/// - Bits 0-1: Requested Privilege Level (RPL)
/// - Bit 2: Table Indicator (0 = GDT, 1 = LDT)
/// - Bits 3-15: Descriptor index
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SegmentSelector(pub u16);

impl SegmentSelector {
    pub const NULL: Self = Self(0);

    /// Kernel text (GDT index 1, RPL 0) = 0x08.
    pub const KERNEL_CODE: Self = Self::new(1, false, 0);

    /// Kernel data (GDT index 2, RPL 0) = 0x10.
    pub const KERNEL_DATA: Self = Self::new(2, false, 0);

    /// User text (GDT index 3, RPL 3) = 0x1B.
    pub const USER_CODE: Self = Self::new(3, false, 3);

    /// User data (GDT index 4, RPL 3) = 0x23.
    pub const USER_DATA: Self = Self::new(4, false, 3);

    /// First TSS descriptor (GDT index 5, RPL 0) = 0x28.
    pub const TSS0: Self = Self::new(TSS_FIRST_INDEX, false, 0);

    #[inline]
    pub const fn new(index: u16, ldt: bool, rpl: u8) -> Self {
        let ti = if ldt { 1 << 2 } else { 0 };
        Self((index << 3) | ti | (rpl as u16 & 0x3))
    }

    /// TSS selector for `cpu`. Each TSS descriptor is 16 bytes, so the
    /// selectors are spaced by two GDT slots.
    #[inline]
    pub const fn tss(cpu: usize) -> Self {
        Self::new(TSS_FIRST_INDEX + 2 * cpu as u16, false, 0)
    }

    #[inline]
    pub const fn index(self) -> u16 {
        self.0 >> 3
    }

    #[inline]
    pub const fn is_ldt(self) -> bool {
        self.0 & (1 << 2) != 0
    }

    #[inline]
    pub const fn rpl(self) -> u8 {
        (self.0 & 0x3) as u8
    }

    #[inline]
    pub const fn bits(self) -> u16 {
        self.0
    }
}

/// GDT index of CPU 0's TSS descriptor.
pub const TSS_FIRST_INDEX: u16 = 5;

// =========================================================================
// GDT Descriptor Access Byte Fields (bits 40-47)
// =========================================================================

pub const GDT_ACCESS_PRESENT: u8 = 1 << 7;
pub const GDT_ACCESS_DPL_KERNEL: u8 = 0 << 5;
pub const GDT_ACCESS_DPL_USER: u8 = 3 << 5;
/// Descriptor type bit (S). Set for code/data, clear for system descriptors
/// such as a TSS; the CPU refuses `ltr` on a TSS descriptor with S set.
pub const GDT_ACCESS_SEGMENT: u8 = 1 << 4;
pub const GDT_ACCESS_CODE_TYPE: u8 = 0b1010;
pub const GDT_ACCESS_DATA_TYPE: u8 = 0b0010;
/// Available 64-bit TSS type.
pub const GDT_TYPE_TSS_AVAILABLE: u8 = 0x9;

pub const GDT_FLAG_GRANULARITY: u8 = 1 << 3;
pub const GDT_FLAG_LONG_MODE: u8 = 1 << 1;
pub const GDT_FLAGS_64BIT: u8 = GDT_FLAG_GRANULARITY | GDT_FLAG_LONG_MODE;

/// Build a 64-bit GDT descriptor from individual fields.
pub const fn gdt_make_descriptor(access: u8, flags: u8) -> u64 {
    0xFFFF | ((access as u64) << 40) | (0xF_u64 << 48) | ((flags as u64) << 52)
}

pub const GDT_STANDARD_ENTRIES: [u64; 5] = [
    0,
    gdt_make_descriptor(
        GDT_ACCESS_PRESENT | GDT_ACCESS_DPL_KERNEL | GDT_ACCESS_SEGMENT | GDT_ACCESS_CODE_TYPE,
        GDT_FLAGS_64BIT,
    ),
    gdt_make_descriptor(
        GDT_ACCESS_PRESENT | GDT_ACCESS_DPL_KERNEL | GDT_ACCESS_SEGMENT | GDT_ACCESS_DATA_TYPE,
        GDT_FLAGS_64BIT,
    ),
    gdt_make_descriptor(
        GDT_ACCESS_PRESENT | GDT_ACCESS_DPL_USER | GDT_ACCESS_SEGMENT | GDT_ACCESS_CODE_TYPE,
        GDT_FLAGS_64BIT,
    ),
    gdt_make_descriptor(
        GDT_ACCESS_PRESENT | GDT_ACCESS_DPL_USER | GDT_ACCESS_SEGMENT | GDT_ACCESS_DATA_TYPE,
        GDT_FLAGS_64BIT,
    ),
];

// =========================================================================
// Hardware Structures
// =========================================================================

/// 64-bit Task State Segment.
///
/// Hardware-defined layout; do not reorder or add fields.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct Tss64 {
    pub reserved0: u32,
    /// Stack loaded on a ring 3 -> ring 0 transition.
    pub rsp0: u64,
    pub rsp1: u64,
    pub rsp2: u64,
    pub reserved1: u64,
    pub ist: [u64; 7],
    pub reserved2: u64,
    pub reserved3: u16,
    pub iomap_base: u16,
}

impl Tss64 {
    pub const fn new() -> Self {
        Self {
            reserved0: 0,
            rsp0: 0,
            rsp1: 0,
            rsp2: 0,
            reserved1: 0,
            ist: [0; 7],
            reserved2: 0,
            reserved3: 0,
            iomap_base: 0,
        }
    }
}

impl Default for Tss64 {
    fn default() -> Self {
        Self::new()
    }
}

/// TSS descriptor entry (16 bytes in long mode, occupies two GDT slots).
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GdtTssEntry {
    pub limit_low: u16,
    pub base_low: u16,
    pub base_mid: u8,
    pub access: u8,
    pub granularity: u8,
    pub base_high: u8,
    pub base_upper: u32,
    pub reserved: u32,
}

impl GdtTssEntry {
    pub const fn new() -> Self {
        Self {
            limit_low: 0,
            base_low: 0,
            base_mid: 0,
            access: 0,
            granularity: 0,
            base_high: 0,
            base_upper: 0,
            reserved: 0,
        }
    }

    /// Descriptor for an available TSS at `tss_base` with limit `tss_limit`.
    pub const fn for_tss(tss_base: u64, tss_limit: u32) -> Self {
        Self {
            limit_low: (tss_limit & 0xFFFF) as u16,
            base_low: (tss_base & 0xFFFF) as u16,
            base_mid: ((tss_base >> 16) & 0xFF) as u8,
            access: GDT_ACCESS_PRESENT | GDT_ACCESS_DPL_KERNEL | GDT_TYPE_TSS_AVAILABLE,
            granularity: ((tss_limit >> 16) & 0x0F) as u8,
            base_high: ((tss_base >> 24) & 0xFF) as u8,
            base_upper: (tss_base >> 32) as u32,
            reserved: 0,
        }
    }

    /// Force the S bit clear so the CPU reads this slot as a system
    /// descriptor.
    #[inline]
    pub fn mark_system(&mut self) {
        self.access &= !GDT_ACCESS_SEGMENT;
    }

    #[inline]
    pub const fn is_system(&self) -> bool {
        self.access & GDT_ACCESS_SEGMENT == 0
    }

    #[inline]
    pub const fn is_present(&self) -> bool {
        self.access & GDT_ACCESS_PRESENT != 0
    }

    #[inline]
    pub const fn base(&self) -> u64 {
        (self.base_low as u64)
            | ((self.base_mid as u64) << 16)
            | ((self.base_high as u64) << 24)
            | ((self.base_upper as u64) << 32)
    }

    #[inline]
    pub const fn limit(&self) -> u32 {
        (self.limit_low as u32) | (((self.granularity & 0x0F) as u32) << 16)
    }
}

impl Default for GdtTssEntry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared GDT: 5 standard entries followed by one TSS descriptor per CPU.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct GdtLayout {
    /// Null, kernel text, kernel data, user text, user data.
    pub entries: [u64; 5],
    /// Per-CPU TSS descriptors, indexed by CPU id.
    pub tss: [GdtTssEntry; MAX_CPUS],
}

impl GdtLayout {
    pub const fn new() -> Self {
        Self {
            entries: GDT_STANDARD_ENTRIES,
            tss: [GdtTssEntry::new(); MAX_CPUS],
        }
    }

    /// Byte size of the entire GDT (for the `lgdt` limit field).
    pub const fn byte_size() -> usize {
        core::mem::size_of::<Self>()
    }
}

impl Default for GdtLayout {
    fn default() -> Self {
        Self::new()
    }
}

/// `lgdt` operand: limit (byte count - 1) + linear base address.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GdtDescriptor {
    pub limit: u16,
    pub base: u64,
}

impl GdtDescriptor {
    pub const fn for_layout(base: u64) -> Self {
        Self {
            limit: (GdtLayout::byte_size() - 1) as u16,
            base,
        }
    }
}

const _: () = {
    assert!(SegmentSelector::KERNEL_CODE.0 == 0x08);
    assert!(SegmentSelector::KERNEL_DATA.0 == 0x10);
    assert!(SegmentSelector::USER_CODE.0 == 0x1B);
    assert!(SegmentSelector::USER_DATA.0 == 0x23);
    assert!(SegmentSelector::TSS0.0 == 0x28);

    assert!(core::mem::size_of::<Tss64>() == 104);
    assert!(core::mem::size_of::<GdtTssEntry>() == 16);
    assert!(core::mem::size_of::<GdtLayout>() == 5 * 8 + 16 * MAX_CPUS);
    assert!(core::mem::size_of::<GdtDescriptor>() == 10);

    assert!(GDT_FLAGS_64BIT == 0x0A);
};
