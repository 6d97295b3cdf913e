//! Per-CPU privileged stacks.
//!
//! One GDT is shared by every CPU; after the five standard descriptors it
//! holds one 16-byte TSS descriptor per CPU. Each CPU registers exactly once,
//! writing only its own TSS and its own descriptor slot, then loads its own
//! selector. The slot is chosen by the id the executing CPU reports for
//! itself, never by a caller-supplied index; the claim flag catches a second
//! registration on the same CPU.

use core::cell::UnsafeCell;
use core::fmt;
use core::mem::{offset_of, size_of};

use trapgate_abi::memlayout::kstack_top;
use trapgate_abi::{GdtDescriptor, GdtLayout, GdtTssEntry, IdtDescriptor, SegmentSelector, Tss64};
use trapgate_lib::percpu::{ClaimError, CpuId, MAX_CPUS, PerCpuClaims};
use trapgate_lib::{Machine, klog_debug};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrarError {
    CpuOutOfRange(CpuId),
    /// The CPU's TSS slot was already registered; loading its selector again
    /// would fault on the busy descriptor.
    SlotClaimed(CpuId),
}

impl fmt::Display for RegistrarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CpuOutOfRange(cpu) => {
                write!(f, "cpu {} out of range (max {})", cpu, MAX_CPUS)
            }
            Self::SlotClaimed(cpu) => write!(f, "TSS slot for cpu {} already registered", cpu),
        }
    }
}

impl From<ClaimError> for RegistrarError {
    fn from(err: ClaimError) -> Self {
        match err {
            ClaimError::OutOfRange(cpu) => Self::CpuOutOfRange(cpu),
            ClaimError::AlreadyClaimed(cpu) => Self::SlotClaimed(cpu),
        }
    }
}

/// The shared GDT together with every CPU's TSS.
#[repr(C, align(16))]
pub struct TssTable {
    gdt: UnsafeCell<GdtLayout>,
    tss: [UnsafeCell<Tss64>; MAX_CPUS],
    claims: PerCpuClaims,
}

// SAFETY: each TSS and each GDT TSS slot is written only by the CPU that won
// its claim flag; the standard GDT entries are never written after `new`.
unsafe impl Sync for TssTable {}

impl TssTable {
    pub const fn new() -> Self {
        Self {
            gdt: UnsafeCell::new(GdtLayout::new()),
            tss: [const { UnsafeCell::new(Tss64::new()) }; MAX_CPUS],
            claims: PerCpuClaims::new(),
        }
    }

    /// Pointer for `lgdt`. Only meaningful once the table is at its final
    /// address.
    pub fn gdt_descriptor(&self) -> GdtDescriptor {
        GdtDescriptor::for_layout(self.gdt.get() as u64)
    }

    fn descriptor_slot(&self, cpu: CpuId) -> *mut GdtTssEntry {
        let offset = offset_of!(GdtLayout, tss) + cpu.0 * size_of::<GdtTssEntry>();
        // SAFETY: callers pass a CPU below MAX_CPUS, so the offset stays
        // inside the layout.
        unsafe { self.gdt.get().cast::<u8>().add(offset).cast::<GdtTssEntry>() }
    }

    /// Install and activate the executing CPU's privileged stack, then load
    /// the IDT.
    ///
    /// Runs once per CPU, before that CPU takes a trap from user mode.
    /// Returns the TSS selector that was loaded.
    pub fn register_cpu(
        &self,
        machine: &dyn Machine,
        idt: &IdtDescriptor,
    ) -> Result<SegmentSelector, RegistrarError> {
        let cpu = machine.cpu_id();
        self.claims.claim(cpu)?;

        let tss_ptr = self.tss[cpu.0].get();
        // SAFETY: the claim above makes this CPU the only writer of its TSS.
        let tss = unsafe { &mut *tss_ptr };
        tss.rsp0 = kstack_top(cpu.0);
        tss.iomap_base = size_of::<Tss64>() as u16;

        let mut descriptor = GdtTssEntry::for_tss(tss_ptr as u64, size_of::<Tss64>() as u32 - 1);
        descriptor.mark_system();
        // SAFETY: claimed slot, in bounds; the layout is packed so the write
        // must not assume alignment.
        unsafe { self.descriptor_slot(cpu).write_unaligned(descriptor) };

        let selector = SegmentSelector::tss(cpu.0);
        machine.load_gdt(&self.gdt_descriptor());
        machine.load_task_register(selector);
        machine.load_idt(idt);

        klog_debug!(
            "TSS: cpu {} rsp0={:#x} selector={:#x}",
            cpu,
            kstack_top(cpu.0),
            selector.bits()
        );
        Ok(selector)
    }

    /// Copy of `cpu`'s TSS and descriptor, if it has registered.
    pub fn snapshot(&self, cpu: CpuId) -> Option<(Tss64, GdtTssEntry)> {
        if !self.claims.is_claimed(cpu) {
            return None;
        }
        // SAFETY: registration wrote both before the claim became visible to
        // this CPU's later reads; neither is written again by software.
        unsafe {
            Some((
                *self.tss[cpu.0].get(),
                self.descriptor_slot(cpu).read_unaligned(),
            ))
        }
    }
}

impl Default for TssTable {
    fn default() -> Self {
        Self::new()
    }
}
