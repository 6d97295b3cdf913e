pub mod gdt;
pub mod idt;

pub use gdt::{GdtDescriptor, GdtLayout, GdtTssEntry, SegmentSelector, Tss64};
pub use idt::{IdtDescriptor, IdtEntry};
