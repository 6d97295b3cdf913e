//! Trap, interrupt and exception dispatch.
//!
//! Everything here is written against [`trapgate_lib::Machine`] and the
//! collaborator traits in [`services`]; the boot crate supplies the real
//! hardware and kernel services.

#![cfg_attr(not(test), no_std)]

pub mod coordinator;
pub mod env;
pub mod idt;
pub mod kdiag;
pub mod pgfault;
pub mod services;
pub mod trap;
pub mod tss;

#[cfg(test)]
mod test_fixtures;

pub use coordinator::{CpuStates, CpuStatus};
pub use env::Env;
pub use idt::{GateHandlers, Idt, IdtBuildError};
pub use services::{
    Collaborators, Debugger, EnvManager, InterruptController, SyscallTable, UserMemory,
};
pub use trap::{FatalTrap, TrapDispatcher, TrapExit};
pub use tss::{RegistrarError, TssTable};
