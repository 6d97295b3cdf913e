use trapgate_abi::{EnvId, EnvStatus, Trapframe};

/// The slice of an environment's control block the trap path reads and
/// writes. The environment manager owns the rest.
#[derive(Clone, Debug)]
pub struct Env {
    pub id: EnvId,
    pub status: EnvStatus,
    /// Saved user state; replayed verbatim on resume.
    pub tf: Trapframe,
    /// User-level page-fault entry point, if one was registered.
    pub pgfault_upcall: Option<u64>,
}

impl Env {
    pub const fn new(id: EnvId) -> Self {
        Self {
            id,
            status: EnvStatus::Runnable,
            tf: Trapframe::zeroed(),
            pgfault_upcall: None,
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.status == EnvStatus::Running
    }
}
