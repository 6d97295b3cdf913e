//! User page-fault upcalls.
//!
//! A page fault taken in user mode is reflected to the environment's
//! registered handler: the kernel pushes a [`UTrapframe`] on the user
//! exception stack and restarts the environment at the handler with its stack
//! pointer at that record. A fault raised while already running on the
//! exception stack stacks a new record below the current one, leaving one
//! word free for the handler's return sequence.

use core::fmt::Write;

use trapgate_abi::memlayout::{UXSTACKBOTTOM, UXSTACKTOP, in_exception_stack};
use trapgate_abi::{EnvId, PteFlags, Trapframe, UTrapframe};
use trapgate_lib::KernelLockHeld;

use crate::services::Collaborators;
use crate::trap::{FatalTrap, TrapDispatcher, TrapExit, active_frame};

/// Scratch word left between stacked records.
pub const RECURSIVE_GAP: u64 = 8;

/// Where to put the record for a fault taken with user stack pointer `rsp`.
pub const fn fault_record_address(rsp: u64) -> u64 {
    if in_exception_stack(rsp) {
        rsp - RECURSIVE_GAP - UTrapframe::SIZE
    } else {
        UXSTACKTOP - UTrapframe::SIZE
    }
}

/// Whether a record at `va` lies entirely on the exception stack.
pub const fn record_fits(va: u64) -> bool {
    match va.checked_add(UTrapframe::SIZE) {
        Some(end) => va >= UXSTACKBOTTOM && end <= UXSTACKTOP,
        None => false,
    }
}

impl<'a> TrapDispatcher<'a> {
    /// Handle a page fault on `tf`.
    ///
    /// Also the entry point the environment manager uses to deliver a fault
    /// on the current environment's behalf; `held` is the kernel lock if the
    /// caller holds it.
    pub fn page_fault(
        &self,
        tf: &mut Trapframe,
        services: &mut Collaborators<'_>,
        held: Option<KernelLockHeld<'a>>,
    ) -> TrapExit<'a> {
        let cpu = self.machine.cpu_id();
        let fault_va = self.machine.fault_address();
        let from_user = tf.from_user();
        let frame = *active_frame(tf, &mut *services.envs, from_user);

        if frame.from_kernel() {
            self.print_frame(cpu, tf, services);
            return self.fatal(
                services,
                cpu,
                held,
                FatalTrap::KernelPageFault {
                    va: fault_va,
                    rip: frame.rip,
                },
            );
        }

        let Some(env) = services.envs.current() else {
            return self.fatal(services, cpu, held, FatalTrap::NoCurrentEnvironment);
        };
        let id = env.id;
        let Some(upcall) = env.pgfault_upcall else {
            return self.kill_faulting(tf, services, held, id, fault_va, frame.rip);
        };

        let record_va = fault_record_address(frame.rsp);
        let perm = PteFlags::USER | PteFlags::WRITABLE;
        if !record_fits(record_va)
            || !services
                .memory
                .assert_writable(env, record_va, UTrapframe::SIZE, perm)
        {
            let _ = writeln!(
                services.console,
                "[{}] user_mem_check assertion failure for va {:016x}",
                id, record_va
            );
            return self.kill_faulting(tf, services, held, id, fault_va, frame.rip);
        }

        let record = UTrapframe::from_trapframe(fault_va, &frame);
        services.memory.write_fault_record(env, record_va, &record);
        env.tf.rip = upcall;
        env.tf.rsp = record_va;

        TrapExit::Resume { env: id, lock: held }
    }

    fn kill_faulting(
        &self,
        tf: &mut Trapframe,
        services: &mut Collaborators<'_>,
        held: Option<KernelLockHeld<'a>>,
        id: EnvId,
        fault_va: u64,
        rip: u64,
    ) -> TrapExit<'a> {
        let cpu = self.machine.cpu_id();
        let _ = writeln!(
            services.console,
            "[{}] user fault va {:016x} ip {:016x}",
            id, fault_va, rip
        );
        self.print_frame(cpu, tf, services);
        services.envs.destroy(id);
        self.epilogue(services, held)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{Event, Harness, user_frame};
    use trapgate_abi::memlayout::{PGSIZE, USTACKTOP};
    use trapgate_abi::trap::T_PGFLT;

    const UPCALL: u64 = 0x80_1000;

    fn faulting_env(h: &mut Harness) {
        h.envs.env.as_mut().unwrap().pgfault_upcall = Some(UPCALL);
        h.machine.cr2.set(0xdead_b000);
    }

    #[test]
    fn first_fault_record_sits_at_top_of_exception_stack() {
        let mut h = Harness::with_running_env();
        faulting_env(&mut h);
        let mut tf = user_frame(T_PGFLT);
        tf.err = 0x6;
        tf.rsp = USTACKTOP - 0x40;

        let exit = h.dispatch(&mut tf);
        assert!(matches!(exit, TrapExit::Resume { env, lock: Some(_) } if env == Harness::ENV));

        let va = UXSTACKTOP - UTrapframe::SIZE;
        let record = h.memory.records[&va];
        assert_eq!(record.fault_va, 0xdead_b000);
        assert_eq!(record.err, 0x6);
        assert_eq!(record.rip, tf.rip);
        assert_eq!(record.rsp, USTACKTOP - 0x40);
        assert_eq!(record.regs, tf.regs);

        let env = h.envs.env.as_ref().unwrap();
        assert_eq!(env.tf.rip, UPCALL);
        assert_eq!(env.tf.rsp, va);
    }

    #[test]
    fn nested_faults_stack_downwards_one_word_apart() {
        let mut h = Harness::with_running_env();
        faulting_env(&mut h);
        let mut rsp = USTACKTOP - 0x40;
        let mut addrs = Vec::new();
        for _ in 0..5 {
            let mut tf = user_frame(T_PGFLT);
            tf.rsp = rsp;
            let exit = h.dispatch(&mut tf);
            assert!(matches!(exit, TrapExit::Resume { .. }));
            drop(exit);
            // The handler faults again while running on the record.
            rsp = h.envs.env.as_ref().unwrap().tf.rsp;
            addrs.push(rsp);
        }
        assert_eq!(addrs[0], UXSTACKTOP - UTrapframe::SIZE);
        for pair in addrs.windows(2) {
            assert_eq!(pair[0] - pair[1], UTrapframe::SIZE + RECURSIVE_GAP);
        }
        // Each record remembers the stack it interrupted.
        assert_eq!(h.memory.records[&addrs[1]].rsp, addrs[0]);
    }

    #[test]
    fn no_upcall_destroys_with_log_line() {
        let mut h = Harness::with_running_env();
        h.machine.cr2.set(0x10);
        let mut tf = user_frame(T_PGFLT);
        let exit = h.dispatch(&mut tf);
        assert!(matches!(exit, TrapExit::Yield { .. }));
        assert_eq!(h.events(), vec![Event::Destroy(Harness::ENV)]);
        assert!(h.console.starts_with(
            "[00001001] user fault va 0000000000000010 ip 0000000000800020\nTRAP frame at "
        ));
        assert!(h.console.contains("  cr2  0x0000000000000010\n"));
        assert!(h.memory.records.is_empty());
    }

    #[test]
    fn unwritable_exception_stack_kills_without_writing() {
        let mut h = Harness::with_running_env();
        faulting_env(&mut h);
        h.memory.writable.clear();
        let mut tf = user_frame(T_PGFLT);
        let exit = h.dispatch(&mut tf);
        assert!(matches!(exit, TrapExit::Yield { .. }));
        assert!(h.memory.records.is_empty());
        let va = UXSTACKTOP - UTrapframe::SIZE;
        assert_eq!(
            h.events(),
            vec![
                Event::AssertWritable(va, UTrapframe::SIZE),
                Event::Destroy(Harness::ENV),
            ]
        );
        assert!(h.console.starts_with(&format!(
            "[00001001] user_mem_check assertion failure for va {:016x}\n[00001001] user fault va",
            va
        )));
    }

    #[test]
    fn exhausted_exception_stack_kills_without_asking_memory() {
        let mut h = Harness::with_running_env();
        faulting_env(&mut h);
        let mut tf = user_frame(T_PGFLT);
        tf.rsp = UXSTACKBOTTOM + 0x20;
        let exit = h.dispatch(&mut tf);
        assert!(matches!(exit, TrapExit::Yield { .. }));
        assert_eq!(h.events(), vec![Event::Destroy(Harness::ENV)]);
        assert!(h.memory.records.is_empty());
    }

    #[test]
    fn direct_entry_delivers_fault_for_environment_manager() {
        let mut h = Harness::with_running_env();
        faulting_env(&mut h);
        let mut tf = user_frame(T_PGFLT);
        h.envs.env.as_mut().unwrap().tf = tf;
        let held = h.lock.lock(Harness::CPU);

        let exit = h.page_fault(&mut tf, Some(held));
        match exit {
            TrapExit::Resume { env, lock: Some(lock) } => {
                assert_eq!(env, Harness::ENV);
                assert_eq!(lock.cpu(), Harness::CPU);
            }
            other => panic!("unexpected exit {other:?}"),
        }
        assert!(!h.lock.is_locked());
        assert_eq!(
            h.events(),
            vec![
                Event::AssertWritable(UXSTACKTOP - UTrapframe::SIZE, UTrapframe::SIZE),
                Event::WriteRecord(UXSTACKTOP - UTrapframe::SIZE),
            ]
        );
        assert_eq!(h.envs.env.as_ref().unwrap().tf.rip, UPCALL);
    }

    #[test]
    fn kernel_page_fault_halts_machine() {
        let mut h = Harness::kernel_only();
        h.machine.cr2.set(0x4000);
        let mut tf = user_frame(T_PGFLT);
        tf.cs = 0x08;
        let exit = h.dispatch(&mut tf);
        assert!(matches!(
            exit,
            TrapExit::Halt(FatalTrap::KernelPageFault { va: 0x4000, .. })
        ));
        assert!(h.states.machine_halted());
        assert!(h.console.contains("kernel mode page fault"));
    }

    #[test]
    fn kernel_page_fault_under_lock_keeps_it_held() {
        let mut h = Harness::with_running_env();
        let mut tf = user_frame(T_PGFLT);
        tf.cs = 0x08;
        let held = h.lock.lock(Harness::CPU);
        let exit = h.page_fault(&mut tf, Some(held));
        assert!(matches!(exit, TrapExit::Halt(FatalTrap::KernelPageFault { .. })));
        drop(exit);
        assert_eq!(h.lock.holder(), Some(Harness::CPU));
    }

    #[test]
    fn record_placement() {
        assert_eq!(fault_record_address(USTACKTOP), UXSTACKTOP - UTrapframe::SIZE);
        assert_eq!(
            fault_record_address(UXSTACKTOP - 8),
            UXSTACKTOP - 16 - UTrapframe::SIZE
        );
        assert!(record_fits(UXSTACKTOP - UTrapframe::SIZE));
        assert!(record_fits(UXSTACKBOTTOM));
        assert!(!record_fits(UXSTACKBOTTOM - 8));
        assert!(!record_fits(UXSTACKTOP - UTrapframe::SIZE + 8));
        assert!(!record_fits(u64::MAX - 4));
        assert_eq!(UXSTACKTOP - UXSTACKBOTTOM, PGSIZE);
    }
}
