//! Recording doubles for the machine and the kernel services.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use trapgate_abi::memlayout::{USTACKTOP, UXSTACKBOTTOM, UXSTACKTOP};
use trapgate_abi::{
    EnvId, EnvStatus, GdtDescriptor, IdtDescriptor, PteFlags, SegmentSelector, Trapframe,
    UTrapframe,
};
use trapgate_lib::percpu::CpuId;
use trapgate_lib::{KernelLock, KernelLockHeld, Machine};

use crate::coordinator::CpuStates;
use crate::env::Env;
use crate::services::{
    Collaborators, Debugger, EnvManager, InterruptController, SyscallTable, UserMemory,
};
use crate::trap::{TrapDispatcher, TrapExit};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MachineCall {
    LoadGdt(GdtDescriptor),
    LoadTaskRegister(SegmentSelector),
    LoadIdt(IdtDescriptor),
}

pub struct MockMachine {
    pub cpu: CpuId,
    pub interrupts: Cell<bool>,
    pub cr2: Cell<u64>,
    calls: RefCell<Vec<MachineCall>>,
}

impl MockMachine {
    pub fn on_cpu(cpu: usize) -> Self {
        Self {
            cpu: CpuId(cpu),
            interrupts: Cell::new(false),
            cr2: Cell::new(0),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<MachineCall> {
        self.calls.borrow().clone()
    }
}

impl Machine for MockMachine {
    fn cpu_id(&self) -> CpuId {
        self.cpu
    }

    fn interrupts_enabled(&self) -> bool {
        self.interrupts.get()
    }

    fn fault_address(&self) -> u64 {
        self.cr2.get()
    }

    fn load_gdt(&self, descriptor: &GdtDescriptor) {
        self.calls.borrow_mut().push(MachineCall::LoadGdt(*descriptor));
    }

    fn load_task_register(&self, selector: SegmentSelector) {
        self.calls
            .borrow_mut()
            .push(MachineCall::LoadTaskRegister(selector));
    }

    fn load_idt(&self, descriptor: &IdtDescriptor) {
        self.calls.borrow_mut().push(MachineCall::LoadIdt(*descriptor));
    }
}

/// Service calls, in the order the dispatcher made them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Syscall(u64, [u64; 5]),
    Eoi,
    Debugger(u64),
    Reclaim(EnvId),
    ClearCurrent,
    Destroy(EnvId),
    AssertWritable(u64, u64),
    WriteRecord(u64),
}

type EventLog = Rc<RefCell<Vec<Event>>>;

pub struct MockEnvs {
    pub env: Option<Env>,
    log: EventLog,
}

impl EnvManager for MockEnvs {
    fn current(&mut self) -> Option<&mut Env> {
        self.env.as_mut()
    }

    fn clear_current(&mut self) {
        self.log.borrow_mut().push(Event::ClearCurrent);
        self.env = None;
    }

    fn reclaim(&mut self, id: EnvId) {
        self.log.borrow_mut().push(Event::Reclaim(id));
        if let Some(env) = self.env.as_mut() {
            env.status = EnvStatus::Free;
        }
    }

    fn destroy(&mut self, id: EnvId) {
        self.log.borrow_mut().push(Event::Destroy(id));
        if self.env.as_ref().is_some_and(|env| env.id == id) {
            self.env = None;
        }
    }
}

pub struct MockSyscalls {
    pub result: i64,
    log: EventLog,
}

impl SyscallTable for MockSyscalls {
    fn invoke(&mut self, num: u64, args: [u64; 5]) -> i64 {
        self.log.borrow_mut().push(Event::Syscall(num, args));
        self.result
    }
}

/// User memory with explicit writable ranges and a record store.
pub struct MockMemory {
    pub writable: Vec<(u64, u64)>,
    pub records: BTreeMap<u64, UTrapframe>,
    log: EventLog,
}

impl UserMemory for MockMemory {
    fn assert_writable(&mut self, _env: &Env, va: u64, len: u64, perm: PteFlags) -> bool {
        self.log.borrow_mut().push(Event::AssertWritable(va, len));
        assert!(perm.contains(PteFlags::USER | PteFlags::WRITABLE));
        self.writable
            .iter()
            .any(|&(lo, hi)| va >= lo && va.checked_add(len).is_some_and(|end| end <= hi))
    }

    fn write_fault_record(&mut self, _env: &Env, va: u64, record: &UTrapframe) {
        self.log.borrow_mut().push(Event::WriteRecord(va));
        self.records.insert(va, *record);
    }
}

pub struct MockIrq {
    log: EventLog,
}

impl InterruptController for MockIrq {
    fn eoi(&mut self) {
        self.log.borrow_mut().push(Event::Eoi);
    }
}

pub struct MockDebugger {
    log: EventLog,
}

impl Debugger for MockDebugger {
    fn enter(&mut self, tf: &mut Trapframe) {
        self.log.borrow_mut().push(Event::Debugger(tf.trapno));
    }
}

/// One CPU, one environment slot, and every service mocked.
///
/// Machine, lock and CPU state are leaked so trap exits (which may carry the
/// lock) do not borrow the harness.
pub struct Harness {
    pub machine: &'static MockMachine,
    pub lock: &'static KernelLock,
    pub states: &'static CpuStates,
    pub envs: MockEnvs,
    pub syscalls: MockSyscalls,
    pub memory: MockMemory,
    pub irq: MockIrq,
    pub debugger: MockDebugger,
    pub console: String,
    log: EventLog,
}

impl Harness {
    pub const CPU: CpuId = CpuId(0);
    pub const ENV: EnvId = EnvId(0x1001);

    pub fn kernel_only() -> Self {
        let log: EventLog = Rc::new(RefCell::new(Vec::new()));
        Self {
            machine: Box::leak(Box::new(MockMachine::on_cpu(Self::CPU.0))),
            lock: Box::leak(Box::new(KernelLock::new())),
            states: Box::leak(Box::new(CpuStates::new())),
            envs: MockEnvs {
                env: None,
                log: Rc::clone(&log),
            },
            syscalls: MockSyscalls {
                result: 0,
                log: Rc::clone(&log),
            },
            memory: MockMemory {
                writable: vec![(UXSTACKBOTTOM, UXSTACKTOP)],
                records: BTreeMap::new(),
                log: Rc::clone(&log),
            },
            irq: MockIrq {
                log: Rc::clone(&log),
            },
            debugger: MockDebugger {
                log: Rc::clone(&log),
            },
            console: String::new(),
            log,
        }
    }

    pub fn with_running_env() -> Self {
        let mut h = Self::kernel_only();
        let mut env = Env::new(Self::ENV);
        env.status = EnvStatus::Running;
        h.envs.env = Some(env);
        h
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.borrow().clone()
    }

    fn services(&mut self) -> Collaborators<'_> {
        Collaborators {
            envs: &mut self.envs,
            syscalls: &mut self.syscalls,
            memory: &mut self.memory,
            irq: &mut self.irq,
            debugger: &mut self.debugger,
            console: &mut self.console,
        }
    }

    pub fn dispatch(&mut self, tf: &mut Trapframe) -> TrapExit<'static> {
        let dispatcher = TrapDispatcher::new(self.machine, self.lock, self.states);
        dispatcher.dispatch(tf, &mut self.services())
    }

    pub fn page_fault(
        &mut self,
        tf: &mut Trapframe,
        held: Option<KernelLockHeld<'static>>,
    ) -> TrapExit<'static> {
        let dispatcher = TrapDispatcher::new(self.machine, self.lock, self.states);
        dispatcher.page_fault(tf, &mut self.services(), held)
    }
}

/// A trap frame as the entry stub would build it for user code.
pub fn user_frame(trapno: u64) -> Trapframe {
    Trapframe {
        trapno,
        rip: 0x80_0020,
        cs: SegmentSelector::USER_CODE.bits() as u64,
        ss: SegmentSelector::USER_DATA.bits() as u64,
        es: SegmentSelector::USER_DATA.bits() as u64,
        ds: SegmentSelector::USER_DATA.bits() as u64,
        rflags: 0x202,
        rsp: USTACKTOP - 0x40,
        ..Default::default()
    }
}
