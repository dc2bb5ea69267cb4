//! Shared test fixtures: a plain-RAM machine and builders for the states
//! and exception deliveries the scenario tests keep repeating.

#![allow(dead_code)]

use crate::machine::{devices, Control, Machine, ProcessorState, Status, TrapKind, INT_OLD_AREA};
use crate::scheduler::Kernel;

/// Backing RAM for the mock machine.
pub const RAM_BYTES: usize = 0x20000;

/// Open address range the tests use for semaphores and staged states.
pub const SCRATCH: u32 = 0x8000;

/// A machine that is nothing but RAM, a settable clock and a recorded
/// timer. Words are little-endian.
pub struct TestMachine {
    pub ram: Vec<u8>,
    pub now: u64,
    /// Value of the most recent `set_timer` call.
    pub timer: Option<u64>,
}

impl TestMachine {
    pub fn new() -> TestMachine {
        TestMachine { ram: vec![0; RAM_BYTES], now: 0, timer: None }
    }

    pub fn advance(&mut self, usec: u64) {
        self.now += usec;
    }

    /// Put `status` in the status register of (line, dev).
    pub fn set_device_status(&mut self, line: u32, dev: u32, status: u32) {
        self.write_word(devices::reg_base(line, dev) + devices::REG_STATUS, status);
    }

    /// Mark device `dev` as asserting on `line`'s pending bitmap.
    pub fn assert_pending(&mut self, line: u32, dev: u32) {
        let addr = devices::pending_bitmap(line);
        let word = self.read_word(addr) | (1 << dev);
        self.write_word(addr, word);
    }
}

impl Machine for TestMachine {
    fn tod(&self) -> u64 {
        self.now
    }

    fn set_timer(&mut self, usec: u64) {
        self.timer = Some(usec);
    }

    fn read_word(&self, addr: u32) -> u32 {
        let a = addr as usize;
        u32::from_le_bytes(self.ram[a..a + 4].try_into().unwrap())
    }

    fn write_word(&mut self, addr: u32, value: u32) {
        let a = addr as usize;
        self.ram[a..a + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn ram_top(&self) -> u32 {
        RAM_BYTES as u32
    }
}

/// A privileged state with interrupts on, the way workload processes run.
pub fn kernel_state(pc: u32) -> ProcessorState {
    let mut s = ProcessorState::default();
    s.set_pc(pc);
    s.set_sp(SCRATCH - 0x100);
    s.set_status(Status::SYS_MODE | Status::INT_ENABLED);
    s
}

/// An unprivileged state, for exercising the mode check.
pub fn user_state(pc: u32) -> ProcessorState {
    let mut s = kernel_state(pc);
    s.set_status(Status::INT_ENABLED);
    s
}

/// A privileged caller state carrying a service request.
pub fn syscall_state(num: u32, a2: u32, a3: u32, a4: u32) -> ProcessorState {
    let mut s = kernel_state(0x3000);
    s.set_a1(num);
    s.set_a2(a2);
    s.set_a3(a3);
    s.set_a4(a4);
    s
}

/// Deliver `caller` as a service call: park it in the syscall old area
/// and enter the kernel, the way the hardware does.
pub fn do_syscall(k: &mut Kernel, m: &mut TestMachine, caller: ProcessorState) -> Control {
    m.write_state(TrapKind::Syscall.old_area(), &caller);
    k.on_syscall(m)
}

/// Raise an interrupt on `line`. The interrupted state is whatever the
/// running process saved last, or a throwaway when the CPU was idle.
pub fn raise_interrupt(k: &mut Kernel, m: &mut TestMachine, line: u32) -> Control {
    let mut old = match k.current {
        Some(p) => k.pcbs[p].state,
        None => kernel_state(0x3000),
    };
    old.set_pending_line(line);
    m.write_state(INT_OLD_AREA, &old);
    k.on_interrupt(m)
}

/// Complete an operation on (line, dev): post `status`, assert the
/// pending bit and raise the line.
pub fn raise_device_interrupt(
    k: &mut Kernel,
    m: &mut TestMachine,
    line: u32,
    dev: u32,
    status: u32,
) -> Control {
    m.set_device_status(line, dev, status);
    m.assert_pending(line, dev);
    raise_interrupt(k, m, line)
}

/// End the running process's quantum. Callers keep `now` short of the
/// interval deadline, so this is never mistaken for the pseudo-clock.
pub fn preempt(k: &mut Kernel, m: &mut TestMachine) -> Control {
    assert!(m.now < k.interval_deadline);
    raise_interrupt(k, m, 2)
}

/// Check one register of (line, dev).
pub fn assert_device(m: &TestMachine, line: u32, dev: u32, reg: u32, expected: u32) {
    assert_eq!(m.read_word(devices::reg_base(line, dev) + reg), expected);
}
