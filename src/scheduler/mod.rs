pub mod asl;
pub mod pcb;

use crate::machine::{
    devices, Control, Machine, ProcessorState, Status, TrapKind, ENTRY_INTERRUPT, INT_NEW_AREA,
};
use asl::Asl;
use pcb::{PcbPool, Pid, ProcQueue};

/// Longest stretch of CPU a process may hold before preemption, in
/// microseconds.
pub const QUANTUM: u64 = 5_000;

/// Period of the pseudo-clock, in microseconds. Every `WAIT_CLOCK`
/// sleeper is released when it fires.
pub const INTERVAL: u64 = 100_000;

/// An invariant the kernel relies on does not hold. These are
/// programming errors; they stop the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelFault(pub &'static str);

/// All kernel state. One instance exists on the machine; tests build
/// their own.
///
/// Every mutation happens inside an exception or interrupt entry, which
/// the hardware enters with interrupts disabled, so nothing here needs
/// interior locking.
pub struct Kernel {
    pub pcbs: PcbPool,
    pub asl: Asl,
    /// PCBs outside the free pool.
    pub proc_count: usize,
    /// Processes blocked on a device or the pseudo-clock, i.e. waiting
    /// for an interrupt rather than another process.
    pub soft_block_count: usize,
    pub current: Option<Pid>,
    pub ready_queue: ProcQueue,
    /// Time-of-day value at which the pseudo-clock next fires.
    pub interval_deadline: u64,
    /// Time-of-day value when `current` last got the CPU.
    pub accounting_start: u64,
    /// Last status word seen from each device, buffered for waiters that
    /// arrive after the interrupt.
    pub device_status: [u32; devices::NUM_DEV_SEMS],
}

impl Kernel {
    pub fn new() -> Kernel {
        Kernel {
            pcbs: PcbPool::new(),
            asl: Asl::new(),
            proc_count: 0,
            soft_block_count: 0,
            current: None,
            ready_queue: ProcQueue::new(),
            interval_deadline: 0,
            accounting_start: 0,
            device_status: [0; devices::NUM_DEV_SEMS],
        }
    }

    /// Bring the machine up and launch the first process.
    ///
    /// Zeroes the device semaphores, publishes the four exception entry
    /// states, arms the pseudo-clock and dispatches `first`.
    pub fn boot(&mut self, m: &mut impl Machine, first: ProcessorState) -> Control {
        for idx in 0..devices::NUM_DEV_SEMS {
            m.write_word(devices::sem_addr(idx), 0);
        }

        let mut entry = ProcessorState::default();
        entry.set_sp(m.ram_top());
        entry.set_status(Status::SYS_MODE);
        entry.set_pc(ENTRY_INTERRUPT);
        m.write_state(INT_NEW_AREA, &entry);
        for kind in [TrapKind::Tlb, TrapKind::Program, TrapKind::Syscall] {
            entry.set_pc(kind.entry_pc());
            m.write_state(kind.new_area(), &entry);
        }

        self.interval_deadline = m.tod() + INTERVAL;

        let Some(p) = self.pcbs.alloc() else {
            return Control::Panic("pcb pool empty at boot");
        };
        self.pcbs[p].state = first;
        self.proc_count += 1;
        self.ready_queue.insert(&mut self.pcbs, p);
        crate::log_info!("kernel up, dispatching first process");
        self.schedule(m)
    }

    /// Hand the CPU to the next ready process, or decide what the idle
    /// machine does. The caller has already detached `current`.
    pub(crate) fn schedule(&mut self, m: &mut impl Machine) -> Control {
        debug_assert!(self.current.is_none());
        if let Some(p) = self.ready_queue.remove_head(&mut self.pcbs) {
            self.current = Some(p);
            let now = m.tod();
            self.accounting_start = now;
            // never let the quantum run past the pseudo-clock tick
            m.set_timer(QUANTUM.min(self.interval_deadline.saturating_sub(now)));
            return Control::Load(self.pcbs[p].state);
        }
        if self.proc_count == 0 {
            crate::log_info!("all processes finished, halting");
            Control::Halt
        } else if self.soft_block_count == 0 {
            crate::log_error!("deadlock with {} live processes", self.proc_count);
            Control::Panic("deadlock: live processes and no outstanding I/O")
        } else {
            // all runnable work is waiting on interrupts; sleep until one
            m.set_timer(self.interval_deadline.saturating_sub(m.tod()));
            Control::Wait
        }
    }

    /// Invariant violations become a machine panic at the entry-point
    /// boundary; everything beneath propagates them with `?`.
    pub(crate) fn settle(&self, result: Result<Control, KernelFault>) -> Control {
        match result {
            Ok(ctrl) => ctrl,
            Err(fault) => {
                crate::log_error!("kernel fault: {}", fault.0);
                Control::Panic(fault.0)
            }
        }
    }

    /// Charge the running process for the CPU it has held since it was
    /// dispatched. Called before it blocks, is preempted, or asks for
    /// its own accounting. Time spent blocked is never charged.
    pub(crate) fn update_time(&mut self, m: &impl Machine) {
        if let Some(p) = self.current {
            let now = m.tod();
            self.pcbs[p].cpu_time += now.saturating_sub(self.accounting_start);
            self.accounting_start = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::sem_read;
    use crate::test_utils::{kernel_state, TestMachine};

    #[test]
    fn boot_publishes_entry_states_and_dispatches() {
        let mut k = Kernel::new();
        let mut m = TestMachine::new();
        m.now = 700;

        let first = kernel_state(0x4000);
        let ctrl = k.boot(&mut m, first);

        assert_eq!(ctrl, Control::Load(first));
        assert_eq!(k.proc_count, 1);
        assert_eq!(k.interval_deadline, 700 + INTERVAL);
        assert_eq!(sem_read(&m, devices::sem_addr(devices::PSEUDO_CLOCK)), 0);

        let sys_entry = m.read_state(TrapKind::Syscall.new_area());
        assert_eq!(sys_entry.pc(), TrapKind::Syscall.entry_pc());
        assert_eq!(sys_entry.sp(), m.ram_top());
        assert_eq!(sys_entry.status_flags(), Status::SYS_MODE);
        let int_entry = m.read_state(INT_NEW_AREA);
        assert_eq!(int_entry.pc(), ENTRY_INTERRUPT);
    }

    #[test]
    fn dispatch_is_fifo_and_clamps_the_quantum() {
        let mut k = Kernel::new();
        let mut m = TestMachine::new();
        k.interval_deadline = INTERVAL;

        let a = k.pcbs.alloc().unwrap();
        let b = k.pcbs.alloc().unwrap();
        k.proc_count = 2;
        k.ready_queue.insert(&mut k.pcbs, a);
        k.ready_queue.insert(&mut k.pcbs, b);

        k.schedule(&mut m);
        assert_eq!(k.current, Some(a));
        assert_eq!(m.timer, Some(QUANTUM));

        // near the pseudo-clock tick the slice shrinks to what is left
        k.current = None;
        m.now = INTERVAL - 2_000;
        k.schedule(&mut m);
        assert_eq!(k.current, Some(b));
        assert_eq!(m.timer, Some(2_000));
    }

    #[test]
    fn empty_system_halts() {
        let mut k = Kernel::new();
        let mut m = TestMachine::new();
        assert_eq!(k.schedule(&mut m), Control::Halt);
    }

    #[test]
    fn stuck_processes_without_io_is_deadlock() {
        let mut k = Kernel::new();
        let mut m = TestMachine::new();
        k.proc_count = 1;
        assert!(matches!(k.schedule(&mut m), Control::Panic(_)));
    }

    #[test]
    fn outstanding_io_means_idle_wait() {
        let mut k = Kernel::new();
        let mut m = TestMachine::new();
        k.proc_count = 1;
        k.soft_block_count = 1;
        k.interval_deadline = 40_000;
        m.now = 10_000;
        assert_eq!(k.schedule(&mut m), Control::Wait);
        assert_eq!(m.timer, Some(30_000));
    }

    #[test]
    fn cpu_time_accrues_only_while_running() {
        let mut k = Kernel::new();
        let mut m = TestMachine::new();
        k.interval_deadline = INTERVAL;
        let a = k.pcbs.alloc().unwrap();
        k.proc_count = 1;
        k.ready_queue.insert(&mut k.pcbs, a);
        k.schedule(&mut m);

        m.advance(3_200);
        k.update_time(&m);
        assert_eq!(k.pcbs[a].cpu_time, 3_200);

        // a second update with no elapsed time adds nothing
        k.update_time(&m);
        assert_eq!(k.pcbs[a].cpu_time, 3_200);
    }
}
