//! Kernel service calls and trap handling.
//!
//! The hardware saves the faulting state to the old area for the trap
//! kind and enters the kernel in privileged mode with interrupts off.
//! Every entry here answers with a [`Control`] for the emulator.

use arrayvec::ArrayVec;

use crate::machine::{
    self, devices, sem_read, sem_write, Control, Machine, Status, TrapKind,
};
use crate::scheduler::pcb::{Pid, TrapVector, MAXPROC};
use crate::scheduler::{Kernel, KernelFault};

/// Service numbers (passed in `a1` by the caller).
pub const SYS_CREATE: u32 = 1;
pub const SYS_TERMINATE: u32 = 2;
pub const SYS_SEM_SIGNAL: u32 = 3;
pub const SYS_SEM_WAIT: u32 = 4;
pub const SYS_SET_TRAP_VEC: u32 = 5;
pub const SYS_GET_CPU_TIME: u32 = 6;
pub const SYS_WAIT_CLOCK: u32 = 7;
pub const SYS_WAIT_IO: u32 = 8;

/// Answer in `a1` when a resource pool is exhausted.
const ERR_NO_RESOURCE: u32 = u32::MAX;

impl Kernel {
    /// Service-call entry point.
    pub fn on_syscall(&mut self, m: &mut impl Machine) -> Control {
        let result = self.syscall_dispatch(m);
        self.settle(result)
    }

    /// Program trap entry point.
    pub fn on_program_trap(&mut self, m: &mut impl Machine) -> Control {
        let result = self.pass_up_or_die(m, TrapKind::Program);
        self.settle(result)
    }

    /// TLB trap entry point.
    pub fn on_tlb_trap(&mut self, m: &mut impl Machine) -> Control {
        let result = self.pass_up_or_die(m, TrapKind::Tlb);
        self.settle(result)
    }

    fn syscall_dispatch(&mut self, m: &mut impl Machine) -> Result<Control, KernelFault> {
        let old = m.read_state(TrapKind::Syscall.old_area());
        let cur = self.current.ok_or(KernelFault("service call with no running process"))?;
        self.pcbs[cur].state = old;

        let num = old.a1();
        if !(SYS_CREATE..=SYS_WAIT_IO).contains(&num) {
            // not ours; reflect it to the process or kill it
            return self.pass_up_or_die(m, TrapKind::Syscall);
        }
        if !old.status_flags().contains(Status::SYS_MODE) {
            // privileged service from user mode becomes a program trap
            let mut pgm = old;
            pgm.set_exc_code(machine::state::EXC_RESERVED_INSTRUCTION);
            m.write_state(TrapKind::Program.old_area(), &pgm);
            return self.pass_up_or_die(m, TrapKind::Program);
        }

        match num {
            SYS_CREATE => self.sys_create(m, cur),
            SYS_TERMINATE => self.terminate_tree(m),
            SYS_SEM_SIGNAL => self.sys_sem_signal(m, cur),
            SYS_SEM_WAIT => self.sys_sem_wait(m, cur),
            SYS_SET_TRAP_VEC => self.sys_set_trap_vec(m, cur),
            SYS_GET_CPU_TIME => self.sys_get_cpu_time(m, cur),
            SYS_WAIT_CLOCK => self.sys_wait_clock(m, cur),
            SYS_WAIT_IO => self.sys_wait_io(m, cur),
            _ => Err(KernelFault("service number slipped the range check")),
        }
    }

    /// If the process registered a handler for this trap kind, reflect
    /// the saved state up to it; otherwise the whole tree dies.
    pub(crate) fn pass_up_or_die(
        &mut self,
        m: &mut impl Machine,
        kind: TrapKind,
    ) -> Result<Control, KernelFault> {
        let cur = self.current.ok_or(KernelFault("trap with no running process"))?;
        match self.pcbs[cur].vectors[kind.index()] {
            Some(vec) => {
                let old = m.read_state(kind.old_area());
                m.write_state(vec.old_area, &old);
                let handler = m.read_state(vec.new_area);
                self.pcbs[cur].state = handler;
                Ok(Control::Load(handler))
            }
            None => self.terminate_tree(m),
        }
    }

    /// SYS 1: carve a PCB out of the pool, copy the caller-provided
    /// state into it and make it the caller's newest ready child.
    /// Answers 0 in `a1`, or -1 when the pool is dry.
    fn sys_create(&mut self, m: &mut impl Machine, cur: Pid) -> Result<Control, KernelFault> {
        let state_ptr = self.pcbs[cur].state.a2();
        match self.pcbs.alloc() {
            Some(child) => {
                self.pcbs[child].state = m.read_state(state_ptr);
                self.pcbs.insert_child(cur, child);
                self.ready_queue.insert(&mut self.pcbs, child);
                self.proc_count += 1;
                self.pcbs[cur].state.set_a1(0);
            }
            None => {
                self.pcbs[cur].state.set_a1(ERR_NO_RESOURCE);
            }
        }
        Ok(Control::Load(self.pcbs[cur].state))
    }

    /// SYS 2 (and the "die" half of pass up or die): tear down the
    /// running process and every descendant, children before parents,
    /// then let the scheduler pick whoever is next.
    pub(crate) fn terminate_tree(&mut self, m: &mut impl Machine) -> Result<Control, KernelFault> {
        let root = self.current.ok_or(KernelFault("terminate with no running process"))?;
        let mut path: ArrayVec<Pid, MAXPROC> = ArrayVec::new();
        path.push(root);
        while let Some(&top) = path.last() {
            if let Some(child) = self.pcbs[top].first_child {
                path.push(child);
                continue;
            }
            path.pop();
            self.reap(m, root, top)?;
        }
        Ok(self.schedule(m))
    }

    /// Retire one childless member of the dying tree.
    fn reap(&mut self, m: &mut impl Machine, root: Pid, p: Pid) -> Result<(), KernelFault> {
        if p == root {
            // the root is the running process; unhook it from its
            // surviving parent (a boot process has none)
            self.pcbs.remove_from_siblings(p);
            self.current = None;
        } else {
            let parent = self.pcbs[p].parent.ok_or(KernelFault("process tree corrupt"))?;
            let detached = self.pcbs.remove_first_child(parent);
            debug_assert_eq!(detached, Some(p));
            if self.ready_queue.remove(&mut self.pcbs, p).is_none() {
                if let Some(addr) = self.pcbs[p].sem_addr {
                    self.asl
                        .out_blocked(&mut self.pcbs, p)
                        .ok_or(KernelFault("blocked process missing from semaphore queue"))?;
                    if devices::is_device_sem(addr) {
                        // its interrupt will arrive with nobody waiting;
                        // the status gets cached instead
                        self.soft_block_count -= 1;
                    } else {
                        // one waiter fewer on a plain semaphore
                        sem_write(m, addr, sem_read(m, addr) + 1);
                    }
                }
            }
        }
        self.pcbs.free(p);
        self.proc_count -= 1;
        Ok(())
    }

    /// SYS 3: signal (V). Wakes the longest-waiting process when the
    /// count stays at or below zero.
    fn sys_sem_signal(&mut self, m: &mut impl Machine, cur: Pid) -> Result<Control, KernelFault> {
        let addr = self.pcbs[cur].state.a2();
        let value = sem_read(m, addr) + 1;
        sem_write(m, addr, value);
        if value <= 0 {
            let p = self
                .asl
                .remove_blocked(&mut self.pcbs, addr)
                .ok_or(KernelFault("semaphore signal found no blocked process"))?;
            self.ready_queue.insert(&mut self.pcbs, p);
        }
        Ok(Control::Load(self.pcbs[cur].state))
    }

    /// SYS 4: wait (P). A negative count blocks the caller behind
    /// everyone already queued on the semaphore.
    fn sys_sem_wait(&mut self, m: &mut impl Machine, cur: Pid) -> Result<Control, KernelFault> {
        let addr = self.pcbs[cur].state.a2();
        let value = sem_read(m, addr) - 1;
        sem_write(m, addr, value);
        if value < 0 {
            self.update_time(m);
            self.asl
                .insert_blocked(&mut self.pcbs, addr, cur)
                .map_err(|_| KernelFault("semaphore descriptor pool exhausted"))?;
            self.current = None;
            return Ok(self.schedule(m));
        }
        Ok(Control::Load(self.pcbs[cur].state))
    }

    /// SYS 5: register where one kind of trap should be reflected.
    /// A second registration for the same kind, or a bogus kind, costs
    /// the process its life.
    fn sys_set_trap_vec(&mut self, m: &mut impl Machine, cur: Pid) -> Result<Control, KernelFault> {
        let state = self.pcbs[cur].state;
        let Some(kind) = TrapKind::from_index(state.a2()) else {
            return self.terminate_tree(m);
        };
        if self.pcbs[cur].vectors[kind.index()].is_some() {
            return self.terminate_tree(m);
        }
        self.pcbs[cur].vectors[kind.index()] =
            Some(TrapVector { old_area: state.a3(), new_area: state.a4() });
        Ok(Control::Load(self.pcbs[cur].state))
    }

    /// SYS 6: microseconds of CPU this process has consumed, in `a1`.
    fn sys_get_cpu_time(&mut self, m: &mut impl Machine, cur: Pid) -> Result<Control, KernelFault> {
        self.update_time(m);
        let t = self.pcbs[cur].cpu_time as u32;
        self.pcbs[cur].state.set_a1(t);
        Ok(Control::Load(self.pcbs[cur].state))
    }

    /// SYS 7: sleep until the pseudo-clock next fires. Nothing but the
    /// interval handler ever signals this semaphore, so the caller must
    /// end up blocked.
    fn sys_wait_clock(&mut self, m: &mut impl Machine, cur: Pid) -> Result<Control, KernelFault> {
        let addr = devices::sem_addr(devices::PSEUDO_CLOCK);
        let value = sem_read(m, addr) - 1;
        sem_write(m, addr, value);
        if value >= 0 {
            return Err(KernelFault("pseudo-clock semaphore failed to block its caller"));
        }
        self.update_time(m);
        self.asl
            .insert_blocked(&mut self.pcbs, addr, cur)
            .map_err(|_| KernelFault("semaphore descriptor pool exhausted"))?;
        self.soft_block_count += 1;
        self.current = None;
        Ok(self.schedule(m))
    }

    /// SYS 8: wait for an I/O completion on (line, device). If the
    /// interrupt already came, the buffered status answers immediately.
    fn sys_wait_io(&mut self, m: &mut impl Machine, cur: Pid) -> Result<Control, KernelFault> {
        let state = self.pcbs[cur].state;
        let (line, dev) = (state.a2(), state.a3());
        let wait_for_read = state.a4() != 0;
        if !(devices::FIRST_DEV_LINE..=devices::TERM_LINE).contains(&line)
            || dev >= devices::DEVS_PER_LINE as u32
        {
            // garbage coordinates kill the caller, never the kernel
            return self.terminate_tree(m);
        }
        let mut idx = devices::device_index(line, dev);
        if line == devices::TERM_LINE && !wait_for_read {
            idx += devices::DEVS_PER_LINE;
        }

        let addr = devices::sem_addr(idx);
        let value = sem_read(m, addr) - 1;
        sem_write(m, addr, value);
        if value < 0 {
            self.update_time(m);
            self.asl
                .insert_blocked(&mut self.pcbs, addr, cur)
                .map_err(|_| KernelFault("semaphore descriptor pool exhausted"))?;
            self.soft_block_count += 1;
            self.current = None;
            return Ok(self.schedule(m));
        }
        self.pcbs[cur].state.set_a1(self.device_status[idx]);
        Ok(Control::Load(self.pcbs[cur].state))
    }
}
