//! Device and timer interrupt handling.
//!
//! One entry services the single highest-priority asserted line: lower
//! line numbers win, and within a line the lowest asserting device wins.

use bit_field::BitField;

use crate::machine::{
    devices, sem_read, sem_write, Control, Machine, INT_OLD_AREA, PC_PREFETCH,
};
use crate::scheduler::{Kernel, KernelFault, INTERVAL, QUANTUM};

/// Lines 0 and 1 belong to multiprocessor signalling, which this kernel
/// does not do.
const FIRST_SUPPORTED_LINE: u32 = 2;
const TIMER_LINE: u32 = 2;

impl Kernel {
    /// Interrupt entry point.
    pub fn on_interrupt(&mut self, m: &mut impl Machine) -> Control {
        let result = self.interrupt_dispatch(m);
        self.settle(result)
    }

    fn interrupt_dispatch(&mut self, m: &mut impl Machine) -> Result<Control, KernelFault> {
        let mut old = m.read_state(INT_OLD_AREA);

        let pending = old.pending_lines();
        if pending == 0 {
            return Err(KernelFault("interrupt with no asserted line"));
        }
        let line = pending.trailing_zeros();
        if line < FIRST_SUPPORTED_LINE {
            return Err(KernelFault("multiprocessor interrupt lines are unsupported"));
        }

        // step the PC back so the interrupted instruction re-executes
        old.set_pc(old.pc().wrapping_sub(PC_PREFETCH));

        if let Some(cur) = self.current {
            self.update_time(m);
            self.pcbs[cur].state = old;
        }

        if line == TIMER_LINE {
            return self.timer_interrupt(m);
        }
        self.device_interrupt(m, line)?;
        self.resume_or_schedule(m)
    }

    fn resume_or_schedule(&mut self, m: &mut impl Machine) -> Result<Control, KernelFault> {
        match self.current {
            Some(cur) => Ok(Control::Load(self.pcbs[cur].state)),
            None => Ok(self.schedule(m)),
        }
    }

    /// Line 2 serves both timers. At or past the interval deadline it is
    /// the pseudo-clock; otherwise the running process's slice is up.
    fn timer_interrupt(&mut self, m: &mut impl Machine) -> Result<Control, KernelFault> {
        let now = m.tod();
        if now >= self.interval_deadline {
            // pseudo-clock tick: release every sleeper and start over
            let clock = devices::sem_addr(devices::PSEUDO_CLOCK);
            while let Some(p) = self.asl.remove_blocked(&mut self.pcbs, clock) {
                self.ready_queue.insert(&mut self.pcbs, p);
                self.soft_block_count -= 1;
            }
            sem_write(m, clock, 0);
            self.interval_deadline = now + INTERVAL;

            if let Some(cur) = self.current {
                m.set_timer(QUANTUM.min(self.interval_deadline.saturating_sub(now)));
                return Ok(Control::Load(self.pcbs[cur].state));
            }
            return Ok(self.schedule(m));
        }

        // end of quantum: back of the line
        if let Some(cur) = self.current.take() {
            self.ready_queue.insert(&mut self.pcbs, cur);
        }
        Ok(self.schedule(m))
    }

    /// Lines 3..6: one register block per device, one semaphore each.
    fn device_interrupt(&mut self, m: &mut impl Machine, line: u32) -> Result<(), KernelFault> {
        let dev = self.asserting_device(m, line)?;
        let base = devices::reg_base(line, dev);
        if line == devices::TERM_LINE {
            return self.terminal_interrupt(m, dev, base);
        }
        let status = m.read_word(base + devices::REG_STATUS);
        let idx = devices::device_index(line, dev);
        self.signal_device(m, idx, status, base + devices::REG_COMMAND);
        Ok(())
    }

    /// Line 7: a terminal is two subdevices behind one register block.
    /// A ready receive status means incoming data; anything else is the
    /// transmitter finishing.
    fn terminal_interrupt(
        &mut self,
        m: &mut impl Machine,
        dev: u32,
        base: u32,
    ) -> Result<(), KernelFault> {
        let idx = devices::device_index(devices::TERM_LINE, dev);
        let recv_status = m.read_word(base + devices::REG_RECV_STATUS);
        if recv_status.get_bits(0..8) == devices::STATUS_READY {
            self.signal_device(m, idx, recv_status, base + devices::REG_RECV_COMMAND);
        } else {
            let transm_status = m.read_word(base + devices::REG_TRANSM_STATUS);
            self.signal_device(
                m,
                idx + devices::DEVS_PER_LINE,
                transm_status,
                base + devices::REG_TRANSM_COMMAND,
            );
        }
        Ok(())
    }

    fn asserting_device(&self, m: &impl Machine, line: u32) -> Result<u32, KernelFault> {
        let bitmap = m.read_word(devices::pending_bitmap(line));
        if bitmap == 0 {
            return Err(KernelFault("device interrupt with empty pending bitmap"));
        }
        Ok(bitmap.trailing_zeros())
    }

    /// Signal the device's semaphore and acknowledge the interrupt. A
    /// waiter gets the status word in `a1` and a place in the ready
    /// queue; with nobody waiting (never asked, or terminated while
    /// blocked) the status is buffered for the next caller.
    fn signal_device(&mut self, m: &mut impl Machine, idx: usize, status: u32, command_addr: u32) {
        let addr = devices::sem_addr(idx);
        let value = sem_read(m, addr) + 1;
        sem_write(m, addr, value);
        let waiter = if value <= 0 {
            self.asl.remove_blocked(&mut self.pcbs, addr)
        } else {
            None
        };
        match waiter {
            Some(p) => {
                self.soft_block_count -= 1;
                self.pcbs[p].state.set_a1(status);
                self.ready_queue.insert(&mut self.pcbs, p);
            }
            None => self.device_status[idx] = status,
        }
        m.write_word(command_addr, devices::CMD_ACK);
    }
}
