use bit_field::BitField;
use bitflags::bitflags;

/// General register count. `r13` doubles as the stack pointer and `r15`
/// as the program counter; `r0..r3` carry the service-call arguments.
pub const NUM_REGS: usize = 16;

const SP: usize = 13;
const PC: usize = 15;

/// Byte size of a processor state as laid out in memory: 16 registers,
/// status, cause and the two time-of-day words.
pub const STATE_SIZE: u32 = (NUM_REGS as u32 + 4) * 4;

/// Exception code stored in the cause word when the kernel converts an
/// unprivileged service request into a program trap.
pub const EXC_RESERVED_INSTRUCTION: u32 = 10;

bitflags! {
    /// Processor status word bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u32 {
        /// Device and timer interrupts are delivered.
        const INT_ENABLED = 1 << 0;
        /// Privileged (kernel) mode.
        const SYS_MODE = 1 << 1;
        /// Address translation. The kernel runs with it off and never
        /// turns it on.
        const VM_ON = 1 << 2;
    }
}

/// A complete snapshot of the CPU, as the hardware saves it to the old
/// areas and the kernel hands it back for loading.
///
/// The kernel copies these whole and only ever inspects PC, SP, the four
/// argument registers, the status word and the cause word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessorState {
    pub regs: [u32; NUM_REGS],
    pub status: u32,
    pub cause: u32,
    pub tod_hi: u32,
    pub tod_lo: u32,
}

impl ProcessorState {
    pub fn pc(&self) -> u32 {
        self.regs[PC]
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.regs[PC] = pc;
    }

    pub fn sp(&self) -> u32 {
        self.regs[SP]
    }

    pub fn set_sp(&mut self, sp: u32) {
        self.regs[SP] = sp;
    }

    pub fn a1(&self) -> u32 {
        self.regs[0]
    }

    pub fn a2(&self) -> u32 {
        self.regs[1]
    }

    pub fn a3(&self) -> u32 {
        self.regs[2]
    }

    pub fn a4(&self) -> u32 {
        self.regs[3]
    }

    /// `a1` is also where results travel back to the caller.
    pub fn set_a1(&mut self, value: u32) {
        self.regs[0] = value;
    }

    pub fn set_a2(&mut self, value: u32) {
        self.regs[1] = value;
    }

    pub fn set_a3(&mut self, value: u32) {
        self.regs[2] = value;
    }

    pub fn set_a4(&mut self, value: u32) {
        self.regs[3] = value;
    }

    pub fn status_flags(&self) -> Status {
        Status::from_bits_truncate(self.status)
    }

    pub fn set_status(&mut self, status: Status) {
        self.status = status.bits();
    }

    pub fn is_privileged(&self) -> bool {
        self.status_flags().contains(Status::SYS_MODE)
    }

    /// Exception code, cause word bits 0..8.
    pub fn exc_code(&self) -> u32 {
        self.cause.get_bits(0..8)
    }

    pub fn set_exc_code(&mut self, code: u32) {
        self.cause.set_bits(0..8, code);
    }

    /// Pending interrupt lines, cause word bits 24..32. Bit `24 + line`
    /// is set iff that line is asserting.
    pub fn pending_lines(&self) -> u32 {
        self.cause.get_bits(24..32)
    }

    pub fn set_pending_line(&mut self, line: u32) {
        self.cause.set_bit(24 + line as usize, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_registers_alias_r0_to_r3() {
        let mut s = ProcessorState::default();
        s.set_a1(1);
        s.set_a2(2);
        s.set_a3(3);
        s.set_a4(4);
        assert_eq!(s.regs[..4], [1, 2, 3, 4]);
        assert_eq!((s.a1(), s.a2(), s.a3(), s.a4()), (1, 2, 3, 4));
    }

    #[test]
    fn status_round_trips_through_raw_word() {
        let mut s = ProcessorState::default();
        s.set_status(Status::SYS_MODE | Status::INT_ENABLED);
        assert!(s.is_privileged());
        assert!(s.status_flags().contains(Status::INT_ENABLED));
        assert!(!s.status_flags().contains(Status::VM_ON));
    }

    #[test]
    fn cause_word_carries_code_and_pending_lines() {
        let mut s = ProcessorState::default();
        s.set_exc_code(EXC_RESERVED_INSTRUCTION);
        s.set_pending_line(2);
        s.set_pending_line(7);
        assert_eq!(s.exc_code(), EXC_RESERVED_INSTRUCTION);
        assert_eq!(s.pending_lines(), (1 << 2) | (1 << 7));
    }
}
