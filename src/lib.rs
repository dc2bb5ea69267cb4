//! A preemptive multi-process kernel for a single-CPU emulated machine.
//!
//! The kernel multiplexes a fixed pool of processes round-robin, offers
//! eight services (process creation and termination, counting
//! semaphores, I/O and clock waits, CPU accounting, trap-handler
//! registration), services device interrupts and the pseudo-clock, and
//! detects system-wide completion and deadlock.
//!
//! The emulator drives the four entry points below whenever its CPU
//! takes an exception, and acts on the [`machine::Control`] each one
//! returns.

#![cfg_attr(not(test), no_std)]

pub mod console;
pub mod interrupts;
pub mod machine;
pub mod scheduler;
pub mod syscalls;
#[cfg(test)]
pub mod test_utils;

use lazy_static::lazy_static;
use spin::Mutex;

use machine::{Control, Machine, ProcessorState};
use scheduler::Kernel;

lazy_static! {
    /// The kernel instance the emulator drives. Exceptions arrive with
    /// interrupts disabled, so the lock is never contended; it exists to
    /// make the static safe to reach from anywhere.
    pub static ref KERNEL: Mutex<Kernel> = Mutex::new(Kernel::new());
}

/// Initialize the machine and dispatch the first process.
pub fn boot(m: &mut impl Machine, first: ProcessorState) -> Control {
    console::init();
    KERNEL.lock().boot(m, first)
}

/// Entry for the syscall new-area vector.
pub fn syscall(m: &mut impl Machine) -> Control {
    KERNEL.lock().on_syscall(m)
}

/// Entry for the interrupt new-area vector.
pub fn interrupt(m: &mut impl Machine) -> Control {
    KERNEL.lock().on_interrupt(m)
}

/// Entry for the program-trap new-area vector.
pub fn program_trap(m: &mut impl Machine) -> Control {
    KERNEL.lock().on_program_trap(m)
}

/// Entry for the TLB-trap new-area vector.
pub fn tlb_trap(m: &mut impl Machine) -> Control {
    KERNEL.lock().on_tlb_trap(m)
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    crate::log_error!("{}", info);
    loop {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{do_syscall, kernel_state, syscall_state, TestMachine};

    /// The one test that exercises the shared static; everything else
    /// builds its own kernel.
    #[test]
    fn global_instance_boots_and_serves() {
        let mut m = TestMachine::new();
        let ctrl = boot(&mut m, kernel_state(0x4000));
        assert!(matches!(ctrl, Control::Load(_)));

        let mut k = KERNEL.lock();
        assert_eq!(k.proc_count, 1);
        let ctrl = do_syscall(&mut k, &mut m, syscall_state(syscalls::SYS_TERMINATE, 0, 0, 0));
        assert_eq!(ctrl, Control::Halt);
        assert_eq!(k.proc_count, 0);
    }
}
