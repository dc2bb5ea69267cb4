//! Memory map of the device interface: semaphore words, pending-interrupt
//! bitmaps and register blocks for the five peripheral lines.

/// Interrupt lines 3..7 carry disk, tape, network, printer and terminal
/// devices, eight devices per line.
pub const FIRST_DEV_LINE: u32 = 3;
pub const TERM_LINE: u32 = 7;
pub const DEVS_PER_LINE: usize = 8;

/// One semaphore per device, two per terminal (receive then transmit),
/// plus the pseudo-clock at the end.
pub const NUM_DEV_SEMS: usize = 49;
pub const PSEUDO_CLOCK: usize = 48;

/// The 49 device semaphore words live in kernel-reserved RAM so that every
/// semaphore the kernel touches is an integer at an address.
pub const DEV_SEM_BASE: u32 = 0x100;

/// One pending-interrupt bitmap word per line 3..7. Bit `i` is set iff
/// device `i` on that line is asserting.
pub const PENDING_BITMAP_BASE: u32 = 0x200;

/// Register blocks, 16 bytes per device, 40 devices (a terminal's block
/// serves both subdevices).
pub const DEV_REG_BASE: u32 = 0x240;
pub const DEV_REG_SIZE: u32 = 16;

// Non-terminal register block layout.
pub const REG_STATUS: u32 = 0;
pub const REG_COMMAND: u32 = 4;
pub const REG_DATA0: u32 = 8;
pub const REG_DATA1: u32 = 12;

// Terminal register block layout.
pub const REG_RECV_STATUS: u32 = 0;
pub const REG_RECV_COMMAND: u32 = 4;
pub const REG_TRANSM_STATUS: u32 = 8;
pub const REG_TRANSM_COMMAND: u32 = 12;

/// Written to a command register to acknowledge a completed operation.
pub const CMD_ACK: u32 = 1;

/// Low status byte of a terminal subdevice that has completed.
pub const STATUS_READY: u32 = 1;

/// Semaphore index of device `dev` on `line`. Terminal transmit indices
/// sit a further `DEVS_PER_LINE` above the receive indices.
pub fn device_index(line: u32, dev: u32) -> usize {
    DEVS_PER_LINE * (line - FIRST_DEV_LINE) as usize + dev as usize
}

/// Address of the semaphore word for device index `idx` (0..49).
pub fn sem_addr(idx: usize) -> u32 {
    DEV_SEM_BASE + 4 * idx as u32
}

/// Whether `addr` falls inside the device semaphore array. Processes
/// blocked there are waiting on an interrupt, not on another process.
pub fn is_device_sem(addr: u32) -> bool {
    addr >= DEV_SEM_BASE && addr < DEV_SEM_BASE + 4 * NUM_DEV_SEMS as u32 && addr % 4 == 0
}

/// Address of the pending-interrupt bitmap word for `line` (3..7).
pub fn pending_bitmap(line: u32) -> u32 {
    PENDING_BITMAP_BASE + 4 * (line - FIRST_DEV_LINE)
}

/// Base address of the register block for device `dev` on `line`.
pub fn reg_base(line: u32, dev: u32) -> u32 {
    DEV_REG_BASE + DEV_REG_SIZE * device_index(line, dev) as u32
}
