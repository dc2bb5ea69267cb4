use core::fmt;
use lazy_static::lazy_static;
use spin::Mutex;

/// Size of the diagnostic log buffer.
pub const LOG_BUF_SIZE: usize = 4096;

/// Fixed in-RAM diagnostic log. The emulator (or a debugger) reads it out
/// of band; the kernel never blocks on it. Writes past the end are dropped.
pub struct Console {
    buf: [u8; LOG_BUF_SIZE],
    len: usize,
}

impl Console {
    pub const fn new() -> Console {
        Console { buf: [0; LOG_BUF_SIZE], len: 0 }
    }

    pub fn contents(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if self.len == LOG_BUF_SIZE {
                break;
            }
            self.buf[self.len] = byte;
            self.len += 1;
        }
        Ok(())
    }
}

lazy_static! {
    pub static ref CONSOLE: Mutex<Console> = Mutex::new(Console::new());
}

#[doc(hidden)]
pub fn _print(args: ::core::fmt::Arguments) {
    use core::fmt::Write;
    let _ = CONSOLE.lock().write_fmt(args);
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::console::_print(format_args!("[INFO] "));
        $crate::console::_print(format_args!($($arg)*));
        $crate::console::_print(format_args!("\n"));
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::console::_print(format_args!("[WARN] "));
        $crate::console::_print(format_args!($($arg)*));
        $crate::console::_print(format_args!("\n"));
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::console::_print(format_args!("[ERROR] "));
        $crate::console::_print(format_args!($($arg)*));
        $crate::console::_print(format_args!("\n"));
    };
}

pub fn init() {
    CONSOLE.lock().clear();
}
