//! COM1 logging.
//!
//! On the bare-metal target every write happens with interrupts masked, so a
//! handler that logs can never spin on a port lock held by the code it
//! interrupted. Hosted test builds print to stderr instead; other hosted
//! builds drop the output.

use core::fmt;

use spin::Mutex;
use uart_16550::SerialPort;

pub const COM1: u16 = 0x3F8;

pub static SERIAL: Mutex<SerialPort> = Mutex::new(unsafe { SerialPort::new(COM1) });

/// Program the UART (baud rate, FIFO, line control).
pub fn init() {
    #[cfg(target_os = "none")]
    crate::memory::allocators::without_interrupts::<crate::memory::allocators::Cpu, _, _>(|| {
        SERIAL.lock().init()
    });
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    #[cfg(target_os = "none")]
    {
        use core::fmt::Write;
        use crate::memory::allocators::{without_interrupts, Cpu};

        without_interrupts::<Cpu, _, _>(|| {
            let _ = SERIAL.lock().write_fmt(args);
        });
    }

    #[cfg(all(test, not(target_os = "none")))]
    std::eprint!("{}", args);

    #[cfg(not(any(test, target_os = "none")))]
    let _ = args;
}

#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!("{}\n", format_args!($($arg)*)))
    };
}
