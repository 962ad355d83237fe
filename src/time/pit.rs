//! 8253/8254 programmable interval timer, channel 0.

use x86_64::instructions::port::Port;

/// Input clock of the PIT.
pub const PIT_BASE_HZ: u32 = 1_193_180;

const CHANNEL0_DATA: u16 = 0x40;
const COMMAND: u16 = 0x43;
/// Channel 0, low byte then high byte, mode 3 (square wave), binary.
const CHANNEL0_SQUARE_WAVE: u8 = 0x36;

/// Reload value for `hz` interrupts per second. A reload of 0 means 65536,
/// the slowest rate the PIT can do.
pub const fn divisor(hz: u32) -> u16 {
    if hz == 0 {
        return 0;
    }
    let value = PIT_BASE_HZ / hz;
    if value == 0 {
        1
    } else if value > u16::MAX as u32 {
        0
    } else {
        value as u16
    }
}

/// Actual interrupt rate produced by a reload value.
pub const fn frequency(divisor: u16) -> u32 {
    let reload = if divisor == 0 { 1 << 16 } else { divisor as u32 };
    PIT_BASE_HZ / reload
}

/// Program channel 0 to fire IRQ0 at (about) `hz`.
pub fn set_rate(hz: u32) {
    let [low, high] = divisor(hz).to_le_bytes();

    let mut command = Port::<u8>::new(COMMAND);
    let mut data = Port::<u8>::new(CHANNEL0_DATA);
    unsafe {
        command.write(CHANNEL0_SQUARE_WAVE);
        data.write(low);
        data.write(high);
    }
    crate::serial_println!("TIMER: PIT at {} Hz (reload {})", frequency(divisor(hz)), divisor(hz));
}
