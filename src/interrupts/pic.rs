//! # Programmable Interrupt Controller (8259 PIC)
//!
//! ## Vector Remapping
//!
//! IRQ 0-15 would collide with CPU exception vectors, so they are moved:
//! - PIC 1: vectors 32-39 (IRQ 0-7)
//! - PIC 2: vectors 40-47 (IRQ 8-15)
//!
//! | IRQ | Vector | Device    |
//! |-----|--------|-----------|
//! | 0   | 32     | Timer     |
//! | 1   | 33     | Keyboard  |

use pic8259::ChainedPics;
use spin::Mutex;

pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = 40;

pub static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

#[derive(Debug, Clone, Copy)]
#[repr(u8)]
pub enum InterruptIndex {
    Timer = PIC_1_OFFSET,
    Keyboard = PIC_1_OFFSET + 1,
}

impl InterruptIndex {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Bit of this line in its PIC's mask register.
    pub fn irq_line(self) -> u8 {
        self.as_u8() - PIC_1_OFFSET
    }
}

/// Unmask exactly the lines the kernel handles; everything else stays off.
pub fn enable_lines(lines: &[InterruptIndex]) {
    let mask = lines
        .iter()
        .fold(0xffu8, |mask, line| mask & !(1 << line.irq_line()));
    unsafe { PICS.lock().write_masks(mask, 0xff) };
}

/// Acknowledge an interrupt so the PIC delivers the next one.
pub fn end_of_interrupt(index: InterruptIndex) {
    unsafe { PICS.lock().notify_end_of_interrupt(index.as_u8()) };
}
