//! # Interrupt Handling
//!
//! - **GDT**: code/data segments and a TSS with a double-fault stack
//! - **IDT**: exception handlers, timer and keyboard
//! - **PIC**: 8259 remapping, line masks and EOI
//!
//! | Vector | Type           | Handler                    |
//! |--------|----------------|----------------------------|
//! | 0-31   | CPU Exceptions | divide, page fault, etc.   |
//! | 32     | Timer (IRQ0)   | timer_interrupt_handler    |
//! | 33     | Keyboard (IRQ1)| keyboard_interrupt_handler |

use crate::interrupts::{interrupts::init_idt, pic::PICS};

pub mod gdt;
pub mod interrupts;
pub mod pic;

pub fn init() {
    gdt::init();
    init_idt();
    unsafe { PICS.lock().initialize() };
}
