#![no_std]
#![no_main]
#![feature(abi_x86_interrupt)]

extern crate alloc;
extern crate rlibc;

use bootloader_api::{entry_point, BootInfo};
use core::panic::PanicInfo;

use tagheap::{memory, serial, serial_println, time};

use crate::kernel::init_kernel;

mod interrupts;
mod kernel;
mod test_env;

entry_point!(kernel_main);

pub fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    serial::init();

    if let Err(e) = memory::init_heap() {
        serial_println!("HEAP: failed to initialize: {}", e);
        halt_loop();
    }
    kernel::log_memory_map(boot_info);

    if let Err(e) = init_kernel() {
        serial_println!("Kernel initialization failed: {}", e);
        halt_loop();
    }

    test_env::test_all();

    serial_println!("TIMER: sleeping 500 ms");
    let start = time::uptime_ms();
    time::sleep(500);
    serial_println!("TIMER: woke after {} ms", time::uptime_ms() - start);

    memory::KERNEL_HEAP.dump();
    halt_loop();
}

fn halt_loop() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    x86_64::instructions::interrupts::disable();
    serial_println!("KERNEL PANIC: {}", info);
    halt_loop();
}
