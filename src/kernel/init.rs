/// Kernel initialization phases
use bootloader_api::info::MemoryRegionKind;
use bootloader_api::BootInfo;
use tagheap::{serial_println, time};

use crate::interrupts::pic::{enable_lines, InterruptIndex};

/// Initialize kernel in proper order with error handling
pub fn init_kernel() -> Result<(), &'static str> {
    serial_println!("╔════════════════════════════════════════╗");
    serial_println!("║        tagheap kernel bring-up         ║");
    serial_println!("╚════════════════════════════════════════╝\n");

    init_phase(1, "Interrupt System", init_interrupts)?;
    init_phase(2, "Timer", init_timer)?;

    x86_64::instructions::interrupts::enable();
    serial_println!("\n✅ Kernel initialization complete!\n");
    Ok(())
}

const PHASES: usize = 2;

fn init_phase(
    index: usize,
    name: &'static str,
    init_fn: fn() -> Result<(), &'static str>,
) -> Result<(), &'static str> {
    serial_println!("[{}/{}] Initializing {}...", index, PHASES, name);

    match init_fn() {
        Ok(()) => {
            serial_println!("    ✓ {} initialized successfully\n", name);
            Ok(())
        }
        Err(e) => {
            serial_println!("    ✗ {} failed: {}\n", name, e);
            Err(e)
        }
    }
}

fn init_interrupts() -> Result<(), &'static str> {
    crate::interrupts::init();
    Ok(())
}

fn init_timer() -> Result<(), &'static str> {
    if !tagheap::memory::KERNEL_HEAP.is_initialized() {
        return Err("wait queue needs the heap");
    }
    time::pit::set_rate(time::TIMER_HZ);
    enable_lines(&[InterruptIndex::Timer, InterruptIndex::Keyboard]);
    Ok(())
}

pub fn log_memory_map(boot_info: &BootInfo) {
    serial_println!("\n=== Memory Map ===");

    let mut total_usable = 0u64;
    let mut total_reserved = 0u64;

    for region in boot_info.memory_regions.iter() {
        let size = region.end - region.start;
        let kind = match region.kind {
            MemoryRegionKind::Usable => {
                total_usable += size;
                "Usable"
            }
            MemoryRegionKind::Bootloader => {
                total_reserved += size;
                "Bootloader"
            }
            MemoryRegionKind::UnknownBios(_) => {
                total_reserved += size;
                "BIOS"
            }
            MemoryRegionKind::UnknownUefi(_) => {
                total_reserved += size;
                "UEFI"
            }
            _ => {
                total_reserved += size;
                "Reserved"
            }
        };

        serial_println!(
            "  {:#018x} - {:#018x} ({:>8} KB) [{}]",
            region.start,
            region.end,
            size / 1024,
            kind
        );
    }

    serial_println!("\nTotal Usable:   {} MB", total_usable / (1024 * 1024));
    serial_println!("Total Reserved: {} MB\n", total_reserved / (1024 * 1024));
}
