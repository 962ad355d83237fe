//! # Test Environment
//!
//! Boot-time smoke tests for the kernel heap and the timer, run on the real
//! hardware path (global allocator, PIT, IRQ0).
//!
//! Each test prints one `✓`/`✗` line over serial; `test_all` prints a
//! summary at the end.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::alloc::{GlobalAlloc, Layout};
use core::sync::atomic::{AtomicUsize, Ordering};

use tagheap::memory::allocators::ALIGN;
use tagheap::memory::KERNEL_HEAP;
use tagheap::serial_println;
use tagheap::time::{self, WAIT_QUEUE};

static PASSED: AtomicUsize = AtomicUsize::new(0);
static FAILED: AtomicUsize = AtomicUsize::new(0);

fn report(name: &str, ok: bool) {
    if ok {
        PASSED.fetch_add(1, Ordering::Relaxed);
        serial_println!("TEST: ✓ {}", name);
    } else {
        FAILED.fetch_add(1, Ordering::Relaxed);
        serial_println!("TEST: ✗ {}", name);
    }
}

fn heap_is_consistent() -> bool {
    match KERNEL_HEAP.check() {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            serial_println!("TEST: heap check failed: {}", e);
            false
        }
        Err(e) => {
            serial_println!("TEST: heap unavailable: {}", e);
            false
        }
    }
}

pub fn test_box_and_vec() -> bool {
    let boxed = Box::new(0x1234_5678_u64);
    let mut values = Vec::new();
    for i in 0..2000u32 {
        values.push(i);
    }
    let sum: u64 = values.iter().map(|&v| v as u64).sum();
    *boxed == 0x1234_5678 && sum == 1999 * 2000 / 2 && heap_is_consistent()
}

pub fn test_release_restores_free_space() -> bool {
    let Ok(before) = KERNEL_HEAP.stats() else {
        return false;
    };
    {
        let blocks: Vec<Box<[u8; 200]>> = (0..64).map(|_| Box::new([0xa5; 200])).collect();
        if blocks.iter().any(|b| b.iter().any(|&x| x != 0xa5)) {
            return false;
        }
    }
    KERNEL_HEAP.stats().map(|after| after.free == before.free).unwrap_or(false)
}

pub fn test_over_aligned_layout_is_refused() -> bool {
    let Ok(layout) = Layout::from_size_align(64, ALIGN * 2) else {
        return false;
    };
    unsafe { KERNEL_HEAP.alloc(layout).is_null() }
}

pub fn test_sleep_advances_ticks() -> bool {
    let start = time::TIMER_TICKS.load(Ordering::Relaxed);
    let waited = WAIT_QUEUE.wait(time::ms_to_ticks(50), x86_64::instructions::hlt);
    let elapsed = time::TIMER_TICKS.load(Ordering::Relaxed) - start;
    waited && elapsed >= time::ms_to_ticks(50) as u64 && WAIT_QUEUE.is_empty()
}

/// Heap churn while the timer keeps ticking a live wait record.
pub fn test_churn_under_timer() -> bool {
    const TICKS: u32 = 3;
    let Some(handle) = WAIT_QUEUE.add(u32::MAX) else {
        return false;
    };
    let mut round = 0usize;
    while u32::MAX - handle.remaining() < TICKS && round < 1_000_000 {
        let size = 16 + (round * 37) % 900;
        let Some(ptr) = KERNEL_HEAP.allocate(size) else {
            WAIT_QUEUE.remove(handle);
            return false;
        };
        unsafe {
            ptr.as_ptr().write_bytes(round as u8, size);
            KERNEL_HEAP.release(ptr.as_ptr());
        }
        round += 1;
    }
    let ticked = u32::MAX - handle.remaining() >= TICKS;
    WAIT_QUEUE.remove(handle);
    ticked && heap_is_consistent()
}

pub fn test_all() {
    serial_println!("TEST: running kernel self tests");

    report("heap consistent after boot", heap_is_consistent());
    report("Box and Vec through the global allocator", test_box_and_vec());
    report("released memory returns to the heap", test_release_restores_free_space());
    report("over-aligned layout refused", test_over_aligned_layout_is_refused());
    report("sleep advances the tick count", test_sleep_advances_ticks());
    report("heap churn under timer interrupts", test_churn_under_timer());

    serial_println!(
        "TEST: {} passed, {} failed\n",
        PASSED.load(Ordering::Relaxed),
        FAILED.load(Ordering::Relaxed)
    );
}
