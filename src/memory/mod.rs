//! The kernel heap: a fixed, page-aligned buffer in `.bss` handed to one
//! shared [`LockedHeap`].

pub mod allocators;

use core::ptr::addr_of_mut;
use core::sync::atomic::{AtomicBool, Ordering};

use self::allocators::{AllocError, LockedHeap};

pub const KERNEL_HEAP_SIZE: usize = 1 << 22;

#[repr(align(4096))]
struct HeapBuffer([u8; KERNEL_HEAP_SIZE]);
static mut KERNEL_HEAP_BUFFER: HeapBuffer = HeapBuffer([0; KERNEL_HEAP_SIZE]);
static KERNEL_HEAP_CLAIMED: AtomicBool = AtomicBool::new(false);

#[cfg_attr(target_os = "none", global_allocator)]
pub static KERNEL_HEAP: LockedHeap = LockedHeap::new();

/// Hand the heap buffer to [`KERNEL_HEAP`]. Only the first call does
/// anything; later calls get `AlreadyInitialized`.
pub fn init_heap() -> Result<(), AllocError> {
    if KERNEL_HEAP_CLAIMED.swap(true, Ordering::AcqRel) {
        return Err(AllocError::AlreadyInitialized);
    }
    // Safety: the flag above lets exactly one caller through, so this is the
    // only reference ever made to the buffer.
    let region: &'static mut [u8] = unsafe { &mut (*addr_of_mut!(KERNEL_HEAP_BUFFER)).0 };
    KERNEL_HEAP.init_region(region)
}
