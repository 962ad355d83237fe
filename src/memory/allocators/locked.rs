//! Interrupt-safe shared heap.
//!
//! Wraps [`Heap`] for use from both thread context and interrupt handlers,
//! and serves as the kernel's `#[global_allocator]`.

use core::alloc::{GlobalAlloc, Layout};
use core::marker::PhantomData;
use core::ptr::{self, NonNull};

use super::arena::Arena;
use super::block::ALIGN;
use super::check::{CheckError, HeapStats};
use super::core::{validate_region, AllocError, Cpu, InterruptControl, IrqGuard};
use super::heap::Heap;

/// The shared heap: interrupts masked first, then the spin lock.
///
/// Taking the lock with interrupts enabled would let the timer handler spin
/// forever on a lock held by the code it interrupted.
///
/// # Safety
/// - Must call `init()` or `init_region()` before anything is allocated
/// - Every operation is a no-op (or null) until then
pub struct LockedHeap<C: InterruptControl = Cpu> {
    inner: spin::Mutex<Option<Heap<'static>>>,
    _irq: PhantomData<fn() -> C>,
}

impl<C: InterruptControl> LockedHeap<C> {
    pub const fn new() -> Self {
        Self {
            inner: spin::Mutex::new(None),
            _irq: PhantomData,
        }
    }

    /// Initialize the heap over a raw memory region
    ///
    /// # Safety
    /// - `heap_start` must point to valid, unused memory
    /// - `heap_size` must not exceed that memory
    /// - Nothing else may touch the region afterwards
    pub unsafe fn init(&self, heap_start: usize, heap_size: usize) -> Result<(), AllocError> {
        validate_region(heap_start, heap_size)?;
        let base = NonNull::new(heap_start as *mut u8).ok_or(AllocError::InvalidAddress)?;
        self.install(Arena::from_raw_parts(base, heap_size))
    }

    /// Initialize the heap over a region the caller gives up for good.
    pub fn init_region(&self, region: &'static mut [u8]) -> Result<(), AllocError> {
        validate_region(region.as_ptr() as usize, region.len())?;
        self.install(Arena::new(region))
    }

    fn install(&self, arena: Arena<'static>) -> Result<(), AllocError> {
        let _irq = IrqGuard::<C>::acquire();
        let mut inner = self.inner.lock();
        if inner.is_some() {
            return Err(AllocError::AlreadyInitialized);
        }
        *inner = Some(Heap::init(arena)?);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        let _irq = IrqGuard::<C>::acquire();
        self.inner.lock().is_some()
    }

    /// Run `f` on the heap inside the critical section.
    pub fn with_heap<R>(&self, f: impl FnOnce(&mut Heap<'static>) -> R) -> Result<R, AllocError> {
        let _irq = IrqGuard::<C>::acquire();
        let mut inner = self.inner.lock();
        inner.as_mut().map(f).ok_or(AllocError::Uninitialized)
    }

    pub fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        self.with_heap(|heap| heap.allocate(size)).ok().flatten()
    }

    pub fn allocate_zeroed(&self, size: usize) -> Option<NonNull<u8>> {
        self.with_heap(|heap| heap.allocate_zeroed(size)).ok().flatten()
    }

    /// # Safety
    /// `ptr` must be null or a live pointer returned by this heap.
    pub unsafe fn release(&self, ptr: *mut u8) {
        let _ = self.with_heap(|heap| heap.release(ptr));
    }

    /// # Safety
    /// `ptr` must be null or a live pointer returned by this heap.
    pub unsafe fn resize(&self, ptr: *mut u8, new_size: usize) -> Option<NonNull<u8>> {
        self.with_heap(|heap| heap.resize(ptr, new_size)).ok().flatten()
    }

    pub fn stats(&self) -> Result<HeapStats, AllocError> {
        self.with_heap(|heap| heap.stats())
    }

    /// `Ok(Err(_))` means the heap is initialized but corrupt.
    pub fn check(&self) -> Result<Result<HeapStats, CheckError>, AllocError> {
        self.with_heap(|heap| heap.check())
    }

    pub fn dump(&self) {
        let _ = self.with_heap(|heap| heap.dump());
    }
}

impl<C: InterruptControl> Default for LockedHeap<C> {
    fn default() -> Self {
        Self::new()
    }
}

fn supported(layout: &Layout) -> bool {
    layout.align() <= ALIGN
}

unsafe impl<C: InterruptControl> GlobalAlloc for LockedHeap<C> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if !supported(&layout) {
            return ptr::null_mut();
        }
        self.allocate(layout.size())
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if !supported(&layout) {
            return ptr::null_mut();
        }
        self.allocate_zeroed(layout.size())
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.release(ptr);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if !supported(&layout) {
            return ptr::null_mut();
        }
        self.resize(ptr, new_size)
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }
}
