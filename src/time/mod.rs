//! # Timer
//!
//! IRQ0 bookkeeping and tick-based waits.
//!
//! A wait is a [`WaitRecord`] allocated from the kernel heap and linked into
//! a [`WaitQueue`]. Every timer interrupt decrements every record; the waiter
//! spins (or halts) until its record reaches zero, then unlinks and frees it.
//! Records are allocated from thread context while the timer handler may run
//! at any moment, which is why the heap masks interrupts around every call.

pub mod pit;

use core::marker::PhantomData;
use core::mem::size_of;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use spin::Mutex;

use crate::memory::allocators::{Cpu, InterruptControl, IrqGuard, LockedHeap};
use crate::memory::KERNEL_HEAP;

/// Timer interrupts per second.
pub const TIMER_HZ: u32 = 100;

/// Interrupts seen since boot.
pub static TIMER_TICKS: AtomicU64 = AtomicU64::new(0);

pub static WAIT_QUEUE: WaitQueue = WaitQueue::new(&KERNEL_HEAP);

/// Ticks covering at least `ms` milliseconds.
pub const fn ms_to_ticks(ms: u32) -> u32 {
    let ticks = (ms as u64 * TIMER_HZ as u64).div_ceil(1000);
    if ticks > u32::MAX as u64 {
        u32::MAX
    } else {
        ticks as u32
    }
}

pub struct WaitRecord {
    remaining: AtomicU32,
    next: Option<NonNull<WaitRecord>>,
}

/// A pending wait. Hand it back to [`WaitQueue::remove`] when done.
#[must_use = "a wait record stays in the queue until removed"]
pub struct WaitHandle {
    record: NonNull<WaitRecord>,
}

impl WaitHandle {
    fn record(&self) -> &WaitRecord {
        // Safety: the record stays allocated and linked until `remove`
        // consumes this handle.
        unsafe { self.record.as_ref() }
    }

    pub fn remaining(&self) -> u32 {
        self.record().remaining.load(Ordering::Acquire)
    }
}

struct WaitList {
    head: Option<NonNull<WaitRecord>>,
}

// Safety: the records are only touched under the queue lock (links) or
// through atomics (counters).
unsafe impl Send for WaitList {}

pub struct WaitQueue<C: InterruptControl + 'static = Cpu> {
    heap: &'static LockedHeap<C>,
    list: Mutex<WaitList>,
    _irq: PhantomData<fn() -> C>,
}

impl<C: InterruptControl> WaitQueue<C> {
    pub const fn new(heap: &'static LockedHeap<C>) -> Self {
        Self {
            heap,
            list: Mutex::new(WaitList { head: None }),
            _irq: PhantomData,
        }
    }

    /// Start a wait of `ticks` timer interrupts. `None` if the heap is out
    /// of memory.
    pub fn add(&self, ticks: u32) -> Option<WaitHandle> {
        let Some(raw) = self.heap.allocate(size_of::<WaitRecord>()) else {
            crate::serial_println!("TIMER: out of memory");
            return None;
        };
        let record = raw.cast::<WaitRecord>();

        let _irq = IrqGuard::<C>::acquire();
        let mut list = self.list.lock();
        // Safety: fresh, ALIGN-aligned and big enough for a WaitRecord.
        unsafe {
            record.as_ptr().write(WaitRecord {
                remaining: AtomicU32::new(ticks),
                next: list.head,
            });
        }
        list.head = Some(record);
        Some(WaitHandle { record })
    }

    /// One timer interrupt: count every pending wait down by one.
    pub fn tick(&self) {
        let _irq = IrqGuard::<C>::acquire();
        let list = self.list.lock();
        let mut cursor = list.head;
        while let Some(record) = cursor {
            // Safety: linked records are live.
            let record = unsafe { record.as_ref() };
            let _ = record
                .remaining
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
            cursor = record.next;
        }
    }

    pub fn is_expired(&self, handle: &WaitHandle) -> bool {
        handle.remaining() == 0
    }

    /// Unlink the record and give it back to the heap.
    pub fn remove(&self, handle: WaitHandle) {
        let target = handle.record;
        let found = {
            let _irq = IrqGuard::<C>::acquire();
            let mut list = self.list.lock();
            let mut link: *mut Option<NonNull<WaitRecord>> = &mut list.head;
            loop {
                // Safety: `link` is the head slot or the `next` field of a
                // live record, and the lock is held.
                match unsafe { *link } {
                    None => break false,
                    Some(record) if record == target => {
                        unsafe { *link = record.as_ref().next };
                        break true;
                    }
                    Some(record) => link = unsafe { &mut (*record.as_ptr()).next },
                }
            }
        };
        debug_assert!(found, "TIMER: wait record not in queue");

        if found {
            // Safety: unlinked above; nothing else can reach it.
            unsafe { self.heap.release(target.as_ptr().cast()) };
        }
    }

    /// Block for `ticks` timer interrupts, calling `idle` between checks.
    /// Returns `false` without waiting when no record could be allocated.
    pub fn wait(&self, ticks: u32, mut idle: impl FnMut()) -> bool {
        let Some(handle) = self.add(ticks) else {
            return false;
        };
        while !self.is_expired(&handle) {
            idle();
        }
        self.remove(handle);
        true
    }

    pub fn len(&self) -> usize {
        let _irq = IrqGuard::<C>::acquire();
        let list = self.list.lock();
        let mut count = 0;
        let mut cursor = list.head;
        while let Some(record) = cursor {
            count += 1;
            // Safety: linked records are live.
            cursor = unsafe { record.as_ref().next };
        }
        count
    }

    pub fn is_empty(&self) -> bool {
        let _irq = IrqGuard::<C>::acquire();
        self.list.lock().head.is_none()
    }
}

/// IRQ0 body.
pub fn on_timer_interrupt() {
    TIMER_TICKS.fetch_add(1, Ordering::Relaxed);
    WAIT_QUEUE.tick();
}

pub fn uptime_ms() -> u64 {
    TIMER_TICKS.load(Ordering::Relaxed) * 1000 / TIMER_HZ as u64
}

/// Halt until at least `ms` milliseconds have passed. Returns at once if the
/// heap cannot hold the wait record.
pub fn sleep(ms: u32) {
    WAIT_QUEUE.wait(ms_to_ticks(ms), x86_64::instructions::hlt);
}
