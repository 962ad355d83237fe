//! # Memory Allocators
//!
//! A boundary-tag heap over one fixed arena.
//!
//! ## Layout
//!
//! - `block`: tag words, block geometry, request size adjustment
//! - `arena`: bounds-checked, offset-based access to the backing region
//! - `bins`: segregated free lists, one per power-of-two size class
//!
//! ## Heap
//!
//! - First fit within the request's class, else the head of the nearest
//!   larger non-empty class
//! - Splits when the remainder can stand as a block of its own
//! - Coalesces with both neighbours on release
//! - Resizes in place when a neighbour can absorb the growth
//!
//! ## Sharing
//!
//! - `LockedHeap`: masks interrupts, then takes a spin lock
//! - `IrqGuard` / `without_interrupts`: the critical section on its own
//! - `AllocError`: initialization failure types

mod arena;
mod bins;
mod block;
mod check;
mod core;
mod heap;
mod locked;
mod resize;

pub use self::arena::Arena;
pub use self::bins::{SizeClass, MAX_CLASS, MIN_CLASS, NUM_CLASSES};
pub use self::block::{adjusted_size, ALIGN, MIN_BLOCK, OVERHEAD, WORD};
pub use self::check::{BlockInfo, Blocks, CheckError, HeapStats};
pub use self::core::{without_interrupts, AllocError, Cpu, InterruptControl, IrqGuard};
pub use self::heap::Heap;
pub use self::locked::LockedHeap;

#[cfg(test)]
pub(crate) use self::core::testing;
#[cfg(test)]
pub(crate) use self::heap::tests::arena as test_arena;
