//! # tagheap
//!
//! A boundary-tag kernel heap with segregated free lists, safe to call from
//! interrupt handlers, plus the timer wait queue that leans on it.
//!
//! ## Modules
//!
//! - `memory`: the heap itself and the kernel's static instance
//! - `time`: PIT programming, tick counting and tick-based waits
//! - `serial`: COM1 logging macros
//!
//! The library is `no_std`; host builds exist so `cargo test` can exercise
//! the allocator with a software interrupt flag.

#![cfg_attr(not(test), no_std)]

pub mod memory;
pub mod serial;
pub mod time;
