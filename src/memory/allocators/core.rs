//! Core utilities and error types for allocators

use core::fmt;
use core::marker::PhantomData;

// ============================================================================
// INTERRUPT GUARD (the allocator's critical section)
// ============================================================================

/// Access to the maskable-interrupt flag.
pub trait InterruptControl {
    fn are_enabled() -> bool;
    fn disable();
    fn enable();
}

/// The real CPU flag (`IF` in RFLAGS).
pub enum Cpu {}

impl InterruptControl for Cpu {
    #[inline]
    fn are_enabled() -> bool {
        x86_64::instructions::interrupts::are_enabled()
    }

    #[inline]
    fn disable() {
        x86_64::instructions::interrupts::disable();
    }

    #[inline]
    fn enable() {
        x86_64::instructions::interrupts::enable();
    }
}

/// Interrupts stay masked while this guard lives. Dropping it restores the
/// flag to what it was at acquisition, so guards nest.
#[must_use = "interrupts are re-enabled as soon as the guard is dropped"]
pub struct IrqGuard<C: InterruptControl = Cpu> {
    was_enabled: bool,
    // !Send: the saved flag belongs to this CPU context
    _control: PhantomData<(C, *const ())>,
}

impl<C: InterruptControl> IrqGuard<C> {
    pub fn acquire() -> Self {
        let was_enabled = C::are_enabled();
        if was_enabled {
            C::disable();
        }
        Self {
            was_enabled,
            _control: PhantomData,
        }
    }
}

impl<C: InterruptControl> Drop for IrqGuard<C> {
    fn drop(&mut self) {
        if self.was_enabled {
            C::enable();
        }
    }
}

/// Run `f` with interrupts masked.
#[inline]
pub fn without_interrupts<C, F, R>(f: F) -> R
where
    C: InterruptControl,
    F: FnOnce() -> R,
{
    let _guard = IrqGuard::<C>::acquire();
    f()
}

// ============================================================================
// UTILITY FUNCTIONS
// ============================================================================

#[inline]
pub(crate) const fn align_up(addr: usize, align: usize) -> usize {
    (addr + align - 1) & !(align - 1)
}

#[inline]
pub(crate) const fn align_down(addr: usize, align: usize) -> usize {
    addr & !(align - 1)
}

#[inline]
pub(crate) fn is_aligned(addr: usize, align: usize) -> bool {
    addr & (align - 1) == 0
}

/// Validates that a memory region is safe to use
pub(crate) fn validate_region(start: usize, size: usize) -> Result<(), AllocError> {
    if start == 0 {
        return Err(AllocError::InvalidAddress);
    }
    if size == 0 {
        return Err(AllocError::InvalidSize);
    }
    start.checked_add(size).ok_or(AllocError::Overflow)?;
    Ok(())
}

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    InvalidAddress,
    InvalidSize,
    Overflow,
    Uninitialized,
    AlreadyInitialized,
    /// Not enough room for the prologue, the epilogue and one minimum block.
    ArenaTooSmall,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            AllocError::InvalidAddress => "invalid address",
            AllocError::InvalidSize => "invalid size",
            AllocError::Overflow => "address arithmetic overflow",
            AllocError::Uninitialized => "heap not initialized",
            AllocError::AlreadyInitialized => "heap already initialized",
            AllocError::ArenaTooSmall => "arena too small",
        };
        f.write_str(msg)
    }
}
