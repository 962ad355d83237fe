//! The fixed region the heap runs over.
//!
//! `Arena` is the only place raw memory is touched. Everything above it
//! speaks in byte offsets from the arena base, and every access is checked
//! against the capacity before the pointer is formed.

use core::marker::PhantomData;
use core::ptr::{self, NonNull};

use super::block::WORD;

pub struct Arena<'a> {
    base: NonNull<u8>,
    capacity: usize,
    _region: PhantomData<&'a mut [u8]>,
}

// Safety: the arena is the unique owner of its region for `'a`; moving it to
// another context moves that ownership with it.
unsafe impl Send for Arena<'_> {}

impl<'a> Arena<'a> {
    /// Take exclusive ownership of `region`.
    pub fn new(region: &'a mut [u8]) -> Self {
        let capacity = region.len();
        // A slice pointer is never null, even when empty.
        let base = NonNull::from(region).cast::<u8>();
        Self {
            base,
            capacity,
            _region: PhantomData,
        }
    }

    /// Build an arena over `capacity` bytes starting at `base`.
    ///
    /// # Safety
    /// - `base..base + capacity` must be valid for reads and writes for `'a`
    /// - Nothing else may access the region while the arena exists
    pub unsafe fn from_raw_parts(base: NonNull<u8>, capacity: usize) -> Self {
        Self {
            base,
            capacity,
            _region: PhantomData,
        }
    }

    #[inline]
    pub fn base_addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    fn check(&self, offset: usize, len: usize) {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.capacity),
            "arena access out of bounds: {:#x}+{} (capacity {})",
            offset,
            len,
            self.capacity
        );
    }

    #[inline]
    pub(crate) fn read_word(&self, offset: usize) -> usize {
        self.check(offset, WORD);
        // Safety: in bounds; tag and link slots are word aligned by
        // construction of the heap layout.
        unsafe {
            let slot = self.base.as_ptr().add(offset).cast::<usize>();
            debug_assert!(slot.is_aligned());
            slot.read()
        }
    }

    #[inline]
    pub(crate) fn write_word(&mut self, offset: usize, value: usize) {
        self.check(offset, WORD);
        // Safety: as in `read_word`.
        unsafe {
            let slot = self.base.as_ptr().add(offset).cast::<usize>();
            debug_assert!(slot.is_aligned());
            slot.write(value);
        }
    }

    /// Pointer to the byte at `offset`.
    #[inline]
    pub(crate) fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        self.check(offset, 0);
        // Safety: in bounds (one-past-the-end at most), so never null.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) }
    }

    /// Offset of `ptr`, if it points into the arena.
    #[inline]
    pub(crate) fn offset_of(&self, ptr: *const u8) -> Option<usize> {
        let offset = (ptr as usize).checked_sub(self.base_addr())?;
        (offset < self.capacity).then_some(offset)
    }

    /// `memmove` inside the arena; the ranges may overlap.
    pub(crate) fn copy_within(&mut self, src: usize, dst: usize, len: usize) {
        self.check(src, len);
        self.check(dst, len);
        // Safety: both ranges are in bounds; `ptr::copy` tolerates overlap.
        unsafe {
            let base = self.base.as_ptr();
            ptr::copy(base.add(src), base.add(dst), len);
        }
    }

    pub(crate) fn fill(&mut self, offset: usize, len: usize, byte: u8) {
        self.check(offset, len);
        // Safety: in bounds.
        unsafe { self.base.as_ptr().add(offset).write_bytes(byte, len) }
    }
}
