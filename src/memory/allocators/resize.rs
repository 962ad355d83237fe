//! In-place growth and shrink, with an allocate-copy-release fallback.

use core::cmp;
use core::ptr::NonNull;

use super::block::{adjusted_size, payload_capacity, Block, Tag, MIN_BLOCK};
use super::heap::Heap;

impl Heap<'_> {
    /// Resize the allocation behind `ptr` to `new_size` bytes.
    ///
    /// - `new_size == 0` releases `ptr` and returns `None`
    /// - a null `ptr` is a plain [`allocate`](Heap::allocate)
    /// - otherwise grows in place (absorbing free neighbours) when it can,
    ///   and moves the data to a fresh block when it cannot
    ///
    /// The first `min(old, new)` payload bytes survive every successful
    /// path. On `None` the original block is untouched and still owned by
    /// the caller.
    ///
    /// # Safety
    /// `ptr` must be null or a live pointer returned by this heap.
    pub unsafe fn resize(&mut self, ptr: *mut u8, new_size: usize) -> Option<NonNull<u8>> {
        if new_size == 0 {
            self.release(ptr);
            return None;
        }
        let Some(old_ptr) = NonNull::new(ptr) else {
            return self.allocate(new_size);
        };

        let block = self.owned_block(ptr);
        let old_size = self.header(block).size();
        let asize = adjusted_size(new_size)?;

        if old_size >= asize {
            self.shrink(block, asize);
            return Some(old_ptr);
        }

        let next = block.next_block(old_size);
        let next_tag = self.header(next);
        let next_free = if next_tag.is_free() { next_tag.size() } else { 0 };

        if old_size + next_free >= asize {
            self.bins.remove(&mut self.arena, next);
            self.set_tags(block, Tag::new(old_size + next_free, true));
            self.shrink(block, asize);
            return Some(old_ptr);
        }

        let prev_tag = self.prev_footer(block);
        if prev_tag.is_free() && old_size + next_free + prev_tag.size() >= asize {
            let prev = block.prev_block(prev_tag.size());
            self.bins.remove(&mut self.arena, prev);
            if next_free > 0 {
                self.bins.remove(&mut self.arena, next);
            }

            // Move the payload before any tag lands on top of it.
            let keep = cmp::min(payload_capacity(old_size), new_size);
            self.arena.copy_within(block.payload(), prev.payload(), keep);

            let total = prev_tag.size() + old_size + next_free;
            self.set_tags(prev, Tag::new(total, true));
            self.shrink(prev, asize);
            return Some(self.arena.ptr_at(prev.payload()));
        }

        let fresh = self.allocate(new_size)?;
        let keep = cmp::min(payload_capacity(old_size), new_size);
        let dst = self.payload_offset(fresh.as_ptr());
        self.arena.copy_within(block.payload(), dst, keep);
        self.release(ptr);
        Some(fresh)
    }

    /// Trim an allocated block down to `asize`, releasing the tail when it is
    /// big enough to stand as a block of its own.
    fn shrink(&mut self, block: Block, asize: usize) {
        let size = self.header(block).size();
        debug_assert!(size >= asize);
        if size - asize < MIN_BLOCK {
            return;
        }

        self.set_tags(block, Tag::new(asize, true));
        let tail = block.next_block(asize);
        self.set_tags(tail, Tag::new(size - asize, false));
        let merged = self.coalesce(tail);
        self.insert_free(merged);
    }
}
