//! Boundary-tag heap with segregated free lists.
//!
//! Arena layout after [`Heap::init`]:
//!
//! ```text
//! ┌─────┬──────────────────┬──────────────────────────────┬──────────┬──────┐
//! │ pad │ prologue (2 tags)│ blocks ...                   │ epilogue │ tail │
//! └─────┴──────────────────┴──────────────────────────────┴──────────┴──────┘
//!        allocated, ALIGN    start                          size 0,
//!                                                           allocated
//! ```
//!
//! The padding puts every payload on an [`ALIGN`] boundary. The prologue and
//! epilogue are permanently allocated, so coalescing never has to special
//! case the ends of the arena.

use core::ptr::NonNull;

use super::arena::Arena;
use super::bins::{FreeBins, SizeClass};
use super::block::{adjusted_size, Block, Tag, ALIGN, MIN_BLOCK, OVERHEAD, WORD};
use super::core::{align_down, align_up, is_aligned, AllocError};

pub struct Heap<'a> {
    pub(super) arena: Arena<'a>,
    pub(super) bins: FreeBins,
    /// First real block, right after the prologue.
    pub(super) start: Block,
    /// The epilogue header.
    pub(super) end: Block,
}

impl<'a> Heap<'a> {
    /// Lay out prologue, one free block and epilogue over `region`.
    pub fn new(region: &'a mut [u8]) -> Result<Self, AllocError> {
        Self::init(Arena::new(region))
    }

    pub fn init(mut arena: Arena<'a>) -> Result<Self, AllocError> {
        if arena.capacity() < OVERHEAD + MIN_BLOCK + WORD {
            return Err(AllocError::ArenaTooSmall);
        }
        let base = arena.base_addr();
        if !is_aligned(base, WORD) {
            return Err(AllocError::InvalidAddress);
        }

        // Smallest header offset that leaves room for the prologue and puts
        // the first payload on an ALIGN boundary.
        let first_payload = base
            .checked_add(OVERHEAD + WORD)
            .map(|addr| align_up(addr, ALIGN))
            .ok_or(AllocError::Overflow)?;
        let start = first_payload - WORD - base;

        let usable = arena
            .capacity()
            .checked_sub(start + WORD)
            .ok_or(AllocError::ArenaTooSmall)?;
        let size = align_down(usable, ALIGN);
        if size < MIN_BLOCK {
            return Err(AllocError::ArenaTooSmall);
        }

        let prologue = Block::at(start - OVERHEAD);
        let start = Block::at(start);
        let end = start.next_block(size);

        let sentinel = Tag::new(OVERHEAD, true).bits();
        arena.write_word(prologue.header_of(), sentinel);
        arena.write_word(prologue.footer_of(OVERHEAD), sentinel);
        arena.write_word(end.header_of(), Tag::new(0, true).bits());

        let mut heap = Heap {
            arena,
            bins: FreeBins::new(),
            start,
            end,
        };
        heap.set_tags(start, Tag::new(size, false));
        heap.bins.insert(&mut heap.arena, start, SizeClass::of(size));

        crate::serial_println!(
            "HEAP: arena {:#x}+{:#x}, first block {:#x}, {} bytes free",
            base,
            heap.arena.capacity(),
            base + start.offset(),
            size
        );
        Ok(heap)
    }

    /// Bytes between the prologue and the epilogue.
    pub fn capacity(&self) -> usize {
        self.end.offset() - self.start.offset()
    }

    // ------------------------------------------------------------------
    // allocate
    // ------------------------------------------------------------------

    /// At least `size` bytes, [`ALIGN`]-aligned. `None` for a zero size or
    /// when no free block is large enough.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let asize = adjusted_size(size)?;
        let block = self.find_fit(asize)?;
        self.place(block, asize);
        Some(self.arena.ptr_at(block.payload()))
    }

    /// As [`allocate`](Self::allocate), with the payload zero-filled.
    pub fn allocate_zeroed(&mut self, size: usize) -> Option<NonNull<u8>> {
        let ptr = self.allocate(size)?;
        let block = Block::from_payload(self.payload_offset(ptr.as_ptr()));
        let capacity = self.header(block).size() - OVERHEAD;
        self.arena.fill(block.payload(), capacity, 0);
        Some(ptr)
    }

    /// First fit within the starting class, then the head of the nearest
    /// non-empty larger class (any member of a larger class is big enough).
    fn find_fit(&self, asize: usize) -> Option<Block> {
        let class = SizeClass::of(asize);

        let mut cursor = self.bins.first(class);
        while let Some(block) = cursor {
            if self.header(block).size() >= asize {
                return Some(block);
            }
            cursor = self.bins.next_member(&self.arena, block);
        }

        let larger = self.bins.next_nonempty_above(class)?;
        self.bins.first(larger)
    }

    /// Carve an `asize` allocation out of the free `block`, returning any
    /// remainder of at least `MIN_BLOCK` to the bins.
    fn place(&mut self, block: Block, asize: usize) {
        let csize = self.header(block).size();
        self.bins.remove(&mut self.arena, block);

        if csize - asize >= MIN_BLOCK {
            self.set_tags(block, Tag::new(asize, true));
            let rest = block.next_block(asize);
            self.set_tags(rest, Tag::new(csize - asize, false));
            self.bins.insert(&mut self.arena, rest, SizeClass::of(csize - asize));
        } else {
            self.set_tags(block, Tag::new(csize, true));
        }
    }

    // ------------------------------------------------------------------
    // release
    // ------------------------------------------------------------------

    /// Return a block to the heap. Null is ignored.
    ///
    /// # Safety
    /// `ptr` must be null or a live pointer returned by this heap.
    pub unsafe fn release(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let block = self.owned_block(ptr);
        let tag = self.header(block);
        self.set_tags(block, tag.with_allocated(false));

        let merged = self.coalesce(block);
        self.insert_free(merged);
    }

    /// Merge a just-freed, unlisted `block` with its free neighbours. The
    /// result is not in any bin yet.
    pub(super) fn coalesce(&mut self, block: Block) -> Block {
        let size = self.header(block).size();
        let prev_tag = self.prev_footer(block);
        let next = block.next_block(size);
        let next_tag = self.header(next);

        match (prev_tag.is_allocated(), next_tag.is_allocated()) {
            (true, true) => block,
            (true, false) => {
                self.bins.remove(&mut self.arena, next);
                self.set_tags(block, Tag::new(size + next_tag.size(), false));
                block
            }
            (false, true) => {
                let prev = block.prev_block(prev_tag.size());
                self.bins.remove(&mut self.arena, prev);
                self.set_tags(prev, Tag::new(prev_tag.size() + size, false));
                prev
            }
            (false, false) => {
                let prev = block.prev_block(prev_tag.size());
                self.bins.remove(&mut self.arena, prev);
                self.bins.remove(&mut self.arena, next);
                let merged = prev_tag.size() + size + next_tag.size();
                self.set_tags(prev, Tag::new(merged, false));
                prev
            }
        }
    }

    pub(super) fn insert_free(&mut self, block: Block) {
        let size = self.header(block).size();
        self.bins.insert(&mut self.arena, block, SizeClass::of(size));
    }

    // ------------------------------------------------------------------
    // tags
    // ------------------------------------------------------------------

    #[inline]
    pub(super) fn header(&self, block: Block) -> Tag {
        Tag::from_bits(self.arena.read_word(block.header_of()))
    }

    #[inline]
    pub(super) fn footer(&self, block: Block) -> Tag {
        let size = self.header(block).size();
        Tag::from_bits(self.arena.read_word(block.footer_of(size)))
    }

    /// Tag of the block physically before `block`.
    #[inline]
    pub(super) fn prev_footer(&self, block: Block) -> Tag {
        Tag::from_bits(self.arena.read_word(block.prev_footer()))
    }

    /// The only writer of block metadata: header and footer together.
    #[inline]
    pub(super) fn set_tags(&mut self, block: Block, tag: Tag) {
        self.arena.write_word(block.header_of(), tag.bits());
        self.arena.write_word(block.footer_of(tag.size()), tag.bits());
    }

    pub(super) fn payload_offset(&self, ptr: *const u8) -> usize {
        match self.arena.offset_of(ptr) {
            Some(offset) => offset,
            None => panic!("HEAP: pointer {:p} is outside the arena", ptr),
        }
    }

    /// The allocated block behind a payload pointer handed out earlier.
    pub(super) fn owned_block(&self, ptr: *const u8) -> Block {
        let block = Block::from_payload(self.payload_offset(ptr));
        debug_assert!(
            block >= self.start && block < self.end,
            "HEAP: {:p} is not a block payload",
            ptr
        );
        debug_assert!(
            self.header(block).is_allocated(),
            "HEAP: {:p} released twice or never allocated",
            ptr
        );
        debug_assert_eq!(
            self.header(block),
            self.footer(block),
            "HEAP: corrupt tags at {:p}",
            ptr
        );
        block
    }

    /// Payload bytes usable behind `ptr`.
    ///
    /// # Safety
    /// `ptr` must be a live pointer returned by this heap.
    pub unsafe fn usable_size(&self, ptr: *const u8) -> usize {
        self.header(self.owned_block(ptr)).size() - OVERHEAD
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const ARENA: usize = 4096;

    #[repr(C, align(16))]
    pub(crate) struct TestArena(pub(crate) [u8; ARENA]);

    pub(crate) fn arena() -> Box<TestArena> {
        Box::new(TestArena([0; ARENA]))
    }

    pub(crate) fn assert_consistent(heap: &Heap<'_>) {
        if let Err(e) = heap.check() {
            panic!("heap inconsistent: {:?}", e);
        }
    }

    #[test]
    fn init_creates_single_free_block() {
        let mut region = arena();
        let heap = Heap::new(&mut region.0).unwrap();
        let stats = heap.check().unwrap();
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.allocated_blocks, 0);
        assert_eq!(stats.free, heap.capacity());
        assert_eq!(stats.largest_free, heap.capacity());
        // pad + prologue in front, epilogue behind
        assert_eq!(heap.capacity(), ARENA - OVERHEAD - 2 * WORD);
    }

    #[test]
    fn init_rejects_tiny_arena() {
        let mut region = [0u64; 4];
        let bytes = unsafe {
            core::slice::from_raw_parts_mut(region.as_mut_ptr().cast::<u8>(), 4 * 8)
        };
        assert_eq!(Heap::new(bytes).err(), Some(AllocError::ArenaTooSmall));

        let mut empty: [u8; 0] = [];
        assert_eq!(Heap::new(&mut empty).err(), Some(AllocError::ArenaTooSmall));
    }

    #[test]
    fn init_tolerates_unaligned_length() {
        let mut region = arena();
        let heap = Heap::new(&mut region.0[..ARENA - 5]).unwrap();
        assert_eq!(heap.capacity() % ALIGN, 0);
        assert_consistent(&heap);
    }

    #[test]
    fn zero_size_is_null_without_side_effect() {
        let mut region = arena();
        let mut heap = Heap::new(&mut region.0).unwrap();
        let before = heap.check().unwrap();
        assert_eq!(heap.allocate(0), None);
        assert_eq!(heap.check().unwrap(), before);
    }

    #[test]
    fn payloads_are_aligned_and_usable() {
        let mut region = arena();
        let mut heap = Heap::new(&mut region.0).unwrap();
        for size in [1, 7, 16, 33, 100, 250] {
            let ptr = heap.allocate(size).unwrap();
            assert_eq!(ptr.as_ptr() as usize % ALIGN, 0);
            unsafe {
                assert!(heap.usable_size(ptr.as_ptr()) >= size);
                ptr.as_ptr().write_bytes(0x5a, size);
            }
        }
        assert_consistent(&heap);
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn double_release_is_caught() {
        let mut region = arena();
        let mut heap = Heap::new(&mut region.0).unwrap();
        let ptr = heap.allocate(100).unwrap();
        let _fence = heap.allocate(100).unwrap();
        unsafe {
            heap.release(ptr.as_ptr());
            heap.release(ptr.as_ptr());
        }
    }

    #[test]
    #[should_panic(expected = "corrupt tags")]
    fn overwritten_footer_is_caught_on_release() {
        let mut region = arena();
        let mut heap = Heap::new(&mut region.0).unwrap();
        let ptr = heap.allocate(100).unwrap();
        let _fence = heap.allocate(100).unwrap();

        let block = Block::from_payload(heap.payload_offset(ptr.as_ptr()));
        let size = heap.header(block).size();
        heap.arena.write_word(block.footer_of(size), 0xdead_0000);
        unsafe { heap.release(ptr.as_ptr()) };
    }

    #[test]
    #[should_panic(expected = "outside the arena")]
    fn foreign_pointer_is_rejected() {
        let mut region = arena();
        let mut heap = Heap::new(&mut region.0).unwrap();
        let mut elsewhere = [0u64; 4];
        unsafe { heap.release(elsewhere.as_mut_ptr().cast()) };
    }

    #[test]
    fn released_block_is_reused_in_place() {
        let mut region = arena();
        let mut heap = Heap::new(&mut region.0).unwrap();
        let first = heap.allocate(100).unwrap();
        let _second = heap.allocate(100).unwrap();
        unsafe { heap.release(first.as_ptr()) };
        assert_consistent(&heap);

        let again = heap.allocate(90).unwrap();
        assert_eq!(again, first);
        assert_consistent(&heap);
    }

    #[test]
    fn neighbours_coalesce_on_release() {
        let mut region = arena();
        let mut heap = Heap::new(&mut region.0).unwrap();
        let a = heap.allocate(50).unwrap();
        let b = heap.allocate(50).unwrap();
        let _c = heap.allocate(50).unwrap();
        let block_size = adjusted_size(50).unwrap();

        unsafe { heap.release(b.as_ptr()) };
        unsafe { heap.release(a.as_ptr()) };
        assert_consistent(&heap);

        let first = heap.blocks().next().unwrap();
        assert!(!first.allocated);
        assert_eq!(first.size, 2 * block_size);
        assert_eq!(heap.arena.ptr_at(first.offset + WORD), a);
    }

    #[test]
    fn four_coalescing_cases() {
        let mut region = arena();
        let mut heap = Heap::new(&mut region.0).unwrap();
        let ptrs: Vec<_> = (0..6).map(|_| heap.allocate(40).unwrap()).collect();
        let _fence = heap.allocate(40).unwrap();

        unsafe {
            // both neighbours allocated
            heap.release(ptrs[1].as_ptr());
            assert_eq!(heap.check().unwrap().free_blocks, 2);
            // predecessor free
            heap.release(ptrs[2].as_ptr());
            assert_eq!(heap.check().unwrap().free_blocks, 2);
            // successor free
            heap.release(ptrs[0].as_ptr());
            assert_eq!(heap.check().unwrap().free_blocks, 2);
            // both free
            heap.release(ptrs[4].as_ptr());
            heap.release(ptrs[3].as_ptr());
            assert_eq!(heap.check().unwrap().free_blocks, 2);
        }
        let first = heap.blocks().next().unwrap();
        assert_eq!(first.size, 5 * adjusted_size(40).unwrap());
        assert!(!first.allocated);
    }

    #[test]
    fn large_request_exhausts_small_arena() {
        let mut region = arena();
        let mut heap = Heap::new(&mut region.0).unwrap();
        assert!(heap.allocate(4000).is_some());
        assert_eq!(heap.allocate(100), None);
        assert_consistent(&heap);
    }

    #[test]
    fn oversized_and_overflowing_requests_fail() {
        let mut region = arena();
        let mut heap = Heap::new(&mut region.0).unwrap();
        assert_eq!(heap.allocate(ARENA), None);
        assert_eq!(heap.allocate(usize::MAX), None);
        assert_eq!(heap.check().unwrap().free_blocks, 1);
    }

    #[test]
    fn small_remainder_is_not_split() {
        let mut region = arena();
        let mut heap = Heap::new(&mut region.0).unwrap();
        let whole = heap.capacity() - OVERHEAD;
        // leaves less than a minimum block behind
        let ptr = heap.allocate(whole - ALIGN).unwrap();
        let stats = heap.check().unwrap();
        assert_eq!(stats.free_blocks, 0);
        assert_eq!(unsafe { heap.usable_size(ptr.as_ptr()) }, whole);
    }

    #[test]
    fn round_trip_restores_single_block() {
        let mut region = arena();
        let mut heap = Heap::new(&mut region.0).unwrap();
        let sizes = [24, 300, 8, 64, 129, 512, 40, 96, 1, 700];
        let ptrs: Vec<_> = sizes.iter().map(|&s| heap.allocate(s).unwrap()).collect();
        assert_consistent(&heap);

        for &i in &[3, 0, 9, 5, 1, 7, 2, 8, 6, 4] {
            unsafe { heap.release(ptrs[i].as_ptr()) };
            assert_consistent(&heap);
        }
        let stats = heap.check().unwrap();
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.largest_free, heap.capacity());
    }

    #[test]
    fn first_fit_takes_head_of_larger_class() {
        let mut region = arena();
        let mut heap = Heap::new(&mut region.0).unwrap();
        let small = heap.allocate(40).unwrap();
        let _fence = heap.allocate(40).unwrap();
        unsafe { heap.release(small.as_ptr()) };

        // the freed small block is too small, the tail block serves it
        let big = heap.allocate(400).unwrap();
        assert_ne!(big, small);
        // the small hole is still there for a small request
        assert_eq!(heap.allocate(40).unwrap(), small);
        assert_consistent(&heap);
    }

    #[test]
    fn zeroed_allocation_clears_reused_memory() {
        let mut region = arena();
        let mut heap = Heap::new(&mut region.0).unwrap();
        let dirty = heap.allocate(64).unwrap();
        let _fence = heap.allocate(8).unwrap();
        unsafe {
            dirty.as_ptr().write_bytes(0xff, 64);
            heap.release(dirty.as_ptr());
        }
        let clean = heap.allocate_zeroed(64).unwrap();
        assert_eq!(clean, dirty);
        let bytes = unsafe { core::slice::from_raw_parts(clean.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn null_release_is_ignored() {
        let mut region = arena();
        let mut heap = Heap::new(&mut region.0).unwrap();
        let before = heap.check().unwrap();
        unsafe { heap.release(core::ptr::null_mut()) };
        assert_eq!(heap.check().unwrap(), before);
    }

    #[test]
    fn churn_keeps_invariants() {
        let mut region = arena();
        let mut heap = Heap::new(&mut region.0).unwrap();
        let mut live: Vec<(NonNull<u8>, usize, u8)> = Vec::new();
        // xorshift keeps the sequence deterministic
        let mut state = 0x2545_f491_u32;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        };

        for round in 0..400u32 {
            let roll = next();
            if roll % 3 != 0 || live.is_empty() {
                let size = (next() % 300 + 1) as usize;
                if let Some(ptr) = heap.allocate(size) {
                    let fill = round as u8;
                    unsafe { ptr.as_ptr().write_bytes(fill, size) };
                    live.push((ptr, size, fill));
                }
            } else {
                let (ptr, size, fill) = live.swap_remove(roll as usize % live.len());
                let bytes = unsafe { core::slice::from_raw_parts(ptr.as_ptr(), size) };
                assert!(bytes.iter().all(|&b| b == fill), "payload clobbered");
                unsafe { heap.release(ptr.as_ptr()) };
            }
            assert_consistent(&heap);
        }

        for (ptr, _, _) in live.drain(..) {
            unsafe { heap.release(ptr.as_ptr()) };
        }
        assert_eq!(heap.check().unwrap().free_blocks, 1);
    }
}
