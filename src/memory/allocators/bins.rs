//! Segregated free lists.
//!
//! Free blocks are filed by size class: class `k` holds blocks whose size is
//! in `[2^k, 2^(k+1))`, and the last class also takes everything larger.
//! Each class is a circular doubly linked list anchored at a sentinel that
//! lives here, outside the arena; the links of real members live in the
//! first two payload words of the free block itself.

use super::arena::Arena;
use super::block::{Block, Tag, MIN_BLOCK};

/// Smallest class: a minimum-size block.
pub const MIN_CLASS: u32 = MIN_BLOCK.trailing_zeros();

/// Largest explicit class; also the catch-all.
pub const MAX_CLASS: u32 = 20;

pub const NUM_CLASSES: usize = (MAX_CLASS - MIN_CLASS + 1) as usize;

const _: () = assert!(NUM_CLASSES <= u32::BITS as usize);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SizeClass(u8);

impl SizeClass {
    pub const SMALLEST: SizeClass = SizeClass(0);
    pub const LARGEST: SizeClass = SizeClass((NUM_CLASSES - 1) as u8);

    /// Class whose range contains `size`.
    pub fn of(size: usize) -> Self {
        let log = size.max(1).ilog2().clamp(MIN_CLASS, MAX_CLASS);
        Self((log - MIN_CLASS) as u8)
    }

    pub fn from_index(index: usize) -> Option<Self> {
        (index < NUM_CLASSES).then_some(Self(index as u8))
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Smallest block size filed in this class.
    pub const fn lower_bound(self) -> usize {
        1 << (MIN_CLASS as usize + self.index())
    }

    /// First size no longer in this class; `None` for the catch-all.
    pub const fn upper_bound(self) -> Option<usize> {
        if self.index() == NUM_CLASSES - 1 {
            None
        } else {
            Some(self.lower_bound() << 1)
        }
    }

    pub const fn is_largest(self) -> bool {
        self.index() == NUM_CLASSES - 1
    }

    pub fn contains(self, size: usize) -> bool {
        Self::of(size) == self
    }

    pub fn all() -> impl Iterator<Item = SizeClass> {
        (0..NUM_CLASSES as u8).map(SizeClass)
    }
}

/// A free-list link: either another free block or the sentinel of a class.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Link {
    Sentinel(SizeClass),
    Block(Block),
}

impl Link {
    /// Sentinels encode at the very top of the word range, where no arena
    /// offset can reach.
    pub const fn encode(self) -> usize {
        match self {
            Link::Sentinel(class) => usize::MAX - class.index(),
            Link::Block(block) => block.offset(),
        }
    }

    pub const fn decode(word: usize) -> Self {
        let distance = usize::MAX - word;
        if distance < NUM_CLASSES {
            Link::Sentinel(SizeClass(distance as u8))
        } else {
            Link::Block(Block::at(word))
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Sentinel {
    prev: Link,
    next: Link,
}

impl Sentinel {
    const fn empty(class: SizeClass) -> Self {
        Self {
            prev: Link::Sentinel(class),
            next: Link::Sentinel(class),
        }
    }
}

pub struct FreeBins {
    sentinels: [Sentinel; NUM_CLASSES],
    /// Bit `k` set iff class `k` has at least one member.
    nonempty: u32,
}

impl FreeBins {
    pub fn new() -> Self {
        let mut sentinels = [Sentinel::empty(SizeClass::SMALLEST); NUM_CLASSES];
        for class in SizeClass::all() {
            sentinels[class.index()] = Sentinel::empty(class);
        }
        Self {
            sentinels,
            nonempty: 0,
        }
    }

    pub fn is_empty(&self, class: SizeClass) -> bool {
        self.nonempty & (1 << class.index()) == 0
    }

    pub(crate) fn nonempty_mask(&self) -> u32 {
        self.nonempty
    }

    /// First member of `class`.
    pub fn first(&self, class: SizeClass) -> Option<Block> {
        match self.sentinels[class.index()].next {
            Link::Block(block) => Some(block),
            Link::Sentinel(_) => None,
        }
    }

    /// Member after `block` in its list.
    pub fn next_member(&self, arena: &Arena<'_>, block: Block) -> Option<Block> {
        match self.next_of(arena, Link::Block(block)) {
            Link::Block(next) => Some(next),
            Link::Sentinel(_) => None,
        }
    }

    /// Nearest class strictly above `class` with a member.
    pub fn next_nonempty_above(&self, class: SizeClass) -> Option<SizeClass> {
        let above = self.nonempty.checked_shr(class.index() as u32 + 1)?;
        if above == 0 {
            return None;
        }
        SizeClass::from_index(class.index() + 1 + above.trailing_zeros() as usize)
    }

    /// Link `block` in as the new head of `class`.
    pub fn insert(&mut self, arena: &mut Arena<'_>, block: Block, class: SizeClass) {
        let head = Link::Sentinel(class);
        let old_first = self.sentinels[class.index()].next;

        self.set_prev(arena, Link::Block(block), head);
        self.set_next(arena, Link::Block(block), old_first);
        self.set_prev(arena, old_first, Link::Block(block));
        self.sentinels[class.index()].next = Link::Block(block);

        self.nonempty |= 1 << class.index();
    }

    /// Unlink `block` from whichever list holds it.
    pub fn remove(&mut self, arena: &mut Arena<'_>, block: Block) {
        let prev = self.prev_of(arena, Link::Block(block));
        let next = self.next_of(arena, Link::Block(block));

        self.set_next(arena, prev, next);
        self.set_prev(arena, next, prev);

        // prev == next only when both are the sentinel: the list is now empty
        if let (Link::Sentinel(class), Link::Sentinel(_)) = (prev, next) {
            self.nonempty &= !(1 << class.index());
        }
    }

    pub(crate) fn prev_of(&self, arena: &Arena<'_>, link: Link) -> Link {
        match link {
            Link::Sentinel(class) => self.sentinels[class.index()].prev,
            Link::Block(block) => {
                debug_assert_free(arena, block);
                Link::decode(arena.read_word(block.prev_link()))
            }
        }
    }

    pub(crate) fn next_of(&self, arena: &Arena<'_>, link: Link) -> Link {
        match link {
            Link::Sentinel(class) => self.sentinels[class.index()].next,
            Link::Block(block) => {
                debug_assert_free(arena, block);
                Link::decode(arena.read_word(block.next_link()))
            }
        }
    }

    fn set_prev(&mut self, arena: &mut Arena<'_>, link: Link, prev: Link) {
        match link {
            Link::Sentinel(class) => self.sentinels[class.index()].prev = prev,
            Link::Block(block) => arena.write_word(block.prev_link(), prev.encode()),
        }
    }

    fn set_next(&mut self, arena: &mut Arena<'_>, link: Link, next: Link) {
        match link {
            Link::Sentinel(class) => self.sentinels[class.index()].next = next,
            Link::Block(block) => arena.write_word(block.next_link(), next.encode()),
        }
    }
}

/// Link words are payload bytes once a block is handed out.
#[inline]
fn debug_assert_free(arena: &Arena<'_>, block: Block) {
    debug_assert!(
        Tag::from_bits(arena.read_word(block.header_of())).is_free(),
        "HEAP: free-list link read through allocated block {:#x}",
        block.offset()
    );
}

impl Default for FreeBins {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::allocators::block::WORD;

    #[repr(C, align(16))]
    struct Region([u8; 1024]);

    fn members(bins: &FreeBins, arena: &Arena<'_>, class: SizeClass) -> Vec<usize> {
        let mut out = Vec::new();
        let mut cursor = bins.first(class);
        while let Some(block) = cursor {
            out.push(block.offset());
            cursor = bins.next_member(arena, block);
        }
        out
    }

    #[test]
    fn class_boundaries() {
        assert_eq!(SizeClass::of(MIN_BLOCK), SizeClass::SMALLEST);
        assert_eq!(SizeClass::of(MIN_BLOCK * 2 - 1), SizeClass::SMALLEST);
        assert_eq!(SizeClass::of(MIN_BLOCK * 2).index(), 1);
        assert_eq!(SizeClass::of(1 << MAX_CLASS), SizeClass::LARGEST);
        assert_eq!(SizeClass::of(usize::MAX), SizeClass::LARGEST);
        // below the minimum still files in the smallest class
        assert_eq!(SizeClass::of(1), SizeClass::SMALLEST);
    }

    #[test]
    fn bounds_are_contiguous() {
        let mut expected = MIN_BLOCK;
        for class in SizeClass::all() {
            assert_eq!(class.lower_bound(), expected);
            assert!(class.contains(class.lower_bound()));
            match class.upper_bound() {
                Some(upper) => {
                    assert!(class.contains(upper - 1));
                    assert!(!class.contains(upper));
                    expected = upper;
                }
                None => assert!(class.is_largest()),
            }
        }
    }

    #[test]
    fn link_encoding() {
        for class in SizeClass::all() {
            assert_eq!(Link::decode(Link::Sentinel(class).encode()), Link::Sentinel(class));
        }
        let block = Link::Block(Block::at(4096));
        assert_eq!(Link::decode(block.encode()), block);
    }

    #[test]
    fn insert_at_head_and_remove_anywhere() {
        let mut region = Region([0; 1024]);
        let mut arena = Arena::new(&mut region.0);
        let mut bins = FreeBins::new();
        let class = SizeClass::of(64);

        assert!(bins.is_empty(class));
        for offset in [0, 128, 256] {
            bins.insert(&mut arena, Block::at(offset), class);
        }
        assert!(!bins.is_empty(class));
        assert_eq!(members(&bins, &arena, class), vec![256, 128, 0]);

        bins.remove(&mut arena, Block::at(128));
        assert_eq!(members(&bins, &arena, class), vec![256, 0]);
        bins.remove(&mut arena, Block::at(256));
        assert_eq!(members(&bins, &arena, class), vec![0]);
        bins.remove(&mut arena, Block::at(0));
        assert!(members(&bins, &arena, class).is_empty());
        assert!(bins.is_empty(class));
        assert_eq!(bins.first(class), None);
    }

    #[test]
    fn links_live_in_payload() {
        let mut region = Region([0; 1024]);
        let mut arena = Arena::new(&mut region.0);
        let mut bins = FreeBins::new();
        let class = SizeClass::SMALLEST;

        bins.insert(&mut arena, Block::at(64), class);
        assert_eq!(arena.read_word(64 + WORD), Link::Sentinel(class).encode());
        assert_eq!(arena.read_word(64 + 2 * WORD), Link::Sentinel(class).encode());
    }

    #[test]
    fn bitmap_search() {
        let mut region = Region([0; 1024]);
        let mut arena = Arena::new(&mut region.0);
        let mut bins = FreeBins::new();

        assert_eq!(bins.next_nonempty_above(SizeClass::SMALLEST), None);
        let big = SizeClass::from_index(4).unwrap();
        bins.insert(&mut arena, Block::at(0), big);
        assert_eq!(bins.next_nonempty_above(SizeClass::SMALLEST), Some(big));
        assert_eq!(bins.next_nonempty_above(big), None);
        assert_eq!(bins.next_nonempty_above(SizeClass::LARGEST), None);
        assert_eq!(bins.nonempty_mask(), 1 << 4);
    }
}
