//! Boundary-tag block layout.
//!
//! Every block in the arena is bracketed by two identical tag words:
//!
//! ```text
//!  offset        offset + WORD                         offset + size - WORD
//!  ┌────────┬─────────────────────────────────────────┬────────┐
//!  │ header │ payload (or prev/next links when free)  │ footer │
//!  └────────┴─────────────────────────────────────────┴────────┘
//! ```
//!
//! A tag packs the block size (always a multiple of [`ALIGN`]) with the
//! allocated flag in bit 0. The header lets us step forward, the footer of
//! the previous block lets us step backward.

use core::fmt;
use core::mem::size_of;

/// Machine word; also the width of one tag.
pub const WORD: usize = size_of::<usize>();

/// Payload alignment and block size granularity (two words).
pub const ALIGN: usize = 2 * WORD;

/// Header + footer.
pub const OVERHEAD: usize = 2 * WORD;

/// Header, footer and two free-list links.
pub const MIN_BLOCK: usize = 4 * WORD;

const _: () = assert!(MIN_BLOCK.is_power_of_two());

/// A size and an allocated flag packed into one word.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Tag(usize);

impl Tag {
    pub const ALLOCATED: usize = 0x1;
    pub const SIZE_MASK: usize = !(ALIGN - 1);

    #[inline]
    pub const fn new(size: usize, allocated: bool) -> Self {
        debug_assert!(size & !Self::SIZE_MASK == 0);
        Self(size | allocated as usize)
    }

    #[inline]
    pub const fn from_bits(bits: usize) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn size(self) -> usize {
        self.0 & Self::SIZE_MASK
    }

    #[inline]
    pub const fn is_allocated(self) -> bool {
        self.0 & Self::ALLOCATED != 0
    }

    #[inline]
    pub const fn is_free(self) -> bool {
        !self.is_allocated()
    }

    /// Same size, flag flipped to `allocated`.
    #[inline]
    pub const fn with_allocated(self, allocated: bool) -> Self {
        Self::new(self.size(), allocated)
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tag")
            .field("size", &self.size())
            .field("allocated", &self.is_allocated())
            .finish()
    }
}

/// A block, identified by the arena offset of its header.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Block(usize);

impl Block {
    #[inline]
    pub const fn at(offset: usize) -> Self {
        Self(offset)
    }

    #[inline]
    pub const fn offset(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn header_of(self) -> usize {
        self.0
    }

    /// Footer offset for a block of `size` bytes.
    #[inline]
    pub const fn footer_of(self, size: usize) -> usize {
        self.0 + size - WORD
    }

    #[inline]
    pub const fn payload(self) -> usize {
        self.0 + WORD
    }

    /// Block owning the payload at `payload`.
    #[inline]
    pub const fn from_payload(payload: usize) -> Self {
        Self(payload - WORD)
    }

    /// Free-list `prev` link slot.
    #[inline]
    pub(crate) const fn prev_link(self) -> usize {
        self.0 + WORD
    }

    /// Free-list `next` link slot.
    #[inline]
    pub(crate) const fn next_link(self) -> usize {
        self.0 + 2 * WORD
    }

    /// The block physically after this one, given this block's size.
    #[inline]
    pub const fn next_block(self, size: usize) -> Self {
        Self(self.0 + size)
    }

    /// The block physically before this one, given the size read from the
    /// footer that sits just below our header.
    #[inline]
    pub const fn prev_block(self, prev_size: usize) -> Self {
        Self(self.0 - prev_size)
    }

    /// Offset of the footer word belonging to the previous block.
    #[inline]
    pub const fn prev_footer(self) -> usize {
        self.0 - WORD
    }
}

/// Block size needed to serve a `size`-byte request, or `None` on overflow.
#[inline]
pub fn adjusted_size(size: usize) -> Option<usize> {
    if size <= MIN_BLOCK - OVERHEAD {
        return Some(MIN_BLOCK);
    }
    let padded = size.checked_add(OVERHEAD + ALIGN - 1)?;
    Some(padded & Tag::SIZE_MASK)
}

/// Payload bytes available in a block of `size` bytes.
#[inline]
pub const fn payload_capacity(size: usize) -> usize {
    size - OVERHEAD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_packs_size_and_flag() {
        let tag = Tag::new(96, true);
        assert_eq!(tag.size(), 96);
        assert!(tag.is_allocated());
        assert_eq!(tag.bits(), 96 | 1);

        let free = tag.with_allocated(false);
        assert_eq!(free.size(), 96);
        assert!(free.is_free());
        assert_eq!(Tag::from_bits(free.bits()), free);
    }

    #[test]
    fn zero_size_epilogue_tag() {
        let tag = Tag::new(0, true);
        assert_eq!(tag.size(), 0);
        assert!(tag.is_allocated());
    }

    #[test]
    fn size_mask_ignores_low_bits() {
        let tag = Tag::from_bits(ALIGN * 3 | Tag::ALLOCATED);
        assert_eq!(tag.size(), ALIGN * 3);
        assert_eq!(Tag::SIZE_MASK & (ALIGN - 1), 0);
    }

    #[test]
    fn neighbour_arithmetic() {
        let block = Block::at(64);
        assert_eq!(block.header_of(), 64);
        assert_eq!(block.footer_of(48), 64 + 48 - WORD);
        assert_eq!(block.payload(), 64 + WORD);
        assert_eq!(Block::from_payload(block.payload()), block);
        assert_eq!(block.next_block(48), Block::at(112));
        assert_eq!(block.prev_block(32), Block::at(32));
        assert_eq!(block.prev_footer(), 64 - WORD);
        assert_eq!(block.prev_link(), 64 + WORD);
        assert_eq!(block.next_link(), 64 + 2 * WORD);
    }

    #[test]
    fn adjusted_size_rounds_and_floors() {
        assert_eq!(adjusted_size(1), Some(MIN_BLOCK));
        assert_eq!(adjusted_size(MIN_BLOCK - OVERHEAD), Some(MIN_BLOCK));
        assert_eq!(adjusted_size(MIN_BLOCK - OVERHEAD + 1), Some(MIN_BLOCK + ALIGN));

        let asize = adjusted_size(100).unwrap();
        assert_eq!(asize % ALIGN, 0);
        assert!(payload_capacity(asize) >= 100);
        assert!(payload_capacity(asize) < 100 + ALIGN);
    }

    #[test]
    fn adjusted_size_overflow() {
        assert_eq!(adjusted_size(usize::MAX), None);
        assert_eq!(adjusted_size(usize::MAX - OVERHEAD), None);
    }
}
