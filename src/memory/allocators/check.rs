//! Heap walking, statistics and the consistency checker.

use core::fmt;

use super::bins::{Link, SizeClass, NUM_CLASSES};
use super::block::{Block, Tag, ALIGN, MIN_BLOCK, OVERHEAD};
use super::heap::Heap;

/// One block as seen by a heap walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Arena offset of the header.
    pub offset: usize,
    pub size: usize,
    pub allocated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    /// Bytes between prologue and epilogue.
    pub capacity: usize,
    /// Bytes in allocated blocks, tags included.
    pub used: usize,
    /// Bytes in free blocks, tags included.
    pub free: usize,
    pub allocated_blocks: usize,
    pub free_blocks: usize,
    pub largest_free: usize,
}

impl HeapStats {
    fn record(&mut self, block: &BlockInfo) {
        if block.allocated {
            self.used += block.size;
            self.allocated_blocks += 1;
        } else {
            self.free += block.size;
            self.free_blocks += 1;
            self.largest_free = self.largest_free.max(block.size);
        }
    }
}

/// First invariant violation found by [`Heap::check`]. Offsets are arena
/// relative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckError {
    BadPrologue,
    BadEpilogue { offset: usize },
    Misaligned { offset: usize },
    BadSize { offset: usize, size: usize },
    TagMismatch { offset: usize },
    OutOfBounds { offset: usize },
    Uncoalesced { offset: usize },
    ListedNotFree { offset: usize },
    WrongClass { offset: usize, class: usize },
    BrokenLink { offset: usize },
    ListCycle { class: usize },
    UnlistedFree { listed: usize, free: usize },
    BitmapMismatch { class: usize },
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            CheckError::BadPrologue => write!(f, "prologue damaged"),
            CheckError::BadEpilogue { offset } => write!(f, "no epilogue at {:#x}", offset),
            CheckError::Misaligned { offset } => {
                write!(f, "block {:#x} payload misaligned", offset)
            }
            CheckError::BadSize { offset, size } => {
                write!(f, "block {:#x} has invalid size {}", offset, size)
            }
            CheckError::TagMismatch { offset } => {
                write!(f, "block {:#x} header and footer differ", offset)
            }
            CheckError::OutOfBounds { offset } => {
                write!(f, "block {:#x} runs past the epilogue", offset)
            }
            CheckError::Uncoalesced { offset } => {
                write!(f, "free blocks at {:#x} and its successor were not merged", offset)
            }
            CheckError::ListedNotFree { offset } => {
                write!(f, "block {:#x} is listed but not a free block", offset)
            }
            CheckError::WrongClass { offset, class } => {
                write!(f, "block {:#x} filed in wrong class {}", offset, class)
            }
            CheckError::BrokenLink { offset } => {
                write!(f, "block {:#x} has a broken back-link", offset)
            }
            CheckError::ListCycle { class } => write!(f, "class {} list does not terminate", class),
            CheckError::UnlistedFree { listed, free } => {
                write!(f, "{} blocks listed but {} free blocks in the arena", listed, free)
            }
            CheckError::BitmapMismatch { class } => {
                write!(f, "non-empty bit for class {} disagrees with its list", class)
            }
        }
    }
}

/// Arena-order walk from the first real block up to the epilogue.
pub struct Blocks<'h, 'a> {
    heap: &'h Heap<'a>,
    cursor: Block,
}

impl Iterator for Blocks<'_, '_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        if self.cursor >= self.heap.end {
            return None;
        }
        let tag = self.heap.header(self.cursor);
        // a zero size would never advance; only the epilogue has one
        if tag.size() == 0 {
            return None;
        }
        let info = BlockInfo {
            offset: self.cursor.offset(),
            size: tag.size(),
            allocated: tag.is_allocated(),
        };
        self.cursor = self.cursor.next_block(tag.size());
        Some(info)
    }
}

impl<'a> Heap<'a> {
    pub fn blocks(&self) -> Blocks<'_, 'a> {
        Blocks {
            heap: self,
            cursor: self.start,
        }
    }

    /// Totals from a heap walk. Assumes the tags are sound; use
    /// [`check`](Self::check) when they might not be.
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            capacity: self.capacity(),
            ..HeapStats::default()
        };
        for block in self.blocks() {
            stats.record(&block);
        }
        stats
    }

    /// Log every block over serial.
    pub fn dump(&self) {
        crate::serial_println!(
            "HEAP: base {:#x}, {} bytes between prologue and epilogue",
            self.arena.base_addr(),
            self.capacity()
        );
        for block in self.blocks() {
            crate::serial_println!(
                "HEAP:   {:#08x} {:>8} {}",
                block.offset,
                block.size,
                if block.allocated { "allocated" } else { "free" }
            );
        }
        crate::serial_println!("HEAP: free classes {:#b}", self.bins.nonempty_mask());
    }

    /// Verify every structural invariant of the arena and the bins.
    pub fn check(&self) -> Result<HeapStats, CheckError> {
        let prologue = Block::at(self.start.offset() - OVERHEAD);
        let expected = Tag::new(OVERHEAD, true);
        if self.header(prologue) != expected || self.prev_footer(self.start) != expected {
            return Err(CheckError::BadPrologue);
        }

        let stats = self.check_blocks()?;
        let listed = self.check_bins()?;
        if listed != stats.free_blocks {
            return Err(CheckError::UnlistedFree {
                listed,
                free: stats.free_blocks,
            });
        }
        Ok(stats)
    }

    fn check_blocks(&self) -> Result<HeapStats, CheckError> {
        let mut stats = HeapStats {
            capacity: self.capacity(),
            ..HeapStats::default()
        };
        let mut cursor = self.start;
        let mut prev_free = false;

        while cursor < self.end {
            let offset = cursor.offset();
            let tag = self.header(cursor);
            let size = tag.size();

            if (self.arena.base_addr() + cursor.payload()) % ALIGN != 0 {
                return Err(CheckError::Misaligned { offset });
            }
            if size < MIN_BLOCK || size % ALIGN != 0 {
                return Err(CheckError::BadSize { offset, size });
            }
            if offset + size > self.end.offset() {
                return Err(CheckError::OutOfBounds { offset });
            }
            if self.footer(cursor) != tag {
                return Err(CheckError::TagMismatch { offset });
            }
            if tag.is_free() && prev_free {
                return Err(CheckError::Uncoalesced {
                    offset: offset - self.prev_footer(cursor).size(),
                });
            }

            prev_free = tag.is_free();
            stats.record(&BlockInfo {
                offset,
                size,
                allocated: tag.is_allocated(),
            });
            cursor = cursor.next_block(size);
        }

        if cursor != self.end || self.header(self.end) != Tag::new(0, true) {
            return Err(CheckError::BadEpilogue {
                offset: self.end.offset(),
            });
        }
        Ok(stats)
    }

    /// Walk every class list; returns the number of listed blocks.
    fn check_bins(&self) -> Result<usize, CheckError> {
        // every listed block is at least MIN_BLOCK, so a longer list loops
        let limit = self.capacity() / MIN_BLOCK;
        let mut listed = 0;

        for class in SizeClass::all() {
            let has_members = self.bins.first(class).is_some();
            if has_members == self.bins.is_empty(class) {
                return Err(CheckError::BitmapMismatch {
                    class: class.index(),
                });
            }

            let mut prev = Link::Sentinel(class);
            let mut link = self.bins.next_of(&self.arena, prev);
            let mut length = 0;
            while let Link::Block(block) = link {
                length += 1;
                if length > limit {
                    return Err(CheckError::ListCycle {
                        class: class.index(),
                    });
                }
                self.check_member(block, class)?;
                if self.bins.prev_of(&self.arena, link) != prev {
                    return Err(CheckError::BrokenLink {
                        offset: block.offset(),
                    });
                }
                prev = link;
                link = self.bins.next_of(&self.arena, link);
            }
            if link != Link::Sentinel(class) || self.bins.prev_of(&self.arena, link) != prev {
                return Err(CheckError::BrokenLink {
                    offset: match prev {
                        Link::Block(block) => block.offset(),
                        Link::Sentinel(_) => 0,
                    },
                });
            }
            listed += length;
        }

        if self.bins.nonempty_mask() >> NUM_CLASSES != 0 {
            return Err(CheckError::BitmapMismatch { class: NUM_CLASSES });
        }
        Ok(listed)
    }

    fn check_member(&self, block: Block, class: SizeClass) -> Result<(), CheckError> {
        let offset = block.offset();
        let in_range = block >= self.start
            && block < self.end
            && (offset - self.start.offset()) % ALIGN == 0;
        if !in_range {
            return Err(CheckError::ListedNotFree { offset });
        }
        let tag = self.header(block);
        if tag.is_allocated() || tag.size() < MIN_BLOCK || offset + tag.size() > self.end.offset() {
            return Err(CheckError::ListedNotFree { offset });
        }
        if self.footer(block) != tag {
            return Err(CheckError::TagMismatch { offset });
        }
        if SizeClass::of(tag.size()) != class {
            return Err(CheckError::WrongClass {
                offset,
                class: class.index(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::heap::tests::arena;
    use super::*;

    #[test]
    fn stats_add_up() {
        let mut region = arena();
        let mut heap = Heap::new(&mut region.0).unwrap();
        let a = heap.allocate(100).unwrap();
        let _b = heap.allocate(200).unwrap();
        unsafe { heap.release(a.as_ptr()) };

        let stats = heap.check().unwrap();
        assert_eq!(stats, heap.stats());
        assert_eq!(stats.used + stats.free, stats.capacity);
        assert_eq!(stats.allocated_blocks, 1);
        assert_eq!(stats.free_blocks, 2);
        assert!(stats.largest_free > stats.free / 2);
    }

    #[test]
    fn walk_covers_the_arena_in_order() {
        let mut region = arena();
        let mut heap = Heap::new(&mut region.0).unwrap();
        for size in [16, 64, 256] {
            heap.allocate(size).unwrap();
        }
        let mut expected = heap.start.offset();
        let mut count = 0;
        for block in heap.blocks() {
            assert_eq!(block.offset, expected);
            expected += block.size;
            count += 1;
        }
        assert_eq!(expected, heap.end.offset());
        assert_eq!(count, 4);
    }

    #[test]
    fn detects_tag_mismatch() {
        let mut region = arena();
        let mut heap = Heap::new(&mut region.0).unwrap();
        let ptr = heap.allocate(64).unwrap();
        let block = Block::from_payload(heap.payload_offset(ptr.as_ptr()));
        let size = heap.header(block).size();
        heap.arena.write_word(block.footer_of(size), Tag::new(size, false).bits());
        assert_eq!(
            heap.check(),
            Err(CheckError::TagMismatch {
                offset: block.offset()
            })
        );
    }

    #[test]
    fn detects_uncoalesced_neighbours() {
        let mut region = arena();
        let mut heap = Heap::new(&mut region.0).unwrap();
        let a = heap.allocate(64).unwrap();
        let b = heap.allocate(64).unwrap();
        let _fence = heap.allocate(64).unwrap();

        // free both behind the allocator's back
        for ptr in [a, b] {
            let block = Block::from_payload(heap.payload_offset(ptr.as_ptr()));
            let tag = heap.header(block);
            heap.set_tags(block, tag.with_allocated(false));
        }
        let first = Block::from_payload(heap.payload_offset(a.as_ptr()));
        assert_eq!(
            heap.check(),
            Err(CheckError::Uncoalesced {
                offset: first.offset()
            })
        );
    }

    #[test]
    fn detects_unlisted_free_block() {
        let mut region = arena();
        let mut heap = Heap::new(&mut region.0).unwrap();
        let a = heap.allocate(64).unwrap();
        let _fence = heap.allocate(64).unwrap();
        let block = Block::from_payload(heap.payload_offset(a.as_ptr()));
        let tag = heap.header(block);
        heap.set_tags(block, tag.with_allocated(false));

        assert_eq!(heap.check(), Err(CheckError::UnlistedFree { listed: 1, free: 2 }));
    }

    #[test]
    fn detects_damaged_epilogue() {
        let mut region = arena();
        let mut heap = Heap::new(&mut region.0).unwrap();
        let end = heap.end;
        heap.arena.write_word(end.header_of(), Tag::new(0, false).bits());
        assert_eq!(
            heap.check(),
            Err(CheckError::BadEpilogue {
                offset: end.offset()
            })
        );
    }

    #[test]
    fn detects_damaged_prologue() {
        let mut region = arena();
        let mut heap = Heap::new(&mut region.0).unwrap();
        let footer = heap.start.prev_footer();
        heap.arena.write_word(footer, 0);
        assert_eq!(heap.check(), Err(CheckError::BadPrologue));
    }

    #[test]
    fn error_messages_name_the_block() {
        let message = format!("{}", CheckError::TagMismatch { offset: 0x40 });
        assert!(message.contains("0x40"));
    }
}
