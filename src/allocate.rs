use std::ptr::NonNull;

use crate::{
    block::{Block, HEADER_SIZE, MIN_BLOCK_SIZE},
    error::HeapError,
    heap::Heap,
    kernel::BreakSource,
    utils::{ALIGNMENT, align},
};

/// Largest request we even try to serve. Anything above can't be expressed
/// as a break adjustment anyway.
const MAX_REQUEST: usize = isize::MAX as usize / 2;

/// Payload size actually reserved for a request of `size` bytes: at least
/// [`MIN_BLOCK_SIZE`] so the block can host the free list links later, and a
/// multiple of the word size.
#[inline]
pub(crate) fn payload_size(size: usize) -> Option<usize> {
    if size > MAX_REQUEST {
        return None;
    }

    Some(align(size.max(MIN_BLOCK_SIZE), ALIGNMENT))
}

impl<B: BreakSource> Heap<B> {
    /// Same as [`Heap::allocate`] but hands the error back instead of halting.
    pub fn try_allocate(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        let needed = payload_size(size).ok_or(HeapError::OutOfMemory { requested: size })?;

        // Growth decides between extending the tail and appending a block
        // based on this.
        self.refresh_adjacency();

        let block = match self.find_first_fit(needed) {
            Some(block) => block,
            None => self.grow(needed)?,
        };

        let payload = unsafe { self.take(block, needed) };

        log::trace!(
            "allocate({size}) -> {:p} ({} usable bytes)",
            payload.as_ptr(),
            unsafe { block.size() }
        );

        self.refresh_adjacency();
        self.trim();

        Ok(payload)
    }

    /// Returns the first block in address order with at least `size` bytes.
    pub(crate) fn find_first_fit(&self, size: usize) -> Option<Block> {
        self.free_list
            .iter()
            .find(|block| unsafe { block.size() } >= size)
    }

    /// Hands `size` bytes of the free `block` to the caller.
    ///
    /// If what is left after the request can still host a header and a
    /// minimum payload, the block is split and the remainder takes the
    /// block's place in the list. Otherwise the whole block is consumed and
    /// the caller gets the slack too.
    ///
    /// ```text
    /// Split:
    /// +--------+-----------------+--------+-----------------------+
    /// | Header |  size (caller)  | Header |   remainder (free)    |
    /// +--------+-----------------+--------+-----------------------+
    ///
    /// Consume:
    /// +--------+---------------------------+
    /// | Header |  size + slack (caller)    |
    /// +--------+---------------------------+
    /// ```
    pub(crate) unsafe fn take(&mut self, block: Block, size: usize) -> NonNull<u8> {
        unsafe {
            let available = block.size();
            debug_assert!(available >= size);

            let remainder = available - size;

            if remainder >= HEADER_SIZE + MIN_BLOCK_SIZE {
                let rest = Block::at(block.as_ptr().add(HEADER_SIZE + size));
                rest.set_size(remainder - HEADER_SIZE);
                self.free_list.replace(block, rest);
                block.set_size(size);
            } else {
                self.free_list.remove(block);
            }

            block.payload()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::tests::{layout, offset, small_heap};

    #[test]
    fn payload_size_is_clamped_and_aligned() {
        assert_eq!(payload_size(0), Some(MIN_BLOCK_SIZE));
        assert_eq!(payload_size(1), Some(MIN_BLOCK_SIZE));
        assert_eq!(payload_size(MIN_BLOCK_SIZE + 1), Some(MIN_BLOCK_SIZE + 8));
        assert_eq!(payload_size(100), Some(104));
        assert_eq!(payload_size(usize::MAX), None);
    }

    #[test]
    fn allocations_are_word_aligned_and_ordered() {
        let mut heap = small_heap();

        let a = heap.allocate(3);
        let b = heap.allocate(17);
        let c = heap.allocate(64);

        for ptr in [a, b, c] {
            assert_eq!(ptr.as_ptr().addr() % ALIGNMENT, 0);
        }

        assert_eq!(offset(&heap, a), HEADER_SIZE);
        assert_eq!(offset(&heap, b), HEADER_SIZE + 16 + HEADER_SIZE);
        assert_eq!(offset(&heap, c), HEADER_SIZE + 16 + HEADER_SIZE + 24 + HEADER_SIZE);
        assert_eq!(heap.check(), Ok(()));
    }

    #[test]
    fn split_leaves_remainder_in_place() {
        let mut heap = small_heap();
        let _a = heap.allocate(100);

        assert_eq!(layout(&heap), vec![(HEADER_SIZE + 104, 1024 - 104 - HEADER_SIZE)]);
    }

    #[test]
    fn small_remainder_is_consumed_whole() {
        let mut heap = small_heap();

        // Leave a remainder that can hold a header but not the links.
        let request = 1024 - HEADER_SIZE - 8;
        let a = heap.allocate(request);

        assert!(heap.free_list.is_empty());
        assert_eq!(unsafe { heap.usable_size(a) }, 1024);
        assert_eq!(heap.grows, 0);
    }

    #[test]
    fn remainder_of_exactly_one_minimum_block_is_split() {
        let mut heap = small_heap();

        let request = 1024 - HEADER_SIZE - MIN_BLOCK_SIZE;
        let a = heap.allocate(request);

        assert_eq!(unsafe { heap.usable_size(a) }, request);
        assert_eq!(layout(&heap), vec![(HEADER_SIZE + request, MIN_BLOCK_SIZE)]);
    }

    #[test]
    fn first_fit_picks_lowest_address() {
        let mut heap = small_heap();
        let a = heap.allocate(64);
        let _b = heap.allocate(16);
        let c = heap.allocate(64);
        let _d = heap.allocate(16);

        unsafe {
            heap.free(a.as_ptr());
            heap.free(c.as_ptr());
        }

        // Both holes fit, the lower one wins, every time.
        let first = heap.allocate(64);
        assert_eq!(first, a);
        unsafe { heap.free(first.as_ptr()) };
        assert_eq!(heap.allocate(64), a);
    }

    #[test]
    fn first_fit_skips_small_holes() {
        let mut heap = small_heap();
        let a = heap.allocate(16);
        let _b = heap.allocate(16);
        let c = heap.allocate(128);
        let _d = heap.allocate(16);

        unsafe {
            heap.free(a.as_ptr());
            heap.free(c.as_ptr());
        }

        assert_eq!(heap.allocate(100), c);
    }

    #[test]
    fn zero_behaves_like_minimum_block() {
        let mut zero = small_heap();
        let mut min = small_heap();

        let a = zero.allocate(0);
        let b = min.allocate(MIN_BLOCK_SIZE);

        assert_eq!(offset(&zero, a), offset(&min, b));
        assert_eq!(layout(&zero), layout(&min));
        unsafe { assert_eq!(zero.usable_size(a), min.usable_size(b)) };
    }

    #[test]
    fn absurd_request_is_out_of_memory() {
        let mut heap = small_heap();

        assert_eq!(
            heap.try_allocate(usize::MAX),
            Err(HeapError::OutOfMemory {
                requested: usize::MAX
            })
        );
        assert_eq!(layout(&heap), vec![(0, 1024)]);
    }

    #[test]
    fn payload_is_writable() {
        let mut heap = small_heap();
        let a = heap.allocate(32);
        let b = heap.allocate(32);

        unsafe {
            a.as_ptr().write_bytes(0xAA, 32);
            b.as_ptr().write_bytes(0xBB, 32);

            assert!((0..32).all(|i| *a.as_ptr().add(i) == 0xAA));
            assert_eq!(heap.usable_size(a), 32);
        }
        assert_eq!(heap.check(), Ok(()));
    }
}
