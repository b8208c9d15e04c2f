//! Keeps track of whether the tail of the free list touches the break, and
//! gives trailing free memory back to the OS when it does.

use crate::{
    block::{HEADER_SIZE, MIN_BLOCK_SIZE},
    heap::Heap,
    kernel::BreakSource,
};

/// Relationship between the free list tail and the current break.
///
/// This is recomputed on demand rather than tracked through events: somebody
/// else may move the break between two calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Adjacency {
    /// No tail, or the tail ends below the break.
    NotAdjacent,
    /// The tail's last byte is the last byte before the break.
    Adjacent,
}

impl<B: BreakSource> Heap<B> {
    /// Compares the tail's end with the break and stores the result.
    pub(crate) fn refresh_adjacency(&mut self) -> Adjacency {
        let brk = self.source.current();

        self.adjacency = match self.free_list.tail() {
            Some(tail) if unsafe { tail.end() } == brk => Adjacency::Adjacent,
            _ => Adjacency::NotAdjacent,
        };

        self.adjacency
    }

    /// Lowers the break if the tail touches it and is larger than the trim
    /// threshold.
    ///
    /// The tail keeps `trim_retain` bytes. If that is too little to host a
    /// free block the whole tail, header included, goes back to the OS and the
    /// node disappears from the list.
    pub(crate) fn trim(&mut self) {
        if self.adjacency != Adjacency::Adjacent {
            return;
        }

        let Some(tail) = self.free_list.tail() else {
            return;
        };

        let size = unsafe { tail.size() };
        if size <= self.config.trim_threshold {
            return;
        }

        let retain = self.config.trim_retain;
        let keeps_block = retain >= MIN_BLOCK_SIZE;
        let release = if keeps_block {
            size - retain
        } else {
            size + HEADER_SIZE
        };

        // The list must stop referencing the memory before it is released.
        unsafe {
            if keeps_block {
                tail.set_size(retain);
            } else {
                self.free_list.remove(tail);
            }
        }

        if unsafe { self.source.sbrk(-(release as isize)) }.is_none() {
            log::warn!("the OS refused to take back {release} bytes, keeping them");
            unsafe {
                tail.set_size(size);
                if !keeps_block {
                    self.free_list.push_back(tail);
                }
            }
            return;
        }

        self.trims += 1;
        log::debug!(
            "trimmed {release} bytes from the arena, break is now {:p}",
            self.source.current()
        );

        self.refresh_adjacency();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        heap::tests::{heap_with, layout},
    };

    fn trimming_heap(retain: usize) -> crate::Heap<crate::SimulatedBreak> {
        let config = Config::new()
            .with_arena_size(1024)
            .with_growth_increment(1024)
            .with_trim_threshold(2048)
            .with_trim_retain(retain);

        heap_with(config, 1 << 20)
    }

    #[test]
    fn tail_touching_break_is_adjacent() {
        let mut heap = trimming_heap(0);

        assert_eq!(heap.refresh_adjacency(), Adjacency::Adjacent);
    }

    #[test]
    fn consumed_tail_is_not_adjacent() {
        let mut heap = trimming_heap(0);
        let _a = heap.allocate(512);
        let _b = heap.allocate(1024 - 512 - HEADER_SIZE);

        assert!(heap.free_list.is_empty());
        assert_eq!(heap.refresh_adjacency(), Adjacency::NotAdjacent);
    }

    #[test]
    fn foreign_break_move_breaks_adjacency() {
        let mut heap = trimming_heap(0);
        heap.source_mut().foreign_sbrk(64).unwrap();

        assert_eq!(heap.refresh_adjacency(), Adjacency::NotAdjacent);
    }

    #[test]
    fn small_tail_is_not_trimmed() {
        let mut heap = trimming_heap(0);
        heap.trim();

        assert_eq!(heap.trims, 0);
        assert_eq!(layout(&heap), vec![(0, 1024)]);
    }

    #[test]
    fn large_tail_is_released_whole() {
        let mut heap = trimming_heap(0);
        let a = heap.allocate(8);
        // Growth extends the tail, then the remainder is above the threshold.
        let b = heap.allocate(4000);

        unsafe { heap.free(b.as_ptr()) };

        assert_eq!(heap.trims, 1);
        assert_eq!(heap.free_list.len(), 0);
        assert_eq!(heap.source().used(), HEADER_SIZE + 16);
        assert_eq!(heap.check(), Ok(()));

        unsafe { heap.free(a.as_ptr()) };
        assert_eq!(layout(&heap), vec![(0, 16)]);
    }

    #[test]
    fn large_tail_keeps_retained_bytes() {
        let mut heap = trimming_heap(256);
        let _a = heap.allocate(8);
        let b = heap.allocate(4000);

        unsafe { heap.free(b.as_ptr()) };

        assert_eq!(heap.trims, 1);
        assert_eq!(layout(&heap), vec![(HEADER_SIZE + 16, 256)]);
        assert_eq!(heap.adjacency, Adjacency::Adjacent);
        assert_eq!(heap.source().used(), 2 * HEADER_SIZE + 16 + 256);
        assert_eq!(heap.check(), Ok(()));
    }

    #[test]
    fn allocation_trims_oversized_remainder() {
        let config = Config::new()
            .with_arena_size(8192)
            .with_growth_increment(1024)
            .with_trim_threshold(2048);
        let mut heap = heap_with(config, 1 << 20);
        assert_eq!(layout(&heap), vec![(0, 8192)]);

        let a = heap.allocate(16);

        // The remainder of the split sits above the threshold and touches the
        // break, so it goes back right away.
        assert_eq!(heap.trims, 1);
        assert!(heap.free_list.is_empty());
        assert_eq!(heap.source().used(), HEADER_SIZE + 16);
        assert_eq!(heap.adjacency, Adjacency::NotAdjacent);
        assert_eq!(unsafe { heap.usable_size(a) }, 16);
        assert_eq!(heap.check(), Ok(()));
    }

    #[test]
    fn allocation_trim_keeps_retained_bytes() {
        let config = Config::new()
            .with_arena_size(8192)
            .with_growth_increment(1024)
            .with_trim_threshold(2048)
            .with_trim_retain(256);
        let mut heap = heap_with(config, 1 << 20);

        let _a = heap.allocate(16);

        assert_eq!(heap.trims, 1);
        assert_eq!(layout(&heap), vec![(HEADER_SIZE + 16, 256)]);
        assert_eq!(heap.source().used(), 2 * HEADER_SIZE + 16 + 256);
        assert_eq!(heap.adjacency, Adjacency::Adjacent);
        assert_eq!(heap.check(), Ok(()));
    }

    #[test]
    fn refused_trim_keeps_the_tail() {
        let mut heap = trimming_heap(0);
        let _a = heap.allocate(8);
        let b = heap.allocate(4000);

        heap.config.trim_threshold = usize::MAX;
        unsafe { heap.free(b.as_ptr()) };
        heap.config.trim_threshold = 2048;

        let before = layout(&heap);
        let used = heap.source().used();

        // Pretend the tail reaches further down than the break can go.
        let tail = heap.free_list.tail().unwrap();
        let size = unsafe { tail.size() };
        unsafe { tail.set_size(used + 4096) };
        heap.trim();
        unsafe { tail.set_size(size) };

        assert_eq!(heap.trims, 0);
        assert_eq!(layout(&heap), before);
        assert_eq!(heap.source().used(), used);
        assert_eq!(heap.check(), Ok(()));
    }
}
