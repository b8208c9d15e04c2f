use std::ptr::NonNull;

use crate::{
    block::{Block, HEADER_SIZE, MIN_BLOCK_SIZE},
    config::Config,
    error::{Corruption, HeapError, fatal},
    freelist::FreeList,
    kernel::BreakSource,
    tracker::Adjacency,
    utils::{ALIGNMENT, padding_for},
};

/// The arena and everything the allocator knows about it.
///
/// ```text
///  start                                                          break
///    |                                                              |
///    v                                                              v
///    +--------+------+--------+---------+--------+-----------------+
///    | Header | used | Header |  free   | Header |      free       |
///    +--------+------+--------+---------+--------+-----------------+
///                             ^                  ^
///                            head               tail
/// ```
///
/// A heap is created once with [`Heap::initialize`] and from then on serves
/// [`Heap::allocate`] and [`Heap::free`]. There is no internal locking: the
/// heap is neither `Send` nor `Sync`, so callers that share one across
/// threads have to serialize access themselves.
pub struct Heap<B: BreakSource> {
    pub(crate) free_list: FreeList,
    pub(crate) source: B,
    /// Header address of the first block ever claimed.
    pub(crate) start: *mut u8,
    pub(crate) adjacency: Adjacency,
    pub(crate) config: Config,
    pub(crate) grows: usize,
    pub(crate) trims: usize,
}

/// Snapshot of the heap's bookkeeping, see [`Heap::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub free_blocks: usize,
    /// Sum of the payload of every free block.
    pub free_bytes: usize,
    pub largest_free: usize,
    /// Bytes between the arena start and the current break.
    pub arena_bytes: usize,
    pub grows: usize,
    pub trims: usize,
}

impl<B: BreakSource> Heap<B> {
    /// Claims the first block from `source`.
    ///
    /// The current break is rounded up to the word size first; whatever
    /// padding that takes is never part of a block. The first block spans the
    /// rest of the grant and has exactly `config.arena_size` usable bytes.
    pub fn try_initialize(mut source: B, config: Config) -> Result<Self, HeapError> {
        let config = config.validate()?;

        let padding = padding_for(source.current());
        let requested = padding + HEADER_SIZE + config.arena_size;

        let prev = unsafe { source.sbrk(requested as isize) }
            .ok_or(HeapError::OutOfMemory { requested })?;

        let start = prev.wrapping_add(padding_for(prev));
        let granted_end = prev.wrapping_add(requested);

        let mut heap = Self {
            free_list: FreeList::new(),
            source,
            start,
            adjacency: Adjacency::NotAdjacent,
            config,
            grows: 0,
            trims: 0,
        };

        unsafe {
            let block = Block::at(start);
            block.set_size(granted_end.addr() - start.addr() - HEADER_SIZE);
            heap.free_list.push_back(block);
        }

        heap.refresh_adjacency();

        log::debug!(
            "initialized arena at {start:p} with {} usable bytes",
            config.arena_size
        );

        Ok(heap)
    }

    /// Same as [`Heap::try_initialize`], halting if the OS refuses the first
    /// grant.
    pub fn initialize(source: B, config: Config) -> Self {
        Self::try_initialize(source, config).unwrap_or_else(|err| fatal(err))
    }

    /// Returns a pointer to at least `size` usable bytes, aligned to the word
    /// size. Halts if the OS refuses to grow the arena.
    pub fn allocate(&mut self, size: usize) -> NonNull<u8> {
        self.try_allocate(size).unwrap_or_else(|err| fatal(err))
    }

    /// Gives the block behind `ptr` back to the heap. Halts on corruption.
    ///
    /// **SAFETY**: `ptr` must be null or a pointer returned by this heap's
    /// allocate that was not freed since. Freeing anything else is detected
    /// on a best-effort basis only.
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        if let Err(err) = unsafe { self.try_free(ptr) } {
            fatal(err);
        }
    }

    /// Usable bytes of the allocated block behind `ptr`, which may be more
    /// than what was asked for.
    ///
    /// **SAFETY**: `ptr` must be a live allocation of this heap.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        unsafe { Block::at(Block::from_payload(ptr)).size() }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Header address of the first block of the arena.
    pub fn arena_start(&self) -> *mut u8 {
        self.start
    }

    pub fn source(&self) -> &B {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut B {
        &mut self.source
    }

    /// `(header address, payload size)` of every free block, in list order.
    pub fn free_blocks(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.free_list
            .iter()
            .map(|block| (block.addr(), unsafe { block.size() }))
    }

    pub fn stats(&mut self) -> HeapStats {
        let mut stats = HeapStats {
            arena_bytes: self.source.current().addr().saturating_sub(self.start.addr()),
            grows: self.grows,
            trims: self.trims,
            ..HeapStats::default()
        };

        for (_, size) in self.free_blocks() {
            stats.free_blocks += 1;
            stats.free_bytes += size;
            stats.largest_free = stats.largest_free.max(size);
        }

        stats
    }

    /// Walks the free list and verifies every invariant the allocator relies
    /// on: strict address order, no two free blocks touching, aligned sizes
    /// that can host the links, symmetric links and everything inside the
    /// arena.
    pub fn check(&mut self) -> Result<(), HeapError> {
        let brk = self.source.current().addr();
        let start = self.start.addr();
        let inconsistent = |what, block: Block, against: usize| {
            Err(HeapError::corruption(
                Corruption::Inconsistent(what),
                block.addr(),
                against,
            ))
        };

        let mut prev: Option<Block> = None;
        let mut len = 0;

        for block in self.free_list.iter() {
            let size = unsafe { block.size() };
            let end = unsafe { block.end() }.addr();

            if block.addr() % ALIGNMENT != 0 || size % ALIGNMENT != 0 {
                return inconsistent("misaligned free block", block, 0);
            }
            if size < MIN_BLOCK_SIZE {
                return inconsistent("free block too small to hold links", block, size);
            }
            if block.addr() < start || end > brk {
                return inconsistent("free block outside of the arena", block, brk);
            }
            if unsafe { block.prev() } != prev {
                return inconsistent("asymmetric links", block, prev.map_or(0, Block::addr));
            }

            if let Some(prev) = prev {
                let prev_end = unsafe { prev.end() }.addr();
                if prev_end > block.addr() {
                    return inconsistent("free list out of address order", block, prev.addr());
                }
                if prev_end == block.addr() {
                    return inconsistent("adjacent free blocks", block, prev.addr());
                }
            } else if self.free_list.head() != Some(block) {
                return inconsistent("head is not the first node", block, 0);
            }

            prev = Some(block);
            len += 1;
        }

        if self.free_list.tail() != prev {
            let tail = self.free_list.tail().map_or(0, Block::addr);
            return Err(HeapError::corruption(
                Corruption::Inconsistent("tail is not the last node"),
                tail,
                prev.map_or(0, Block::addr),
            ));
        }

        if len != self.free_list.len() {
            return Err(HeapError::corruption(
                Corruption::Inconsistent("free list length mismatch"),
                start,
                len,
            ));
        }

        Ok(())
    }
}
