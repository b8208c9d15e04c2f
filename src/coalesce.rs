//! Giving blocks back to the free list.
//!
//! A freed block can land in three places relative to the free list: before
//! the head, after the tail, or somewhere between two free nodes. In each
//! place it is merged with whatever free neighbor it physically touches, so
//! no two free blocks are ever adjacent once [`Heap::free`] returns.
//!
//! ```text
//!  Between Prev and Next, four ways:
//!
//!  left only       +------+-----+             +------------+
//!                  | Prev |  B  | .. Next ==> |    Prev    | .. Next
//!                  +------+-----+             +------------+
//!
//!  right only      +-----+------+             +------------+
//!         Prev ..  |  B  | Next |     ==>     |     B      |
//!                  +-----+------+             +------------+
//!
//!  both            +------+-----+------+      +-------------------+
//!                  | Prev |  B  | Next | ==>  |       Prev        |
//!                  +------+-----+------+      +-------------------+
//!
//!  neither         Prev .. B .. Next    ==>   Prev <-> B <-> Next
//! ```

use std::{cmp::Ordering, ptr::NonNull};

use crate::{
    block::{Block, HEADER_SIZE, MIN_BLOCK_SIZE},
    error::{Corruption, HeapError},
    heap::Heap,
    kernel::BreakSource,
    utils::ALIGNMENT,
};

/// Where a freed block goes, decided before anything is modified.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Placement {
    /// The free list is empty, the block becomes head and tail.
    Alone,
    /// Case A: below the head. `touching` means it ends where the head starts.
    BeforeHead { head: Block, touching: bool },
    /// Case B: above the tail. `touching` means the tail ends where it starts.
    AfterTail { tail: Block, touching: bool },
    /// Case C: between two consecutive free nodes.
    Between {
        prev: Block,
        next: Block,
        left: bool,
        right: bool,
    },
}

impl<B: BreakSource> Heap<B> {
    /// Same as [`Heap::free`] but reports corruption instead of halting.
    /// Nothing is modified when an error is returned.
    ///
    /// **SAFETY**: see [`Heap::free`].
    pub unsafe fn try_free(&mut self, ptr: *mut u8) -> Result<(), HeapError> {
        let Some(payload) = NonNull::new(ptr) else {
            return Ok(());
        };

        let block = self.freed_block(payload)?;
        let placement = unsafe { self.place(block)? };

        unsafe { self.insert(block, placement) };

        log::trace!("free({:p}) -> {placement:?}", payload.as_ptr());

        self.refresh_adjacency();
        self.trim();

        Ok(())
    }

    /// Recovers the header behind `payload` and makes sure it can be a block
    /// we handed out.
    fn freed_block(&mut self, payload: NonNull<u8>) -> Result<Block, HeapError> {
        let brk = self.source.current().addr();
        let start = self.start.addr();
        let header = Block::from_payload(payload);
        let addr = header.addr();

        if payload.as_ptr().addr() < start + HEADER_SIZE || payload.as_ptr().addr() > brk {
            return Err(HeapError::corruption(Corruption::OutsideArena, addr, brk));
        }

        if addr % ALIGNMENT != 0 {
            return Err(HeapError::corruption(Corruption::Misaligned, addr, start));
        }

        let block = unsafe { Block::at(header) };
        let size = unsafe { block.size() };

        if size < MIN_BLOCK_SIZE || size % ALIGNMENT != 0 {
            return Err(HeapError::corruption(Corruption::BadHeader, addr, size));
        }

        match (addr + HEADER_SIZE).checked_add(size) {
            Some(end) if end <= brk => Ok(block),
            _ => Err(HeapError::corruption(Corruption::OutsideArena, addr, brk)),
        }
    }

    /// Figures out which case applies to `block` and validates its geometry
    /// against the free list.
    pub(crate) unsafe fn place(&self, block: Block) -> Result<Placement, HeapError> {
        let (Some(head), Some(tail)) = (self.free_list.head(), self.free_list.tail()) else {
            return Ok(Placement::Alone);
        };

        let end = unsafe { block.end() }.addr();

        if block < head {
            return match end.cmp(&head.addr()) {
                Ordering::Equal => Ok(Placement::BeforeHead { head, touching: true }),
                Ordering::Less => Ok(Placement::BeforeHead { head, touching: false }),
                Ordering::Greater => Err(HeapError::corruption(
                    Corruption::OverlapsHead,
                    block.addr(),
                    head.addr(),
                )),
            };
        }

        if block > tail {
            let tail_end = unsafe { tail.end() }.addr();
            return match tail_end.cmp(&block.addr()) {
                Ordering::Equal => Ok(Placement::AfterTail { tail, touching: true }),
                Ordering::Less => Ok(Placement::AfterTail { tail, touching: false }),
                Ordering::Greater => Err(HeapError::corruption(
                    Corruption::OverlapsTail,
                    block.addr(),
                    tail.addr(),
                )),
            };
        }

        let mut prev = None;
        let mut next = None;

        for node in &self.free_list {
            match node.cmp(&block) {
                Ordering::Less => prev = Some(node),
                Ordering::Equal => {
                    return Err(HeapError::corruption(
                        Corruption::DoubleFree,
                        block.addr(),
                        node.addr(),
                    ));
                }
                Ordering::Greater => {
                    next = Some(node);
                    break;
                }
            }
        }

        let (Some(prev), Some(next)) = (prev, next) else {
            return Err(HeapError::corruption(
                Corruption::Inconsistent("free list is not address ordered"),
                block.addr(),
                head.addr(),
            ));
        };

        let prev_end = unsafe { prev.end() }.addr();
        if prev_end > block.addr() {
            return Err(HeapError::corruption(
                Corruption::OverlapsNeighbor,
                block.addr(),
                prev.addr(),
            ));
        }
        if end > next.addr() {
            return Err(HeapError::corruption(
                Corruption::OverlapsNeighbor,
                block.addr(),
                next.addr(),
            ));
        }

        Ok(Placement::Between {
            prev,
            next,
            left: prev_end == block.addr(),
            right: end == next.addr(),
        })
    }

    /// Links `block` into the list according to `placement`, merging it with
    /// the neighbors it touches.
    pub(crate) unsafe fn insert(&mut self, block: Block, placement: Placement) {
        unsafe {
            let size = block.size();

            match placement {
                Placement::Alone => self.free_list.push_back(block),

                Placement::BeforeHead { head, touching: true } => {
                    block.set_size(size + HEADER_SIZE + head.size());
                    self.free_list.replace(head, block);
                }
                Placement::BeforeHead { touching: false, .. } => self.free_list.push_front(block),

                Placement::AfterTail { tail, touching: true } => {
                    tail.set_size(tail.size() + HEADER_SIZE + size);
                }
                Placement::AfterTail { touching: false, .. } => self.free_list.push_back(block),

                Placement::Between {
                    prev,
                    left: true,
                    right: false,
                    ..
                } => {
                    prev.set_size(prev.size() + HEADER_SIZE + size);
                }
                Placement::Between {
                    next,
                    left: false,
                    right: true,
                    ..
                } => {
                    block.set_size(size + HEADER_SIZE + next.size());
                    self.free_list.replace(next, block);
                }
                Placement::Between {
                    prev,
                    next,
                    left: true,
                    right: true,
                } => {
                    prev.set_size(prev.size() + 2 * HEADER_SIZE + size + next.size());
                    self.free_list.remove(next);
                }
                Placement::Between {
                    prev,
                    next,
                    left: false,
                    right: false,
                } => self.free_list.insert_between(block, Some(prev), Some(next)),
            }
        }
    }
}
