use std::marker::PhantomData;

use crate::block::Block;

/// Address ordered, doubly linked list of free [`Block`].
///
/// The list doesn't own any memory of its own: the `next` and `prev` links are
/// written inside the payload of the free blocks themselves, since the payload
/// of a free block is not used by anybody else.
///
/// ```text
///            head                                             tail
///             |                                                |
/// +-------+---v--+-------+-------+--------+-------+-------+----v--+
/// | Block | Free | Block | Block |  Free  | Block | Block | Free  |
/// +-------+------+-------+-------+--------+-------+-------+-------+
///              |   ^               |  ^                     ^
///              +---|---next--------+  |                     |
///                  +----prev----------+        ...          |
/// ```
///
/// This is pure mechanism. There is no search policy here, the allocator and
/// the coalescer decide *where* a block goes and use these operations to keep
/// the address ordering intact.
pub(crate) struct FreeList {
    head: Option<Block>,
    tail: Option<Block>,
    len: usize,
}

pub(crate) struct Iter<'a> {
    current: Option<Block>,
    marker: PhantomData<&'a FreeList>,
}

impl FreeList {
    /// Creates a new empty list.
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[inline]
    pub fn head(&self) -> Option<Block> {
        self.head
    }

    #[inline]
    pub fn tail(&self) -> Option<Block> {
        self.tail
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Writes the whole free-block metadata of `block` at once.
    ///
    /// **SAFETY**: `block` must point to at least a header plus
    /// [`crate::block::MIN_BLOCK_SIZE`] writable bytes.
    pub unsafe fn set_meta(block: Block, size: usize, prev: Option<Block>, next: Option<Block>) {
        unsafe {
            block.set_size(size);
            block.set_prev(prev);
            block.set_next(next);
        }
    }

    /// Inserts `block` between `prev` and `next`, fixing the neighbor links and
    /// the head or tail if `block` lands at one of the ends.
    ///
    /// The caller guarantees `prev < block < next` by address and that `prev`
    /// and `next` are consecutive in the list.
    pub unsafe fn insert_between(&mut self, block: Block, prev: Option<Block>, next: Option<Block>) {
        debug_assert!(prev.is_none_or(|p| p < block));
        debug_assert!(next.is_none_or(|n| block < n));

        unsafe {
            FreeList::set_meta(block, block.size(), prev, next);

            match prev {
                Some(prev) => prev.set_next(Some(block)),
                None => self.head = Some(block),
            }

            match next {
                Some(next) => next.set_prev(Some(block)),
                None => self.tail = Some(block),
            }
        }

        self.len += 1;
    }

    /// Links `block` before the current head.
    #[inline]
    pub unsafe fn push_front(&mut self, block: Block) {
        unsafe { self.insert_between(block, None, self.head) }
    }

    /// Links `block` after the current tail.
    #[inline]
    pub unsafe fn push_back(&mut self, block: Block) {
        unsafe { self.insert_between(block, self.tail, None) }
    }

    /// Unlinks `block` from the list. Its payload is left untouched.
    pub unsafe fn remove(&mut self, block: Block) {
        unsafe {
            let prev = block.prev();
            let next = block.next();

            match prev {
                Some(prev) => prev.set_next(next),
                None => self.head = next,
            }

            match next {
                Some(next) => next.set_prev(prev),
                None => self.tail = prev,
            }
        }

        self.len -= 1;
    }

    /// Puts `new` in the exact list position of `old`, so `old` stops being a
    /// node. `new` keeps the size already written in its header.
    ///
    /// Used when the node moves to a different address without its neighbors
    /// changing: the remainder of a split, or a freed block absorbing the
    /// block right after it.
    pub unsafe fn replace(&mut self, old: Block, new: Block) {
        unsafe {
            let prev = old.prev();
            let next = old.next();

            FreeList::set_meta(new, new.size(), prev, next);

            match prev {
                Some(prev) => prev.set_next(Some(new)),
                None => self.head = Some(new),
            }

            match next {
                Some(next) => next.set_prev(Some(new)),
                None => self.tail = Some(new),
            }
        }
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            current: self.head,
            marker: PhantomData,
        }
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.current?;
        self.current = unsafe { block.next() };

        Some(block)
    }
}

impl<'a> IntoIterator for &'a FreeList {
    type Item = Block;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
