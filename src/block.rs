use std::{mem, ptr::NonNull};

use crate::utils::{ALIGNMENT, align};

/// Non-null pointer to `T`.
pub(crate) type Link<T> = Option<NonNull<T>>;

/// Size of the header that precedes every block, free or allocated.
pub const HEADER_SIZE: usize = align(mem::size_of::<Header>(), ALIGNMENT);

/// Smallest payload a block can have. Any allocated block must be able to
/// host the free list links once it is freed again.
pub const MIN_BLOCK_SIZE: usize = align(2 * mem::size_of::<Link<FreeBlock>>(), ALIGNMENT);

/// The only metadata that survives while a block is allocated.
///
/// ```text
/// +---------------------+ <------+
/// |        size         |        | -> Header
/// +---------------------+ <------+ <-- pointer handed to the caller
/// |       Content       |        |
/// |         ...         |        | -> `size` bytes of payload
/// |         ...         |        |
/// +---------------------+ <------+
/// ```
#[repr(C)]
pub(crate) struct Header {
    /// Usable payload bytes after the header.
    pub size: usize,
}

/// Layout of a block while it sits in the free list. The links live inside
/// the block's own payload, which is why no payload may be smaller than
/// [`MIN_BLOCK_SIZE`].
///
/// ```text
/// +---------------------+ <------+
/// |        size         |        | -> Header
/// +---------------------+ <------+
/// |        next         |        |
/// +---------------------+        | -> Free list links (payload)
/// |        prev         |        |
/// +---------------------+ <------+
/// |       (unused)      |
/// +---------------------+
/// ```
#[repr(C)]
pub(crate) struct FreeBlock {
    pub size: usize,
    pub next: Link<FreeBlock>,
    pub prev: Link<FreeBlock>,
}

/// Handle to a block header somewhere inside the arena.
///
/// This is a plain pointer wrapper: every accessor is `unsafe` because the
/// caller (we, as the allocator) must guarantee that the address points to a
/// header inside the granted part of the arena.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub(crate) struct Block(NonNull<FreeBlock>);

impl Block {
    /// Wraps the header located at `addr`.
    ///
    /// **SAFETY**: `addr` must be non-null and aligned to [`ALIGNMENT`].
    #[inline]
    pub unsafe fn at(addr: *mut u8) -> Self {
        debug_assert!(!addr.is_null() && addr.addr() % ALIGNMENT == 0);
        unsafe { Self(NonNull::new_unchecked(addr.cast())) }
    }

    /// Recovers the header of a block from the payload pointer that was
    /// given to the caller.
    #[inline]
    pub fn from_payload(payload: NonNull<u8>) -> *mut u8 {
        payload.as_ptr().wrapping_sub(HEADER_SIZE)
    }

    #[inline]
    pub fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr().cast()
    }

    #[inline]
    pub fn as_link(self) -> NonNull<FreeBlock> {
        self.0
    }

    #[inline]
    pub fn addr(self) -> usize {
        self.0.as_ptr().addr()
    }

    /// First payload byte.
    #[inline]
    pub fn payload(self) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked(self.as_ptr().add(HEADER_SIZE)) }
    }

    #[inline]
    pub unsafe fn size(self) -> usize {
        unsafe { (*self.0.as_ptr().cast::<Header>()).size }
    }

    #[inline]
    pub unsafe fn set_size(self, size: usize) {
        unsafe { (*self.0.as_ptr().cast::<Header>()).size = size }
    }

    /// One past the last payload byte, which is where a physically adjacent
    /// block would start.
    #[inline]
    pub unsafe fn end(self) -> *mut u8 {
        unsafe { self.as_ptr().wrapping_add(HEADER_SIZE + self.size()) }
    }

    #[inline]
    pub unsafe fn next(self) -> Option<Block> {
        unsafe { (*self.0.as_ptr()).next.map(Block) }
    }

    #[inline]
    pub unsafe fn prev(self) -> Option<Block> {
        unsafe { (*self.0.as_ptr()).prev.map(Block) }
    }

    #[inline]
    pub unsafe fn set_next(self, next: Option<Block>) {
        unsafe { (*self.0.as_ptr()).next = next.map(Block::as_link) }
    }

    #[inline]
    pub unsafe fn set_prev(self, prev: Option<Block>) {
        unsafe { (*self.0.as_ptr()).prev = prev.map(Block::as_link) }
    }
}
