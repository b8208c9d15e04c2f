use std::fmt;

/// Everything that can go wrong inside the heap.
///
/// None of these are recoverable from the heap's point of view. The `try_*`
/// entry points of [`crate::Heap`] return them so they can be inspected, the
/// plain entry points hand them to [`fatal`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeapError {
    /// The OS refused to move the break by `requested` bytes.
    OutOfMemory { requested: usize },
    /// A freed block disagrees with the known free list geometry, or the
    /// checker found a broken invariant. `block` is the header address of
    /// the offending block and `against` the address it conflicts with.
    Corruption {
        kind: Corruption,
        block: usize,
        against: usize,
    },
    InvalidConfig(&'static str),
}

/// Classification of a detected heap corruption.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Corruption {
    /// The block lies (partly) outside of `[arena start, break)`.
    OutsideArena,
    /// The header address is not word aligned.
    Misaligned,
    /// The size field cannot belong to a block we handed out.
    BadHeader,
    /// The block overlaps the free list head.
    OverlapsHead,
    /// The block overlaps the free list tail.
    OverlapsTail,
    /// The block overlaps one of the free nodes around it.
    OverlapsNeighbor,
    /// The block is already in the free list.
    DoubleFree,
    /// An invariant found broken by [`crate::Heap::check`].
    Inconsistent(&'static str),
}

impl HeapError {
    pub(crate) fn corruption(kind: Corruption, block: usize, against: usize) -> Self {
        HeapError::Corruption {
            kind,
            block,
            against,
        }
    }
}

impl fmt::Display for Corruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Corruption::OutsideArena => f.write_str("block outside of the arena"),
            Corruption::Misaligned => f.write_str("misaligned block"),
            Corruption::BadHeader => f.write_str("bad block header"),
            Corruption::OverlapsHead => f.write_str("block overlaps the free list head"),
            Corruption::OverlapsTail => f.write_str("block overlaps the free list tail"),
            Corruption::OverlapsNeighbor => f.write_str("block overlaps a free neighbor"),
            Corruption::DoubleFree => f.write_str("double free"),
            Corruption::Inconsistent(what) => write!(f, "inconsistent heap: {what}"),
        }
    }
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapError::OutOfMemory { requested } => {
                write!(f, "out of memory: the OS refused {requested} more bytes")
            }
            HeapError::Corruption {
                kind,
                block,
                against,
            } => write!(
                f,
                "heap corruption detected: {kind} (block {block:#x}, against {against:#x})"
            ),
            HeapError::InvalidConfig(reason) => write!(f, "invalid heap configuration: {reason}"),
        }
    }
}

impl std::error::Error for HeapError {}

/// Halts on an unrecoverable heap error.
///
/// Callers of the allocator never check for failure, so there is nothing
/// sensible to return. The error is logged and turned into a panic carrying
/// the diagnostic.
#[cold]
#[track_caller]
pub fn fatal(err: HeapError) -> ! {
    log::error!("{err}");
    panic!("brkalloc: {err}")
}
