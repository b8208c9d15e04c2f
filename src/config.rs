use crate::{
    block::{HEADER_SIZE, MIN_BLOCK_SIZE},
    error::HeapError,
    utils::{ALIGNMENT, align},
};

/// Tunables of a [`crate::Heap`].
///
/// All sizes are in bytes and get rounded up to the word size by
/// [`Config::validate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Usable payload of the first block claimed by `initialize`.
    pub arena_size: usize,
    /// Bytes requested from the OS each time no free block fits.
    pub growth_increment: usize,
    /// A tail touching the break is trimmed once it grows past this size.
    pub trim_threshold: usize,
    /// Payload the tail keeps after a trim. Zero returns the whole block.
    pub trim_retain: usize,
}

impl Config {
    pub const DEFAULT_ARENA_SIZE: usize = 64 * 1024;
    pub const DEFAULT_GROWTH_INCREMENT: usize = 64 * 1024;
    pub const DEFAULT_TRIM_THRESHOLD: usize = 128 * 1024;
    pub const DEFAULT_TRIM_RETAIN: usize = 0;

    pub const fn new() -> Self {
        Self {
            arena_size: Self::DEFAULT_ARENA_SIZE,
            growth_increment: Self::DEFAULT_GROWTH_INCREMENT,
            trim_threshold: Self::DEFAULT_TRIM_THRESHOLD,
            trim_retain: Self::DEFAULT_TRIM_RETAIN,
        }
    }

    pub const fn with_arena_size(mut self, arena_size: usize) -> Self {
        self.arena_size = arena_size;
        self
    }

    pub const fn with_growth_increment(mut self, growth_increment: usize) -> Self {
        self.growth_increment = growth_increment;
        self
    }

    pub const fn with_trim_threshold(mut self, trim_threshold: usize) -> Self {
        self.trim_threshold = trim_threshold;
        self
    }

    pub const fn with_trim_retain(mut self, trim_retain: usize) -> Self {
        self.trim_retain = trim_retain;
        self
    }

    /// Rounds every size to the word size and rejects combinations the heap
    /// cannot work with.
    pub fn validate(self) -> Result<Self, HeapError> {
        let limit = isize::MAX as usize / 2;
        if [self.arena_size, self.growth_increment, self.trim_threshold, self.trim_retain]
            .iter()
            .any(|&size| size > limit)
        {
            return Err(HeapError::InvalidConfig("sizes are too large for the address space"));
        }

        let config = Self {
            arena_size: align(self.arena_size.max(MIN_BLOCK_SIZE), ALIGNMENT),
            growth_increment: align(self.growth_increment, ALIGNMENT),
            trim_threshold: align(self.trim_threshold, ALIGNMENT),
            trim_retain: align(self.trim_retain, ALIGNMENT),
        };

        if config.growth_increment < HEADER_SIZE + MIN_BLOCK_SIZE {
            return Err(HeapError::InvalidConfig(
                "growth increment cannot host a single block",
            ));
        }

        // A fresh increment would be handed straight back by the trim that
        // follows the allocation.
        if config.growth_increment > config.trim_threshold {
            return Err(HeapError::InvalidConfig(
                "growth increment must not exceed the trim threshold",
            ));
        }

        if config.trim_retain > config.trim_threshold {
            return Err(HeapError::InvalidConfig(
                "trim retain must not exceed the trim threshold",
            ));
        }

        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
