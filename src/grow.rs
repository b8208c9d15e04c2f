use crate::{
    block::{Block, HEADER_SIZE},
    error::HeapError,
    heap::Heap,
    kernel::BreakSource,
    tracker::Adjacency,
    utils::{padding_for, round_up_to_multiple},
};

impl<B: BreakSource> Heap<B> {
    /// Asks the OS for more memory after the first-fit search found nothing,
    /// and returns a free block with at least `size` bytes.
    ///
    /// ```text
    /// Tail touches the break, it is extended in place:
    ///
    ///   +--------+--------+            +--------+-------------------+
    ///   | Header |  tail  | brk   ==>  | Header |  tail + increment | brk
    ///   +--------+--------+            +--------+-------------------+
    ///
    /// Otherwise a new block is appended at the old break:
    ///
    ///   +------+-------+            +------+-------+--------+-----------+
    ///   | tail | used  | brk   ==>  | tail | used  | Header | new block | brk
    ///   +------+-------+            +------+-------+--------+-----------+
    /// ```
    ///
    /// The break moves by the configured increment, or by as many increments
    /// as needed when a single one cannot satisfy the request, plus whatever
    /// it takes to realign a break somebody else left unaligned.
    pub(crate) fn grow(&mut self, size: usize) -> Result<Block, HeapError> {
        let increment = self.config.growth_increment;

        match (self.adjacency, self.free_list.tail()) {
            (Adjacency::Adjacent, Some(tail)) => {
                let tail_size = unsafe { tail.size() };
                let missing = size.saturating_sub(tail_size);
                let delta = round_up_to_multiple(missing.max(1), increment)
                    .ok_or(HeapError::OutOfMemory { requested: missing })?;

                let prev = self.move_break(delta)?;
                debug_assert_eq!(prev, unsafe { tail.end() });

                unsafe { tail.set_size(tail_size + delta) };

                log::debug!("grew the arena by {delta} bytes, extending the tail at {:p}", tail.as_ptr());

                Ok(tail)
            }
            _ => {
                // The new header must be word aligned even if somebody else
                // left the break unaligned.
                let padding = padding_for(self.source.current());
                let span = round_up_to_multiple(HEADER_SIZE + size, increment)
                    .ok_or(HeapError::OutOfMemory { requested: size })?;
                let delta = span + padding;

                let prev = self.move_break(delta)?;
                debug_assert_eq!(padding, padding_for(prev));

                let block = unsafe {
                    let block = Block::at(prev.add(padding));
                    block.set_size(span - HEADER_SIZE);
                    self.free_list.push_back(block);
                    block
                };

                log::debug!("grew the arena by {delta} bytes, new block at {:p}", block.as_ptr());

                Ok(block)
            }
        }
    }

    /// Moves the break up by `delta` bytes and returns the old break.
    fn move_break(&mut self, delta: usize) -> Result<*mut u8, HeapError> {
        let out_of_memory = HeapError::OutOfMemory { requested: delta };

        let delta = isize::try_from(delta).map_err(|_| out_of_memory)?;
        let prev = unsafe { self.source.sbrk(delta) }.ok_or(out_of_memory)?;

        self.grows += 1;

        Ok(prev)
    }
}
