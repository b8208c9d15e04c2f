//! # brkalloc - an address ordered free list over a single growable arena
//!
//! The heap claims one contiguous arena from the OS by moving the program
//! break, and serves variable size requests out of it with a first-fit search
//! over an explicit free list. Freed blocks are merged with the free blocks
//! they physically touch, so the free list never holds two adjacent blocks.
//!
//! ```text
//!   start                                                            break
//!     |                                                                |
//!     v                                                                v
//!     +----+------+----+------+----+--------+----+------+----+---------+
//!     | H  | used | H  | free | H  |  used  | H  | free | H  |  free   |
//!     +----+------+----+------+----+--------+----+------+----+---------+
//!                      |    ^                     |   ^         ^
//!                      |    |                     |   |         |
//!                     head  +--------prev---------+   +--next---+ tail
//! ```
//!
//! Every block starts with a one word header holding its payload size. While
//! a block is free, the `next` and `prev` links of the list live in its own
//! payload.
//!
//! ## Crate Structure
//!
//! ```text
//!   brkalloc
//!   ├── block      - Block header layout and raw accessors (internal)
//!   ├── freelist   - Address ordered doubly linked free list (internal)
//!   ├── allocate   - First-fit search and block splitting
//!   ├── grow       - Asking the OS for more memory
//!   ├── coalesce   - Freeing and merging with free neighbors
//!   ├── tracker    - Break adjacency and trimming
//!   ├── heap       - The arena object tying everything together
//!   ├── kernel     - Program break backends
//!   ├── config     - Tunables
//!   ├── error      - Errors and the fatal path
//!   └── utils      - Alignment arithmetic
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use brkalloc::{Config, Heap, SimulatedBreak};
//!
//! let mut heap = Heap::initialize(SimulatedBreak::new(1 << 20), Config::default());
//!
//! let ptr = heap.allocate(100);
//! unsafe {
//!     ptr.as_ptr().write_bytes(0, 100);
//!     heap.free(ptr.as_ptr());
//! }
//!
//! assert_eq!(heap.check(), Ok(()));
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: a [`Heap`] is neither `Send` nor `Sync`.
//! - **Fatal errors**: running out of memory or detecting corruption halts
//!   through [`fatal`]. The `try_*` variants report the error instead.

mod allocate;
mod block;
mod coalesce;
mod config;
mod error;
mod freelist;
mod grow;
mod heap;
mod kernel;
mod tracker;
pub mod utils;

pub use block::{HEADER_SIZE, MIN_BLOCK_SIZE};
pub use config::Config;
pub use error::{Corruption, HeapError, fatal};
pub use heap::{Heap, HeapStats};
pub use kernel::{BreakSource, SimulatedBreak, SystemBreak};
pub use tracker::Adjacency;
