//! A segregated-fit allocator with boundary tag coalescing.
//!
//! Blocks carry a header and a footer that pack their size and allocated bit,
//! so both neighbours of any block can be found in constant time. Free blocks
//! are kept in eight size classes of doubling width, each a circular doubly
//! linked list threaded through the free blocks' payloads. Freed blocks are
//! merged with free neighbours immediately.
//!
//! ```
//! use segfit::Heap;
//!
//! let mut heap = Heap::new().unwrap();
//! let ptr = heap.allocate(100).unwrap();
//!
//! heap.payload_mut(ptr.unwrap()).unwrap()[..5].copy_from_slice(b"hello");
//! let ptr = heap.reallocate(ptr, 10).unwrap();
//! assert_eq!(&heap.payload(ptr.unwrap()).unwrap()[..5], b"hello");
//!
//! heap.free(ptr).unwrap();
//! assert!(heap.check(false).is_consistent());
//! ```

mod block;
mod block_store;
mod checker;
mod coalesce;
mod config;
mod constants;
mod error;
mod free_list;
mod heap;
mod locked;
mod size_class;

pub use block::{BlockInfo, BlockPtr, Tag};
pub use block_store::{BackingStore, MemStore, VecStore};
pub use checker::{HeapReport, Inconsistency};
pub use config::HeapConfig;
pub use constants::{CHUNK_SIZE, DOUBLE_WORD, MAX_HEAP, MIN_BLOCK_SIZE, NUM_CLASSES, WORD_SIZE};
pub use error::AllocError;
pub use free_list::FitPolicy;
pub use heap::{adjust_size, Heap, HeapStats};
pub use locked::LockedHeap;
pub use size_class::class_of;
