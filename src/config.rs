use crate::constants::{CHUNK_SIZE, WORD_SIZE};
use crate::free_list::FitPolicy;

/// Tuning knobs for a [`Heap`](crate::Heap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Minimum number of bytes requested from the store when no block fits.
    pub chunk_size: usize,
    /// Size of the free block created by `init`. Zero skips the initial
    /// extension.
    pub initial_size: usize,
    pub fit_policy: FitPolicy,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            initial_size: CHUNK_SIZE,
            fit_policy: FitPolicy::FirstFit,
        }
    }
}

impl HeapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes.max(WORD_SIZE);
        self
    }

    pub fn initial_size(mut self, bytes: usize) -> Self {
        self.initial_size = bytes;
        self
    }

    pub fn fit_policy(mut self, policy: FitPolicy) -> Self {
        self.fit_policy = policy;
        self
    }
}
