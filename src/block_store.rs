use super::constants::{DOUBLE_WORD, MAX_HEAP};
use super::error::AllocError;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;
use std::slice;

/// The provider of raw, contiguous address space for a heap.
///
/// The region only grows. Bytes that were handed out by a previous `grow` keep
/// their offsets for the lifetime of the store.
pub trait BackingStore {
    /// Extends the region by exactly `increment` bytes and returns the offset
    /// of the old end, which is the start of the new space.
    fn grow(&mut self, increment: usize) -> Result<usize, AllocError>;

    /// The committed bytes, `[0, end)`.
    fn region(&self) -> &[u8];

    fn region_mut(&mut self) -> &mut [u8];

    fn len(&self) -> usize {
        self.region().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A fixed reservation with a moving break, in the manner of `sbrk`.
///
/// The whole span is reserved when the store is created, so payload addresses
/// never move. Growing past the limit fails with `OutOfMemory`.
pub struct MemStore {
    start: NonNull<u8>,
    layout: Layout,
    brk: usize,
    limit: usize,
}

// The reservation is owned exclusively by the store.
unsafe impl Send for MemStore {}

impl MemStore {
    pub fn new() -> Result<Self, AllocError> {
        Self::with_limit(MAX_HEAP)
    }

    pub fn with_limit(limit: usize) -> Result<Self, AllocError> {
        let layout = Layout::from_size_align(limit.max(DOUBLE_WORD), DOUBLE_WORD)?;

        let ptr = unsafe { alloc_zeroed(layout) };
        let start = NonNull::new(ptr).ok_or(AllocError::OutOfMemory)?;

        Ok(Self {
            start,
            layout,
            brk: 0,
            limit,
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.brk
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.start.as_ptr()
    }
}

impl BackingStore for MemStore {
    fn grow(&mut self, increment: usize) -> Result<usize, AllocError> {
        let old_brk = self.brk;
        let new_brk = old_brk
            .checked_add(increment)
            .ok_or(AllocError::OutOfMemory)?;

        if new_brk > self.limit {
            return Err(AllocError::OutOfMemory);
        }

        self.brk = new_brk;

        Ok(old_brk)
    }

    fn region(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.start.as_ptr(), self.brk) }
    }

    fn region_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.start.as_ptr(), self.brk) }
    }
}

impl Drop for MemStore {
    fn drop(&mut self) {
        unsafe { dealloc(self.start.as_ptr(), self.layout) }
    }
}

/// A store backed by a `Vec<u8>`.
///
/// The vector may reallocate as it grows, so only offsets are stable, never
/// addresses.
#[derive(Default)]
pub struct VecStore {
    bytes: Vec<u8>,
    limit: Option<usize>,
}

impl VecStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            bytes: vec![],
            limit: Some(limit),
        }
    }
}

impl BackingStore for VecStore {
    fn grow(&mut self, increment: usize) -> Result<usize, AllocError> {
        let old_len = self.bytes.len();
        let new_len = old_len
            .checked_add(increment)
            .ok_or(AllocError::OutOfMemory)?;

        if self.limit.is_some_and(|limit| new_len > limit) {
            return Err(AllocError::OutOfMemory);
        }

        self.bytes
            .try_reserve(increment)
            .map_err(|_| AllocError::OutOfMemory)?;
        self.bytes.resize(new_len, 0);

        Ok(old_len)
    }

    fn region(&self) -> &[u8] {
        &self.bytes
    }

    fn region_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}
