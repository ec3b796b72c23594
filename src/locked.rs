use crate::block::BlockPtr;
use crate::block_store::{BackingStore, MemStore};
use crate::checker::HeapReport;
use crate::error::AllocError;
use crate::heap::Heap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A [`Heap`] behind one mutex, so every call runs with exclusive access.
///
/// A poisoned lock is taken over as is: each heap operation either completes
/// or fails before it touches the region.
pub struct LockedHeap<S: BackingStore = MemStore> {
    heap: Mutex<Heap<S>>,
}

impl<S: BackingStore> LockedHeap<S> {
    pub fn new(heap: Heap<S>) -> Self {
        Self {
            heap: Mutex::new(heap),
        }
    }

    pub fn allocate(&self, size: usize) -> Result<Option<BlockPtr>, AllocError> {
        self.lock().allocate(size)
    }

    pub fn free(&self, ptr: Option<BlockPtr>) -> Result<(), AllocError> {
        self.lock().free(ptr)
    }

    pub fn reallocate(
        &self,
        ptr: Option<BlockPtr>,
        size: usize,
    ) -> Result<Option<BlockPtr>, AllocError> {
        self.lock().reallocate(ptr, size)
    }

    pub fn check(&self, verbose: bool) -> HeapReport {
        self.lock().check(verbose)
    }

    pub fn size(&self) -> usize {
        self.lock().size()
    }

    /// Runs `f` with the lock held, for payload access and compound updates.
    pub fn with<R>(&self, f: impl FnOnce(&mut Heap<S>) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn into_inner(self) -> Heap<S> {
        self.heap.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> MutexGuard<'_, Heap<S>> {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: BackingStore> From<Heap<S>> for LockedHeap<S> {
    fn from(heap: Heap<S>) -> Self {
        Self::new(heap)
    }
}
