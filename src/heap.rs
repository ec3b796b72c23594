use crate::block::{BlockInfo, BlockPtr, Region, Tag};
use crate::block_store::{BackingStore, MemStore};
use crate::checker::{self, HeapReport};
use crate::coalesce::coalesce;
use crate::config::HeapConfig;
use crate::constants::{
    BOUNDARY_SIZE, DOUBLE_WORD, MIN_BLOCK_SIZE, PROLOGUE_SIZE, SENTINEL_TABLE_SIZE, WORD_SIZE,
};
use crate::error::AllocError;
use crate::free_list::FreeLists;

/// Block and byte counts from one walk over the heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub heap_size: usize,
    pub allocated_blocks: usize,
    pub allocated_bytes: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub largest_free: usize,
}

/// A segregated-fit allocator over a single growable region.
///
/// All state lives in the region itself: the sentinel table, the prologue,
/// the blocks and the epilogue. The heap is single threaded; wrap it in a
/// [`LockedHeap`](crate::LockedHeap) to share it.
pub struct Heap<S: BackingStore = MemStore> {
    region: Region<S>,
    free_lists: FreeLists,
    prologue: BlockPtr,
    config: HeapConfig,
}

impl Heap<MemStore> {
    /// A heap over a default sized [`MemStore`].
    pub fn new() -> Result<Self, AllocError> {
        Self::init(MemStore::new()?, HeapConfig::default())
    }
}

impl<S: BackingStore> Heap<S> {
    /// Lays out the sentinel table and the prologue/epilogue pair, then
    /// extends the heap by `config.initial_size`.
    pub fn init(store: S, config: HeapConfig) -> Result<Self, AllocError> {
        let mut region = Region::new(store);

        let misalignment = region.len() % DOUBLE_WORD;
        if misalignment != 0 {
            region.grow(DOUBLE_WORD - misalignment)?;
        }

        let base = region.grow(SENTINEL_TABLE_SIZE)?;
        let free_lists = FreeLists::init(&mut region, base);

        let start = region.grow(BOUNDARY_SIZE)?;
        let prologue = BlockPtr::from_offset(start + 2 * WORD_SIZE)
            .ok_or(AllocError::OutOfMemory)?;

        region.write_word(start, 0);
        region.set_tags(prologue, PROLOGUE_SIZE, true);
        region.set_header(prologue.add(PROLOGUE_SIZE), 0, true);

        let mut heap = Self {
            region,
            free_lists,
            prologue,
            config,
        };

        if config.initial_size > 0 {
            heap.extend(config.initial_size)?;
        }

        log::debug!(
            "heap initialised: {} bytes, first block at {:#x}",
            heap.size(),
            heap.first_block().offset()
        );

        Ok(heap)
    }

    /// Returns a block with at least `size` bytes of payload, or `None` when
    /// `size` is zero.
    pub fn allocate(&mut self, size: usize) -> Result<Option<BlockPtr>, AllocError> {
        if size == 0 {
            return Ok(None);
        }

        let asize = adjust_size(size)?;

        self.allocate_block(asize).map(Some)
    }

    /// Releases an allocated block. `None` is ignored.
    ///
    /// A handle that does not name an allocated block is rejected with
    /// `InvalidFree` and the heap is left alone.
    pub fn free(&mut self, ptr: Option<BlockPtr>) -> Result<(), AllocError> {
        let Some(bp) = ptr else {
            return Ok(());
        };

        if !self.is_allocated_block(bp) {
            log::error!("rejected free of {:#x}", bp.offset());
            return Err(AllocError::InvalidFree);
        }

        self.release(bp);

        Ok(())
    }

    /// Resizes an allocation, keeping the first `min(old, size)` payload bytes.
    ///
    /// A block that is already large enough stays where it is; any surplus of
    /// at least `MIN_BLOCK_SIZE` is split off and freed. Otherwise the payload
    /// moves to a new block. If that allocation fails the old block is
    /// untouched.
    pub fn reallocate(
        &mut self,
        ptr: Option<BlockPtr>,
        size: usize,
    ) -> Result<Option<BlockPtr>, AllocError> {
        let Some(bp) = ptr else {
            return self.allocate(size);
        };

        if !self.is_allocated_block(bp) {
            log::error!("rejected reallocate of {:#x}", bp.offset());
            return Err(AllocError::InvalidRealloc);
        }

        if size == 0 {
            self.release(bp);
            return Ok(None);
        }

        let asize = adjust_size(size)?;
        let csize = self.region.size(bp);

        if asize <= csize {
            self.shrink(bp, asize);
            return Ok(Some(bp));
        }

        let new_bp = self.allocate_block(asize)?;
        let len = (csize - DOUBLE_WORD).min(size);

        self.region.copy_within(bp.offset(), new_bp.offset(), len);
        self.release(bp);

        Ok(Some(new_bp))
    }

    /// Walks the whole heap and every free list, logging what it finds.
    pub fn check(&self, verbose: bool) -> HeapReport {
        checker::check(&self.region, &self.free_lists, self.prologue, verbose)
    }

    pub fn payload(&self, ptr: BlockPtr) -> Result<&[u8], AllocError> {
        let len = self.usable_size(ptr)?;

        Ok(self.region.bytes(ptr.offset(), len))
    }

    pub fn payload_mut(&mut self, ptr: BlockPtr) -> Result<&mut [u8], AllocError> {
        let len = self.usable_size(ptr)?;

        Ok(self.region.bytes_mut(ptr.offset(), len))
    }

    /// Payload capacity of an allocated block, which may exceed the size it
    /// was requested with.
    pub fn usable_size(&self, ptr: BlockPtr) -> Result<usize, AllocError> {
        if !self.is_allocated_block(ptr) {
            return Err(AllocError::InvalidPointer);
        }

        Ok(self.region.size(ptr) - DOUBLE_WORD)
    }

    /// Bytes obtained from the backing store so far.
    pub fn size(&self) -> usize {
        self.region.len()
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        self.region.store()
    }

    /// Physical blocks in address order, prologue and epilogue excluded.
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        self.region.blocks(self.first_block())
    }

    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            heap_size: self.size(),
            ..HeapStats::default()
        };

        for block in self.blocks() {
            if block.is_allocated() {
                stats.allocated_blocks += 1;
                stats.allocated_bytes += block.size();
            } else {
                stats.free_blocks += 1;
                stats.free_bytes += block.size();
                stats.largest_free = stats.largest_free.max(block.size());
            }
        }

        stats
    }

    #[cfg(test)]
    pub(crate) fn region_mut(&mut self) -> &mut Region<S> {
        &mut self.region
    }

    fn first_block(&self) -> BlockPtr {
        self.prologue.add(PROLOGUE_SIZE)
    }

    fn epilogue(&self) -> usize {
        self.region.len()
    }

    fn allocate_block(&mut self, asize: usize) -> Result<BlockPtr, AllocError> {
        let found = self
            .free_lists
            .find_fit(&self.region, asize, self.config.fit_policy);

        let bp = match found {
            Some(bp) => bp,
            None => self.extend(asize.max(self.config.chunk_size))?,
        };

        self.place(bp, asize);

        Ok(bp)
    }

    /// Grows the region by at least `bytes`, never less than one minimum
    /// block, and returns the resulting free block, merged with a free block
    /// that ended the heap.
    fn extend(&mut self, bytes: usize) -> Result<BlockPtr, AllocError> {
        let size = bytes
            .max(MIN_BLOCK_SIZE)
            .checked_next_multiple_of(DOUBLE_WORD)
            .ok_or(AllocError::OutOfMemory)?;
        let old_end = self.region.grow(size)?;

        debug_assert_eq!(old_end + size, self.region.len());

        // the old epilogue header becomes the new block's header
        let bp = BlockPtr::from_offset(old_end).ok_or(AllocError::OutOfMemory)?;
        self.region.set_tags(bp, size, false);
        self.region.set_header(bp.add(size), 0, true);

        log::debug!("extended heap by {size} bytes to {}", self.region.len());

        let first = self.first_block();

        Ok(coalesce(&mut self.region, &self.free_lists, first, bp))
    }

    /// Allocates `asize` bytes at the start of the free block `bp`, splitting
    /// off the rest when it can stand as a block of its own.
    fn place(&mut self, bp: BlockPtr, asize: usize) {
        let csize = self.region.size(bp);

        debug_assert!(csize >= asize);
        debug_assert_eq!(self.region.header(bp), self.region.footer(bp));

        self.free_lists.remove(&mut self.region, bp);

        if csize - asize >= MIN_BLOCK_SIZE {
            self.region.set_tags(bp, asize, true);

            let rest = self.region.next_block(bp);
            self.region.set_tags(rest, csize - asize, false);
            self.free_lists.insert(&mut self.region, rest);
        } else {
            self.region.set_tags(bp, csize, true);
        }
    }

    /// Trims an allocated block down to `asize`, freeing the surplus.
    fn shrink(&mut self, bp: BlockPtr, asize: usize) {
        let csize = self.region.size(bp);

        if csize - asize < MIN_BLOCK_SIZE {
            return;
        }

        self.region.set_tags(bp, asize, true);

        let rest = self.region.next_block(bp);
        let first = self.first_block();

        self.region.set_tags(rest, csize - asize, false);
        coalesce(&mut self.region, &self.free_lists, first, rest);
    }

    fn release(&mut self, bp: BlockPtr) {
        let size = self.region.size(bp);
        let first = self.first_block();

        self.region.set_tags(bp, size, false);
        coalesce(&mut self.region, &self.free_lists, first, bp);
    }

    /// Whether `bp` is the payload of an allocated block inside the heap with
    /// matching tags. Reads are bounds-checked, so any handle is safe to test.
    fn is_allocated_block(&self, bp: BlockPtr) -> bool {
        let offset = bp.offset();

        if offset % DOUBLE_WORD != 0
            || offset < self.first_block().offset()
            || offset >= self.epilogue()
        {
            return false;
        }

        let Some(header) = self.region.try_read_word(bp.header()) else {
            return false;
        };
        let tag = Tag::unpack(header);

        if !tag.allocated || tag.size < MIN_BLOCK_SIZE || tag.size % DOUBLE_WORD != 0 {
            return false;
        }

        match offset.checked_add(tag.size) {
            Some(end) if end <= self.epilogue() => {
                self.region.try_read_word(end - DOUBLE_WORD) == Some(header)
            }
            _ => false,
        }
    }
}

/// Total block size for a payload of `size` bytes: header and footer added,
/// rounded up to a double word, never below `MIN_BLOCK_SIZE`.
pub fn adjust_size(size: usize) -> Result<usize, AllocError> {
    if size <= DOUBLE_WORD {
        return Ok(MIN_BLOCK_SIZE);
    }

    size.checked_add(2 * DOUBLE_WORD - 1)
        .map(|padded| padded & !(DOUBLE_WORD - 1))
        .ok_or(AllocError::SizeOverflow)
}
