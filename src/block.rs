use crate::block_store::BackingStore;
use crate::constants::{ALLOCATED_BIT, DOUBLE_WORD, WORD_SIZE};

use super::error::AllocError;
use std::num::NonZeroUsize;

const SIZE_MASK: usize = !(WORD_SIZE - 1);

/// A handle to an allocated payload.
///
/// Handles are offsets into the heap region rather than addresses, so they
/// survive a backing store that moves its bytes while growing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockPtr(NonZeroUsize);

impl BlockPtr {
    /// Wraps a raw payload offset. Nothing is validated until the handle is
    /// given back to a heap.
    pub fn from_offset(offset: usize) -> Option<Self> {
        NonZeroUsize::new(offset).map(Self)
    }

    pub fn offset(self) -> usize {
        self.0.get()
    }

    pub(crate) fn header(self) -> usize {
        self.offset() - WORD_SIZE
    }

    pub(crate) fn add(self, bytes: usize) -> Self {
        Self(self.0.saturating_add(bytes))
    }
}

/// A decoded boundary tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    pub size: usize,
    pub allocated: bool,
}

impl Tag {
    pub const fn new(size: usize, allocated: bool) -> Self {
        Self { size, allocated }
    }

    pub const fn pack(self) -> usize {
        debug_assert!(self.size & !SIZE_MASK == 0);

        self.size | (self.allocated as usize)
    }

    pub const fn unpack(word: usize) -> Self {
        Self {
            size: word & SIZE_MASK,
            allocated: word & ALLOCATED_BIT != 0,
        }
    }
}

/// The managed region, addressed by word-sized boundary tags.
pub(crate) struct Region<S> {
    store: S,
}

impl<S: BackingStore> Region<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn grow(&mut self, increment: usize) -> Result<usize, AllocError> {
        self.store.grow(increment)
    }

    pub fn read_word(&self, offset: usize) -> usize {
        debug_assert!(offset % WORD_SIZE == 0, "unaligned word read at {offset}");

        let mut word = [0u8; WORD_SIZE];
        word.copy_from_slice(&self.store.region()[offset..offset + WORD_SIZE]);

        usize::from_ne_bytes(word)
    }

    pub fn try_read_word(&self, offset: usize) -> Option<usize> {
        if offset % WORD_SIZE != 0 {
            return None;
        }

        let bytes = self.store.region().get(offset..offset.checked_add(WORD_SIZE)?)?;
        let mut word = [0u8; WORD_SIZE];
        word.copy_from_slice(bytes);

        Some(usize::from_ne_bytes(word))
    }

    pub fn write_word(&mut self, offset: usize, value: usize) {
        debug_assert!(offset % WORD_SIZE == 0, "unaligned word write at {offset}");

        self.store.region_mut()[offset..offset + WORD_SIZE].copy_from_slice(&value.to_ne_bytes());
    }

    pub fn tag_at(&self, offset: usize) -> Tag {
        Tag::unpack(self.read_word(offset))
    }

    pub fn header(&self, bp: BlockPtr) -> Tag {
        self.tag_at(header_of(bp))
    }

    pub fn footer(&self, bp: BlockPtr) -> Tag {
        self.tag_at(self.footer_of(bp))
    }

    pub fn size(&self, bp: BlockPtr) -> usize {
        self.header(bp).size
    }

    pub fn is_allocated(&self, bp: BlockPtr) -> bool {
        self.header(bp).allocated
    }

    pub fn footer_of(&self, bp: BlockPtr) -> usize {
        bp.offset() + self.size(bp) - DOUBLE_WORD
    }

    /// Writes identical header and footer tags. The footer position follows
    /// from `size`, not from the previous header.
    pub fn set_tags(&mut self, bp: BlockPtr, size: usize, allocated: bool) {
        let word = Tag::new(size, allocated).pack();

        self.write_word(header_of(bp), word);
        self.write_word(bp.offset() + size - DOUBLE_WORD, word);
    }

    pub fn set_header(&mut self, bp: BlockPtr, size: usize, allocated: bool) {
        self.write_word(header_of(bp), Tag::new(size, allocated).pack());
    }

    pub fn next_block(&self, bp: BlockPtr) -> BlockPtr {
        bp.add(self.size(bp))
    }

    /// Reads the footer just before `bp`'s header. Must not be called on the
    /// first block, whose predecessor is the prologue. `None` when the footer
    /// holds a size that reaches below the region.
    pub fn prev_block(&self, bp: BlockPtr) -> Option<BlockPtr> {
        let prev_size = self.tag_at(bp.offset() - DOUBLE_WORD).size;

        bp.offset()
            .checked_sub(prev_size)
            .and_then(BlockPtr::from_offset)
    }

    pub fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.store.region()[offset..offset + len]
    }

    pub fn bytes_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        &mut self.store.region_mut()[offset..offset + len]
    }

    pub fn copy_within(&mut self, src: usize, dst: usize, len: usize) {
        self.store.region_mut().copy_within(src..src + len, dst);
    }

    /// Physical blocks from `first` up to, but excluding, the epilogue.
    pub fn blocks(&self, first: BlockPtr) -> Blocks<'_, S> {
        Blocks {
            region: self,
            cursor: first.offset(),
            done: false,
        }
    }
}

pub(crate) fn header_of(bp: BlockPtr) -> usize {
    bp.header()
}

/// A physical block as read from the region, tags kept raw so that a
/// mismatch can be reported.
#[derive(Debug, Clone, Copy)]
pub struct BlockInfo {
    pub ptr: BlockPtr,
    pub header: usize,
    pub footer: Option<usize>,
}

impl BlockInfo {
    pub fn size(&self) -> usize {
        Tag::unpack(self.header).size
    }

    pub fn is_allocated(&self) -> bool {
        Tag::unpack(self.header).allocated
    }

    pub fn tags_agree(&self) -> bool {
        self.footer == Some(self.header)
    }
}

/// Walks the implicit list of blocks. Every read is bounds-checked; the walk
/// stops at a zero size tag or at the first tag that lies outside the region.
pub(crate) struct Blocks<'a, S> {
    region: &'a Region<S>,
    cursor: usize,
    done: bool,
}

impl<S> Blocks<'_, S> {
    /// Payload offset the walk stopped at, the epilogue on a sound heap.
    pub fn position(&self) -> usize {
        self.cursor
    }
}

impl<S: BackingStore> Iterator for Blocks<'_, S> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let ptr = BlockPtr::from_offset(self.cursor)?;
        let header = match self.region.try_read_word(ptr.header()) {
            Some(word) if Tag::unpack(word).size > 0 => word,
            _ => {
                self.done = true;
                return None;
            }
        };

        let size = Tag::unpack(header).size;
        let end = self.cursor.checked_add(size);
        let footer = end
            .and_then(|end| end.checked_sub(DOUBLE_WORD))
            .and_then(|offset| self.region.try_read_word(offset));

        match end {
            Some(end) => self.cursor = end,
            None => self.done = true,
        }

        Some(BlockInfo { ptr, header, footer })
    }
}
