use crate::block::{BlockPtr, Region};
use crate::block_store::BackingStore;
use crate::constants::{DOUBLE_WORD, NUM_CLASSES, WORD_SIZE};
use crate::size_class::{class_limit, class_of};

/// How a block is picked from the smallest class that may hold a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FitPolicy {
    /// First member large enough, in insertion order.
    #[default]
    FirstFit,
    /// Smallest member large enough. Scans the whole class unless an exact
    /// match turns up.
    BestFit,
}

/// Segregated free lists.
///
/// Each class is a circular doubly linked ring whose header is a sentinel
/// node in the table at `base`. A free block stores its `prev` link in its
/// first payload word and `next` in the second; both are region offsets of
/// either another free block or a sentinel. The links are garbage once the
/// block is allocated.
pub(crate) struct FreeLists {
    base: usize,
}

impl FreeLists {
    /// Makes every ring empty. `base` must address `NUM_CLASSES` double words.
    pub fn init<S: BackingStore>(region: &mut Region<S>, base: usize) -> Self {
        let lists = Self { base };

        for class in 0..NUM_CLASSES {
            let sentinel = lists.sentinel(class);

            region.write_word(sentinel, sentinel);
            region.write_word(sentinel + WORD_SIZE, sentinel);
        }

        lists
    }

    pub fn sentinel(&self, class: usize) -> usize {
        debug_assert!(class < NUM_CLASSES);

        self.base + class * DOUBLE_WORD
    }

    pub fn is_sentinel(&self, node: usize) -> bool {
        node >= self.base
            && node < self.base + NUM_CLASSES * DOUBLE_WORD
            && (node - self.base) % DOUBLE_WORD == 0
    }

    pub fn prev<S: BackingStore>(region: &Region<S>, node: usize) -> usize {
        region.read_word(node)
    }

    pub fn next<S: BackingStore>(region: &Region<S>, node: usize) -> usize {
        region.read_word(node + WORD_SIZE)
    }

    fn set_prev<S: BackingStore>(region: &mut Region<S>, node: usize, prev: usize) {
        region.write_word(node, prev);
    }

    fn set_next<S: BackingStore>(region: &mut Region<S>, node: usize, next: usize) {
        region.write_word(node + WORD_SIZE, next);
    }

    /// Appends `bp` to the tail of the ring chosen by its current size.
    pub fn insert<S: BackingStore>(&self, region: &mut Region<S>, bp: BlockPtr) {
        let size = region.size(bp);
        let class = class_of(size);
        let head = self.sentinel(class);
        let tail = Self::prev(region, head);
        let node = bp.offset();

        debug_assert!(
            self.ring(region, class).all(|member| member != bp),
            "block {node:#x} is already free"
        );

        log::trace!("free list insert {node:#x} size {size} class {class}");

        Self::set_next(region, node, head);
        Self::set_prev(region, node, tail);
        Self::set_next(region, tail, node);
        Self::set_prev(region, head, node);
    }

    /// Unlinks `bp`. Its size field must still be the one it was inserted
    /// with.
    pub fn remove<S: BackingStore>(&self, region: &mut Region<S>, bp: BlockPtr) {
        let node = bp.offset();

        debug_assert!(
            self.ring(region, class_of(region.size(bp))).any(|member| member == bp),
            "block {node:#x} is not in the ring for its size"
        );

        log::trace!("free list remove {node:#x} size {}", region.size(bp));

        let prev = Self::prev(region, node);
        let next = Self::next(region, node);

        Self::set_next(region, prev, next);
        Self::set_prev(region, next, prev);
    }

    /// Looks for a free block of at least `asize` bytes.
    ///
    /// Only the smallest applicable class is searched member by member; every
    /// block in a larger class is big enough, so the head of the first
    /// non-empty one is taken.
    pub fn find_fit<S: BackingStore>(
        &self,
        region: &Region<S>,
        asize: usize,
        policy: FitPolicy,
    ) -> Option<BlockPtr> {
        let min_class = class_of(asize);

        let found = match policy {
            FitPolicy::FirstFit => self
                .ring(region, min_class)
                .find(|bp| region.size(*bp) >= asize),
            FitPolicy::BestFit => self.best_in_class(region, min_class, asize),
        };

        if found.is_some() {
            return found;
        }

        (min_class + 1..NUM_CLASSES).find_map(|class| self.ring(region, class).next())
    }

    fn best_in_class<S: BackingStore>(
        &self,
        region: &Region<S>,
        class: usize,
        asize: usize,
    ) -> Option<BlockPtr> {
        let mut best: Option<(BlockPtr, usize)> = None;

        for bp in self.ring(region, class) {
            let size = region.size(bp);

            if size == asize {
                return Some(bp);
            }

            if size > asize && best.map_or(true, |(_, best_size)| size < best_size) {
                best = Some((bp, size));
            }
        }

        best.map(|(bp, _)| bp)
    }

    pub fn is_empty<S: BackingStore>(&self, region: &Region<S>, class: usize) -> bool {
        let head = self.sentinel(class);

        Self::next(region, head) == head
    }

    #[cfg(test)]
    pub fn contains<S: BackingStore>(&self, region: &Region<S>, bp: BlockPtr) -> bool {
        (0..NUM_CLASSES).any(|class| self.ring(region, class).any(|member| member == bp))
    }

    /// Members of one class from head to tail. Assumes well formed links; the
    /// heap checker walks rings on its own.
    pub fn ring<'a, S: BackingStore>(&self, region: &'a Region<S>, class: usize) -> Ring<'a, S> {
        let head = self.sentinel(class);

        Ring {
            region,
            head,
            cursor: Self::next(region, head),
        }
    }

    pub fn trace_dump<S: BackingStore>(&self, region: &Region<S>) {
        if !log::log_enabled!(log::Level::Trace) {
            return;
        }

        for class in (0..NUM_CLASSES).filter(|class| !self.is_empty(region, *class)) {
            let members: Vec<String> = self
                .ring(region, class)
                .map(|bp| format!("{:#x}/{}", bp.offset(), region.size(bp)))
                .collect();

            match class_limit(class) {
                Some(limit) => log::trace!("class {class} (..={limit}): [{}]", members.join(", ")),
                None => log::trace!("class {class} (unbounded): [{}]", members.join(", ")),
            }
        }
    }
}

pub(crate) struct Ring<'a, S> {
    region: &'a Region<S>,
    head: usize,
    cursor: usize,
}

impl<S: BackingStore> Iterator for Ring<'_, S> {
    type Item = BlockPtr;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == self.head {
            return None;
        }

        let current = self.cursor;
        self.cursor = FreeLists::next(self.region, current);

        BlockPtr::from_offset(current)
    }
}
