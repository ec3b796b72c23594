use crate::constants::{MIN_BLOCK_SHIFT, MIN_BLOCK_SIZE, NUM_CLASSES};

/// Index of the free list that holds blocks of `size` total bytes.
///
/// Classes double in width: with 32-byte minimum blocks they cover
/// `[32, 64]`, `(64, 128]`, ... and the last class takes everything above
/// `MIN_BLOCK_SIZE << (NUM_CLASSES - 1)`.
pub fn class_of(size: usize) -> usize {
    if size <= MIN_BLOCK_SIZE {
        return 0;
    }

    let log2 = (size - 1).ilog2();
    let class = log2.saturating_sub(MIN_BLOCK_SHIFT) as usize;

    class.min(NUM_CLASSES - 1)
}

/// Largest block size a class holds, `None` for the unbounded last class.
pub fn class_limit(class: usize) -> Option<usize> {
    if class + 1 >= NUM_CLASSES {
        None
    } else {
        Some(MIN_BLOCK_SIZE << (class + 1))
    }
}
