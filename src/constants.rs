use std::mem::size_of;

// header, footer and free list link size
pub const WORD_SIZE: usize = size_of::<usize>();

// alignment unit for every payload
pub const DOUBLE_WORD: usize = 2 * WORD_SIZE;

// header + footer + prev + next
pub const MIN_BLOCK_SIZE: usize = 2 * DOUBLE_WORD;
pub const MIN_BLOCK_SHIFT: u32 = MIN_BLOCK_SIZE.trailing_zeros();

pub const NUM_CLASSES: usize = 8;

// sentinel ring headers at the very start of the region
pub const SENTINEL_TABLE_SIZE: usize = NUM_CLASSES * DOUBLE_WORD;

// padding word, prologue header, prologue footer, epilogue header
pub const BOUNDARY_SIZE: usize = 4 * WORD_SIZE;

pub const PROLOGUE_SIZE: usize = DOUBLE_WORD;

pub const CHUNK_SIZE: usize = 1 << 12;

pub const MAX_HEAP: usize = 20 * (1 << 20);

pub const ALLOCATED_BIT: usize = 0x1;
