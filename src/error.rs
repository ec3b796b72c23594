use std::alloc::LayoutError;
use thiserror::Error;

impl From<LayoutError> for AllocError {
    fn from(_: LayoutError) -> Self {
        Self::SizeOverflow
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("backing store exhausted")]
    OutOfMemory,
    #[error("cannot free a block that is not allocated")]
    InvalidFree,
    #[error("cannot reallocate a block that is not allocated")]
    InvalidRealloc,
    #[error("pointer does not reference an allocated block")]
    InvalidPointer,
    #[error("requested size overflows the block size")]
    SizeOverflow,
}
