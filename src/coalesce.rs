use crate::block::{BlockPtr, Region};
use crate::block_store::BackingStore;
use crate::constants::DOUBLE_WORD;
use crate::free_list::FreeLists;

/// Merges a newly freed block with whichever physical neighbours are free and
/// links the result into the free lists, exactly once, under its final size.
///
/// `bp` must already carry free tags and must not be in any ring. Neighbours
/// are unlinked before their sizes change, since removal finds the ring from
/// the size field. Returns the merged block, which starts at the lowest
/// address of the span.
///
/// The predecessor of `first` is the prologue. Its footer is a real
/// allocated tag, but it is never consulted: the first block is known to have
/// no free predecessor.
pub(crate) fn coalesce<S: BackingStore>(
    region: &mut Region<S>,
    lists: &FreeLists,
    first: BlockPtr,
    bp: BlockPtr,
) -> BlockPtr {
    let mut size = region.size(bp);
    let mut start = bp;

    // footer of the predecessor sits right before our header
    let prev = (bp != first)
        .then_some(bp)
        .filter(|bp| !region.tag_at(bp.offset() - DOUBLE_WORD).allocated)
        .and_then(|bp| region.prev_block(bp));

    // the epilogue is a zero size allocated header
    let next = Some(region.next_block(bp)).filter(|next| !region.is_allocated(*next));

    if let Some(next) = next {
        size += region.size(next);
        lists.remove(region, next);
    }

    if let Some(prev) = prev {
        size += region.size(prev);
        lists.remove(region, prev);
        start = prev;
    }

    region.set_tags(start, size, false);
    lists.insert(region, start);

    start
}
