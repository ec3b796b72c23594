use crate::block::{BlockInfo, BlockPtr, Region, Tag};
use crate::block_store::BackingStore;
use crate::constants::{DOUBLE_WORD, MIN_BLOCK_SIZE, NUM_CLASSES, PROLOGUE_SIZE, WORD_SIZE};
use crate::free_list::FreeLists;
use crate::size_class::class_of;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// One thing the heap checker found wrong. Offsets are payload offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Inconsistency {
    #[error("bad prologue")]
    BadPrologue,
    #[error("bad epilogue header at {offset:#x}")]
    BadEpilogue { offset: usize },
    #[error("{offset:#x} is not doubleword aligned")]
    Misaligned { offset: usize },
    #[error("{offset:#x}: invalid block size {size}")]
    BadSize { offset: usize, size: usize },
    #[error("{offset:#x}: header does not match footer")]
    TagMismatch { offset: usize },
    #[error("{offset:#x}: free block not in free list")]
    NotInFreeList { offset: usize },
    #[error("{offset:#x}: free block follows another free block")]
    Uncoalesced { offset: usize },
    #[error("class {class}: allocated block {offset:#x} in free list")]
    AllocatedInFreeList { class: usize, offset: usize },
    #[error("class {class}: free block {offset:#x} of size {size} belongs to another class")]
    WrongClass { class: usize, offset: usize, size: usize },
    #[error("class {class}: {offset:#x} is not a block of the heap")]
    StrayListMember { class: usize, offset: usize },
    #[error("class {class}: links around {offset:#x} are broken")]
    BrokenLink { class: usize, offset: usize },
    #[error("{offset:#x} is linked into the free lists more than once")]
    DuplicateListMember { offset: usize },
}

/// Everything one pass of the checker found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapReport {
    findings: Vec<Inconsistency>,
    blocks: usize,
    free_blocks: usize,
}

impl HeapReport {
    pub fn is_consistent(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn findings(&self) -> &[Inconsistency] {
        &self.findings
    }

    pub fn contains(&self, finding: &Inconsistency) -> bool {
        self.findings.contains(finding)
    }

    /// Physical blocks visited, prologue and epilogue excluded.
    pub fn blocks(&self) -> usize {
        self.blocks
    }

    pub fn free_blocks(&self) -> usize {
        self.free_blocks
    }

    fn report(&mut self, finding: Inconsistency) {
        log::error!("heap check: {finding}");
        self.findings.push(finding);
    }
}

impl fmt::Display for HeapReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.findings.is_empty() {
            return write!(f, "heap consistent ({} blocks, {} free)", self.blocks, self.free_blocks);
        }

        writeln!(f, "{} heap inconsistencies:", self.findings.len())?;

        for finding in &self.findings {
            writeln!(f, "  {finding}")?;
        }

        Ok(())
    }
}

/// Checks the block structure and the free lists against each other.
///
/// Every read is bounds-checked, so a corrupted heap produces findings
/// instead of a panic, and the allocator is left untouched.
pub(crate) fn check<S: BackingStore>(
    region: &Region<S>,
    lists: &FreeLists,
    prologue: BlockPtr,
    verbose: bool,
) -> HeapReport {
    let mut report = HeapReport::default();

    if verbose {
        log::info!("heap ({:#x}):", prologue.offset());
    }

    check_prologue(region, prologue, &mut report);

    let first = prologue.add(PROLOGUE_SIZE);
    let mut walk = region.blocks(first);
    let mut free_blocks = BTreeSet::new();
    let mut prev_free = false;

    for block in walk.by_ref() {
        if verbose {
            print_block(&block);
        }

        check_block(&block, &mut report);
        report.blocks += 1;

        if !block.is_allocated() {
            if prev_free {
                report.report(Inconsistency::Uncoalesced {
                    offset: block.ptr.offset(),
                });
            }

            free_blocks.insert(block.ptr.offset());
        }

        prev_free = !block.is_allocated();
    }

    report.free_blocks = free_blocks.len();

    let end = walk.position();
    let epilogue = region.try_read_word(end - WORD_SIZE);

    if end != region.len() || epilogue != Some(Tag::new(0, true).pack()) {
        report.report(Inconsistency::BadEpilogue { offset: end });
    } else if verbose {
        log::info!("{end:#x}: end of heap");
    }

    let listed = check_free_lists(region, lists, first.offset(), end, &mut report);

    for offset in free_blocks.difference(&listed) {
        report.report(Inconsistency::NotInFreeList { offset: *offset });
    }

    if verbose {
        lists.trace_dump(region);
    }

    report
}

fn check_prologue<S: BackingStore>(
    region: &Region<S>,
    prologue: BlockPtr,
    report: &mut HeapReport,
) {
    let expected = Some(Tag::new(PROLOGUE_SIZE, true).pack());
    let header = region.try_read_word(prologue.header());
    let footer = region.try_read_word(prologue.offset());

    if header != expected || footer != expected {
        report.report(Inconsistency::BadPrologue);
    }

    if prologue.offset() % DOUBLE_WORD != 0 {
        report.report(Inconsistency::Misaligned {
            offset: prologue.offset(),
        });
    }
}

fn check_block(block: &BlockInfo, report: &mut HeapReport) {
    let offset = block.ptr.offset();
    let size = block.size();

    if offset % DOUBLE_WORD != 0 {
        report.report(Inconsistency::Misaligned { offset });
    }

    if size < MIN_BLOCK_SIZE || size % DOUBLE_WORD != 0 {
        report.report(Inconsistency::BadSize { offset, size });
    }

    if !block.tags_agree() {
        report.report(Inconsistency::TagMismatch { offset });
    }
}

/// Walks every ring from its sentinel, returning the members that really are
/// free blocks. Walks are capped so a cycle that skips the sentinel ends.
fn check_free_lists<S: BackingStore>(
    region: &Region<S>,
    lists: &FreeLists,
    first: usize,
    end: usize,
    report: &mut HeapReport,
) -> BTreeSet<usize> {
    let mut listed = BTreeSet::new();
    let max_steps = region.len() / MIN_BLOCK_SIZE + 1;

    for class in 0..NUM_CLASSES {
        let head = lists.sentinel(class);
        let mut node = head;
        let mut steps = 0;

        loop {
            let next = region.try_read_word(node + WORD_SIZE);
            let back = next.and_then(|next| region.try_read_word(next));

            let Some(next) = next.filter(|_| back == Some(node)) else {
                report.report(Inconsistency::BrokenLink { class, offset: node });
                break;
            };

            if next == head {
                break;
            }

            steps += 1;
            if steps > max_steps || lists.is_sentinel(next) {
                report.report(Inconsistency::BrokenLink { class, offset: next });
                break;
            }

            if next < first || next >= end || next % DOUBLE_WORD != 0 {
                report.report(Inconsistency::StrayListMember { class, offset: next });
                break;
            }

            let Some(tag) = region.try_read_word(next - WORD_SIZE).map(Tag::unpack) else {
                report.report(Inconsistency::StrayListMember { class, offset: next });
                break;
            };

            if tag.allocated {
                report.report(Inconsistency::AllocatedInFreeList { class, offset: next });
            } else {
                if class_of(tag.size) != class {
                    report.report(Inconsistency::WrongClass {
                        class,
                        offset: next,
                        size: tag.size,
                    });
                }

                if !listed.insert(next) {
                    report.report(Inconsistency::DuplicateListMember { offset: next });
                }
            }

            node = next;
        }
    }

    listed
}

fn print_block(block: &BlockInfo) {
    let header = Tag::unpack(block.header);
    let alloc_char = |allocated: bool| if allocated { 'a' } else { 'f' };

    match block.footer.map(Tag::unpack) {
        Some(footer) => log::info!(
            "{:#x}: header: [{}:{}] footer: [{}:{}]",
            block.ptr.offset(),
            header.size,
            alloc_char(header.allocated),
            footer.size,
            alloc_char(footer.allocated)
        ),
        None => log::info!(
            "{:#x}: header: [{}:{}] footer: <outside heap>",
            block.ptr.offset(),
            header.size,
            alloc_char(header.allocated)
        ),
    }
}
