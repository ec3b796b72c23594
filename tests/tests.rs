use segfit::{
    adjust_size, AllocError, FitPolicy, Heap, HeapConfig, MemStore, VecStore, CHUNK_SIZE,
    DOUBLE_WORD, MIN_BLOCK_SIZE,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn heap() -> Heap {
    init_logger();
    Heap::new().unwrap()
}

fn assert_consistent(heap: &Heap<impl segfit::BackingStore>) {
    let report = heap.check(false);
    assert!(report.is_consistent(), "{report}");
}

#[test]
fn hello_alloc() {
    let mut heap = heap();
    let name = b"Hello Alloc";

    let ptr = heap.allocate(name.len()).unwrap().unwrap();
    heap.payload_mut(ptr).unwrap()[..name.len()].copy_from_slice(name);

    assert_eq!(&heap.payload(ptr).unwrap()[..name.len()], name);
    assert_consistent(&heap);
}

#[test]
fn zero_sized_requests() {
    let mut heap = heap();
    let before = heap.stats();

    assert_eq!(heap.allocate(0).unwrap(), None);
    assert_eq!(heap.free(None), Ok(()));
    assert_eq!(heap.reallocate(None, 0).unwrap(), None);

    assert_eq!(heap.stats(), before);
    assert_consistent(&heap);
}

#[test]
fn block_reuse() {
    let mut heap = heap();

    let a = heap.allocate(100).unwrap();
    let _b = heap.allocate(100).unwrap();
    heap.free(a).unwrap();
    let c = heap.allocate(100).unwrap();

    assert_eq!(c, a);
    assert_consistent(&heap);
}

#[test]
fn alloc_free_alloc_does_not_grow() {
    let mut heap = heap();

    let first = heap.allocate(256).unwrap();
    let size = heap.size();

    heap.free(first).unwrap();
    let second = heap.allocate(256).unwrap();

    assert_eq!(second, first);
    assert_eq!(heap.size(), size);
}

#[test]
fn returned_blocks_are_large_enough() {
    let mut heap = heap();

    for size in (1..200).chain([1000, 4095, 4096, 4097, 10_000]) {
        let ptr = heap.allocate(size).unwrap().unwrap();
        let block = heap.blocks().find(|b| b.ptr == ptr).unwrap();

        assert!(block.is_allocated());
        assert!(block.tags_agree());
        assert!(block.size() >= adjust_size(size).unwrap());
        assert!(heap.usable_size(ptr).unwrap() >= size);
        assert_eq!(ptr.offset() % DOUBLE_WORD, 0);
    }

    assert_consistent(&heap);
}

#[test]
fn payload_addresses_are_aligned() {
    let mut heap = heap();
    let base = heap.store().as_ptr() as usize;

    for size in [1, 7, 24, 100, 513] {
        let ptr = heap.allocate(size).unwrap().unwrap();

        assert_eq!((base + ptr.offset()) % DOUBLE_WORD, 0);
    }
}

#[test]
fn alloc_large() {
    let mut heap = heap();
    let before = heap.size();

    for _ in 0..10 {
        let ptr = heap.allocate(100_000).unwrap().unwrap();
        heap.payload_mut(ptr).unwrap()[99_999] = 0xff;
    }

    assert!(heap.size() >= before + 10 * 100_000);
    assert_consistent(&heap);
}

#[test]
fn alloc_many_small() {
    let mut heap = heap();

    for _ in 0..10_000 {
        heap.allocate(1).unwrap().unwrap();
    }

    let stats = heap.stats();
    assert_eq!(stats.allocated_blocks, 10_000);
    assert_eq!(stats.allocated_bytes, 10_000 * MIN_BLOCK_SIZE);
    assert_consistent(&heap);
}

#[test]
fn grows_when_nothing_fits() {
    let mut heap = heap();
    let before = heap.size();

    let ptr = heap.allocate(3 * CHUNK_SIZE).unwrap().unwrap();

    assert!(heap.size() > before);
    assert!(heap.usable_size(ptr).unwrap() >= 3 * CHUNK_SIZE);
    assert_consistent(&heap);
}

#[test]
fn out_of_memory_keeps_existing_blocks() {
    init_logger();
    let store = MemStore::with_limit(4 * CHUNK_SIZE).unwrap();
    let mut heap = Heap::init(store, HeapConfig::default()).unwrap();

    let ptr = heap.allocate(64).unwrap().unwrap();
    heap.payload_mut(ptr).unwrap()[..4].copy_from_slice(b"live");
    let size = heap.size();

    assert_eq!(heap.allocate(8 * CHUNK_SIZE), Err(AllocError::OutOfMemory));

    assert_eq!(heap.size(), size);
    assert_eq!(&heap.payload(ptr).unwrap()[..4], b"live");
    assert_consistent(&heap);

    // smaller requests still fit
    assert!(heap.allocate(CHUNK_SIZE).unwrap().is_some());
}

#[test]
fn oversized_request() {
    let mut heap = heap();

    assert_eq!(heap.allocate(usize::MAX), Err(AllocError::SizeOverflow));
    assert_eq!(heap.allocate(usize::MAX / 2), Err(AllocError::OutOfMemory));
    assert_consistent(&heap);
}

#[test]
fn reallocate_shrink_preserves_data() {
    let mut heap = heap();
    let data: Vec<u8> = (0..10).collect();

    let ptr = heap.allocate(500).unwrap();
    heap.payload_mut(ptr.unwrap()).unwrap()[..10].copy_from_slice(&data);

    let shrunk = heap.reallocate(ptr, 10).unwrap();

    assert_eq!(shrunk, ptr);
    assert_eq!(&heap.payload(shrunk.unwrap()).unwrap()[..10], &data[..]);
    assert_eq!(heap.usable_size(shrunk.unwrap()).unwrap(), MIN_BLOCK_SIZE - DOUBLE_WORD);
    assert_consistent(&heap);
}

#[test]
fn reallocate_grow_preserves_data() {
    let mut heap = heap();
    let data: Vec<u8> = (0..100).collect();

    let ptr = heap.allocate(100).unwrap();
    let _fence = heap.allocate(8).unwrap();
    heap.payload_mut(ptr.unwrap()).unwrap()[..100].copy_from_slice(&data);

    let grown = heap.reallocate(ptr, 2000).unwrap();

    assert_ne!(grown, ptr);
    assert_eq!(&heap.payload(grown.unwrap()).unwrap()[..100], &data[..]);
    assert_eq!(heap.free(ptr), Err(AllocError::InvalidFree));
    assert_consistent(&heap);
}

#[test]
fn reallocate_null_is_allocate() {
    init_logger();
    let mut left = Heap::init(VecStore::new(), HeapConfig::default()).unwrap();
    let mut right = Heap::init(VecStore::new(), HeapConfig::default()).unwrap();

    let a = left.reallocate(None, 64).unwrap();
    let b = right.allocate(64).unwrap();

    assert_eq!(a, b);
    assert_eq!(left.stats(), right.stats());
}

#[test]
fn reallocate_zero_is_free() {
    let mut heap = heap();
    let fresh = heap.stats();

    let ptr = heap.allocate(64).unwrap();

    assert_eq!(heap.reallocate(ptr, 0).unwrap(), None);
    assert_eq!(heap.stats(), fresh);
    assert_eq!(heap.free(ptr), Err(AllocError::InvalidFree));
}

#[test]
fn failed_reallocate_leaves_block_untouched() {
    init_logger();
    let store = MemStore::with_limit(2 * CHUNK_SIZE).unwrap();
    let mut heap = Heap::init(store, HeapConfig::default()).unwrap();

    let ptr = heap.allocate(100).unwrap();
    heap.payload_mut(ptr.unwrap()).unwrap()[..3].copy_from_slice(b"abc");
    let stats = heap.stats();

    assert_eq!(heap.reallocate(ptr, 4 * CHUNK_SIZE), Err(AllocError::OutOfMemory));

    assert_eq!(heap.stats(), stats);
    assert_eq!(&heap.payload(ptr.unwrap()).unwrap()[..3], b"abc");
    assert_consistent(&heap);
}

#[test]
fn double_free_is_rejected() {
    let mut heap = heap();
    let a = heap.allocate(64).unwrap();
    let _b = heap.allocate(64).unwrap();

    heap.free(a).unwrap();
    let stats = heap.stats();

    assert_eq!(heap.free(a), Err(AllocError::InvalidFree));
    assert_eq!(heap.reallocate(a, 10), Err(AllocError::InvalidRealloc));
    assert_eq!(heap.payload(a.unwrap()), Err(AllocError::InvalidPointer));
    assert_eq!(heap.stats(), stats);
    assert_consistent(&heap);
}

#[test]
fn first_block_can_be_freed_and_reused() {
    let mut heap = heap();

    let first = heap.allocate(16).unwrap();
    assert_eq!(first, heap.blocks().next().map(|b| b.ptr));

    heap.free(first).unwrap();
    assert_consistent(&heap);
    assert_eq!(heap.stats().free_blocks, 1);

    assert_eq!(heap.allocate(16).unwrap(), first);
    assert_consistent(&heap);
}

#[test]
fn everything_freed_coalesces_into_one_block() {
    let mut heap = heap();
    let ptrs: Vec<_> = (1..50).map(|i| heap.allocate(i * 40).unwrap()).collect();

    // free odd then even to exercise every coalescing case
    for ptr in ptrs.iter().skip(1).step_by(2) {
        heap.free(*ptr).unwrap();
    }
    for ptr in ptrs.iter().step_by(2) {
        heap.free(*ptr).unwrap();
    }

    let stats = heap.stats();
    assert_eq!(stats.allocated_blocks, 0);
    assert_eq!(stats.free_blocks, 1);
    assert_consistent(&heap);
}

#[test]
fn independent_heaps() {
    let mut a = heap();
    let mut b = heap();

    let pa = a.allocate(32).unwrap().unwrap();
    let pb = b.allocate(32).unwrap().unwrap();
    a.payload_mut(pa).unwrap()[0] = 1;
    b.payload_mut(pb).unwrap()[0] = 2;

    assert_eq!(pa, pb);
    assert_eq!(a.payload(pa).unwrap()[0], 1);
    assert_eq!(b.payload(pb).unwrap()[0], 2);
}

#[test]
fn best_fit_heap_passes_the_same_scenarios() {
    init_logger();
    let config = HeapConfig::new().fit_policy(FitPolicy::BestFit);
    let mut heap = Heap::init(MemStore::new().unwrap(), config).unwrap();

    let a = heap.allocate(100).unwrap();
    let _b = heap.allocate(100).unwrap();
    heap.free(a).unwrap();

    assert_eq!(heap.allocate(100).unwrap(), a);
    assert_consistent(&heap);
}

#[test]
fn verbose_check_reports_blocks() {
    let mut heap = heap();
    let _ = heap.allocate(10).unwrap();
    let _ = heap.allocate(1000).unwrap();

    let report = heap.check(true);

    assert!(report.is_consistent(), "{report}");
    assert_eq!(report.blocks(), 3);
    assert_eq!(report.free_blocks(), 1);
}
