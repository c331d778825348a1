//! Capacity boundaries and out-of-memory escalation.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use blockpool_core::{AllocError, Allocator, OomRegistry, StaticBuffer};

#[test]
fn static_pool_serves_exactly_its_blocks() {
    static REGISTRY: OomRegistry = OomRegistry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    REGISTRY.register(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let mut buffer = StaticBuffer::<2000, 20>::new();
    let pool = Allocator::fixed_static(100, 20, &mut buffer)
        .unwrap()
        .with_oom(&REGISTRY);

    let mut blocks = Vec::new();
    for _ in 0..20 {
        blocks.push(pool.allocate(100).unwrap());
    }
    assert_eq!(
        pool.allocate(100),
        Err(AllocError::CapacityExceeded { capacity: 20 })
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let first = blocks.remove(0);
    pool.deallocate(first).unwrap();
    assert_eq!(pool.allocate(100).unwrap(), first);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    for block in blocks {
        pool.deallocate(block).unwrap();
    }
    pool.deallocate(first).unwrap();
    assert!(pool.teardown().is_ok());
}

#[test]
fn fixed_heap_pool_boundary() {
    static REGISTRY: OomRegistry = OomRegistry::new();
    REGISTRY.register(|| {});

    let pool = Allocator::fixed_heap(100, 20).unwrap().with_oom(&REGISTRY);
    assert_eq!(pool.provisioned_blocks(), 0);
    let blocks: Vec<_> = (0..20).map(|_| pool.allocate(64).unwrap()).collect();
    assert_eq!(pool.provisioned_blocks(), 20);
    assert!(pool.allocate(1).is_err());
    let stats = pool.stats();
    assert_eq!(stats.oom_events, 1);
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.peak_live, 20);
    for block in blocks {
        pool.deallocate(block).unwrap();
    }
}

#[test]
fn handler_that_frees_a_block_lets_the_retry_succeed() {
    static REGISTRY: OomRegistry = OomRegistry::new();

    let pool: Arc<Allocator<'static>> =
        Arc::new(Allocator::fixed_heap(32, 4).unwrap().with_oom(&REGISTRY));
    let stash: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

    let handler_pool = Arc::clone(&pool);
    let handler_stash = Arc::clone(&stash);
    REGISTRY.register(move || {
        if let Some(addr) = handler_stash.lock().pop() {
            let block = NonNull::new(addr as *mut u8).unwrap();
            handler_pool.deallocate(block).unwrap();
        }
    });

    for _ in 0..4 {
        let block = pool.allocate(32).unwrap();
        stash.lock().push(block.as_ptr() as usize);
    }
    let reclaimed = *stash.lock().last().unwrap();

    let block = pool.allocate(32).unwrap();
    assert_eq!(block.as_ptr() as usize, reclaimed);
    assert_eq!(pool.stats().oom_events, 1);
    assert_eq!(pool.stats().failures, 0);
    assert_eq!(pool.live_count(), 4);

    pool.deallocate(block).unwrap();
    for addr in stash.lock().drain(..) {
        pool.deallocate(NonNull::new(addr as *mut u8).unwrap()).unwrap();
    }
    REGISTRY.unregister();
}

#[test]
fn bounded_growable_pool_stops_at_capacity() {
    static REGISTRY: OomRegistry = OomRegistry::new();
    REGISTRY.register(|| {});

    let layout = blockpool_core::BlockLayout::for_size(48).unwrap();
    let pool = Allocator::growable_with(layout, 5, 2).with_oom(&REGISTRY);
    let blocks: Vec<_> = (0..5).map(|_| pool.allocate(48).unwrap()).collect();
    assert_eq!(pool.provisioned_blocks(), 5);
    assert_eq!(
        pool.allocate(48),
        Err(AllocError::CapacityExceeded { capacity: 5 })
    );
    for block in blocks {
        pool.deallocate(block).unwrap();
    }
    assert_eq!(pool.provisioned_blocks(), 5);
}

#[test]
fn outstanding_blocks_are_reported_at_teardown() {
    let pool = Allocator::fixed_heap(16, 2).unwrap();
    let _leaked = pool.allocate(16).unwrap();
    assert_eq!(
        pool.teardown(),
        Err(AllocError::OutstandingAllocations { live: 1 })
    );
}

const ABORT_CHILD: &str = "BLOCKPOOL_TEST_ABORT_CHILD";

#[test]
fn exhaustion_without_handler_aborts() {
    if std::env::var_os(ABORT_CHILD).is_some() {
        static EMPTY: OomRegistry = OomRegistry::new();
        let pool = Allocator::fixed_heap(16, 1).unwrap().with_oom(&EMPTY);
        let _held = pool.allocate(16).unwrap();
        let _ = pool.allocate(16);
        unreachable!("exhaustion without a handler must abort");
    }

    let status = std::process::Command::new(std::env::current_exe().unwrap())
        .args(["exhaustion_without_handler_aborts", "--exact", "--test-threads=1"])
        .env(ABORT_CHILD, "1")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .unwrap();
    assert!(!status.success());
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(status.signal(), Some(6));
    }
}
