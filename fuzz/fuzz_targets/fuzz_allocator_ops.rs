#![no_main]

use std::ptr::NonNull;

use libfuzzer_sys::fuzz_target;

use blockpool_core::{AllocError, Allocator, OomRegistry};

static QUIET: OomRegistry = OomRegistry::new();

// First byte picks the block size, second the capacity; each following byte
// is one operation. Pointers fed back to the pool may be stale, interior or
// foreign; the pool must reject them without corrupting its state.
fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    QUIET.register(|| {});
    let block_size = usize::from(data[0]) + 1;
    let capacity = usize::from(data[1] % 32) + 1;
    let Ok(pool) = Allocator::fixed_heap(block_size, capacity) else {
        return;
    };
    let pool = pool.with_oom(&QUIET);

    let mut live: Vec<usize> = Vec::new();
    let mut retired: Vec<usize> = Vec::new();
    for &byte in &data[2..] {
        match byte % 4 {
            0 => match pool.allocate(usize::from(byte) % (block_size + 1)) {
                Ok(block) => live.push(block.as_ptr() as usize),
                Err(err) => assert_eq!(err, AllocError::CapacityExceeded { capacity }),
            },
            1 if !live.is_empty() => {
                let addr = live.swap_remove(usize::from(byte) % live.len());
                let block = NonNull::new(addr as *mut u8).unwrap();
                pool.deallocate(block).unwrap();
                retired.push(addr);
            }
            2 if !retired.is_empty() => {
                let addr = retired[usize::from(byte) % retired.len()];
                if !live.contains(&addr) {
                    let block = NonNull::new(addr as *mut u8).unwrap();
                    assert!(pool.deallocate(block).is_err());
                }
            }
            3 if !live.is_empty() => {
                let addr = live[usize::from(byte) % live.len()] + 1;
                let block = NonNull::new(addr as *mut u8).unwrap();
                assert!(pool.deallocate(block).is_err());
            }
            _ => {}
        }
        assert_eq!(pool.live_count(), live.len());
    }

    for addr in live {
        pool.deallocate(NonNull::new(addr as *mut u8).unwrap()).unwrap();
    }
    assert!(pool.teardown().is_ok());
});
