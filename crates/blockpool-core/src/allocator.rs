//! The fixed-block allocator and its provisioning policies.

use std::fmt;
use std::ptr::NonNull;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::arena::{Arena, StaticBuffer};
use crate::error::AllocError;
use crate::free_list::{FreeList, Table};
use crate::layout::BlockLayout;
use crate::oom::{with_escalation, OomRegistry};
use crate::stats::{AtomicPoolStats, PoolStats};

/// How an allocator obtains its blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Blocks fetched one batch at a time from the system heap, kept until
    /// the allocator is dropped.
    GrowableHeap,
    /// One heap region for a fixed number of blocks, obtained on first use.
    FixedHeapPool,
    /// A caller-supplied buffer; the system heap is never used.
    FixedStaticPool,
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GrowableHeap => f.write_str("growable-heap"),
            Self::FixedHeapPool => f.write_str("fixed-heap-pool"),
            Self::FixedStaticPool => f.write_str("fixed-static-pool"),
        }
    }
}

struct State<'a> {
    arena: Arena<'a>,
    free: FreeList<Table<'a, u32>, Table<'a, bool>>,
}

/// A pool of equally sized blocks with O(1) allocate and deallocate.
///
/// Every instance owns one lock guarding its free list and arena growth;
/// independent allocators never contend. Blocks carry no thread affinity.
pub struct Allocator<'a> {
    layout: BlockLayout,
    policy: Policy,
    capacity: usize,
    batch: usize,
    name: &'static str,
    state: Mutex<State<'a>>,
    oom: &'a OomRegistry,
    stats: AtomicPoolStats,
}

impl<'a> Allocator<'a> {
    /// Unbounded pool fetching one block at a time from the system heap.
    ///
    /// Fails with [`AllocError::InvalidConfig`] when `block_size` rounds to
    /// a size no heap block can have.
    pub fn growable(block_size: usize) -> Result<Self, AllocError> {
        Ok(Self::growable_with(BlockLayout::for_size(block_size)?, 0, 1))
    }

    /// Growable pool refilling `batch` blocks at a time and never holding
    /// more than `capacity` blocks (`0` = unbounded).
    pub fn growable_with(layout: BlockLayout, capacity: usize, batch: usize) -> Self {
        let capacity = capacity.min(u32::MAX as usize);
        Self::from_parts(
            layout,
            Policy::GrowableHeap,
            capacity,
            batch.max(1),
            State {
                arena: Arena::growable(layout),
                free: FreeList::owned(0),
            },
        )
    }

    /// Pool of `num_blocks` blocks in one heap region allocated on first use.
    pub fn fixed_heap(block_size: usize, num_blocks: usize) -> Result<Self, AllocError> {
        Self::fixed_heap_with(BlockLayout::for_size(block_size)?, num_blocks)
    }

    /// [`Allocator::fixed_heap`] with an explicit block layout.
    ///
    /// Neither the arena nor the free-list tables exist until the first
    /// allocation.
    pub fn fixed_heap_with(layout: BlockLayout, num_blocks: usize) -> Result<Self, AllocError> {
        check_block_count(num_blocks)?;
        layout.region(num_blocks)?;
        Ok(Self::from_parts(
            layout,
            Policy::FixedHeapPool,
            num_blocks,
            0,
            State {
                arena: Arena::lazy(layout, num_blocks),
                free: FreeList::owned(0),
            },
        ))
    }

    /// Pool of `num_blocks` blocks carved from `buffer`.
    ///
    /// Neither construction, allocation, deallocation nor drop touches the
    /// system heap. The buffer must hold `num_blocks` rounded blocks and
    /// free-list tables for at least `num_blocks` entries.
    pub fn fixed_static<const BYTES: usize, const BLOCKS: usize>(
        block_size: usize,
        num_blocks: usize,
        buffer: &'a mut StaticBuffer<BYTES, BLOCKS>,
    ) -> Result<Self, AllocError> {
        let layout = BlockLayout::for_size(block_size)?;
        check_block_count(num_blocks)?;
        if num_blocks > BLOCKS {
            return Err(AllocError::InvalidConfig(format!(
                "buffer tracks {BLOCKS} blocks, {num_blocks} requested"
            )));
        }
        let needed = layout.region(num_blocks)?.size();
        if needed > BYTES {
            return Err(AllocError::InvalidConfig(format!(
                "buffer holds {BYTES} bytes, {num_blocks} blocks of {} need {needed}",
                layout.size()
            )));
        }
        let (bytes, stack, live) = buffer.split();
        Ok(Self::from_parts(
            layout,
            Policy::FixedStaticPool,
            num_blocks,
            0,
            State {
                arena: Arena::borrowed(layout, num_blocks, bytes),
                free: FreeList::borrowed(stack, live, num_blocks),
            },
        ))
    }

    fn from_parts(
        layout: BlockLayout,
        policy: Policy,
        capacity: usize,
        batch: usize,
        state: State<'a>,
    ) -> Self {
        Self {
            layout,
            policy,
            capacity,
            batch,
            name: "anonymous",
            state: Mutex::new(state),
            oom: OomRegistry::global(),
            stats: AtomicPoolStats::new(),
        }
    }

    /// Escalate exhaustion to `registry` instead of the global one.
    #[must_use]
    pub fn with_oom(mut self, registry: &'a OomRegistry) -> Self {
        self.oom = registry;
        self
    }

    /// Label used in log events.
    #[must_use]
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Hand out one block able to hold `size` bytes.
    ///
    /// On exhaustion the out-of-memory handler runs once (outside the lock)
    /// and the request is retried once before the error is returned.
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        if size > self.layout.size() {
            let err = AllocError::SizeExceeded {
                requested: size,
                block_size: self.layout.size(),
            };
            error!(allocator = self.name, %err, "rejected allocation");
            return Err(err);
        }
        with_escalation(self.oom, self.name, &self.stats, || self.try_allocate())
    }

    fn try_allocate(&self) -> Result<NonNull<u8>, AllocError> {
        let (block, live) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.arena.provision()? {
                state.free.grow(self.capacity);
            }
            let index = match state.free.pop() {
                Some(index) => index,
                None => self.refill(state)?,
            };
            let address = state.arena.address(index);
            debug_assert!(address.is_some(), "free slot {index} has no backing block");
            let Some(block) = address else {
                state.free.push(index)?;
                return Err(AllocError::HeapExhausted {
                    bytes: self.layout.size(),
                });
            };
            (block, state.free.live_count())
        };
        self.stats.record_allocation(live);
        Ok(block)
    }

    /// Grow a growable pool and take the first new slot.
    fn refill(&self, state: &mut State<'a>) -> Result<u32, AllocError> {
        if self.policy != Policy::GrowableHeap {
            return Err(AllocError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        let held = state.free.slots();
        let room = if self.capacity == 0 {
            self.batch
        } else {
            self.capacity.saturating_sub(held).min(self.batch)
        };
        if room == 0 {
            return Err(AllocError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        let fetched = state.arena.fetch(room);
        if fetched == 0 {
            return Err(AllocError::HeapExhausted {
                bytes: self.layout.size(),
            });
        }
        state.free.grow(fetched);
        debug!(
            allocator = self.name,
            fetched,
            total = held + fetched,
            "fetched blocks from system heap"
        );
        state
            .free
            .pop()
            .ok_or(AllocError::HeapExhausted {
                bytes: self.layout.size(),
            })
    }

    /// Return a block obtained from this allocator.
    ///
    /// Pointers outside the arena, off a block boundary, or already free are
    /// rejected with [`AllocError::InvalidFree`] and leave the pool intact.
    pub fn deallocate(&self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        let result = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state
                .arena
                .index_of(ptr)
                .and_then(|index| state.free.push(index))
        };
        match result {
            Ok(()) => {
                self.stats.record_deallocation();
                Ok(())
            }
            Err(reason) => {
                error!(allocator = self.name, %reason, ?ptr, "rejected deallocation");
                Err(reason.into())
            }
        }
    }

    /// Whether `ptr` is the start of a block in this allocator's arena.
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        self.state.lock().arena.index_of(ptr).is_ok()
    }

    /// Effective block size in bytes.
    pub fn block_size(&self) -> usize {
        self.layout.size()
    }

    /// Alignment guaranteed for every block.
    pub fn align(&self) -> usize {
        self.layout.align()
    }

    /// Block geometry.
    pub fn layout(&self) -> BlockLayout {
        self.layout
    }

    /// Provisioning policy.
    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Most blocks that can be live at once (`0` = unbounded).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Blocks currently allocated.
    pub fn live_count(&self) -> usize {
        self.state.lock().free.live_count()
    }

    /// Blocks currently backed by memory, live or free.
    pub fn provisioned_blocks(&self) -> usize {
        self.state.lock().arena.provisioned_blocks()
    }

    /// Usage counters.
    pub fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }

    /// Name used in log events.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Drop the allocator, reporting blocks that were never returned.
    ///
    /// With outstanding blocks the backing storage is leaked rather than
    /// freed, so stray pointers never reach memory reused by the system.
    pub fn teardown(self) -> Result<(), AllocError> {
        let live = self.live_count();
        drop(self);
        if live > 0 {
            return Err(AllocError::OutstandingAllocations { live });
        }
        Ok(())
    }
}

impl Drop for Allocator<'_> {
    fn drop(&mut self) {
        let name = self.name;
        let state = self.state.get_mut();
        let live = state.free.live_count();
        if live > 0 {
            error!(
                allocator = name,
                live, "allocator dropped with outstanding blocks, leaking its storage"
            );
            state.arena.leak();
        }
    }
}

impl fmt::Debug for Allocator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("block_size", &self.layout.size())
            .field("align", &self.layout.align())
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

fn check_block_count(num_blocks: usize) -> Result<(), AllocError> {
    if num_blocks == 0 {
        return Err(AllocError::InvalidConfig(
            "a fixed pool needs at least one block".into(),
        ));
    }
    if u32::try_from(num_blocks).is_err() {
        return Err(AllocError::InvalidConfig(format!(
            "{num_blocks} blocks exceed the {} block limit",
            u32::MAX
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvalidFree;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn quiet_registry() -> &'static OomRegistry {
        let registry: &'static OomRegistry = Box::leak(Box::new(OomRegistry::new()));
        registry.register(|| {});
        registry
    }

    #[test]
    fn lifo_reuse_for_every_policy() {
        let mut buffer = StaticBuffer::<{ 64 * 4 }, 4>::new();
        let pools = [
            Allocator::growable(64).unwrap(),
            Allocator::fixed_heap(64, 4).unwrap(),
            Allocator::fixed_static(64, 4, &mut buffer).unwrap(),
        ];
        for pool in &pools {
            let first = pool.allocate(64).unwrap();
            pool.deallocate(first).unwrap();
            let second = pool.allocate(64).unwrap();
            assert_eq!(first, second, "{}", pool.policy());
            pool.deallocate(second).unwrap();
        }
    }

    #[test]
    fn fixed_heap_is_lazy() {
        let pool = Allocator::fixed_heap(128, 16).unwrap();
        assert_eq!(pool.provisioned_blocks(), 0);
        assert_eq!(pool.state.lock().free.slots(), 0);
        let block = pool.allocate(1).unwrap();
        assert_eq!(pool.provisioned_blocks(), 16);
        assert_eq!(pool.state.lock().free.slots(), 16);
        pool.deallocate(block).unwrap();
    }

    #[test]
    fn unprovisioned_fixed_heap_rejects_frees() {
        let pool = Allocator::fixed_heap(16, 4).unwrap();
        let mut outside = 0u64;
        let ptr = NonNull::from(&mut outside).cast::<u8>();
        assert_eq!(
            pool.deallocate(ptr),
            Err(AllocError::InvalidFree(InvalidFree::Foreign))
        );
        assert_eq!(pool.live_count(), 0);
        assert_eq!(pool.teardown(), Ok(()));
    }

    #[test]
    fn unrepresentable_block_sizes_are_rejected() {
        for block_size in [usize::MAX, usize::MAX - 1, 1 << (usize::BITS - 1)] {
            assert!(
                matches!(
                    Allocator::growable(block_size),
                    Err(AllocError::InvalidConfig(_))
                ),
                "block_size = {block_size}"
            );
            assert!(matches!(
                Allocator::fixed_heap(block_size, 1),
                Err(AllocError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn fixed_heap_exhaustion_escalates() {
        let registry = OomRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry.register(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let pool = Allocator::fixed_heap(32, 2).unwrap().with_oom(&registry);
        let a = pool.allocate(32).unwrap();
        let b = pool.allocate(32).unwrap();
        assert_eq!(
            pool.allocate(32),
            Err(AllocError::CapacityExceeded { capacity: 2 })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().failures, 1);

        pool.deallocate(a).unwrap();
        pool.deallocate(b).unwrap();
    }

    #[test]
    fn growable_fetches_on_demand_and_keeps_blocks() {
        let pool = Allocator::growable(48).unwrap();
        assert_eq!(pool.capacity(), 0);
        let blocks: Vec<_> = (0..5).map(|_| pool.allocate(48).unwrap()).collect();
        assert_eq!(pool.provisioned_blocks(), 5);
        for block in &blocks {
            pool.deallocate(*block).unwrap();
        }
        assert_eq!(pool.provisioned_blocks(), 5);
        assert_eq!(pool.live_count(), 0);

        let again: Vec<_> = (0..5).map(|_| pool.allocate(48).unwrap()).collect();
        assert_eq!(pool.provisioned_blocks(), 5);
        let before: HashSet<_> = blocks.iter().collect();
        assert!(again.iter().all(|b| before.contains(b)));
        for block in again {
            pool.deallocate(block).unwrap();
        }
    }

    #[test]
    fn bounded_growable_stops_at_capacity() {
        let registry = quiet_registry();
        let pool = Allocator::growable_with(BlockLayout::for_size(16).unwrap(), 3, 2).with_oom(registry);
        let a = pool.allocate(16).unwrap();
        assert_eq!(pool.provisioned_blocks(), 2);
        let b = pool.allocate(16).unwrap();
        let c = pool.allocate(16).unwrap();
        assert_eq!(pool.provisioned_blocks(), 3);
        assert_eq!(
            pool.allocate(16),
            Err(AllocError::CapacityExceeded { capacity: 3 })
        );
        for block in [a, b, c] {
            pool.deallocate(block).unwrap();
        }
    }

    #[test]
    fn size_exceeded_is_rejected_without_escalation() {
        let pool = Allocator::fixed_heap(100, 2).unwrap();
        assert_eq!(
            pool.allocate(101),
            Err(AllocError::SizeExceeded {
                requested: 101,
                block_size: 100
            })
        );
        assert_eq!(pool.stats().oom_events, 0);
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn double_free_is_detected() {
        let pool = Allocator::fixed_heap(64, 4).unwrap();
        let block = pool.allocate(64).unwrap();
        pool.deallocate(block).unwrap();
        assert_eq!(
            pool.deallocate(block),
            Err(AllocError::InvalidFree(InvalidFree::DoubleFree))
        );

        // The free list is intact: two allocations give distinct blocks.
        let a = pool.allocate(64).unwrap();
        let b = pool.allocate(64).unwrap();
        assert_ne!(a, b);
        pool.deallocate(a).unwrap();
        pool.deallocate(b).unwrap();
    }

    #[test]
    fn growable_double_free_is_detected() {
        let pool = Allocator::growable(8).unwrap();
        let block = pool.allocate(8).unwrap();
        pool.deallocate(block).unwrap();
        assert_eq!(
            pool.deallocate(block),
            Err(AllocError::InvalidFree(InvalidFree::DoubleFree))
        );
    }

    #[test]
    fn foreign_and_misaligned_pointers_are_rejected() {
        let pool = Allocator::fixed_heap(64, 4).unwrap();
        let other = Allocator::fixed_heap(64, 4).unwrap();
        let block = pool.allocate(64).unwrap();
        let stranger = other.allocate(64).unwrap();

        assert_eq!(
            pool.deallocate(stranger),
            Err(AllocError::InvalidFree(InvalidFree::Foreign))
        );
        let inside = NonNull::new(block.as_ptr().wrapping_add(8)).unwrap();
        assert_eq!(
            pool.deallocate(inside),
            Err(AllocError::InvalidFree(InvalidFree::Misaligned))
        );
        assert!(pool.owns(block));
        assert!(!pool.owns(stranger));

        pool.deallocate(block).unwrap();
        other.deallocate(stranger).unwrap();
    }

    #[test]
    fn blocks_are_aligned() {
        for size in [1, 4, 24, 40, 100, 256, 4096] {
            let pool = Allocator::fixed_heap(size, 8).unwrap();
            let growable = Allocator::growable(size).unwrap();
            for p in [&pool, &growable] {
                let block = p.allocate(size).unwrap();
                assert_eq!(block.as_ptr() as usize % p.align(), 0, "size {size}");
                p.deallocate(block).unwrap();
            }
        }
    }

    #[test]
    fn static_pool_stays_in_buffer() {
        let mut buffer = StaticBuffer::<{ 100 * 20 }, 20>::new();
        let start = buffer.as_ptr() as usize;
        let pool = Allocator::fixed_static(100, 20, &mut buffer).unwrap();
        let blocks: Vec<_> = (0..20).map(|_| pool.allocate(100).unwrap()).collect();
        for block in &blocks {
            let addr = block.as_ptr() as usize;
            assert!(addr >= start && addr + 100 <= start + 2000);
        }
        for block in blocks {
            pool.deallocate(block).unwrap();
        }
        pool.teardown().unwrap();
    }

    #[test]
    fn static_pool_rejects_small_buffers() {
        let mut buffer = StaticBuffer::<1000, 20>::new();
        assert!(matches!(
            Allocator::fixed_static(100, 20, &mut buffer),
            Err(AllocError::InvalidConfig(_))
        ));
        let mut buffer = StaticBuffer::<2000, 10>::new();
        assert!(matches!(
            Allocator::fixed_static(100, 20, &mut buffer),
            Err(AllocError::InvalidConfig(_))
        ));
    }

    #[test]
    fn zero_block_pools_are_rejected() {
        assert!(matches!(
            Allocator::fixed_heap(8, 0),
            Err(AllocError::InvalidConfig(_))
        ));
    }

    #[test]
    fn teardown_reports_outstanding_blocks() {
        let pool = Allocator::growable(32).unwrap().with_name("leaky");
        let _block = pool.allocate(32).unwrap();
        assert_eq!(
            pool.teardown(),
            Err(AllocError::OutstandingAllocations { live: 1 })
        );

        let pool = Allocator::fixed_heap(32, 2).unwrap();
        let block = pool.allocate(32).unwrap();
        pool.deallocate(block).unwrap();
        assert_eq!(pool.teardown(), Ok(()));
    }

    #[test]
    fn stats_track_peak() {
        let pool = Allocator::fixed_heap(16, 8).unwrap();
        let a = pool.allocate(16).unwrap();
        let b = pool.allocate(16).unwrap();
        pool.deallocate(a).unwrap();
        pool.deallocate(b).unwrap();
        let stats = pool.stats();
        assert_eq!(stats.allocations, 2);
        assert_eq!(stats.deallocations, 2);
        assert_eq!(stats.peak_live, 2);
    }

    #[test]
    fn debug_output_names_policy() {
        let pool = Allocator::growable(8).unwrap().with_name("debug");
        let text = format!("{pool:?}");
        assert!(text.contains("GrowableHeap"));
        assert!(text.contains("debug"));
    }
}
