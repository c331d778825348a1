//! Fixed pool of `N` blocks sized for `T`, with inline storage.
#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::mem::{ManuallyDrop, MaybeUninit};
use std::ptr::NonNull;

use parking_lot::Mutex;
use tracing::error;

use crate::arena::{offset, slot_of};
use crate::block_allocator::BlockAllocator;
use crate::boxed::PoolBox;
use crate::error::AllocError;
use crate::free_list::FreeList;
use crate::layout::MIN_ALIGN;
use crate::oom::{with_escalation, OomRegistry};
use crate::stats::{AtomicPoolStats, PoolStats};

/// One block: room for a `T`, never smaller than `MIN_ALIGN` bytes.
#[repr(C)]
union Slot<T> {
    _value: ManuallyDrop<MaybeUninit<T>>,
    _word: [u8; MIN_ALIGN],
    _align: u32,
}

#[repr(C, align(16))]
struct Storage<T, const N: usize>([Slot<T>; N]);

/// A fixed static pool whose buffer is part of the value itself.
///
/// Behaves like [`crate::Allocator::fixed_static`] with `N` blocks of
/// `size_of::<T>()` bytes (rounded to [`MIN_ALIGN`]). Because `new` is a
/// `const fn` the pool can live in a `static`:
///
/// ```
/// use blockpool_core::TypedPool;
///
/// static POOL: TypedPool<[u8; 64], 8> = TypedPool::new();
///
/// let block = POOL.allocate(64).unwrap();
/// POOL.deallocate(block).unwrap();
/// ```
///
/// Moving a pool while raw blocks are outstanding invalidates them; the
/// borrow held by [`PoolBox`] prevents that for typed values.
pub struct TypedPool<T, const N: usize> {
    storage: UnsafeCell<MaybeUninit<Storage<T, N>>>,
    free: Mutex<FreeList<[u32; N], [bool; N]>>,
    oom: &'static OomRegistry,
    name: &'static str,
    stats: AtomicPoolStats,
    _owns: PhantomData<T>,
}

// SAFETY: block memory is only reached through pointers handed to callers,
// and all bookkeeping sits behind the mutex. Values of `T` may be created on
// one thread and dropped on another, hence `T: Send`.
unsafe impl<T: Send, const N: usize> Sync for TypedPool<T, N> {}

impl<T, const N: usize> TypedPool<T, N> {
    /// Bytes per block.
    pub const BLOCK_SIZE: usize = std::mem::size_of::<Slot<T>>();

    /// An empty pool escalating to the process-wide registry.
    pub const fn new() -> Self {
        Self::with_oom(OomRegistry::global())
    }

    /// An empty pool escalating to `registry`.
    pub const fn with_oom(registry: &'static OomRegistry) -> Self {
        assert!(N <= u32::MAX as usize, "pool exceeds the u32 block limit");
        Self {
            storage: UnsafeCell::new(MaybeUninit::uninit()),
            free: parking_lot::const_mutex(FreeList::from_tables([0; N], [false; N], N)),
            oom: registry,
            name: "typed-pool",
            stats: AtomicPoolStats::new(),
            _owns: PhantomData,
        }
    }

    /// Label used in log events.
    #[must_use]
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    fn base(&self) -> NonNull<u8> {
        // SAFETY: `UnsafeCell::get` never returns null.
        unsafe { NonNull::new_unchecked(self.storage.get().cast::<u8>()) }
    }

    /// Hand out one block able to hold `size` bytes.
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        if size > Self::BLOCK_SIZE {
            let err = AllocError::SizeExceeded {
                requested: size,
                block_size: Self::BLOCK_SIZE,
            };
            error!(allocator = self.name, %err, "rejected allocation");
            return Err(err);
        }
        with_escalation(self.oom, self.name, &self.stats, || {
            let (index, live) = {
                let mut free = self.free.lock();
                let index = free
                    .pop()
                    .ok_or(AllocError::CapacityExceeded { capacity: N })?;
                (index, free.live_count())
            };
            self.stats.record_allocation(live);
            Ok(offset(self.base(), index as usize * Self::BLOCK_SIZE))
        })
    }

    /// Return a block obtained from this pool.
    pub fn deallocate(&self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        let addr = ptr.as_ptr() as usize;
        let result = slot_of(self.base(), Self::BLOCK_SIZE, N, addr)
            .and_then(|index| self.free.lock().push(index));
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

    /// Move `value` into a block of this pool.
    pub fn create(&self, value: T) -> Result<PoolBox<'_, T, Self>, AllocError>
    where
        T: Send,
    {
        PoolBox::new_in(value, self)
    }

    /// Whether `ptr` is the start of one of this pool's blocks.
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        slot_of(self.base(), Self::BLOCK_SIZE, N, ptr.as_ptr() as usize).is_ok()
    }

    /// Number of blocks.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Blocks currently allocated.
    pub fn live_count(&self) -> usize {
        self.free.lock().live_count()
    }

    /// Blocks currently free.
    pub fn free_count(&self) -> usize {
        self.free.lock().free_count()
    }

    /// Usage counters.
    pub fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }
}

impl<T, const N: usize> Default for TypedPool<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for TypedPool<T, N> {
    fn drop(&mut self) {
        let live = self.free.get_mut().live_count();
        if live > 0 {
            error!(
                allocator = self.name,
                live, "typed pool dropped with outstanding blocks"
            );
        }
    }
}

impl<T: Send, const N: usize> BlockAllocator for TypedPool<T, N> {
    fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        TypedPool::allocate(self, size)
    }

    fn deallocate(&self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        TypedPool::deallocate(self, ptr)
    }

    fn block_size(&self) -> usize {
        Self::BLOCK_SIZE
    }

    fn owns(&self, ptr: NonNull<u8>) -> bool {
        TypedPool::owns(self, ptr)
    }
}

impl<T, const N: usize> fmt::Debug for TypedPool<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedPool")
            .field("name", &self.name)
            .field("block_size", &Self::BLOCK_SIZE)
            .field("capacity", &N)
            .finish_non_exhaustive()
    }
}
