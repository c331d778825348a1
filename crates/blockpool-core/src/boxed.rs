//! Owning pointer to a value stored in a pool block.
#![allow(unsafe_code)]

use std::fmt;
use std::marker::PhantomData;
use std::mem::{self, ManuallyDrop};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use tracing::error;

use crate::block_allocator::BlockAllocator;
use crate::error::AllocError;

/// A `T` living in a block of `A`, returned to the pool on drop.
pub struct PoolBox<'p, T, A: BlockAllocator + ?Sized> {
    ptr: NonNull<T>,
    pool: &'p A,
    _owns: PhantomData<T>,
}

// SAFETY: a `PoolBox` owns its `T` exclusively; the pool is only reached
// through `&A`, which is shareable because `A: Sync`.
unsafe impl<T: Send, A: BlockAllocator + ?Sized> Send for PoolBox<'_, T, A> {}
// SAFETY: shared access only hands out `&T`.
unsafe impl<T: Sync, A: BlockAllocator + ?Sized> Sync for PoolBox<'_, T, A> {}

impl<'p, T, A: BlockAllocator + ?Sized> PoolBox<'p, T, A> {
    /// Move `value` into a fresh block of `pool`.
    pub fn new_in(value: T, pool: &'p A) -> Result<Self, AllocError> {
        let raw = pool.allocate(mem::size_of::<T>())?;
        if raw.as_ptr() as usize % mem::align_of::<T>() != 0 {
            pool.deallocate(raw)?;
            return Err(AllocError::InvalidConfig(format!(
                "pool blocks are not aligned for {}",
                std::any::type_name::<T>()
            )));
        }
        let ptr = raw.cast::<T>();
        // SAFETY: the block is at least `size_of::<T>()` bytes, suitably
        // aligned, and exclusively ours until deallocated.
        unsafe { ptr.as_ptr().write(value) };
        Ok(Self {
            ptr,
            pool,
            _owns: PhantomData,
        })
    }

    /// Move the value out and return the block to the pool.
    pub fn into_inner(this: Self) -> T {
        let this = ManuallyDrop::new(this);
        // SAFETY: the value is initialised and never read again.
        let value = unsafe { this.ptr.as_ptr().read() };
        release(this.pool, this.ptr.cast());
        value
    }

    /// Address of the stored value.
    pub fn as_ptr(this: &Self) -> *const T {
        this.ptr.as_ptr()
    }

    /// The pool the value lives in.
    pub fn pool(this: &Self) -> &'p A {
        this.pool
    }
}

fn release<A: BlockAllocator + ?Sized>(pool: &A, block: NonNull<u8>) {
    if let Err(err) = pool.deallocate(block) {
        error!(%err, "pool rejected a block it handed out");
    }
}

impl<T, A: BlockAllocator + ?Sized> Deref for PoolBox<'_, T, A> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: initialised in `new_in`, valid until drop.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T, A: BlockAllocator + ?Sized> DerefMut for PoolBox<'_, T, A> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: initialised in `new_in`; `&mut self` is unique.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T, A: BlockAllocator + ?Sized> Drop for PoolBox<'_, T, A> {
    fn drop(&mut self) {
        // SAFETY: the value is initialised and dropped exactly once here.
        unsafe { self.ptr.as_ptr().drop_in_place() };
        release(self.pool, self.ptr.cast());
    }
}

impl<T: fmt::Debug, A: BlockAllocator + ?Sized> fmt::Debug for PoolBox<'_, T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
