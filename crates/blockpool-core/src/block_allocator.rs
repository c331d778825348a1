//! Uniform allocate/deallocate interface shared by every pool.

use std::ptr::NonNull;

use crate::allocator::Allocator;
use crate::error::AllocError;

/// A source of fixed-size blocks.
pub trait BlockAllocator: Send + Sync {
    /// Hand out a block able to hold `size` bytes.
    fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError>;

    /// Return a block obtained from [`BlockAllocator::allocate`].
    fn deallocate(&self, ptr: NonNull<u8>) -> Result<(), AllocError>;

    /// Bytes available in each block.
    fn block_size(&self) -> usize;

    /// Whether `ptr` is the start of one of this pool's blocks.
    fn owns(&self, ptr: NonNull<u8>) -> bool;
}

impl BlockAllocator for Allocator<'_> {
    fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        Allocator::allocate(self, size)
    }

    fn deallocate(&self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        Allocator::deallocate(self, ptr)
    }

    fn block_size(&self) -> usize {
        Allocator::block_size(self)
    }

    fn owns(&self, ptr: NonNull<u8>) -> bool {
        Allocator::owns(self, ptr)
    }
}
