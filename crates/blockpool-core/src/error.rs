//! Allocator error taxonomy.

/// Why a `deallocate` call was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidFree {
    /// The pointer does not belong to this allocator's arena.
    #[error("pointer not owned by this allocator")]
    Foreign,
    /// The pointer is inside the arena but not on a block boundary.
    #[error("pointer not on a block boundary")]
    Misaligned,
    /// The block is already on the free list.
    #[error("block already free")]
    DoubleFree,
}

/// Errors surfaced by allocators and pools.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// Requested more bytes than one block holds.
    #[error("requested {requested} bytes from a pool of {block_size}-byte blocks")]
    SizeExceeded {
        /// Bytes requested by the caller.
        requested: usize,
        /// Effective block size of the allocator.
        block_size: usize,
    },

    /// A bounded pool has no free block left.
    #[error("pool capacity of {capacity} blocks exhausted")]
    CapacityExceeded {
        /// Maximum number of live blocks.
        capacity: usize,
    },

    /// The system heap could not provide a new block or arena.
    #[error("system heap exhausted while fetching {bytes} bytes")]
    HeapExhausted {
        /// Size of the failed system allocation.
        bytes: usize,
    },

    /// A pointer handed to `deallocate` was rejected.
    #[error("invalid free: {0}")]
    InvalidFree(#[from] InvalidFree),

    /// The allocator was torn down while blocks were still allocated.
    #[error("allocator torn down with {live} blocks still allocated")]
    OutstandingAllocations {
        /// Blocks still live at teardown.
        live: usize,
    },

    /// Construction parameters are inconsistent.
    #[error("invalid allocator configuration: {0}")]
    InvalidConfig(String),
}

impl AllocError {
    /// Whether the error reflects a bug in the calling code rather than
    /// running out of memory.
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            Self::SizeExceeded { .. }
                | Self::InvalidFree(_)
                | Self::OutstandingAllocations { .. }
                | Self::InvalidConfig(_)
        )
    }

    /// Whether the error went through the out-of-memory protocol.
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::CapacityExceeded { .. } | Self::HeapExhausted { .. }
        )
    }
}
