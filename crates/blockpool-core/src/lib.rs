//! # blockpool-core
//!
//! Fixed-block pool allocators.
//!
//! An [`Allocator`] hands out blocks of one size in O(1) from a LIFO free
//! list, under one of three provisioning policies:
//!
//! - [`Policy::GrowableHeap`]: blocks fetched from the system heap in
//!   batches as the pool runs dry, kept until the pool is dropped.
//! - [`Policy::FixedHeapPool`]: one heap region for a fixed number of
//!   blocks, obtained lazily on the first allocation.
//! - [`Policy::FixedStaticPool`]: blocks carved from a caller-supplied
//!   [`StaticBuffer`]; the system heap is never touched.
//!
//! [`TypedPool`] is a `const`-constructible fixed pool sized for one type,
//! and [`PoolBacked`] / [`pool_backed!`] give a type its own process-wide
//! pool. Exhaustion escalates to the handler in an [`OomRegistry`].
#![warn(missing_docs)]

mod allocator;
mod arena;
mod block_allocator;
mod boxed;
mod error;
mod free_list;
mod layout;
mod oom;
mod per_type;
mod stats;
mod typed_pool;

pub use allocator::{Allocator, Policy};
pub use arena::StaticBuffer;
pub use block_allocator::BlockAllocator;
pub use boxed::PoolBox;
pub use error::{AllocError, InvalidFree};
pub use layout::{BlockLayout, MAX_ALIGN, MIN_ALIGN};
pub use oom::{register_out_of_memory_handler, OomHandler, OomRegistry};
pub use per_type::{PoolBacked, Pooled, TypePool};
pub use stats::{AtomicPoolStats, PoolStats};
pub use typed_pool::TypedPool;
