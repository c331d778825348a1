//! Per-type pools.
//!
//! A type opts into pooled storage by implementing [`PoolBacked`], normally
//! through the [`pool_backed!`](crate::pool_backed) macro. Each such type
//! gets its own [`TypePool`], created on first use and shared for the rest
//! of the process, so instances of different types never share blocks.
//!
//! ```
//! use blockpool_core::{pool_backed, PoolBacked};
//!
//! struct Order {
//!     id: u64,
//!     qty: u32,
//! }
//!
//! pool_backed!(Order, blocks = 64, growth = 0);
//!
//! let order = Order::create(Order { id: 7, qty: 3 }).unwrap();
//! assert_eq!(order.qty, 3);
//! assert_eq!(Order::pool().live_count(), 1);
//! drop(order);
//! assert_eq!(Order::pool().live_count(), 0);
//! ```

use std::fmt;
use std::marker::PhantomData;

use crate::allocator::{Allocator, Policy};
use crate::boxed::PoolBox;
use crate::error::AllocError;
use crate::layout::BlockLayout;
use crate::oom::OomRegistry;
use crate::stats::PoolStats;

/// A `T` stored in its type's pool.
pub type Pooled<T> = PoolBox<'static, T, Allocator<'static>>;

/// Allocator dedicated to values of one type.
///
/// `(num_blocks, growth)` selects the policy:
///
/// | `num_blocks` | `growth` | policy                                   |
/// |--------------|----------|------------------------------------------|
/// | `0`          | `g`      | growable, unbounded, `max(g, 1)` per refill |
/// | `n`          | `0`      | fixed heap pool of `n` blocks            |
/// | `n`          | `g`      | growable, at most `n` blocks, `g` per refill |
pub struct TypePool<T> {
    inner: Allocator<'static>,
    _type: PhantomData<fn() -> T>,
}

impl<T> TypePool<T> {
    /// Pool escalating to the process-wide out-of-memory registry.
    pub fn new(num_blocks: usize, growth: usize) -> Result<Self, AllocError> {
        Self::with_oom(num_blocks, growth, OomRegistry::global())
    }

    /// Pool escalating to `registry`.
    pub fn with_oom(
        num_blocks: usize,
        growth: usize,
        registry: &'static OomRegistry,
    ) -> Result<Self, AllocError> {
        let layout = BlockLayout::for_type::<T>()?;
        let inner = match (num_blocks, growth) {
            (0, growth) => Allocator::growable_with(layout, 0, growth.max(1)),
            (blocks, 0) => Allocator::fixed_heap_with(layout, blocks)?,
            (blocks, growth) => Allocator::growable_with(layout, blocks, growth),
        };
        Ok(Self {
            inner: inner.with_oom(registry),
            _type: PhantomData,
        })
    }

    /// Label used in log events.
    #[must_use]
    pub fn named(self, name: &'static str) -> Self {
        Self {
            inner: self.inner.with_name(name),
            _type: PhantomData,
        }
    }

    /// The underlying allocator.
    pub fn allocator(&self) -> &Allocator<'static> {
        &self.inner
    }

    /// Policy chosen from the construction parameters.
    pub fn policy(&self) -> Policy {
        self.inner.policy()
    }

    /// Blocks currently holding a value.
    pub fn live_count(&self) -> usize {
        self.inner.live_count()
    }

    /// Usage counters.
    pub fn stats(&self) -> PoolStats {
        self.inner.stats()
    }
}

impl<T: Send> TypePool<T> {
    /// Move `value` into this pool.
    pub fn create(&self, value: T) -> Result<PoolBox<'_, T, Allocator<'static>>, AllocError> {
        PoolBox::new_in(value, &self.inner)
    }
}

impl<T> fmt::Debug for TypePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypePool")
            .field("type", &std::any::type_name::<T>())
            .field("allocator", &self.inner)
            .finish()
    }
}

/// A type whose instances live in a dedicated pool.
pub trait PoolBacked: Sized + Send + 'static {
    /// The type's pool, created on first access.
    fn pool() -> &'static TypePool<Self>;

    /// Move `value` into the type's pool.
    fn create(value: Self) -> Result<Pooled<Self>, AllocError> {
        PoolBox::new_in(value, Self::pool().allocator())
    }
}

/// Implement [`PoolBacked`] for a type.
///
/// `blocks` and `growth` follow the table on [`TypePool`]. An optional
/// `oom = <&'static OomRegistry>` routes exhaustion to that registry instead
/// of the global one. Invalid parameters panic on first use of the pool.
#[macro_export]
macro_rules! pool_backed {
    ($ty:ty, blocks = $blocks:expr, growth = $growth:expr, oom = $oom:expr $(,)?) => {
        impl $crate::PoolBacked for $ty {
            fn pool() -> &'static $crate::TypePool<$ty> {
                static POOL: ::std::sync::OnceLock<$crate::TypePool<$ty>> =
                    ::std::sync::OnceLock::new();
                POOL.get_or_init(|| {
                    match $crate::TypePool::with_oom($blocks, $growth, $oom) {
                        Ok(pool) => pool.named(::std::stringify!($ty)),
                        Err(err) => ::std::panic!(
                            "invalid pool for {}: {}",
                            ::std::stringify!($ty),
                            err
                        ),
                    }
                })
            }
        }
    };
    ($ty:ty, blocks = $blocks:expr, growth = $growth:expr $(,)?) => {
        $crate::pool_backed!(
            $ty,
            blocks = $blocks,
            growth = $growth,
            oom = $crate::OomRegistry::global()
        );
    };
}
