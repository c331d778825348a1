//! Backing storage for allocator blocks.
//!
//! An arena maps slot indices to block addresses and back. It never reads or
//! writes block contents; the free list lives in separate tables.
#![allow(unsafe_code)]

use std::alloc::Layout;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use tracing::debug;

use crate::error::{AllocError, InvalidFree};
use crate::layout::BlockLayout;

/// One allocation obtained from the global allocator.
struct Region {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl Region {
    /// `layout` must have a non-zero size.
    fn allocate(layout: Layout) -> Option<Self> {
        debug_assert!(layout.size() > 0);
        // SAFETY: every layout built by `BlockLayout` has a non-zero size.
        let ptr = unsafe { std::alloc::alloc(layout) };
        NonNull::new(ptr).map(|ptr| Self { ptr, layout })
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: `ptr` came from `alloc` with exactly this layout.
        unsafe { std::alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

pub(crate) enum Arena<'a> {
    /// One region for `blocks` blocks, obtained on first use.
    Lazy {
        layout: BlockLayout,
        blocks: usize,
        region: Option<Region>,
    },
    /// Caller memory for `blocks` blocks starting at `base`.
    Borrowed {
        layout: BlockLayout,
        blocks: usize,
        base: NonNull<u8>,
        _buffer: PhantomData<&'a mut [MaybeUninit<u8>]>,
    },
    /// Individually fetched blocks, indexed in fetch order.
    Blocks {
        layout: BlockLayout,
        blocks: Vec<Region>,
        index_of: HashMap<usize, u32>,
    },
}

// SAFETY: an arena either owns its regions outright or holds the unique
// borrow of caller memory; block contents are never touched by the arena.
unsafe impl Send for Arena<'_> {}

impl<'a> Arena<'a> {
    pub(crate) fn lazy(layout: BlockLayout, blocks: usize) -> Self {
        Self::Lazy {
            layout,
            blocks,
            region: None,
        }
    }

    /// `bytes` must hold at least `blocks * layout.size()` bytes and start
    /// on a `layout.align()` boundary.
    pub(crate) fn borrowed(
        layout: BlockLayout,
        blocks: usize,
        bytes: &'a mut [MaybeUninit<u8>],
    ) -> Self {
        debug_assert!(bytes.len() >= blocks * layout.size());
        debug_assert_eq!(bytes.as_ptr() as usize % layout.align(), 0);
        Self::Borrowed {
            layout,
            blocks,
            base: NonNull::from(bytes).cast(),
            _buffer: PhantomData,
        }
    }

    pub(crate) fn growable(layout: BlockLayout) -> Self {
        Self::Blocks {
            layout,
            blocks: Vec::new(),
            index_of: HashMap::new(),
        }
    }

    /// Make sure the lazily provisioned region exists.
    ///
    /// Returns `true` when this call created it.
    pub(crate) fn provision(&mut self) -> Result<bool, AllocError> {
        if let Self::Lazy {
            layout,
            blocks,
            region,
        } = self
        {
            if region.is_none() {
                let wanted = layout.region(*blocks)?;
                let fresh = Region::allocate(wanted).ok_or(AllocError::HeapExhausted {
                    bytes: wanted.size(),
                })?;
                debug!(
                    bytes = wanted.size(),
                    blocks = *blocks,
                    "provisioned pool arena"
                );
                *region = Some(fresh);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Fetch up to `count` more blocks from the system heap.
    ///
    /// Returns how many were obtained; only growable arenas fetch.
    pub(crate) fn fetch(&mut self, count: usize) -> usize {
        let Self::Blocks {
            layout,
            blocks,
            index_of,
        } = self
        else {
            return 0;
        };
        let mut fetched = 0;
        for _ in 0..count {
            let Ok(index) = u32::try_from(blocks.len()) else {
                break;
            };
            let Some(region) = Region::allocate(layout.block()) else {
                break;
            };
            index_of.insert(region.ptr.as_ptr() as usize, index);
            blocks.push(region);
            fetched += 1;
        }
        fetched
    }

    /// Address of block `index`. The index must be in range and, for a
    /// lazy arena, the region must already be provisioned.
    pub(crate) fn address(&self, index: u32) -> Option<NonNull<u8>> {
        let index = index as usize;
        match self {
            Self::Lazy {
                layout,
                blocks,
                region,
            } => {
                let base = region.as_ref()?.ptr;
                (index < *blocks).then(|| offset(base, index * layout.size()))
            }
            Self::Borrowed {
                layout,
                blocks,
                base,
                ..
            } => (index < *blocks).then(|| offset(*base, index * layout.size())),
            Self::Blocks { blocks, .. } => blocks.get(index).map(|region| region.ptr),
        }
    }

    /// Slot index of the block starting at `ptr`.
    pub(crate) fn index_of(&self, ptr: NonNull<u8>) -> Result<u32, InvalidFree> {
        let addr = ptr.as_ptr() as usize;
        match self {
            Self::Lazy {
                layout,
                blocks,
                region,
            } => {
                let base = region.as_ref().ok_or(InvalidFree::Foreign)?.ptr;
                slot_of(base, layout.size(), *blocks, addr)
            }
            Self::Borrowed {
                layout,
                blocks,
                base,
                ..
            } => slot_of(*base, layout.size(), *blocks, addr),
            Self::Blocks { index_of, .. } => {
                index_of.get(&addr).copied().ok_or(InvalidFree::Foreign)
            }
        }
    }

    /// Blocks currently backed by memory.
    pub(crate) fn provisioned_blocks(&self) -> usize {
        match self {
            Self::Lazy { blocks, region, .. } => {
                if region.is_some() {
                    *blocks
                } else {
                    0
                }
            }
            Self::Borrowed { blocks, .. } => *blocks,
            Self::Blocks { blocks, .. } => blocks.len(),
        }
    }

    /// Give up ownership of every heap region without freeing it.
    pub(crate) fn leak(&mut self) {
        match self {
            Self::Lazy { region, .. } => std::mem::forget(region.take()),
            Self::Borrowed { .. } => {}
            Self::Blocks {
                blocks, index_of, ..
            } => {
                index_of.clear();
                std::mem::forget(std::mem::take(blocks));
            }
        }
    }
}

pub(crate) fn offset(base: NonNull<u8>, bytes: usize) -> NonNull<u8> {
    // SAFETY: callers only pass offsets of in-range blocks, which stay
    // inside the region that `base` points to.
    unsafe { NonNull::new_unchecked(base.as_ptr().add(bytes)) }
}

pub(crate) fn slot_of(
    base: NonNull<u8>,
    block_size: usize,
    blocks: usize,
    addr: usize,
) -> Result<u32, InvalidFree> {
    let start = base.as_ptr() as usize;
    let end = start + blocks * block_size;
    if addr < start || addr >= end {
        return Err(InvalidFree::Foreign);
    }
    let delta = addr - start;
    if delta % block_size != 0 {
        return Err(InvalidFree::Misaligned);
    }
    u32::try_from(delta / block_size).map_err(|_| InvalidFree::Foreign)
}

/// Caller-owned backing memory for a fixed static pool.
///
/// Holds `BYTES` bytes of block storage plus free-list tables for up to
/// `BLOCKS` blocks, so a pool built on it never touches the system heap.
/// The block storage starts on a 16-byte boundary.
///
/// ```
/// use blockpool_core::{Allocator, StaticBuffer};
///
/// let mut buffer = StaticBuffer::<{ 100 * 20 }, 20>::new();
/// let pool = Allocator::fixed_static(100, 20, &mut buffer).unwrap();
/// let block = pool.allocate(100).unwrap();
/// pool.deallocate(block).unwrap();
/// ```
#[repr(C, align(16))]
pub struct StaticBuffer<const BYTES: usize, const BLOCKS: usize> {
    bytes: [MaybeUninit<u8>; BYTES],
    stack: [u32; BLOCKS],
    live: [bool; BLOCKS],
}

impl<const BYTES: usize, const BLOCKS: usize> StaticBuffer<BYTES, BLOCKS> {
    /// An uninitialised buffer.
    pub const fn new() -> Self {
        Self {
            bytes: [MaybeUninit::uninit(); BYTES],
            stack: [0; BLOCKS],
            live: [false; BLOCKS],
        }
    }

    /// Bytes available for block storage.
    pub const fn capacity_bytes(&self) -> usize {
        BYTES
    }

    /// Most blocks the free-list tables can track.
    pub const fn max_blocks(&self) -> usize {
        BLOCKS
    }

    /// Start of the block storage.
    pub fn as_ptr(&self) -> *const u8 {
        self.bytes.as_ptr().cast()
    }

    pub(crate) fn split(&mut self) -> (&mut [MaybeUninit<u8>], &mut [u32], &mut [bool]) {
        (&mut self.bytes, &mut self.stack, &mut self.live)
    }
}

impl<const BYTES: usize, const BLOCKS: usize> Default for StaticBuffer<BYTES, BLOCKS> {
    fn default() -> Self {
        Self::new()
    }
}
