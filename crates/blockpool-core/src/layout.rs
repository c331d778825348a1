//! Block geometry: size rounding and alignment.

use std::alloc::Layout;

use crate::error::AllocError;

/// Smallest block size and alignment handed out by any pool.
pub const MIN_ALIGN: usize = 4;

/// Largest alignment a block is promoted to from its size alone.
pub const MAX_ALIGN: usize = 16;

/// Effective size and alignment of every block in one allocator.
///
/// `size` is always a non-zero multiple of `align`, so a block at
/// `base + i * size` keeps the alignment of `base`. Construction fails
/// rather than shrink a block whose rounded size `Layout` cannot describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    block: Layout,
}

impl BlockLayout {
    /// Layout for raw byte blocks of at least `requested` bytes.
    ///
    /// The size is rounded up to [`MIN_ALIGN`]; the alignment is the largest
    /// power of two dividing the rounded size, capped at [`MAX_ALIGN`].
    pub fn for_size(requested: usize) -> Result<Self, AllocError> {
        let size = round_up(requested.max(MIN_ALIGN), MIN_ALIGN)
            .ok_or_else(|| too_large(requested))?;
        Self::from_size_align(size, natural_align(size))
    }

    /// Layout for blocks holding exactly one `T`.
    pub fn for_type<T>() -> Result<Self, AllocError> {
        let raw = std::mem::size_of::<T>().max(MIN_ALIGN);
        let align = std::mem::align_of::<T>().max(MIN_ALIGN);
        let size = round_up(raw, align).ok_or_else(|| too_large(raw))?;
        Self::from_size_align(size, align.max(natural_align(size)))
    }

    fn from_size_align(size: usize, align: usize) -> Result<Self, AllocError> {
        Layout::from_size_align(size, align)
            .map(|block| Self { block })
            .map_err(|_| too_large(size))
    }

    /// Block size in bytes (also the stride between adjacent blocks).
    pub const fn size(&self) -> usize {
        self.block.size()
    }

    /// Guaranteed alignment of every block.
    pub const fn align(&self) -> usize {
        self.block.align()
    }

    /// Layout of a contiguous region holding `blocks` blocks.
    pub fn region(&self, blocks: usize) -> Result<Layout, AllocError> {
        let bytes = self.size().checked_mul(blocks).ok_or_else(|| {
            AllocError::InvalidConfig(format!(
                "{blocks} blocks of {} bytes overflow usize",
                self.size()
            ))
        })?;
        Layout::from_size_align(bytes, self.align())
            .map_err(|e| AllocError::InvalidConfig(e.to_string()))
    }

    /// Layout of a single block.
    pub const fn block(&self) -> Layout {
        self.block
    }
}

fn too_large(bytes: usize) -> AllocError {
    AllocError::InvalidConfig(format!("{bytes}-byte blocks exceed the largest layout"))
}

fn round_up(value: usize, align: usize) -> Option<usize> {
    value.checked_add(align - 1).map(|v| v & !(align - 1))
}

const fn natural_align(size: usize) -> usize {
    let low_bit = size & size.wrapping_neg();
    if low_bit > MAX_ALIGN {
        MAX_ALIGN
    } else {
        low_bit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_small_requests_up() {
        assert_eq!(BlockLayout::for_size(0).unwrap().size(), MIN_ALIGN);
        assert_eq!(BlockLayout::for_size(1).unwrap().size(), 4);
        assert_eq!(BlockLayout::for_size(5).unwrap().size(), 8);
    }

    #[test]
    fn keeps_multiples_of_min_align() {
        let layout = BlockLayout::for_size(100).unwrap();
        assert_eq!(layout.size(), 100);
        assert_eq!(layout.align(), 4);
    }

    #[test]
    fn natural_alignment_is_capped() {
        assert_eq!(BlockLayout::for_size(40).unwrap().align(), 8);
        assert_eq!(BlockLayout::for_size(48).unwrap().align(), 16);
        assert_eq!(BlockLayout::for_size(4096).unwrap().align(), MAX_ALIGN);
    }

    #[test]
    fn type_layout_respects_type_alignment() {
        #[repr(align(32))]
        struct Wide([u8; 40]);

        let layout = BlockLayout::for_type::<Wide>().unwrap();
        assert_eq!(layout.align(), 32);
        assert_eq!(layout.size() % 32, 0);
        assert!(layout.size() >= std::mem::size_of::<Wide>());

        let unit = BlockLayout::for_type::<()>().unwrap();
        assert_eq!(unit.size(), MIN_ALIGN);
    }

    #[test]
    fn region_overflow_is_config_error() {
        let layout = BlockLayout::for_size(1024).unwrap();
        assert!(matches!(
            layout.region(usize::MAX),
            Err(AllocError::InvalidConfig(_))
        ));
        assert_eq!(layout.region(20).map(|l| l.size()), Ok(20 * 1024));
    }

    #[test]
    fn size_is_multiple_of_align() {
        for n in 0..300 {
            let layout = BlockLayout::for_size(n).unwrap();
            assert_eq!(layout.size() % layout.align(), 0, "n = {n}");
            assert!(layout.size() >= n);
        }
    }

    #[test]
    fn oversized_requests_are_rejected() {
        for requested in [usize::MAX, usize::MAX - 1, 1 << (usize::BITS - 1)] {
            assert!(
                matches!(
                    BlockLayout::for_size(requested),
                    Err(AllocError::InvalidConfig(_))
                ),
                "requested = {requested}"
            );
        }
    }

    #[test]
    fn single_block_layout_matches_geometry() {
        let layout = BlockLayout::for_size(100).unwrap();
        assert_eq!(layout.block().size(), 100);
        assert_eq!(layout.block().align(), 4);
        let big = BlockLayout::for_size(1 << 20).unwrap();
        assert_eq!(big.block().size(), 1 << 20);
    }
}
