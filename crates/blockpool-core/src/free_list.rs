//! Index-based free list.
//!
//! Blocks are addressed by slot index. Released slots sit on a LIFO stack of
//! indices kept outside the blocks themselves, and a per-slot flag records
//! whether the slot is currently handed out. Slots that were never handed
//! out are served from a bump cursor, so a new list needs no seeding pass.

use std::ops::{Deref, DerefMut};

use crate::error::InvalidFree;

/// Slot table that is either owned or borrowed from caller memory.
pub(crate) enum Table<'a, T> {
    Owned(Vec<T>),
    Borrowed(&'a mut [T]),
}

impl<T> Deref for Table<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        match self {
            Self::Owned(v) => v,
            Self::Borrowed(s) => s,
        }
    }
}

impl<T> DerefMut for Table<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        match self {
            Self::Owned(v) => v,
            Self::Borrowed(s) => s,
        }
    }
}

impl<T> AsRef<[T]> for Table<'_, T> {
    fn as_ref(&self) -> &[T] {
        self
    }
}

impl<T> AsMut<[T]> for Table<'_, T> {
    fn as_mut(&mut self) -> &mut [T] {
        self
    }
}

/// LIFO free list over `slots` block indices.
///
/// `S` stores released indices, `L` the per-slot live flags. Both must hold
/// at least `slots` entries. Flags at or beyond the bump cursor are never
/// read, so borrowed tables need no initialisation.
pub(crate) struct FreeList<S, L> {
    stack: S,
    live: L,
    released: usize,
    fresh: usize,
    slots: usize,
}

impl<S, L> FreeList<S, L>
where
    S: AsRef<[u32]> + AsMut<[u32]>,
    L: AsRef<[bool]> + AsMut<[bool]>,
{
    /// Build a list over tables already long enough for `slots` entries.
    pub(crate) const fn from_tables(stack: S, live: L, slots: usize) -> Self {
        Self {
            stack,
            live,
            released: 0,
            fresh: 0,
            slots,
        }
    }

    /// Take a free slot: most recently released first, then untouched ones.
    #[inline]
    pub(crate) fn pop(&mut self) -> Option<u32> {
        let index = if self.released > 0 {
            self.released -= 1;
            self.stack.as_ref()[self.released]
        } else if self.fresh < self.slots {
            self.fresh += 1;
            #[allow(clippy::cast_possible_truncation)]
            let index = (self.fresh - 1) as u32;
            index
        } else {
            return None;
        };
        self.live.as_mut()[index as usize] = true;
        Some(index)
    }

    /// Return a slot to the list.
    #[inline]
    pub(crate) fn push(&mut self, index: u32) -> Result<(), InvalidFree> {
        let slot = index as usize;
        if slot >= self.slots {
            return Err(InvalidFree::Foreign);
        }
        if !self.is_live(index) {
            return Err(InvalidFree::DoubleFree);
        }
        self.live.as_mut()[slot] = false;
        self.stack.as_mut()[self.released] = index;
        self.released += 1;
        Ok(())
    }

    /// Whether `index` is currently handed out.
    pub(crate) fn is_live(&self, index: u32) -> bool {
        let slot = index as usize;
        slot < self.fresh && self.live.as_ref()[slot]
    }

    /// Slots currently handed out.
    pub(crate) fn live_count(&self) -> usize {
        self.fresh - self.released
    }

    /// Slots available without growing.
    pub(crate) fn free_count(&self) -> usize {
        self.slots - self.live_count()
    }

    /// Total slots tracked.
    pub(crate) fn slots(&self) -> usize {
        self.slots
    }
}

impl<'a> FreeList<Table<'a, u32>, Table<'a, bool>> {
    /// Owned list with room for `slots` entries.
    pub(crate) fn owned(slots: usize) -> Self {
        Self::from_tables(
            Table::Owned(vec![0; slots]),
            Table::Owned(vec![false; slots]),
            slots,
        )
    }

    /// List over caller-provided tables.
    pub(crate) fn borrowed(stack: &'a mut [u32], live: &'a mut [bool], slots: usize) -> Self {
        debug_assert!(stack.len() >= slots && live.len() >= slots);
        Self::from_tables(Table::Borrowed(stack), Table::Borrowed(live), slots)
    }

    /// Append `additional` untouched slots. Only owned tables can grow.
    pub(crate) fn grow(&mut self, additional: usize) -> bool {
        match (&mut self.stack, &mut self.live) {
            (Table::Owned(stack), Table::Owned(live)) => {
                stack.resize(self.slots + additional, 0);
                live.resize(self.slots + additional, false);
                self.slots += additional;
                true
            }
            _ => false,
        }
    }
}
