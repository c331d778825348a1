//! Allocation workloads.
//!
//! A workload drives a [`Target`] through a fixed sequence of phases and
//! times each one. Every block a run obtains is released again, even when a
//! phase fails part way through.

use std::fmt;
use std::ptr::NonNull;
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, warn};

use blockpool_core::{AllocError, BlockAllocator, InvalidFree};

use crate::report::{BenchReport, PhaseTiming};
use crate::runner::time_phase;

/// Order in which a workload allocates and frees blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Pattern {
    /// Allocate `N` half-size blocks, free the even ones, allocate `N`
    /// full-size blocks, free the odd ones, then free the second batch in
    /// reverse. Peaks at `3N / 2` live blocks.
    #[default]
    Interleaved,
    /// Allocate `N` blocks, then free them in allocation order.
    Sequential,
}

impl Pattern {
    /// Most blocks live at once while running this pattern over `blocks`.
    pub fn peak_live(self, blocks: usize) -> usize {
        match self {
            Self::Interleaved => blocks + blocks / 2,
            Self::Sequential => blocks,
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interleaved => f.write_str("interleaved"),
            Self::Sequential => f.write_str("sequential"),
        }
    }
}

impl FromStr for Pattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "interleaved" => Ok(Self::Interleaved),
            "sequential" => Ok(Self::Sequential),
            other => Err(format!("unknown pattern: {other}")),
        }
    }
}

/// Where a workload gets its blocks from.
#[derive(Clone, Copy)]
pub enum Target<'a> {
    /// The global allocator, one `Vec` per block.
    SystemHeap,
    /// Any blockpool allocator.
    Pool(&'a dyn BlockAllocator),
}

impl fmt::Debug for Target<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SystemHeap => f.write_str("SystemHeap"),
            Self::Pool(pool) => f
                .debug_struct("Pool")
                .field("block_size", &pool.block_size())
                .finish(),
        }
    }
}

enum Slot {
    Heap(Vec<u8>),
    Block(NonNull<u8>),
}

impl Target<'_> {
    fn acquire(&self, size: usize) -> Result<Slot, AllocError> {
        match self {
            Self::SystemHeap => Ok(Slot::Heap(Vec::with_capacity(size))),
            Self::Pool(pool) => pool.allocate(size).map(Slot::Block),
        }
    }

    fn release(&self, slot: Slot) -> Result<(), AllocError> {
        match (self, slot) {
            (_, Slot::Heap(buffer)) => {
                drop(buffer);
                Ok(())
            }
            (Self::Pool(pool), Slot::Block(ptr)) => pool.deallocate(ptr),
            (Self::SystemHeap, Slot::Block(_)) => Err(InvalidFree::Foreign.into()),
        }
    }
}

/// Blocks held by a running workload; anything left is released on drop.
struct Batch<'t, 'a> {
    target: &'t Target<'a>,
    slots: Vec<Option<Slot>>,
}

impl<'t, 'a> Batch<'t, 'a> {
    fn new(target: &'t Target<'a>, capacity: usize) -> Self {
        Self {
            target,
            slots: Vec::with_capacity(capacity),
        }
    }

    fn fill(&mut self, count: usize, size: usize) -> Result<usize, AllocError> {
        for _ in 0..count {
            let slot = self.target.acquire(size)?;
            self.slots.push(Some(slot));
        }
        Ok(count)
    }

    fn free(&mut self, indices: impl Iterator<Item = usize>) -> Result<usize, AllocError> {
        let mut freed = 0;
        for index in indices {
            if let Some(slot) = self.slots.get_mut(index).and_then(Option::take) {
                self.target.release(slot)?;
                freed += 1;
            }
        }
        Ok(freed)
    }
}

impl Drop for Batch<'_, '_> {
    fn drop(&mut self) {
        for slot in self.slots.drain(..).flatten() {
            if let Err(err) = self.target.release(slot) {
                warn!(%err, "failed to release block after aborted workload");
            }
        }
    }
}

/// Parameters of one workload run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchConfig {
    /// Blocks allocated per batch.
    pub blocks: usize,
    /// Bytes requested for a full-size block.
    pub block_size: usize,
    /// Allocation order.
    pub pattern: Pattern,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            blocks: 10_000,
            block_size: 4_096,
            pattern: Pattern::Interleaved,
        }
    }
}

/// Run the configured workload against `target`.
pub fn run(name: &str, target: Target<'_>, config: &BenchConfig) -> Result<BenchReport, AllocError> {
    let n = config.blocks;
    let size = config.block_size;
    let mut phases = Vec::new();

    match config.pattern {
        Pattern::Interleaved => {
            let mut first = Batch::new(&target, n);
            let mut second = Batch::new(&target, n);
            phases.push(phase("allocate", || first.fill(n, size / 2))?);
            phases.push(phase("deallocate", || first.free((0..n).step_by(2)))?);
            phases.push(phase("allocate", || second.fill(n, size))?);
            phases.push(phase("deallocate", || first.free((1..n).step_by(2)))?);
            phases.push(phase("deallocate", || second.free((0..n).rev()))?);
        }
        Pattern::Sequential => {
            let mut batch = Batch::new(&target, n);
            phases.push(phase("allocate", || batch.fill(n, size))?);
            phases.push(phase("deallocate", || batch.free(0..n))?);
        }
    }

    let report = BenchReport {
        name: name.to_string(),
        pattern: config.pattern,
        blocks: n,
        block_size: size,
        phases,
    };
    debug!(
        name,
        pattern = %config.pattern,
        total_us = report.total().as_micros(),
        "workload finished"
    );
    Ok(report)
}

fn phase<F>(label: &'static str, f: F) -> Result<PhaseTiming, AllocError>
where
    F: FnOnce() -> Result<usize, AllocError>,
{
    let (operations, elapsed) = time_phase(f)?;
    Ok(PhaseTiming {
        label,
        operations,
        elapsed,
    })
}
