//! Application configuration from CLI flags and environment.

use clap::Parser;

use blockpool_bench::{BenchConfig, Pattern};

use crate::errors::AppError;

/// Largest block the static-pool benchmark buffer can hold.
pub const STATIC_BLOCK_SIZE: usize = 4_096;

/// Blocks the static-pool benchmark buffer can hold.
pub const STATIC_BLOCKS: usize = 15_000;

/// blockpool: fixed-block pool allocator demo and benchmarks.
#[derive(Parser, Debug)]
#[command(name = "blockpool", version, about)]
pub struct AppConfig {
    /// Blocks allocated per benchmark batch.
    #[arg(short, long, default_value_t = 10_000, env = "BLOCKPOOL_BLOCKS")]
    pub blocks: usize,

    /// Bytes requested for a full-size block.
    #[arg(long, default_value_t = STATIC_BLOCK_SIZE, env = "BLOCKPOOL_BLOCK_SIZE")]
    pub block_size: usize,

    /// Benchmark runs per target.
    #[arg(short, long, default_value_t = 3, env = "BLOCKPOOL_RUNS")]
    pub runs: u32,

    /// Allocator to benchmark: heap, heap-blocks, heap-pool, static-pool, all, or none.
    #[arg(short, long, default_value = "all", env = "BLOCKPOOL_TARGET")]
    pub target: String,

    /// Workload pattern: interleaved or sequential.
    #[arg(short, long, default_value = "interleaved", env = "BLOCKPOOL_PATTERN")]
    pub pattern: Pattern,

    /// Print benchmark results as JSON.
    #[arg(long)]
    pub json: bool,

    /// Skip the per-policy allocation demo.
    #[arg(long)]
    pub skip_demo: bool,

    /// Quiet mode (benchmark totals only).
    #[arg(short, long)]
    pub quiet: bool,
}

impl AppConfig {
    /// Parse CLI arguments.
    #[must_use]
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Workload parameters for the benchmark driver.
    pub fn bench_config(&self) -> BenchConfig {
        BenchConfig {
            blocks: self.blocks,
            block_size: self.block_size,
            pattern: self.pattern,
        }
    }

    /// Reject parameters no target can run with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.blocks == 0 {
            return Err(AppError::Config("--blocks must be at least 1".into()));
        }
        if self.block_size == 0 {
            return Err(AppError::Config("--block-size must be at least 1".into()));
        }
        if self.runs == 0 {
            return Err(AppError::Config("--runs must be at least 1".into()));
        }
        Ok(())
    }

    /// Check that the static pool can hold the workload.
    pub fn validate_static(&self) -> Result<(), AppError> {
        if self.block_size > STATIC_BLOCK_SIZE {
            return Err(AppError::Config(format!(
                "static-pool blocks hold {STATIC_BLOCK_SIZE} bytes, --block-size is {}",
                self.block_size
            )));
        }
        let peak = self.pattern.peak_live(self.blocks);
        if peak > STATIC_BLOCKS {
            return Err(AppError::Config(format!(
                "static-pool holds {STATIC_BLOCKS} blocks, workload needs {peak}"
            )));
        }
        Ok(())
    }
}
