//! Application entry point and dispatch.

use std::time::Duration;

use anyhow::Result;
use tracing::{error, info};

use blockpool_bench::{run as run_workload, summarize, BenchConfig, BenchReport, Target};
use blockpool_core::{
    pool_backed, register_out_of_memory_handler, Allocator, PoolBacked, StaticBuffer,
    TypedPool,
};

use crate::config::{AppConfig, STATIC_BLOCKS, STATIC_BLOCK_SIZE};
use crate::errors::AppError;

/// Demo type with its own process-wide pool.
#[derive(Debug)]
struct Widget {
    id: u32,
    payload: [u8; 36],
}

impl Widget {
    fn new(id: u32) -> Self {
        Self {
            id,
            payload: [0; 36],
        }
    }
}

pool_backed!(Widget, blocks = 0, growth = 0);

static WIDGET_POOL: TypedPool<Widget, 20> = TypedPool::new();

const STATIC_BYTES: usize = STATIC_BLOCK_SIZE * STATIC_BLOCKS;

/// Benchmark targets selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// The global allocator.
    Heap,
    /// Growable pool fetching blocks from the heap on demand.
    HeapBlocks,
    /// Fixed pool in one heap region.
    HeapPool,
    /// Fixed pool in caller-supplied memory.
    StaticPool,
}

impl TargetKind {
    /// All targets in reporting order.
    pub const ALL: [Self; 4] = [Self::Heap, Self::StaticPool, Self::HeapBlocks, Self::HeapPool];

    /// Label used in reports.
    pub fn label(self) -> &'static str {
        match self {
            Self::Heap => "Heap",
            Self::HeapBlocks => "Heap Blocks",
            Self::HeapPool => "Heap Pool",
            Self::StaticPool => "Static Pool",
        }
    }
}

/// Resolve a `--target` value to the targets to benchmark.
pub fn targets_to_run(target: &str) -> Result<Vec<TargetKind>, AppError> {
    match target {
        "all" => Ok(TargetKind::ALL.to_vec()),
        "none" => Ok(Vec::new()),
        "heap" => Ok(vec![TargetKind::Heap]),
        "heap-blocks" => Ok(vec![TargetKind::HeapBlocks]),
        "heap-pool" => Ok(vec![TargetKind::HeapPool]),
        "static-pool" => Ok(vec![TargetKind::StaticPool]),
        other => Err(AppError::Config(format!("unknown target: {other}"))),
    }
}

/// Run the application.
pub fn run(config: &AppConfig) -> Result<()> {
    config.validate()?;
    let targets = targets_to_run(&config.target)?;
    if targets.contains(&TargetKind::StaticPool) {
        config.validate_static()?;
    }

    register_out_of_memory_handler(|| {
        error!("allocator out of memory");
        std::process::abort();
    });

    if !config.skip_demo {
        run_demo(config.quiet)?;
    }

    let mut reports = Vec::new();
    let mut summaries = Vec::new();
    for kind in targets {
        let runs = bench_target(kind, config)?;
        let totals: Vec<Duration> = runs.iter().map(BenchReport::total).collect();
        summaries.push((kind, summarize(&totals)));
        reports.extend(runs);
    }

    if config.json {
        let summaries: Vec<_> = summaries
            .iter()
            .map(|(kind, summary)| serde_json::json!({ "target": kind.label(), "summary": summary }))
            .collect();
        let output = serde_json::json!({ "reports": reports, "summaries": summaries });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for report in &reports {
        if config.quiet {
            println!("{} TOTAL TIME: {} us", report.name, report.total().as_micros());
        } else {
            println!("{report}");
        }
    }
    if !config.quiet {
        for (kind, summary) in &summaries {
            println!(
                "{}: mean {} us, median {} us, min {} us, max {} us over {} runs",
                kind.label(),
                summary.mean.as_micros(),
                summary.median.as_micros(),
                summary.min.as_micros(),
                summary.max.as_micros(),
                summary.runs
            );
        }
    }
    Ok(())
}

/// One allocate/deallocate per policy, then a pooled value of each kind.
fn run_demo(quiet: bool) -> Result<(), AppError> {
    let mut buffer = StaticBuffer::<{ 100 * 20 }, 20>::new();
    let heap_blocks = Allocator::growable(100)?.with_name("heap-blocks");
    let heap_pool = Allocator::fixed_heap(100, 20)?.with_name("heap-pool");
    let static_pool = Allocator::fixed_static(100, 20, &mut buffer)?.with_name("static-pool");

    for pool in [&heap_blocks, &heap_pool, &static_pool] {
        let block = pool.allocate(100)?;
        pool.deallocate(block)?;
        if !quiet {
            println!(
                "{} ({}): allocated and released a {}-byte block",
                pool.name(),
                pool.policy(),
                pool.block_size()
            );
        }
    }

    let widget = Widget::create(Widget::new(1))?;
    let pooled = WIDGET_POOL.create(Widget::new(2))?;
    if !quiet {
        println!(
            "widgets {} and {} ({} payload bytes each) placed in per-type and static pools",
            widget.id,
            pooled.id,
            widget.payload.len()
        );
    }
    drop(widget);
    drop(pooled);

    heap_blocks.teardown()?;
    heap_pool.teardown()?;
    static_pool.teardown()?;
    info!("demo finished");
    Ok(())
}

fn bench_target(kind: TargetKind, config: &AppConfig) -> Result<Vec<BenchReport>, AppError> {
    let bench = config.bench_config();
    match kind {
        TargetKind::Heap => repeat(kind, Target::SystemHeap, &bench, config.runs),
        TargetKind::StaticPool => {
            let runs = config.runs;
            // The buffer lives on this thread's stack; leave room for a
            // temporary copy in unoptimised builds.
            std::thread::Builder::new()
                .name("static-pool".into())
                .stack_size(2 * STATIC_BYTES + (16 << 20))
                .spawn(move || -> Result<Vec<BenchReport>, AppError> {
                    let mut buffer = StaticBuffer::<STATIC_BYTES, STATIC_BLOCKS>::new();
                    let peak = bench.pattern.peak_live(bench.blocks);
                    let pool = Allocator::fixed_static(bench.block_size, peak, &mut buffer)?
                        .with_name("static-pool");
                    let reports = repeat(kind, Target::Pool(&pool), &bench, runs)?;
                    pool.teardown()?;
                    Ok(reports)
                })?
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
        }
        TargetKind::HeapBlocks => {
            let pool = Allocator::growable(bench.block_size)?.with_name("heap-blocks");
            let reports = repeat(kind, Target::Pool(&pool), &bench, config.runs)?;
            pool.teardown()?;
            Ok(reports)
        }
        TargetKind::HeapPool => {
            let peak = bench.pattern.peak_live(bench.blocks);
            let pool = Allocator::fixed_heap(bench.block_size, peak)?.with_name("heap-pool");
            let reports = repeat(kind, Target::Pool(&pool), &bench, config.runs)?;
            pool.teardown()?;
            Ok(reports)
        }
    }
}

fn repeat(
    kind: TargetKind,
    target: Target<'_>,
    bench: &BenchConfig,
    runs: u32,
) -> Result<Vec<BenchReport>, AppError> {
    (1..=runs)
        .map(|run| {
            let name = format!("{} (Run {run})", kind.label());
            run_workload(&name, target, bench).map_err(AppError::from)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_targets() {
        assert_eq!(targets_to_run("all").unwrap().len(), 4);
        assert!(targets_to_run("none").unwrap().is_empty());
        assert_eq!(
            targets_to_run("static-pool").unwrap(),
            vec![TargetKind::StaticPool]
        );
        assert!(targets_to_run("bogus").is_err());
    }

    #[test]
    fn widget_fills_one_forty_byte_block() {
        let widget = Widget::new(7);
        assert_eq!(std::mem::size_of::<Widget>(), 40);
        assert!(widget.payload.iter().all(|&b| b == 0));
        assert_eq!(Widget::pool().allocator().block_size(), 40);
        assert_eq!(TypedPool::<Widget, 20>::BLOCK_SIZE, 40);
    }

    #[test]
    fn demo_leaves_pools_empty() {
        run_demo(true).unwrap();
        assert_eq!(Widget::pool().live_count(), 0);
        assert_eq!(WIDGET_POOL.live_count(), 0);
    }

    #[test]
    fn heap_pool_target_runs() {
        let config = AppConfig {
            blocks: 16,
            block_size: 64,
            runs: 2,
            target: "heap-pool".into(),
            pattern: blockpool_bench::Pattern::Interleaved,
            json: false,
            skip_demo: true,
            quiet: true,
        };
        let reports = bench_target(TargetKind::HeapPool, &config).unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1].name, "Heap Pool (Run 2)");
    }
}
