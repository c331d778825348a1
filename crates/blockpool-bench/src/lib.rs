//! # blockpool-bench
//!
//! Allocation workloads that time the system heap against blockpool
//! allocators, phase by phase.

pub mod report;
pub mod runner;
pub mod workload;

pub use report::{BenchReport, PhaseTiming};
pub use runner::{summarize, Summary};
pub use workload::{run, BenchConfig, Pattern, Target};
