//! blockpool library: application logic for the allocator demo and benchmarks.

pub mod app;
pub mod config;
pub mod errors;
