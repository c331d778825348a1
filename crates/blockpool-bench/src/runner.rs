//! Timing helpers for benchmark phases.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::report::as_micros;

/// Run `f` once and return its output with the elapsed wall time.
pub fn time_phase<T, E, F>(f: F) -> Result<(T, Duration), E>
where
    F: FnOnce() -> Result<T, E>,
{
    let start = Instant::now();
    let value = f()?;
    Ok((value, start.elapsed()))
}

/// Aggregate of repeated runs of one workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Summary {
    #[serde(serialize_with = "as_micros")]
    pub mean: Duration,
    #[serde(serialize_with = "as_micros")]
    pub median: Duration,
    #[serde(serialize_with = "as_micros")]
    pub min: Duration,
    #[serde(serialize_with = "as_micros")]
    pub max: Duration,
    pub runs: u32,
}

/// Summarize the total times of repeated runs.
pub fn summarize(totals: &[Duration]) -> Summary {
    let mut durations = totals.to_vec();
    durations.sort();
    let runs = u32::try_from(durations.len()).unwrap_or(u32::MAX);
    let min = durations.first().copied().unwrap_or_default();
    let max = durations.last().copied().unwrap_or_default();
    let median = match durations.len() {
        0 => Duration::ZERO,
        len if len % 2 == 1 => durations[len / 2],
        len => (durations[len / 2 - 1] + durations[len / 2]) / 2,
    };
    let total: Duration = durations.iter().sum();
    let mean = if runs == 0 { Duration::ZERO } else { total / runs };

    Summary {
        mean,
        median,
        min,
        max,
        runs,
    }
}
