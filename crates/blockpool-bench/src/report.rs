//! Benchmark results and their JSON form.

use std::fmt;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::workload::Pattern;

pub(crate) fn as_micros<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_micros()).unwrap_or(u64::MAX))
}

/// Wall time of one workload phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseTiming {
    pub label: &'static str,
    pub operations: usize,
    #[serde(rename = "micros", serialize_with = "as_micros")]
    pub elapsed: Duration,
}

/// Outcome of one workload run against one target.
#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub name: String,
    pub pattern: Pattern,
    pub blocks: usize,
    pub block_size: usize,
    pub phases: Vec<PhaseTiming>,
}

impl BenchReport {
    /// Sum of all phase times.
    pub fn total(&self) -> Duration {
        self.phases.iter().map(|phase| phase.elapsed).sum()
    }

    /// Serialize as a JSON object.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for phase in &self.phases {
            writeln!(
                f,
                "{} {} time: {} us",
                self.name,
                phase.label,
                phase.elapsed.as_micros()
            )?;
        }
        write!(f, "{} TOTAL TIME: {} us", self.name, self.total().as_micros())
    }
}
