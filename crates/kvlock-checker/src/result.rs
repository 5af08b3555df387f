//! Result types for the linearizability checker.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use kvlock_core::{ClientId, OperationId, Timestamp};

/// The result of a linearizability check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    /// The overall status of the check.
    pub status: CheckStatus,
    /// Counterexample if the history is not linearizable.
    pub counterexample: Option<Counterexample>,
    /// Time taken to perform the check.
    pub duration: Option<Duration>,
    /// Additional diagnostic information.
    pub diagnostics: Vec<String>,
    /// Statistics about the search.
    pub stats: CheckStats,
}

impl CheckResult {
    fn with_status(status: CheckStatus) -> Self {
        Self {
            status,
            counterexample: None,
            duration: None,
            diagnostics: Vec::new(),
            stats: CheckStats::default(),
        }
    }

    /// Create a legal result.
    pub fn legal() -> Self {
        Self::with_status(CheckStatus::Legal)
    }

    /// Create an illegal result with a counterexample.
    pub fn illegal(counterexample: Counterexample) -> Self {
        Self {
            counterexample: Some(counterexample),
            ..Self::with_status(CheckStatus::Illegal)
        }
    }

    /// Create an unknown result (e.g., due to timeout).
    pub fn unknown(reason: impl Into<String>) -> Self {
        Self::with_status(CheckStatus::Unknown(reason.into()))
    }

    /// Add the duration to this result.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Add a diagnostic message.
    pub fn with_diagnostic(mut self, message: impl Into<String>) -> Self {
        self.diagnostics.push(message.into());
        self
    }

    /// Add statistics to this result.
    pub fn with_stats(mut self, stats: CheckStats) -> Self {
        self.stats = stats;
        self
    }

    /// Check if the history was proven linearizable.
    pub fn is_legal(&self) -> bool {
        matches!(self.status, CheckStatus::Legal)
    }

    /// Check if the history was proven not linearizable.
    pub fn is_illegal(&self) -> bool {
        matches!(self.status, CheckStatus::Illegal)
    }

    /// Check if the result is inconclusive.
    pub fn is_unknown(&self) -> bool {
        matches!(self.status, CheckStatus::Unknown(_))
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CheckResult {{ status: {}", self.status)?;
        if let Some(duration) = self.duration {
            write!(f, ", duration: {:?}", duration)?;
        }
        if let Some(ref ce) = self.counterexample {
            write!(f, ", counterexample: {} operations", ce.unlinearized.len())?;
        }
        write!(f, " }}")
    }
}

/// The status of a linearizability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CheckStatus {
    /// Some real-time-consistent order is accepted by the model.
    Legal,
    /// No real-time-consistent order is accepted by the model.
    Illegal,
    /// The search gave up before reaching a verdict.
    Unknown(String),
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Legal => write!(f, "LEGAL"),
            CheckStatus::Illegal => write!(f, "ILLEGAL"),
            CheckStatus::Unknown(reason) => write!(f, "UNKNOWN: {}", reason),
        }
    }
}

/// Operations of a partition that could not be linearized.
#[derive(Debug, Clone, Serialize)]
pub struct Counterexample {
    /// A human-readable description of the violation.
    pub description: String,
    /// Index of the failing partition.
    pub partition: usize,
    /// The longest prefix the search managed to linearize, in order.
    pub linearized: Vec<CounterexampleOp>,
    /// The remaining operations of the partition.
    pub unlinearized: Vec<CounterexampleOp>,
}

impl fmt::Display for Counterexample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Counterexample: {}", self.description)?;
        writeln!(f, "  Linearized prefix:")?;
        for op in &self.linearized {
            writeln!(f, "    - {}", op)?;
        }
        writeln!(f, "  Could not linearize:")?;
        for op in &self.unlinearized {
            writeln!(f, "    - {}", op)?;
        }
        Ok(())
    }
}

/// An operation in a counterexample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterexampleOp {
    /// The operation ID.
    pub id: OperationId,
    /// The client that issued the operation.
    pub client: ClientId,
    /// A description of the operation.
    pub description: String,
    /// Call and return timestamps.
    pub interval: (Timestamp, Timestamp),
}

impl fmt::Display for CounterexampleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {} [{}-{}]",
            self.id, self.client, self.description, self.interval.0, self.interval.1
        )
    }
}

/// Statistics about a check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckStats {
    /// Number of operations in the history.
    pub num_operations: usize,
    /// Number of partitions searched.
    pub num_partitions: usize,
    /// Distinct (linearized set, state) pairs visited.
    pub states_explored: u64,
    /// Number of times the search undid a step.
    pub backtracks: u64,
    /// Longest linearized prefix reached in any partition.
    pub max_depth: usize,
}
