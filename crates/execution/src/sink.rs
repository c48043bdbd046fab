//! Failure sinks for supervised tasks.

use std::sync::{Mutex, PoisonError};

use tandem_core::{OpError, TaskId, Time};
use tracing::error;

/// A failure captured from a supervised task.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    /// Task that failed
    pub task_id: TaskId,
    /// Task label
    pub label: String,
    /// The error the task raised, unmodified
    pub error: OpError,
    /// When the failure was captured
    pub at: Time,
}

/// Receives failures of detached work.
pub trait FailureSink: Send + Sync {
    /// Record one failure.
    fn record(&self, failure: Failure);
}

/// Reports failures through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingFailureSink;

impl FailureSink for TracingFailureSink {
    fn record(&self, failure: Failure) {
        error!(
            task = %failure.task_id,
            label = %failure.label,
            kind = failure.error.kind(),
            "Supervised task failed: {}",
            failure.error
        );
    }
}

/// Keeps failures in memory for later inspection.
#[derive(Debug, Default)]
pub struct MemoryFailureSink {
    failures: Mutex<Vec<Failure>>,
}

impl MemoryFailureSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded failures, in recording order.
    pub fn failures(&self) -> Vec<Failure> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded failures.
    pub fn len(&self) -> usize {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FailureSink for MemoryFailureSink {
    fn record(&self, failure: Failure) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failure);
    }
}
