//! Fan-out/fan-in over independent operations.
//!
//! Every operation is started before any of them is awaited to completion,
//! and results are reported in input order regardless of which operation
//! finished first.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::future::join_all;
use futures::FutureExt;
use tandem_core::{OpError, Outcome, Result};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::panic::panic_message;

/// Per-operation outcomes, index-aligned with the submitted operations.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationResult<T> {
    outcomes: Vec<Outcome<T>>,
}

impl<T> AggregationResult<T> {
    fn new(outcomes: Vec<Outcome<T>>) -> Self {
        Self { outcomes }
    }

    /// Outcomes in input order.
    pub fn outcomes(&self) -> &[Outcome<T>] {
        &self.outcomes
    }

    /// Number of aggregated operations.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether no operations were aggregated.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Whether every operation completed.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(Outcome::is_completed)
    }

    /// The failure with the lowest input index.
    pub fn first_failure(&self) -> Option<(usize, OpError)> {
        self.outcomes
            .iter()
            .enumerate()
            .find_map(|(i, o)| o.error().map(|e| (i, e)))
    }

    /// Every failure, by input index.
    pub fn failures(&self) -> Vec<(usize, OpError)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.error().map(|e| (i, e)))
            .collect()
    }

    /// Completed values, `None` where the operation did not complete.
    pub fn values(&self) -> Vec<Option<&T>> {
        self.outcomes.iter().map(Outcome::value).collect()
    }

    /// Take the outcomes.
    pub fn into_outcomes(self) -> Vec<Outcome<T>> {
        self.outcomes
    }

    /// Collapse into the all-or-nothing contract.
    ///
    /// Succeeds with every value in input order, or fails with
    /// [`OpError::AggregateFailure`] whose primary error is the failure with
    /// the lowest input index.
    pub fn into_result(self) -> Result<Vec<T>> {
        let total = self.outcomes.len();
        let mut failures = self.failures();

        if failures.is_empty() {
            return Ok(self
                .outcomes
                .into_iter()
                .filter_map(|o| o.into_result().ok())
                .collect());
        }

        let (index, first) = failures.remove(0);
        Err(OpError::AggregateFailure {
            index,
            total,
            first: Box::new(first),
            others: failures,
        })
    }
}

/// Runs independent operations concurrently and aggregates their results.
#[derive(Debug, Clone)]
pub struct ConcurrentAggregator {
    name: String,
}

impl ConcurrentAggregator {
    /// Create an aggregator; `name` only shows up in logs.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Run every operation concurrently on the current task and collect
    /// every outcome.
    ///
    /// Waits for all operations even when some fail.
    pub async fn collect_all<T, I, Fut>(&self, ops: I) -> AggregationResult<T>
    where
        I: IntoIterator<Item = Fut>,
        Fut: Future<Output = Result<T>>,
    {
        let ops: Vec<Fut> = ops.into_iter().collect();
        if ops.is_empty() {
            debug!(aggregator = %self.name, "No operations to aggregate");
            return AggregationResult::new(Vec::new());
        }

        debug!(aggregator = %self.name, total = ops.len(), "Starting concurrent operations");
        let outcomes: Vec<Outcome<T>> = join_all(ops).await.into_iter().map(Outcome::from).collect();

        self.log_summary(&outcomes);
        AggregationResult::new(outcomes)
    }

    /// Run every operation concurrently and fail as a whole if any failed.
    pub async fn run_all<T, I, Fut>(&self, ops: I) -> Result<Vec<T>>
    where
        I: IntoIterator<Item = Fut>,
        Fut: Future<Output = Result<T>>,
    {
        self.collect_all(ops).await.into_result()
    }

    /// Spawn every operation as its own task and collect every outcome.
    ///
    /// Tasks complete in any order; each result is placed into the slot of
    /// its input index. A panicking operation becomes a
    /// [`OpError::ComputationFailure`] for its slot; a task lost to runtime
    /// shutdown is reported as cancelled.
    pub async fn spawn_all<T, I, Fut>(&self, ops: I) -> AggregationResult<T>
    where
        I: IntoIterator<Item = Fut>,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let mut tasks = JoinSet::new();
        let mut total = 0;

        for (index, op) in ops.into_iter().enumerate() {
            tasks.spawn(async move {
                let outcome = match AssertUnwindSafe(op).catch_unwind().await {
                    Ok(result) => Outcome::from(result),
                    Err(payload) => Outcome::Failed(OpError::ComputationFailure(format!(
                        "operation panicked: {}",
                        panic_message(&payload)
                    ))),
                };
                (index, outcome)
            });
            total += 1;
        }

        if total == 0 {
            debug!(aggregator = %self.name, "No operations to aggregate");
            return AggregationResult::new(Vec::new());
        }

        debug!(aggregator = %self.name, total, "Spawned concurrent operations");

        let mut slots: Vec<Option<Outcome<T>>> = (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => warn!(aggregator = %self.name, "Aggregated task lost: {}", e),
            }
        }

        let outcomes: Vec<Outcome<T>> = slots
            .into_iter()
            .map(|slot| slot.unwrap_or(Outcome::Cancelled))
            .collect();

        self.log_summary(&outcomes);
        AggregationResult::new(outcomes)
    }

    fn log_summary<T>(&self, outcomes: &[Outcome<T>]) {
        let failed = outcomes.iter().filter(|o| !o.is_completed()).count();
        if failed > 0 {
            warn!(
                aggregator = %self.name,
                total = outcomes.len(),
                failed,
                "Concurrent operations finished with failures"
            );
        } else {
            debug!(aggregator = %self.name, total = outcomes.len(), "Concurrent operations completed");
        }
    }
}

impl Default for ConcurrentAggregator {
    fn default() -> Self {
        Self::new("default")
    }
}
