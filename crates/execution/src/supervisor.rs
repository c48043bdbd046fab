//! Supervised detached work.
//!
//! A [`SupervisedTask`] turns whatever its operation does (value, error or
//! panic) into a [`TaskReport`] and routes failures to a [`FailureSink`].
//! The [`Supervisor`] spawns such tasks, keeps their handles and drains
//! their completions, so detached work is never simply dropped.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tandem_core::{OpError, Outcome, Result, TaskId};
use tokio::runtime::Handle;
use tokio::task::{self, JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::panic::panic_message;
use crate::sink::{Failure, FailureSink};

/// Completion of one supervised task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    /// Task ID
    pub task_id: TaskId,
    /// Task label
    pub label: String,
    /// How the task ended
    pub outcome: Outcome<()>,
}

/// An operation wrapped so that it can never fail its caller.
pub struct SupervisedTask<F> {
    id: TaskId,
    label: String,
    op: F,
}

impl<F> SupervisedTask<F> {
    /// Wrap `op`.
    pub fn new(label: impl Into<String>, op: F) -> Self {
        Self {
            id: TaskId::new(),
            label: label.into(),
            op,
        }
    }

    /// ID assigned to this task.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Run the operation to completion.
    ///
    /// Errors and panics are recorded to `sink` exactly once. Cancellation
    /// is logged but not recorded as a failure. Always returns a report.
    pub async fn run<T>(self, sink: &dyn FailureSink) -> TaskReport
    where
        F: Future<Output = Result<T>>,
    {
        debug!(task = %self.id, label = %self.label, "Supervised task started");

        let outcome = match AssertUnwindSafe(self.op).catch_unwind().await {
            Ok(result) => Outcome::from(result.map(|_| ())),
            Err(payload) => Outcome::Failed(OpError::ComputationFailure(format!(
                "task panicked: {}",
                panic_message(&payload)
            ))),
        };

        match &outcome {
            Outcome::Completed(()) => {
                debug!(task = %self.id, label = %self.label, "Supervised task completed");
            }
            Outcome::Cancelled => {
                info!(task = %self.id, label = %self.label, "Supervised task cancelled");
            }
            Outcome::Failed(error) => sink.record(Failure {
                task_id: self.id,
                label: self.label.clone(),
                error: error.clone(),
                at: chrono::Utc::now(),
            }),
        }

        TaskReport {
            task_id: self.id,
            label: self.label,
            outcome,
        }
    }
}

/// Tally of drained completions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorSummary {
    /// Tasks that completed
    pub succeeded: usize,
    /// Tasks that failed (error or panic)
    pub failed: usize,
    /// Tasks that observed cancellation
    pub cancelled: usize,
    /// Tasks aborted before they could report
    pub lost: usize,
}

impl SupervisorSummary {
    /// Number of tasks accounted for.
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.cancelled + self.lost
    }

    fn tally(&mut self, outcome: &Outcome<()>) {
        match outcome {
            Outcome::Completed(()) => self.succeeded += 1,
            Outcome::Cancelled => self.cancelled += 1,
            Outcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Bookkeeping for tasks a [`Supervisor`] has spawned but not yet settled.
#[derive(Default)]
struct Ledger {
    in_flight: HashMap<task::Id, (TaskId, String)>,
    summary: SupervisorSummary,
}

impl Ledger {
    /// Account for one joined task. A task that never produced a report is
    /// recorded to `sink` here, as a panic or as [`OpError::Cancelled`].
    fn settle(
        &mut self,
        joined: std::result::Result<(task::Id, TaskReport), JoinError>,
        sink: &dyn FailureSink,
    ) {
        let err = match joined {
            Ok((id, report)) => {
                self.in_flight.remove(&id);
                self.summary.tally(&report.outcome);
                return;
            }
            Err(err) => err,
        };

        let Some((task_id, label)) = self.in_flight.remove(&err.id()) else {
            debug!("Untracked task ended without a report: {}", err);
            return;
        };

        let error = if err.is_panic() {
            let message = panic_message(&err.into_panic());
            warn!(task = %task_id, label = %label, "Supervised task panicked outside its operation");
            self.summary.failed += 1;
            OpError::ComputationFailure(format!("task panicked: {}", message))
        } else {
            warn!(task = %task_id, label = %label, "Supervised task lost before completion");
            self.summary.lost += 1;
            OpError::Cancelled
        };

        sink.record(Failure {
            task_id,
            label,
            error,
            at: chrono::Utc::now(),
        });
    }
}

/// Owns detached tasks and drains their completions.
pub struct Supervisor {
    sink: Arc<dyn FailureSink>,
    tasks: JoinSet<TaskReport>,
    ledger: Ledger,
}

impl Supervisor {
    /// Create a supervisor reporting failures to `sink`.
    pub fn new(sink: Arc<dyn FailureSink>) -> Self {
        Self {
            sink,
            tasks: JoinSet::new(),
            ledger: Ledger::default(),
        }
    }

    /// Start `op` detached from the caller and return its ID immediately.
    ///
    /// Tasks that already finished are reaped first, so a long-lived
    /// supervisor only holds what is still running.
    pub fn spawn<F, T>(&mut self, label: impl Into<String>, op: F) -> TaskId
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.reap_finished();

        let task = SupervisedTask::new(label, op);
        let id = task.id();
        let label = task.label.clone();

        let sink = self.sink.clone();
        let handle = self.tasks.spawn(async move { task.run(sink.as_ref()).await });
        self.ledger.in_flight.insert(handle.id(), (id, label));

        debug!(task = %id, pending = self.ledger.in_flight.len(), "Spawned supervised task");
        id
    }

    /// Tasks spawned but not yet settled.
    pub fn pending(&self) -> usize {
        self.ledger.in_flight.len()
    }

    /// Abort every task still running. Aborted tasks are reported by the next
    /// [`Self::drain`].
    pub fn abort_all(&mut self) {
        if !self.tasks.is_empty() {
            info!(pending = self.ledger.in_flight.len(), "Aborting supervised tasks");
        }
        self.tasks.abort_all();
    }

    /// Wait for every spawned task and tally how each ended since the last
    /// drain, including tasks reaped early by [`Self::spawn`].
    ///
    /// A task that was aborted before reporting is recorded to the sink as
    /// [`OpError::Cancelled`] so that it is still observed once.
    pub async fn drain(&mut self) -> SupervisorSummary {
        while let Some(joined) = self.tasks.join_next_with_id().await {
            self.ledger.settle(joined, self.sink.as_ref());
        }

        let summary = std::mem::take(&mut self.ledger.summary);
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            lost = summary.lost,
            "Supervisor drained"
        );
        summary
    }

    fn reap_finished(&mut self) {
        while let Some(joined) = self.tasks.try_join_next_with_id() {
            self.ledger.settle(joined, self.sink.as_ref());
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if self.ledger.in_flight.is_empty() {
            return;
        }
        warn!(pending = self.ledger.in_flight.len(), "Supervisor dropped with undrained tasks");

        let mut tasks = std::mem::take(&mut self.tasks);
        let mut ledger = std::mem::take(&mut self.ledger);
        let sink = self.sink.clone();

        match Handle::try_current() {
            // Hand the tasks to a reaper so their real outcomes still reach the sink.
            Ok(handle) => {
                handle.spawn(async move {
                    while let Some(joined) = tasks.join_next_with_id().await {
                        ledger.settle(joined, sink.as_ref());
                    }
                    debug!("Reaper settled tasks of a dropped supervisor");
                });
            }
            // No runtime to finish on: the tasks die with the set.
            Err(_) => {
                tasks.abort_all();
                for (_, (task_id, label)) in ledger.in_flight.drain() {
                    sink.record(Failure {
                        task_id,
                        label,
                        error: OpError::Cancelled,
                        at: chrono::Utc::now(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemoryFailureSink;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    /// Panics on its first record, keeps everything after that.
    #[derive(Default)]
    struct PanicsOnceSink {
        tripped: AtomicBool,
        kept: MemoryFailureSink,
    }

    impl FailureSink for PanicsOnceSink {
        fn record(&self, failure: Failure) {
            if !self.tripped.swap(true, Ordering::AcqRel) {
                panic!("sink exploded");
            }
            self.kept.record(failure);
        }
    }

    #[tokio::test]
    async fn test_failing_task_is_recorded_once_and_never_raises() {
        let sink = MemoryFailureSink::new();
        let task = SupervisedTask::new("always-fails", async {
            Err::<(), _>(OpError::computation("boom"))
        });
        let id = task.id();

        let report = task.run(&sink).await;

        assert_eq!(report.outcome, Outcome::Failed(OpError::computation("boom")));
        let failures = sink.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].task_id, id);
        assert_eq!(failures[0].label, "always-fails");
        assert_eq!(failures[0].error, OpError::ComputationFailure("boom".to_string()));
    }

    #[tokio::test]
    async fn test_success_and_cancel_are_not_failures() {
        let sink = MemoryFailureSink::new();

        let ok = SupervisedTask::new("ok", async { Ok::<_, OpError>(5) }).run(&sink).await;
        let cancelled = SupervisedTask::new("cancelled", async { Err::<(), _>(OpError::Cancelled) })
            .run(&sink)
            .await;

        assert_eq!(ok.outcome, Outcome::Completed(()));
        assert_eq!(cancelled.outcome, Outcome::Cancelled);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_panic_is_captured() {
        let sink = MemoryFailureSink::new();
        let report = SupervisedTask::new("panics", async {
            if true {
                panic!("kaboom");
            }
            Ok::<(), OpError>(())
        })
        .run(&sink)
        .await;

        assert!(report.outcome.is_failed());
        assert_eq!(sink.failures()[0].error, OpError::computation("task panicked: kaboom"));
    }

    #[tokio::test]
    async fn test_spawn_returns_before_work_finishes() {
        let sink = Arc::new(MemoryFailureSink::new());
        let mut supervisor = Supervisor::new(sink.clone());
        let (release, released) = oneshot::channel::<()>();

        supervisor.spawn("waits", async move {
            let _ = released.await;
            Err::<(), _>(OpError::computation("late failure"))
        });

        // The caller carries on while the task is parked.
        assert_eq!(supervisor.pending(), 1);
        assert!(sink.is_empty());

        let _ = release.send(());
        let summary = supervisor.drain().await;

        assert_eq!(summary.failed, 1);
        assert_eq!(supervisor.pending(), 0);
        assert_eq!(sink.failures()[0].error, OpError::computation("late failure"));
    }

    #[tokio::test]
    async fn test_drain_tallies_every_task() {
        let sink = Arc::new(MemoryFailureSink::new());
        let mut supervisor = Supervisor::new(sink.clone());

        for i in 0..3 {
            supervisor.spawn(format!("ok-{i}"), async { Ok::<_, OpError>(()) });
        }
        supervisor.spawn("fails", async { Err::<(), _>(OpError::computation("x")) });
        supervisor.spawn("cancelled", async { Err::<(), _>(OpError::Cancelled) });

        let summary = supervisor.drain().await;
        assert_eq!(
            summary,
            SupervisorSummary {
                succeeded: 3,
                failed: 1,
                cancelled: 1,
                lost: 0
            }
        );
        assert_eq!(summary.total(), 5);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn test_aborted_tasks_are_still_observed() {
        let sink = Arc::new(MemoryFailureSink::new());
        let mut supervisor = Supervisor::new(sink.clone());

        let id = supervisor.spawn("stuck", std::future::pending::<Result<()>>());
        tokio::time::sleep(Duration::from_millis(1)).await;

        supervisor.abort_all();
        let summary = supervisor.drain().await;

        assert_eq!(summary.lost, 1);
        let failures = sink.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].task_id, id);
        assert_eq!(failures[0].error, OpError::Cancelled);
    }

    #[tokio::test]
    async fn test_drain_with_nothing_spawned() {
        let mut supervisor = Supervisor::new(Arc::new(MemoryFailureSink::new()));
        assert_eq!(supervisor.drain().await, SupervisorSummary::default());
    }

    #[tokio::test]
    async fn test_dropped_supervisor_still_reports() {
        let sink = Arc::new(MemoryFailureSink::new());
        let mut supervisor = Supervisor::new(sink.clone());

        let id = supervisor.spawn("outlives-owner", async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err::<(), _>(OpError::computation("boom"))
        });
        drop(supervisor);

        tokio::time::sleep(Duration::from_millis(100)).await;

        let failures = sink.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].task_id, id);
        assert_eq!(failures[0].error, OpError::computation("boom"));
    }

    #[test]
    fn test_dropped_supervisor_without_runtime_records_cancelled() {
        let sink = Arc::new(MemoryFailureSink::new());
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();

        let (supervisor, id) = runtime.block_on(async {
            let mut supervisor = Supervisor::new(sink.clone());
            let id = supervisor.spawn("never-runs", std::future::pending::<Result<()>>());
            (supervisor, id)
        });
        drop(supervisor);

        let failures = sink.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].task_id, id);
        assert_eq!(failures[0].error, OpError::Cancelled);
    }

    #[tokio::test]
    async fn test_panic_escaping_the_wrapper_is_a_failure() {
        let sink = Arc::new(PanicsOnceSink::default());
        let mut supervisor = Supervisor::new(sink.clone());

        let id = supervisor.spawn("fails", async { Err::<(), _>(OpError::computation("boom")) });
        let summary = supervisor.drain().await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.lost, 0);
        let failures = sink.kept.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].task_id, id);
        assert_eq!(failures[0].error, OpError::computation("task panicked: sink exploded"));
    }

    #[tokio::test]
    async fn test_spawn_reaps_finished_tasks() {
        let sink = Arc::new(MemoryFailureSink::new());
        let mut supervisor = Supervisor::new(sink.clone());

        supervisor.spawn("quick-ok", async { Ok::<_, OpError>(()) });
        supervisor.spawn("quick-fail", async { Err::<(), _>(OpError::computation("x")) });
        tokio::time::sleep(Duration::from_millis(10)).await;

        supervisor.spawn("stuck", std::future::pending::<Result<()>>());
        assert_eq!(supervisor.pending(), 1);

        supervisor.abort_all();
        let summary = supervisor.drain().await;
        assert_eq!(
            summary,
            SupervisorSummary {
                succeeded: 1,
                failed: 1,
                cancelled: 0,
                lost: 1
            }
        );
        assert_eq!(sink.len(), 2);
        assert_eq!(supervisor.drain().await, SupervisorSummary::default());
    }
}
