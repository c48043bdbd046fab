//! Cooperative cancellation.
//!
//! A [`CancellationSignal`] is created per episode and handed by reference
//! to every operation that must observe it. It only ever moves from
//! `Active` to `Cancelled`; a new episode needs a new signal.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tandem_core::{Outcome, Result};
use tokio::sync::Notify;
use tracing::{debug, info};

/// State of a cancellation signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalState {
    /// Not cancelled
    Active,
    /// Cancelled; final for this episode
    Cancelled,
}

#[derive(Debug, Default)]
struct SignalInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Shared, monotone cancellation flag for one episode.
///
/// Clones observe the same episode. Reads are a single atomic load.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    inner: Arc<SignalInner>,
}

impl CancellationSignal {
    /// Start a new episode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation.
    ///
    /// Idempotent; returns `true` only for the call that moved the signal to
    /// `Cancelled`.
    pub fn cancel(&self) -> bool {
        let first = !self.inner.cancelled.swap(true, Ordering::AcqRel);
        if first {
            debug!("Cancellation signalled");
            self.inner.notify.notify_waiters();
        }
        first
    }

    /// Whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Current state.
    pub fn state(&self) -> SignalState {
        if self.is_cancelled() {
            SignalState::Cancelled
        } else {
            SignalState::Active
        }
    }

    /// Wait until cancellation is signalled.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// When the signal is checked relative to each unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckDiscipline {
    /// Check before starting each unit; no unit starts after cancellation
    /// is observed.
    #[default]
    BeforeWork,
    /// Check after finishing each unit. The first unit always starts, and
    /// the unit in flight when cancellation lands always finishes.
    AfterWork,
}

/// What a stepwise run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    /// Terminal outcome
    pub outcome: Outcome<()>,
    /// Units of work started
    pub started: usize,
    /// Units of work finished successfully
    pub completed: usize,
}

/// A bounded loop of units of work that stops cooperatively.
#[derive(Debug, Clone)]
pub struct CancellableOperation {
    name: String,
    steps: usize,
    discipline: CheckDiscipline,
    step_delay: Duration,
}

impl CancellableOperation {
    /// An operation of `steps` units using [`CheckDiscipline::BeforeWork`].
    pub fn new(name: impl Into<String>, steps: usize) -> Self {
        Self {
            name: name.into(),
            steps,
            discipline: CheckDiscipline::default(),
            step_delay: Duration::from_millis(100),
        }
    }

    /// Set the check discipline.
    pub fn with_discipline(mut self, discipline: CheckDiscipline) -> Self {
        self.discipline = discipline;
        self
    }

    /// Set the duration of a simulated unit (see [`Self::run_simulated`]).
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Number of units.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Run `unit(step)` for each step, observing `signal`.
    ///
    /// A unit returning an error ends the run as `Failed`, or as `Cancelled`
    /// if the error is itself a cancellation.
    pub async fn run<F, Fut>(&self, signal: &CancellationSignal, mut unit: F) -> StepReport
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        info!(operation = %self.name, steps = self.steps, discipline = ?self.discipline, "Starting operation");

        let mut started = 0;
        let mut completed = 0;

        for step in 0..self.steps {
            if self.discipline == CheckDiscipline::BeforeWork && signal.is_cancelled() {
                return self.finish(Outcome::Cancelled, started, completed);
            }

            started += 1;
            debug!(operation = %self.name, step, "Starting unit");
            if let Err(e) = unit(step).await {
                return self.finish(Outcome::from(Err::<(), _>(e)), started, completed);
            }
            completed += 1;

            let remaining = step + 1 < self.steps;
            if self.discipline == CheckDiscipline::AfterWork && remaining && signal.is_cancelled() {
                return self.finish(Outcome::Cancelled, started, completed);
            }
        }

        self.finish(Outcome::Completed(()), started, completed)
    }

    /// Run with units that each sleep for the configured step delay.
    pub async fn run_simulated(&self, signal: &CancellationSignal) -> StepReport {
        let delay = self.step_delay;
        self.run(signal, |_| async move {
            tokio::time::sleep(delay).await;
            Ok(())
        })
        .await
    }

    fn finish(&self, outcome: Outcome<()>, started: usize, completed: usize) -> StepReport {
        info!(operation = %self.name, started, completed, "Operation {}", outcome);
        StepReport {
            outcome,
            started,
            completed,
        }
    }
}
