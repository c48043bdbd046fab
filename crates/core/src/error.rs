//! Operation error taxonomy and the tagged outcome returned at operation boundaries.

use serde::{Deserialize, Serialize};

/// Result alias for operations that fail with an [`OpError`].
pub type Result<T> = std::result::Result<T, OpError>;

/// Errors an operation can finish with.
///
/// Errors are cloneable and comparable by value: a single failure may be
/// handed to several waiters (see the single-flight cache), and callers
/// further up a chain must observe exactly the error that was raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum OpError {
    /// The wrapped operation raised.
    #[error("computation failed: {0}")]
    ComputationFailure(String),

    /// Cooperative cancellation was observed.
    #[error("operation cancelled")]
    Cancelled,

    /// One or more concurrently aggregated operations failed.
    ///
    /// `first` is the failure with the lowest input index; `others` holds the
    /// remaining failures, also by input index.
    #[error("operation {index} of {total} failed: {first}")]
    AggregateFailure {
        /// Input index of the primary failure
        index: usize,
        /// Number of operations that were aggregated
        total: usize,
        /// The primary failure
        first: Box<OpError>,
        /// Every other failure, ordered by input index
        others: Vec<(usize, OpError)>,
    },
}

impl OpError {
    /// Shorthand for a [`OpError::ComputationFailure`].
    pub fn computation(message: impl Into<String>) -> Self {
        Self::ComputationFailure(message.into())
    }

    /// Whether this error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Short, stable name of the error kind (used in logs).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ComputationFailure(_) => "computation_failure",
            Self::Cancelled => "cancelled",
            Self::AggregateFailure { .. } => "aggregate_failure",
        }
    }

    /// The innermost primary error.
    ///
    /// For aggregate failures this follows `first` down to a non-aggregate
    /// error; every other kind is its own root.
    pub fn root_cause(&self) -> &OpError {
        match self {
            Self::AggregateFailure { first, .. } => first.root_cause(),
            other => other,
        }
    }

    /// Number of failed operations this error stands for.
    pub fn failure_count(&self) -> usize {
        match self {
            Self::AggregateFailure { others, .. } => 1 + others.len(),
            _ => 1,
        }
    }
}

/// Tagged terminal state of an operation.
///
/// Every component returns one of these (or a `Result` convertible to one)
/// instead of relying on unwinding for cancellation or failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome<T> {
    /// Finished with a value
    Completed(T),
    /// Stopped after observing cancellation
    Cancelled,
    /// Finished with an error
    Failed(OpError),
}

impl<T> Outcome<T> {
    /// Whether the operation completed.
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    /// Whether the operation was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    /// Whether the operation failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    /// Borrow the completed value, if any.
    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Completed(v) => Some(v),
            _ => None,
        }
    }

    /// The error this outcome stands for, if it did not complete.
    pub fn error(&self) -> Option<OpError> {
        match self {
            Outcome::Completed(_) => None,
            Outcome::Cancelled => Some(OpError::Cancelled),
            Outcome::Failed(e) => Some(e.clone()),
        }
    }

    /// Map the completed value.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Outcome::Completed(v) => Outcome::Completed(f(v)),
            Outcome::Cancelled => Outcome::Cancelled,
            Outcome::Failed(e) => Outcome::Failed(e),
        }
    }

    /// Convert back into a `Result`, turning `Cancelled` into [`OpError::Cancelled`].
    pub fn into_result(self) -> Result<T> {
        match self {
            Outcome::Completed(v) => Ok(v),
            Outcome::Cancelled => Err(OpError::Cancelled),
            Outcome::Failed(e) => Err(e),
        }
    }
}

impl<T> From<Result<T>> for Outcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(v) => Outcome::Completed(v),
            Err(OpError::Cancelled) => Outcome::Cancelled,
            Err(e) => Outcome::Failed(e),
        }
    }
}

impl<T> std::fmt::Display for Outcome<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Completed(_) => write!(f, "completed"),
            Outcome::Cancelled => write!(f, "cancelled"),
            Outcome::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}
