//! Tandem core data models.
//!
//! This crate defines the error taxonomy, the tagged operation outcome and
//! the record model shared by the concurrency components and their
//! collaborators.

#![warn(missing_docs)]

mod error;
mod id;
mod record;

pub use error::{OpError, Outcome, Result};
pub use id::{RecordId, TaskId};
pub use record::{NewRecord, Record, RecordFilter};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
