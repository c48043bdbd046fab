//! Execution layer - concurrency orchestration primitives.
//!
//! Five independent components: a fan-out/fan-in aggregator, a
//! single-flight cache, cooperative cancellation, supervised detached
//! tasks and an error propagation chain. They do not call each other; a
//! driver composes them.

#![warn(missing_docs)]

mod panic;

pub mod aggregator;
pub mod cache;
pub mod cancel;
pub mod chain;
pub mod sink;
pub mod supervisor;
pub mod workload;

pub use aggregator::{AggregationResult, ConcurrentAggregator};
pub use cache::{EntryState, MemoizedAsyncCache};
pub use cancel::{CancellableOperation, CancellationSignal, CheckDiscipline, SignalState, StepReport};
pub use chain::{lookup_chain, PropagationChain};
pub use sink::{Failure, FailureSink, MemoryFailureSink, TracingFailureSink};
pub use supervisor::{SupervisedTask, Supervisor, SupervisorSummary, TaskReport};
pub use workload::{count_matching, read_blob, seed_records};
