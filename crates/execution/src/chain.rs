//! Failure propagation through nested asynchronous frames.
//!
//! Errors cross every frame with `?` and are never wrapped, so the outer
//! caller sees exactly what the innermost operation raised.

use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;
use tandem_core::{OpError, Record, RecordFilter, Result};
use tandem_storage::RecordStore;
use tracing::{debug, trace};

/// Runs an operation beneath a fixed number of suspending frames.
#[derive(Debug, Clone, Copy)]
pub struct PropagationChain {
    levels: usize,
}

impl PropagationChain {
    /// A chain of `levels` frames above the inner operation.
    pub fn new(levels: usize) -> Self {
        Self { levels }
    }

    /// Number of frames above the inner operation.
    pub fn levels(&self) -> usize {
        self.levels
    }

    /// Run `inner` at the bottom of the chain and return its result unchanged.
    pub async fn run<'a, T, F>(&self, inner: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'a,
        T: Send + 'a,
    {
        let result = descend(self.levels, inner).await;
        if let Err(e) = &result {
            debug!(levels = self.levels, kind = e.kind(), "Chain surfaced failure: {}", e);
        }
        result
    }
}

impl Default for PropagationChain {
    fn default() -> Self {
        Self::new(2)
    }
}

fn descend<'a, T, F>(level: usize, inner: F) -> BoxFuture<'a, Result<T>>
where
    F: Future<Output = Result<T>> + Send + 'a,
    T: Send + 'a,
{
    async move {
        if level == 0 {
            return inner.await;
        }

        tokio::task::yield_now().await;
        let value = descend(level - 1, inner).await?;
        trace!(level, "Frame returned");
        Ok(value)
    }
    .boxed()
}

/// Find the first record matching `filter` through a three-frame chain.
///
/// A store failure reaches the caller as the
/// [`OpError::ComputationFailure`] carrying the store's own message; no
/// match is also reported as a computation failure.
pub async fn lookup_chain(store: &dyn RecordStore, filter: &RecordFilter) -> Result<Record> {
    let record = locate(store, filter).await?;
    debug!(record = %record.id, "Lookup chain resolved");
    Ok(record)
}

async fn locate(store: &dyn RecordStore, filter: &RecordFilter) -> Result<Record> {
    tokio::task::yield_now().await;
    fetch_first(store, filter)
        .await?
        .ok_or_else(|| OpError::computation(format!("no record matches {:?}", filter)))
}

async fn fetch_first(store: &dyn RecordStore, filter: &RecordFilter) -> Result<Option<Record>> {
    tokio::task::yield_now().await;
    Ok(store.first(filter).await?)
}
