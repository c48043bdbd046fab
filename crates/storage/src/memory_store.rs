//! In-memory record store.
//!
//! Keeps records in insertion order behind an async `RwLock`. An optional
//! latency is applied before every call so concurrent callers genuinely
//! interleave; the lock itself is never held across that delay.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tandem_core::{NewRecord, Record, RecordFilter, RecordId};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::{RecordStore, Result, StorageError};

/// Record store backed by a `Vec`.
pub struct MemoryRecordStore {
    records: RwLock<Vec<Record>>,
    latency: Option<Duration>,
    injected_failures: Mutex<VecDeque<String>>,
}

impl MemoryRecordStore {
    /// Create an empty store with no latency.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            latency: None,
            injected_failures: Mutex::new(VecDeque::new()),
        }
    }

    /// Apply `latency` before every store call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the next store call fail with `message`.
    ///
    /// Calls queue up: each injected failure is consumed by exactly one call.
    pub async fn fail_next(&self, message: impl Into<String>) {
        self.injected_failures.lock().await.push_back(message.into());
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    async fn enter(&self, op: &str) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(message) = self.injected_failures.lock().await.pop_front() {
            debug!("Injected failure for {}: {}", op, message);
            return Err(StorageError::Other(message));
        }

        Ok(())
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create(&self, record: NewRecord) -> Result<RecordId> {
        self.enter("create").await?;

        let record = record.into_record();
        let id = record.id;
        self.records.write().await.push(record);

        debug!("Created record {}", id);
        Ok(id)
    }

    async fn query(&self, filter: &RecordFilter) -> Result<Vec<Record>> {
        self.enter("query").await?;

        let records = self.records.read().await;
        Ok(records.iter().filter(|r| filter.matches(r)).cloned().collect())
    }

    async fn first(&self, filter: &RecordFilter) -> Result<Option<Record>> {
        self.enter("first").await?;

        let records = self.records.read().await;
        Ok(records.iter().find(|r| filter.matches(r)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_query() {
        let store = MemoryRecordStore::new();

        store.create(NewRecord::new("Ada", "eng", 120)).await.unwrap();
        store.create(NewRecord::new("Grace", "eng", 90)).await.unwrap();
        store.create(NewRecord::new("Linus", "ops", 80)).await.unwrap();

        let eng = store.query(&RecordFilter::department("eng")).await.unwrap();
        assert_eq!(eng.len(), 2);
        assert_eq!(eng[0].name, "Ada");
        assert_eq!(eng[1].name, "Grace");
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn test_first_returns_earliest_match() {
        let store = MemoryRecordStore::new();
        let id = store.create(NewRecord::new("Ada", "eng", 120)).await.unwrap();
        store.create(NewRecord::new("Alan", "eng", 130)).await.unwrap();

        let found = store.first(&RecordFilter::department("eng")).await.unwrap().unwrap();
        assert_eq!(found.id, id);

        let missing = store.first(&RecordFilter::department("legal")).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed_once() {
        let store = MemoryRecordStore::new();
        store.fail_next("store offline").await;

        let err = store.query(&RecordFilter::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "store offline");

        assert!(store.query(&RecordFilter::default()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_applies_per_call() {
        let store = MemoryRecordStore::new().with_latency(Duration::from_millis(50));
        let start = tokio::time::Instant::now();

        store.create(NewRecord::new("Ada", "eng", 1)).await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(!store.is_empty().await);
    }
}
