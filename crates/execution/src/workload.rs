//! Example payload operations over the collaborators.

use std::path::Path;

use tandem_core::{NewRecord, RecordFilter, RecordId, Result};
use tandem_storage::{RecordStore, TextSource};
use tracing::debug;

/// Count the records matching `filter`.
pub async fn count_matching(store: &dyn RecordStore, filter: &RecordFilter) -> Result<usize> {
    let records = store.query(filter).await?;
    debug!(filter = ?filter, count = records.len(), "Counted records");
    Ok(records.len())
}

/// Create `records` one after another, returning their IDs in order.
pub async fn seed_records<I>(store: &dyn RecordStore, records: I) -> Result<Vec<RecordId>>
where
    I: IntoIterator<Item = NewRecord>,
{
    let mut ids = Vec::new();
    for record in records {
        ids.push(store.create(record).await?);
    }
    debug!(count = ids.len(), "Seeded records");
    Ok(ids)
}

/// Read a whole blob through `source`.
///
/// The source has released its handle by the time this returns.
pub async fn read_blob(source: &dyn TextSource, path: &Path) -> Result<String> {
    Ok(source.read_all(path).await?)
}
