//! Driver configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tandem_storage::{read_json, TextSource};
use tracing::{debug, info};

/// Tunables for the demo scenarios, loaded from a JSON blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Records seeded into the store
    pub seed_records: usize,
    /// Simulated latency of every store call, in milliseconds
    pub store_latency_ms: u64,
    /// Departments records are spread across
    pub departments: Vec<String>,
    /// Concurrent callers per cache key
    pub cache_callers: usize,
    /// Units of work in the cancellable operation
    pub steps: usize,
    /// Duration of one unit, in milliseconds
    pub step_delay_ms: u64,
    /// Delay before cancellation is signalled, in milliseconds
    pub cancel_after_ms: u64,
    /// Detached tasks spawned under supervision
    pub detached_tasks: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            seed_records: 12,
            store_latency_ms: 20,
            departments: vec!["eng".to_string(), "ops".to_string(), "sales".to_string()],
            cache_callers: 4,
            steps: 10,
            step_delay_ms: 50,
            cancel_after_ms: 175,
            detached_tasks: 4,
        }
    }
}

impl DriverConfig {
    /// Load from `path`, falling back to defaults when the blob is missing.
    pub async fn load(source: &dyn TextSource, path: &Path) -> anyhow::Result<Self> {
        match read_json::<Self>(source, path).await? {
            Some(config) => {
                info!("Loaded config from {}", path.display());
                Ok(config)
            }
            None => {
                debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
        }
    }

    /// Store latency as a duration.
    pub fn store_latency(&self) -> Duration {
        Duration::from_millis(self.store_latency_ms)
    }

    /// Unit duration as a duration.
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    /// Cancellation delay as a duration.
    pub fn cancel_after(&self) -> Duration {
        Duration::from_millis(self.cancel_after_ms)
    }
}
