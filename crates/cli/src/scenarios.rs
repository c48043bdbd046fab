//! Demo scenarios, one per component.

use std::sync::Arc;
use std::time::Duration;

use tandem_core::{NewRecord, OpError, RecordFilter};
use tandem_execution::{
    count_matching, lookup_chain, seed_records, CancellableOperation, CancellationSignal,
    ConcurrentAggregator, Failure, FailureSink, MemoizedAsyncCache, MemoryFailureSink,
    PropagationChain, StepReport, Supervisor, SupervisorSummary, TracingFailureSink,
};
use tandem_storage::{MemoryRecordStore, RecordStore};
use tracing::info;

use crate::config::DriverConfig;

/// Build a store seeded with `config.seed_records` records spread across departments.
pub async fn seeded_store(config: &DriverConfig) -> anyhow::Result<Arc<MemoryRecordStore>> {
    let store = Arc::new(MemoryRecordStore::new().with_latency(config.store_latency()));
    let departments = if config.departments.is_empty() {
        vec!["general".to_string()]
    } else {
        config.departments.clone()
    };

    let records = (0..config.seed_records).map(|i| {
        let department = &departments[i % departments.len()];
        NewRecord::new(format!("Employee {}", i + 1), department.clone(), 50_000 + (i as u32) * 5_000)
    });
    seed_records(store.as_ref(), records).await?;

    info!("Seeded {} records", config.seed_records);
    Ok(store)
}

/// Count records per department concurrently.
pub async fn aggregate(config: &DriverConfig) -> anyhow::Result<Vec<(String, usize)>> {
    let store = seeded_store(config).await?;
    let filters: Vec<RecordFilter> = config
        .departments
        .iter()
        .map(|d| RecordFilter::department(d.as_str()))
        .collect();

    let counts = ConcurrentAggregator::new("department-counts")
        .run_all(filters.iter().map(|f| count_matching(store.as_ref(), f)))
        .await?;

    let rows: Vec<(String, usize)> = config.departments.iter().cloned().zip(counts).collect();
    println!("Department counts ({})", rows.len());
    for (department, count) in &rows {
        println!("  {}: {}", department, count);
    }
    Ok(rows)
}

/// Hit the cache from several callers per department and report computations.
pub async fn cache(config: &DriverConfig) -> anyhow::Result<usize> {
    let store = seeded_store(config).await?;
    let cache: MemoizedAsyncCache<String, usize> = MemoizedAsyncCache::new();

    let (cache_ref, store_ref) = (&cache, &store);
    let gets = config.departments.iter().flat_map(|department| {
        (0..config.cache_callers).map(move |_| {
            let store = store_ref.clone();
            let filter = RecordFilter::department(department.as_str());
            cache_ref.get(department.clone(), move || async move {
                count_matching(store.as_ref(), &filter).await
            })
        })
    });
    let headcounts = ConcurrentAggregator::new("cached-headcounts").run_all(gets).await?;

    println!(
        "Cache served {} lookups with {} computations",
        headcounts.len(),
        cache.computations()
    );
    for department in &config.departments {
        if let Some(count) = cache.peek(department) {
            println!("  {}: {}", department, count);
        }
    }
    Ok(cache.computations())
}

/// Run a stepwise operation and cancel it part-way through.
pub async fn cancel(config: &DriverConfig) -> anyhow::Result<StepReport> {
    let signal = CancellationSignal::new();
    let operation = CancellableOperation::new("batch", config.steps).with_step_delay(config.step_delay());

    let handle = tokio::spawn({
        let signal = signal.clone();
        async move { operation.run_simulated(&signal).await }
    });

    tokio::time::sleep(config.cancel_after()).await;
    signal.cancel();

    let report = handle.await?;
    println!(
        "Operation {} after starting {} of {} units ({} completed)",
        report.outcome, report.started, config.steps, report.completed
    );
    Ok(report)
}

/// Sink that logs every failure and keeps a copy for the summary printout.
#[derive(Default)]
struct ReportingSink {
    log: TracingFailureSink,
    kept: MemoryFailureSink,
}

impl FailureSink for ReportingSink {
    fn record(&self, failure: Failure) {
        self.log.record(failure.clone());
        self.kept.record(failure);
    }
}

/// Spawn detached tasks, half of which fail, then drain them.
pub async fn supervise(config: &DriverConfig) -> anyhow::Result<SupervisorSummary> {
    let sink = Arc::new(ReportingSink::default());
    let mut supervisor = Supervisor::new(sink.clone());

    for i in 0..config.detached_tasks {
        let delay = Duration::from_millis(10 * (i as u64 + 1));
        supervisor.spawn(format!("detached-{i}"), async move {
            tokio::time::sleep(delay).await;
            if i % 2 == 1 {
                Err(OpError::computation(format!("task {i} failed")))
            } else {
                Ok(())
            }
        });
    }
    println!("Spawned {} detached tasks; continuing with other work", supervisor.pending());

    let summary = supervisor.drain().await;
    println!(
        "Supervisor: {} succeeded, {} failed, {} cancelled, {} lost",
        summary.succeeded, summary.failed, summary.cancelled, summary.lost
    );
    for failure in sink.kept.failures() {
        println!("  {} ({}): {}", failure.label, failure.task_id, failure.error);
    }
    Ok(summary)
}

/// Raise failures at the bottom of nested chains and show what surfaces.
pub async fn chain(config: &DriverConfig) -> anyhow::Result<Vec<OpError>> {
    let mut observed = Vec::new();

    let inner = PropagationChain::default()
        .run(async {
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
            Err::<(), _>(OpError::computation("boom"))
        })
        .await;
    if let Err(e) = inner {
        println!("Chain surfaced: {} ({})", e, e.kind());
        observed.push(e);
    }

    let store = MemoryRecordStore::new().with_latency(config.store_latency());
    store.create(NewRecord::new("Ada", "eng", 120_000)).await?;
    store.fail_next("record store unavailable").await;

    if let Err(e) = lookup_chain(&store, &RecordFilter::department("eng")).await {
        println!("Lookup chain surfaced: {} ({})", e, e.kind());
        observed.push(e);
    }

    Ok(observed)
}
