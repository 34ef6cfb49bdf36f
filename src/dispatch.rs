use crate::droid::Remediator;
use crate::types::WorkUnit;
use crate::worker::{self, DispatchRecord, DispatchStatus, RetryPolicy};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Aggregate outcome of dispatching all work units
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    /// One record per dispatched unit, in completion order
    pub records: Vec<DispatchRecord>,
    /// Units never dispatched because of a shutdown request
    pub cancelled: Vec<WorkUnit>,
}

impl DispatchReport {
    pub fn succeeded(&self) -> usize {
        self.count(DispatchStatus::Remediated)
    }

    pub fn failed(&self) -> usize {
        self.count(DispatchStatus::Failed)
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.cancelled.is_empty()
    }

    pub fn failures(&self) -> impl Iterator<Item = &DispatchRecord> {
        self.records
            .iter()
            .filter(|r| r.status == DispatchStatus::Failed)
    }

    /// Violations covered by units the droids remediated
    pub fn violations_remediated(&self) -> usize {
        self.count_violations(DispatchStatus::Remediated)
    }

    pub fn violations_failed(&self) -> usize {
        self.count_violations(DispatchStatus::Failed)
    }

    pub fn violations_cancelled(&self) -> usize {
        self.cancelled.iter().map(|u| u.violations.len()).sum()
    }

    fn count(&self, status: DispatchStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }

    fn count_violations(&self, status: DispatchStatus) -> usize {
        self.records
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.unit.violations.len())
            .sum()
    }
}

/// Dispatch every unit to `remediator`, at most `concurrency` at a time.
///
/// The pool is filled up to the limit, then refilled as units complete. Two
/// units for the same file are never in flight together; a unit whose file is
/// busy waits while later units for other files go ahead. Once `shutdown` is
/// cancelled no new units are started, but units already in flight are
/// awaited; the rest are reported as cancelled.
pub async fn dispatch_all(
    units: Vec<WorkUnit>,
    remediator: &dyn Remediator,
    concurrency: usize,
    policy: &RetryPolicy,
    shutdown: &CancellationToken,
) -> DispatchReport {
    let concurrency = concurrency.max(1);
    let total = units.len();
    info!(
        "Dispatching {} droid(s) (concurrency={})",
        total, concurrency
    );

    let mut stream = FuturesUnordered::new();
    let mut records = Vec::with_capacity(total);
    let mut pending: VecDeque<WorkUnit> = units.into();
    let mut busy_files: HashSet<String> = HashSet::new();

    // Fill initial pool up to concurrency
    while stream.len() < concurrency && !shutdown.is_cancelled() {
        let Some(unit) = next_ready(&mut pending, &busy_files) else {
            break;
        };
        busy_files.insert(unit.file.clone());
        stream.push(worker::worker(unit, remediator, policy, shutdown));
    }

    // As units complete, start new ones to keep the pool full
    let mut shutdown_logged = false;
    while let Some(record) = stream.next().await {
        match &record.status {
            DispatchStatus::Remediated => info!(
                "[Unit {}] Done ({:.2}s): {}",
                record.unit.id,
                record.elapsed_secs,
                record.unit.description()
            ),
            DispatchStatus::Failed => error!(
                "[Unit {}] Failed after {} attempt(s): {}",
                record.unit.id,
                record.attempts,
                record.error.as_deref().unwrap_or("unknown error")
            ),
        }
        busy_files.remove(&record.unit.file);
        records.push(record);

        if shutdown.is_cancelled() {
            if !shutdown_logged {
                warn!(
                    "Shutdown requested, waiting for {} in-flight droid(s)",
                    stream.len()
                );
                shutdown_logged = true;
            }
            continue;
        }
        while stream.len() < concurrency {
            let Some(unit) = next_ready(&mut pending, &busy_files) else {
                break;
            };
            busy_files.insert(unit.file.clone());
            stream.push(worker::worker(unit, remediator, policy, shutdown));
        }
    }

    let cancelled: Vec<WorkUnit> = pending.into();
    debug!(
        "Pool drained: {} dispatched, {} cancelled",
        records.len(),
        cancelled.len()
    );

    DispatchReport { records, cancelled }
}

/// First pending unit whose file has no droid in flight
fn next_ready(
    pending: &mut VecDeque<WorkUnit>,
    busy_files: &HashSet<String>,
) -> Option<WorkUnit> {
    let position = pending
        .iter()
        .position(|unit| !busy_files.contains(&unit.file))?;
    pending.remove(position)
}
