//! Per-job tick metrics with atomic counters.
//!
//! [`JobMetrics`] is updated by the scheduler after every tick and read by
//! the checkpoint summary job. All updates are lock-free; only the name to
//! metrics map in [`MetricsRegistry`] takes a lock, and only on first use.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;
use serde::Serialize;
use strata_storage::ErrorClass;

use crate::job::TickOutcome;

/// Milliseconds since the Unix epoch.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Counters for one job.
pub struct JobMetrics {
    /// Ticks run, whatever their outcome.
    pub ticks: AtomicU64,
    /// Ticks that committed progress.
    pub advanced: AtomicU64,
    /// Ticks with nothing to do.
    pub idle: AtomicU64,
    /// Ticks failed with a transient error.
    pub transient_failures: AtomicU64,
    /// Ticks failed with an integrity error.
    pub integrity_failures: AtomicU64,
    /// Ticks failed with a contract error.
    pub contract_failures: AtomicU64,
    /// Height of the last advance. `i64::MIN` = never advanced.
    last_height: AtomicI64,
    /// Last successful tick (epoch millis). 0 = never.
    last_success_ms: AtomicU64,
    registered_at_ms: u64,
}

impl JobMetrics {
    /// Creates zeroed metrics registered at `now_ms`.
    #[must_use]
    pub fn new(now_ms: u64) -> Self {
        Self {
            ticks: AtomicU64::new(0),
            advanced: AtomicU64::new(0),
            idle: AtomicU64::new(0),
            transient_failures: AtomicU64::new(0),
            integrity_failures: AtomicU64::new(0),
            contract_failures: AtomicU64::new(0),
            last_height: AtomicI64::new(i64::MIN),
            last_success_ms: AtomicU64::new(0),
            registered_at_ms: now_ms,
        }
    }

    /// Records a successful tick.
    pub fn record_outcome(&self, outcome: &TickOutcome, now_ms: u64) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.last_success_ms.store(now_ms, Ordering::Relaxed);
        match outcome {
            TickOutcome::Advanced { to, .. } => {
                self.advanced.fetch_add(1, Ordering::Relaxed);
                self.last_height.store(*to, Ordering::Relaxed);
            }
            TickOutcome::Idle | TickOutcome::Completed => {
                self.idle.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Records a failed tick.
    pub fn record_failure(&self, class: ErrorClass) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        let counter = match class {
            ErrorClass::Transient => &self.transient_failures,
            ErrorClass::Integrity => &self.integrity_failures,
            ErrorClass::Contract => &self.contract_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Time since the last success, or since registration if none yet.
    #[must_use]
    pub fn since_last_success(&self, now_ms: u64) -> Duration {
        let last = match self.last_success_ms.load(Ordering::Relaxed) {
            0 => self.registered_at_ms,
            ms => ms,
        };
        Duration::from_millis(now_ms.saturating_sub(last))
    }

    /// Point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> JobMetricsSnapshot {
        let last_height = self.last_height.load(Ordering::Relaxed);
        let last_success_ms = self.last_success_ms.load(Ordering::Relaxed);
        JobMetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            advanced: self.advanced.load(Ordering::Relaxed),
            idle: self.idle.load(Ordering::Relaxed),
            transient_failures: self.transient_failures.load(Ordering::Relaxed),
            integrity_failures: self.integrity_failures.load(Ordering::Relaxed),
            contract_failures: self.contract_failures.load(Ordering::Relaxed),
            last_height: (last_height != i64::MIN).then_some(last_height),
            last_success_ms: (last_success_ms != 0).then_some(last_success_ms),
        }
    }
}

/// Serializable copy of [`JobMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobMetricsSnapshot {
    /// Ticks run.
    pub ticks: u64,
    /// Ticks that committed progress.
    pub advanced: u64,
    /// Ticks with nothing to do.
    pub idle: u64,
    /// Transient failures.
    pub transient_failures: u64,
    /// Integrity failures.
    pub integrity_failures: u64,
    /// Contract failures.
    pub contract_failures: u64,
    /// Height of the last advance.
    pub last_height: Option<i64>,
    /// Last successful tick (epoch millis).
    pub last_success_ms: Option<u64>,
}

impl JobMetricsSnapshot {
    /// Failures of any class.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.transient_failures + self.integrity_failures + self.contract_failures
    }
}

/// Metrics for every job the scheduler has seen.
#[derive(Default)]
pub struct MetricsRegistry {
    jobs: RwLock<BTreeMap<String, Arc<JobMetrics>>>,
}

impl MetricsRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Metrics for `name`, created on first use.
    pub fn job(&self, name: &str) -> Arc<JobMetrics> {
        if let Some(metrics) = self.jobs.read().get(name) {
            return Arc::clone(metrics);
        }
        let mut jobs = self.jobs.write();
        Arc::clone(
            jobs.entry(name.to_string())
                .or_insert_with(|| Arc::new(JobMetrics::new(now_ms()))),
        )
    }

    /// Snapshot of every job, keyed by name.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, JobMetricsSnapshot> {
        self.jobs
            .read()
            .iter()
            .map(|(name, m)| (name.clone(), m.snapshot()))
            .collect()
    }

    /// Jobs without a successful tick for longer than `threshold`.
    #[must_use]
    pub fn stalled_jobs(&self, threshold: Duration, now_ms: u64) -> Vec<String> {
        self.jobs
            .read()
            .iter()
            .filter(|(_, m)| m.since_last_success(now_ms) > threshold)
            .map(|(name, _)| name.clone())
            .collect()
    }
}
