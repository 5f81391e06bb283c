//! Periodic checkpoint summary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use strata_storage::IndexStore;
use tracing::{info, warn};

use crate::error::DbError;
use crate::job::{JobHandler, TickOutcome};
use crate::metrics::{now_ms, MetricsRegistry};

/// Logs every checkpoint height and warns about stalled jobs.
pub struct CheckpointSummaryJob {
    store: Arc<dyn IndexStore>,
    metrics: Arc<MetricsRegistry>,
    stall_threshold: Duration,
}

impl CheckpointSummaryJob {
    /// Job name.
    pub const NAME: &'static str = "checkpoint-summary";

    /// Creates the job.
    #[must_use]
    pub fn new(
        store: Arc<dyn IndexStore>,
        metrics: Arc<MetricsRegistry>,
        stall_threshold: Duration,
    ) -> Self {
        Self {
            store,
            metrics,
            stall_threshold,
        }
    }

    /// Names of jobs without a successful tick within the threshold.
    #[must_use]
    pub fn stalled(&self) -> Vec<String> {
        self.stalled_at(now_ms())
    }

    /// Same as [`Self::stalled`], measured at `now_ms` (Unix milliseconds).
    #[must_use]
    pub fn stalled_at(&self, now_ms: u64) -> Vec<String> {
        self.metrics
            .stalled_jobs(self.stall_threshold, now_ms)
            .into_iter()
            .filter(|name| name != Self::NAME)
            .collect()
    }
}

#[async_trait]
impl JobHandler for CheckpointSummaryJob {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self) -> Result<TickOutcome, DbError> {
        for checkpoint in self.store.list_checkpoints().await? {
            info!(
                job = %checkpoint.job_name,
                height = checkpoint.height,
                updated_at = ?checkpoint.updated_at,
                "checkpoint"
            );
        }
        for job in self.stalled() {
            let snapshot = self.metrics.job(&job).snapshot();
            warn!(
                job = %job,
                failures = snapshot.failures(),
                last_height = ?snapshot.last_height,
                "job has not succeeded within the stall threshold"
            );
        }
        Ok(TickOutcome::Idle)
    }
}

#[cfg(test)]
mod tests {
    use strata_storage::{ErrorClass, MemoryStore};

    use super::*;

    #[tokio::test]
    async fn test_summary_reports_stalled_jobs() {
        let store = Arc::new(MemoryStore::new());
        store.set_checkpoint("index", 12).await;
        let metrics = Arc::new(MetricsRegistry::new());
        metrics.job("index").record_failure(ErrorClass::Transient);
        metrics.job(CheckpointSummaryJob::NAME);

        let job = CheckpointSummaryJob::new(store, metrics, Duration::ZERO);
        assert_eq!(job.stalled_at(now_ms() + 5), vec!["index"]);
        assert_eq!(job.run().await.unwrap(), TickOutcome::Idle);
    }
}
