//! Checkpoint window calculator.
//!
//! Turns a job's checkpoint, its dependencies' checkpoints and its batch
//! config into the next `[start, end)` window. Nothing is written here: the
//! returned pending checkpoint still carries its old height, and the caller
//! advances and saves it inside the unit of work that holds the window's
//! business writes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use strata_core::{Checkpoint, DependencyHeight, OperatingMode, Window, WindowPlan};
use strata_storage::IndexStore;
use tracing::{debug, info};

use crate::config::{BatchConfig, BootstrapConfig, CheckpointConfig, IndexerConfig, RateConfig};
use crate::error::DbError;
use crate::rate_controller::RateController;

/// Result of [`WindowCalculator::compute_window`].
#[derive(Debug, Clone, PartialEq)]
pub struct WindowOutcome {
    /// Range to process; empty means skip this tick.
    pub window: Window,
    /// The job's checkpoint at its current height.
    pub pending: Checkpoint,
    /// Pause the rate controller asks for after this window.
    pub delay: Duration,
    /// Operating mode the batch size was chosen for, if batch-limited.
    pub mode: Option<OperatingMode>,
    /// `true` if missing dependencies were replaced by the anchor table's max id.
    pub bootstrapped: bool,
}

/// Computes windows for checkpointed jobs.
pub struct WindowCalculator {
    store: Arc<dyn IndexStore>,
    rate: Arc<RateController>,
    checkpoints: CheckpointConfig,
    bootstrap: BootstrapConfig,
    rate_config: RateConfig,
    batches: BTreeMap<String, BatchConfig>,
}

impl WindowCalculator {
    /// Creates a calculator from the relevant configuration sections.
    #[must_use]
    pub fn new(
        store: Arc<dyn IndexStore>,
        rate: Arc<RateController>,
        config: &IndexerConfig,
    ) -> Self {
        Self {
            store,
            rate,
            checkpoints: config.checkpoint.clone(),
            bootstrap: config.bootstrap.clone(),
            rate_config: config.rate.clone(),
            batches: config.batches.clone(),
        }
    }

    /// Store the calculator reads from.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    /// Computes the next window of `job_name`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] for an unknown batch config, a planning
    /// error when the job has neither dependencies nor a batch config, and
    /// storage errors from reading checkpoints.
    pub async fn compute_window(
        &self,
        job_name: &str,
        depends_on: &[String],
        batch_config: Option<&str>,
    ) -> Result<WindowOutcome, DbError> {
        let policy = batch_config
            .map(|name| {
                self.batches
                    .get(name)
                    .map(|b| b.policy(&self.rate_config))
                    .ok_or_else(|| {
                        DbError::Config(format!(
                            "job '{job_name}' refers to unknown batch config '{name}'"
                        ))
                    })
            })
            .transpose()?;

        let mut names: Vec<String> = Vec::with_capacity(depends_on.len() + 2);
        names.push(job_name.to_string());
        names.extend(depends_on.iter().cloned());
        if let Some(anchor) = &self.bootstrap.anchor_job {
            names.push(anchor.clone());
        }
        let stored = self.store.load_checkpoints(&names).await?;

        let pending = stored.get(job_name).cloned().unwrap_or_else(|| {
            Checkpoint::pending(job_name, self.checkpoints.start_for(job_name))
        });

        let (batch_size, delay, mode) = match &policy {
            Some(policy) => {
                let health = self.rate.health().await;
                let plan = policy.plan(&health);
                (Some(plan.batch_size), plan.delay, Some(health.mode()))
            }
            None => (None, Duration::ZERO, None),
        };

        let mut plan = WindowPlan {
            start: pending.height,
            batch_size,
            dependencies: depends_on
                .iter()
                .map(|dep| DependencyHeight::from(stored.get(dep).map(|cp| cp.height)))
                .collect(),
            bootstrap_floor: None,
        };

        let mut bootstrapped = false;
        if plan.needs_bootstrap() {
            if let Some(anchor_max) = self.bootstrap_floor(&stored).await? {
                plan.bootstrap_floor = Some(anchor_max);
                bootstrapped = true;
                info!(
                    job = job_name,
                    floor = anchor_max,
                    "dependencies have no checkpoint yet, bootstrapping from anchor table"
                );
            }
        }

        let window = plan.resolve(job_name)?;
        if window.is_empty() {
            debug!(job = job_name, start = window.start, end = window.end, "nothing to process");
        }
        Ok(WindowOutcome {
            window,
            pending,
            delay,
            mode,
            bootstrapped,
        })
    }

    /// Anchor table's max id, if the anchor job is past the threshold.
    async fn bootstrap_floor(
        &self,
        stored: &std::collections::HashMap<String, Checkpoint>,
    ) -> Result<Option<i64>, DbError> {
        let (Some(anchor_job), Some(anchor_table)) =
            (&self.bootstrap.anchor_job, &self.bootstrap.anchor_table)
        else {
            return Ok(None);
        };
        let anchor_height = stored.get(anchor_job).map_or(0, |cp| cp.height);
        if anchor_height <= self.bootstrap.threshold {
            return Ok(None);
        }
        Ok(self.store.max_id(anchor_table).await?)
    }
}
