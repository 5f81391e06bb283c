//! Live migration of a monolithic table into a partitioned one.
//!
//! While the legacy table keeps receiving writes, rows are copied in id
//! order into the partitioned table, each fetched batch in its own unit of
//! work together with the copy checkpoint. Once the copy has caught up, a
//! single transaction locks both tables, re-checks the catch-up under the
//! lock, and swaps the names so readers and writers see the partitioned
//! table under the legacy name. A failed step rolls back only itself; the
//! next tick resumes from the committed checkpoint.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use strata_core::{Checkpoint, PartitionLayout};
use strata_storage::IndexStore;
use tracing::{debug, info};

use crate::config::MigrationConfig;
use crate::error::DbError;
use crate::job::{JobHandler, TickOutcome};
use crate::partition_manager::PartitionManager;

/// What one migration tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Copy batches committed.
    pub batches: u64,
    /// Rows inserted into the partitioned table.
    pub rows_copied: u64,
    /// Partitions created ahead of the copy.
    pub partitions_created: usize,
    /// Copy checkpoint at the end of the tick.
    pub checkpoint: i64,
    /// The name swap was committed during this tick.
    pub cut_over: bool,
    /// The swap had already happened before this tick.
    pub already_completed: bool,
}

impl MigrationReport {
    /// Returns `true` once the partitioned table is live.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.cut_over || self.already_completed
    }
}

/// Copies the legacy table into its partitioned replacement and cuts over.
pub struct MigrationOrchestrator {
    store: Arc<dyn IndexStore>,
    config: MigrationConfig,
    partitions: PartitionManager,
}

impl MigrationOrchestrator {
    /// Creates an orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured step is not positive.
    pub fn new(store: Arc<dyn IndexStore>, config: MigrationConfig) -> Result<Self, DbError> {
        let partitions = PartitionManager::new(
            Arc::clone(&store),
            config.partitioned_table.clone(),
            config.template_table.clone(),
            PartitionLayout::new(config.step)?,
        );
        Ok(Self {
            store,
            config,
            partitions,
        })
    }

    /// Returns `true` if a previous run already swapped the tables.
    ///
    /// # Errors
    ///
    /// Returns storage errors from the catalog lookups.
    pub async fn is_completed(&self) -> Result<bool, DbError> {
        Ok(!self.store.table_exists(&self.config.partitioned_table).await?
            && self.store.is_partitioned(&self.config.legacy_table).await?)
    }

    /// Runs one migration tick: pre-create partitions, copy until the
    /// legacy table is drained, then cut over if caught up.
    ///
    /// # Errors
    ///
    /// Returns the first failing step; everything committed before it stays.
    pub async fn migrate(&self) -> Result<MigrationReport, DbError> {
        let cfg = &self.config;
        if self.is_completed().await? {
            debug!(job = %cfg.job_name, "cutover already done");
            return Ok(MigrationReport {
                already_completed: true,
                ..MigrationReport::default()
            });
        }

        let mut checkpoint = self
            .store
            .load_checkpoint(&cfg.job_name)
            .await?
            .unwrap_or_else(|| Checkpoint::pending(&cfg.job_name, cfg.start_id));
        let mut report = MigrationReport {
            checkpoint: checkpoint.height,
            ..MigrationReport::default()
        };

        let legacy_max = self.store.max_id(&cfg.legacy_table).await?;
        if let Some(max) = legacy_max {
            report.partitions_created += self
                .partitions
                .ensure_partitions_covering(checkpoint.height + 1, max)
                .await?
                .len();
        }

        loop {
            let ids = self
                .store
                .ids_after(&cfg.legacy_table, checkpoint.height, cfg.limit_record_get)
                .await?;
            let (Some(&first), Some(&last)) = (ids.first(), ids.last()) else {
                break;
            };
            // Rows written since `legacy_max` was read may need new partitions.
            report.partitions_created += self
                .partitions
                .ensure_partitions_covering(first, last)
                .await?
                .len();

            let mut uow = self.store.begin().await?;
            let mut copied = 0;
            for chunk in ids.chunks(cfg.chunk_size_insert.max(1)) {
                copied += uow
                    .copy_rows(&cfg.legacy_table, &cfg.partitioned_table, chunk)
                    .await?;
            }
            checkpoint.advance_to(last)?;
            uow.save_checkpoint(&checkpoint).await?;
            uow.commit().await?;

            report.batches += 1;
            report.rows_copied += copied;
            report.checkpoint = last;
            debug!(job = %cfg.job_name, start = first, end = last, rows = copied, "batch copied");
        }

        if legacy_max.map_or(true, |max| checkpoint.height >= max) {
            let head = legacy_max.map_or(checkpoint.height, |max| max.max(checkpoint.height));
            report.partitions_created += self.ensure_headroom(head).await?;
            report.cut_over = self.cutover().await?;
        }
        Ok(report)
    }

    /// Makes sure the id after `head` has a partition, and the one after
    /// that too once the open partition is half full.
    async fn ensure_headroom(&self, head: i64) -> Result<usize, DbError> {
        let mut created = self
            .partitions
            .ensure_partitions_covering(head + 1, head + 1)
            .await?
            .len();
        if self.partitions.maybe_create_next_partition().await? {
            created += 1;
        }
        Ok(created)
    }

    /// Swaps the tables if the copy is still caught up under lock.
    ///
    /// Returns `false` and changes nothing when new rows arrived first.
    async fn cutover(&self) -> Result<bool, DbError> {
        let cfg = &self.config;
        let mut uow = self.store.begin().await?;
        uow.lock_exclusive(&[cfg.legacy_table.as_str(), cfg.partitioned_table.as_str()])
            .await?;

        let legacy_max = uow.max_id(&cfg.legacy_table).await?;
        let copied_to = uow
            .load_checkpoint(&cfg.job_name)
            .await?
            .map(|cp| cp.height);
        let caught_up = match (legacy_max, copied_to) {
            (None, _) => true,
            (Some(max), Some(height)) => height >= max,
            (Some(_), None) => false,
        };
        if !caught_up {
            uow.rollback().await?;
            debug!(
                job = %cfg.job_name,
                legacy_max = ?legacy_max,
                checkpoint = ?copied_to,
                "legacy table moved ahead, cutover deferred"
            );
            return Ok(false);
        }

        let dropped = uow.drop_referencing_foreign_keys(&cfg.legacy_table).await?;
        uow.rename_table(&cfg.legacy_table, &cfg.backup_table).await?;
        uow.rename_table(&cfg.partitioned_table, &cfg.legacy_table)
            .await?;
        let sequence = uow
            .continue_sequence(&cfg.backup_table, &cfg.legacy_table)
            .await?;
        uow.commit().await?;

        info!(
            job = %cfg.job_name,
            table = %cfg.legacy_table,
            backup = %cfg.backup_table,
            foreign_keys_dropped = ?dropped,
            sequence = ?sequence,
            "cutover committed"
        );
        Ok(true)
    }
}

#[async_trait]
impl JobHandler for MigrationOrchestrator {
    fn name(&self) -> &str {
        &self.config.job_name
    }

    async fn run(&self) -> Result<TickOutcome, DbError> {
        let report = self.migrate().await?;
        Ok(if report.is_finished() {
            TickOutcome::Completed
        } else if report.batches > 0 {
            TickOutcome::Advanced {
                to: report.checkpoint,
                pause: std::time::Duration::ZERO,
            }
        } else {
            TickOutcome::Idle
        })
    }
}
