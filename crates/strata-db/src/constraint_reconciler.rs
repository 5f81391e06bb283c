//! Constraint state machine driver.
//!
//! Every partition carries at most one managed CHECK constraint on its
//! height column. While rows are still arriving it is the open
//! `<partition>_<column>_inserting` form (`column >= min`, `NOT VALID`);
//! once the partition's last id has been written it is replaced by the
//! validated `<partition>_<column>_done` form (`column BETWEEN min AND max`)
//! in one unit of work. Constraints with other names are never touched.

use std::sync::Arc;

use async_trait::async_trait;
use strata_core::{
    plan_transition, CheckConstraint, ConstraintTransition, ExistingConstraint, InsertionStatus,
    PartitionDescriptor,
};
use strata_storage::{IndexStore, StorageError};
use tracing::{debug, info, warn};

use crate::config::PartitionJobConfig;
use crate::error::DbError;
use crate::fanout::for_each_bounded;
use crate::job::{JobHandler, TickOutcome};

/// Partitions reconciled concurrently within one table.
pub const DEFAULT_RECONCILE_CONCURRENCY: usize = 4;

/// Reconciles the managed constraints of one partitioned table.
pub struct ConstraintReconciler {
    store: Arc<dyn IndexStore>,
    height_column: String,
    concurrency: usize,
}

impl ConstraintReconciler {
    /// Creates a reconciler bounding `height_column`.
    #[must_use]
    pub fn new(store: Arc<dyn IndexStore>, height_column: impl Into<String>) -> Self {
        Self {
            store,
            height_column: height_column.into(),
            concurrency: DEFAULT_RECONCILE_CONCURRENCY,
        }
    }

    /// Sets how many partitions are reconciled at once.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Brings one partition's constraint in line with its insertion status.
    ///
    /// Returns the status the partition was found in. Integrity conflicts
    /// (a concurrent reconciler got there first, or a row violates the
    /// tight bounds) are logged and leave the partition unchanged.
    ///
    /// # Errors
    ///
    /// Returns transient and contract storage errors.
    pub async fn reconcile_constraint(
        &self,
        partition: &PartitionDescriptor,
    ) -> Result<InsertionStatus, DbError> {
        let last_id = self.store.max_id(&partition.name).await?;
        let status = InsertionStatus::classify(last_id, partition.to_id);
        let names = self.store.check_constraints(&partition.name).await?;
        let existing = ExistingConstraint::recognise(&partition.name, &self.height_column, &names);

        let applied = match plan_transition(status, &existing) {
            ConstraintTransition::Keep => {
                debug!(partition = %partition.name, %status, "constraint up to date");
                return Ok(status);
            }
            ConstraintTransition::OpenInserting => self.open_inserting(partition).await,
            ConstraintTransition::CloseDone { drop } => self.close_done(partition, &drop).await,
            ConstraintTransition::DropStale { drop } => self.drop_stale(partition, &drop).await,
        };

        match applied {
            Ok(Some(constraint)) => {
                info!(
                    partition = %partition.name,
                    constraint = %constraint.name,
                    check = %constraint.expression(),
                    "constraint transitioned"
                );
                Ok(status)
            }
            Ok(None) => Ok(status),
            Err(err) if err.is_integrity() => {
                warn!(partition = %partition.name, error = %err, "constraint change skipped");
                Ok(status)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn open_inserting(
        &self,
        partition: &PartitionDescriptor,
    ) -> Result<Option<CheckConstraint>, StorageError> {
        let Some(bounds) = self
            .store
            .height_bounds(&partition.name, &self.height_column)
            .await?
        else {
            return Ok(None);
        };
        let constraint =
            CheckConstraint::inserting(&partition.name, &self.height_column, bounds.min);
        let mut uow = self.store.begin().await?;
        uow.add_check_constraint(&partition.name, &constraint)
            .await?;
        uow.commit().await?;
        Ok(Some(constraint))
    }

    async fn close_done(
        &self,
        partition: &PartitionDescriptor,
        drop: &[String],
    ) -> Result<Option<CheckConstraint>, StorageError> {
        let mut uow = self.store.begin().await?;
        let Some(bounds) = uow
            .height_bounds(&partition.name, &self.height_column)
            .await?
        else {
            return Ok(None);
        };
        for name in drop {
            uow.drop_constraint(&partition.name, name).await?;
        }
        let constraint = CheckConstraint::done(&partition.name, &self.height_column, bounds);
        uow.add_check_constraint(&partition.name, &constraint)
            .await?;
        uow.validate_constraint(&partition.name, &constraint.name)
            .await?;
        uow.commit().await?;
        Ok(Some(constraint))
    }

    async fn drop_stale(
        &self,
        partition: &PartitionDescriptor,
        drop: &[String],
    ) -> Result<Option<CheckConstraint>, StorageError> {
        let mut uow = self.store.begin().await?;
        for name in drop {
            uow.drop_constraint(&partition.name, name).await?;
        }
        uow.commit().await?;
        info!(partition = %partition.name, dropped = ?drop, "stale constraint dropped");
        Ok(None)
    }

    /// Reconciles every partition attached to `parent`.
    ///
    /// A failing partition does not stop the others.
    ///
    /// # Errors
    ///
    /// Returns the first failure once every partition has been visited.
    pub async fn reconcile_table(
        &self,
        parent: &str,
    ) -> Result<Vec<(PartitionDescriptor, InsertionStatus)>, DbError> {
        let partitions = self.store.attached_partitions(parent).await?;
        for_each_bounded(partitions, self.concurrency, |partition| async move {
            match self.reconcile_constraint(&partition).await {
                Ok(status) => Ok((partition, status)),
                Err(err) => {
                    warn!(
                        table = parent,
                        partition = %partition.name,
                        error = %err,
                        "reconcile failed"
                    );
                    Err(err)
                }
            }
        })
        .await
    }
}

/// Periodic job reconciling the constraints of every configured table.
pub struct ConstraintJob {
    tables: Vec<(String, ConstraintReconciler)>,
}

impl ConstraintJob {
    /// Job name.
    pub const NAME: &'static str = "reconcile-constraints";

    /// Creates the job for all `[[partitions]]` entries.
    #[must_use]
    pub fn new(store: &Arc<dyn IndexStore>, tables: &[PartitionJobConfig]) -> Self {
        Self {
            tables: tables
                .iter()
                .map(|t| {
                    (
                        t.parent.clone(),
                        ConstraintReconciler::new(Arc::clone(store), t.height_column.clone()),
                    )
                })
                .collect(),
        }
    }
}

#[async_trait]
impl JobHandler for ConstraintJob {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self) -> Result<TickOutcome, DbError> {
        let mut first_err = None;
        for (parent, reconciler) in &self.tables {
            if let Err(err) = reconciler.reconcile_table(parent).await {
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(TickOutcome::Idle),
        }
    }
}
