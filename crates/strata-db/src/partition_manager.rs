//! Partition lifecycle manager.
//!
//! Keeps a range-partitioned table one partition ahead of its data. A
//! partition is created from a template table and attached in a single
//! unit of work; nothing here ever detaches or drops a partition. Losing a
//! creation race to another process shows up as an integrity error and is
//! treated as success.

use std::sync::Arc;

use async_trait::async_trait;
use strata_core::{PartitionDescriptor, PartitionLayout};
use strata_storage::{IndexStore, StorageError};
use tracing::{debug, info, warn};

use crate::config::PartitionJobConfig;
use crate::error::DbError;
use crate::job::{JobHandler, TickOutcome};

/// Creates partitions of one parent table.
pub struct PartitionManager {
    store: Arc<dyn IndexStore>,
    parent: String,
    template: String,
    layout: PartitionLayout,
}

impl PartitionManager {
    /// Creates a manager for `parent`, cloning new partitions from `template`.
    #[must_use]
    pub fn new(
        store: Arc<dyn IndexStore>,
        parent: impl Into<String>,
        template: impl Into<String>,
        layout: PartitionLayout,
    ) -> Self {
        Self {
            store,
            parent: parent.into(),
            template: template.into(),
            layout,
        }
    }

    /// Parent table name.
    #[must_use]
    pub fn parent(&self) -> &str {
        &self.parent
    }

    /// Partition layout.
    #[must_use]
    pub fn layout(&self) -> PartitionLayout {
        self.layout
    }

    /// Creates the partition after the open one once the open one is half full.
    ///
    /// Returns `true` if a partition was created. An empty parent, a parent
    /// that is not (yet) partitioned, or a partition that already exists
    /// are all no-ops.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnknownTable`] if the parent does not exist,
    /// and storage errors other than integrity conflicts.
    pub async fn maybe_create_next_partition(&self) -> Result<bool, DbError> {
        if !self.check_parent().await? {
            return Ok(false);
        }
        let Some(max_id) = self.store.max_id(&self.parent).await? else {
            return Ok(false);
        };
        let Some(next) = self.layout.next_partition_due(&self.parent, max_id) else {
            return Ok(false);
        };
        let existing = self.store.attached_partitions(&self.parent).await?;
        if is_attached(&existing, &next) {
            return Ok(false);
        }
        self.create(&next).await
    }

    /// Creates every missing partition intersecting the inclusive span
    /// `[start, end]` and returns the ones created.
    ///
    /// # Errors
    ///
    /// Returns storage errors other than integrity conflicts.
    pub async fn ensure_partitions_covering(
        &self,
        start: i64,
        end: i64,
    ) -> Result<Vec<PartitionDescriptor>, DbError> {
        let wanted = self.layout.covering(&self.parent, start, end);
        if wanted.is_empty() {
            return Ok(Vec::new());
        }
        let existing = self.store.attached_partitions(&self.parent).await?;
        let mut created = Vec::new();
        for partition in wanted {
            if is_attached(&existing, &partition) {
                continue;
            }
            if self.create(&partition).await? {
                created.push(partition);
            }
        }
        Ok(created)
    }

    /// Creates the partition holding `first_id` when the parent has none.
    ///
    /// # Errors
    ///
    /// Same as [`Self::maybe_create_next_partition`].
    pub async fn ensure_initial_partition(&self, first_id: i64) -> Result<bool, DbError> {
        if !self.check_parent().await? {
            return Ok(false);
        }
        if !self.store.attached_partitions(&self.parent).await?.is_empty() {
            return Ok(false);
        }
        let first = self.layout.partition_for(&self.parent, first_id);
        self.create(&first).await
    }

    /// `Ok(true)` if the parent is partitioned, `Ok(false)` if it is a plain table.
    async fn check_parent(&self) -> Result<bool, DbError> {
        if self.store.is_partitioned(&self.parent).await? {
            return Ok(true);
        }
        if !self.store.table_exists(&self.parent).await? {
            return Err(StorageError::UnknownTable(self.parent.clone()).into());
        }
        debug!(table = %self.parent, "table is not partitioned, skipping");
        Ok(false)
    }

    async fn create(&self, partition: &PartitionDescriptor) -> Result<bool, DbError> {
        let attempt = async {
            let mut uow = self.store.begin().await?;
            uow.create_partition(&self.parent, &self.template, partition)
                .await?;
            uow.commit().await
        };
        match attempt.await {
            Ok(()) => {
                info!(
                    table = %self.parent,
                    partition = %partition.name,
                    from = partition.from_id,
                    to = partition.to_id,
                    "partition created"
                );
                Ok(true)
            }
            Err(err) if err.is_integrity() => {
                warn!(
                    table = %self.parent,
                    partition = %partition.name,
                    error = %err,
                    "partition already present"
                );
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn is_attached(existing: &[PartitionDescriptor], wanted: &PartitionDescriptor) -> bool {
    existing.iter().any(|p| {
        p.name == wanted.name || (p.from_id == wanted.from_id && p.to_id == wanted.to_id)
    })
}

/// Periodic job keeping one table's partitions ahead of its data.
pub struct PartitionJob {
    name: String,
    manager: PartitionManager,
    initial_id: i64,
}

impl PartitionJob {
    /// Creates the job for one `[[partitions]]` entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured step is not positive.
    pub fn from_config(
        store: Arc<dyn IndexStore>,
        config: &PartitionJobConfig,
    ) -> Result<Self, DbError> {
        Ok(Self {
            name: format!("partition-{}", config.parent),
            manager: PartitionManager::new(
                store,
                config.parent.clone(),
                config.template.clone(),
                config.layout()?,
            ),
            initial_id: config.initial_id,
        })
    }

    /// The underlying manager.
    #[must_use]
    pub fn manager(&self) -> &PartitionManager {
        &self.manager
    }
}

#[async_trait]
impl JobHandler for PartitionJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<TickOutcome, DbError> {
        self.manager.ensure_initial_partition(self.initial_id).await?;
        self.manager.maybe_create_next_partition().await?;
        Ok(TickOutcome::Idle)
    }
}
