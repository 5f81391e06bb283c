//! Backend-neutral storage seams.
//!
//! [`IndexStore`] answers read-only questions about checkpoints and the
//! partition catalog and opens [`UnitOfWork`]s. Every write, including
//! checkpoint advances, goes through a unit of work so a job's business
//! writes and its checkpoint commit or roll back together.
//!
//! A unit of work dropped without [`commit`](UnitOfWork::commit) is rolled
//! back.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_core::{CheckConstraint, Checkpoint, HeightBounds, PartitionDescriptor};

use crate::error::StorageError;

/// Connection usage of the database server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreActivity {
    /// Sessions currently running a statement.
    pub active_connections: i64,
    /// Server-wide connection limit.
    pub max_connections: i64,
}

impl StoreActivity {
    /// Active sessions as a fraction of the connection limit, in `[0, 1]`.
    #[must_use]
    pub fn load(&self) -> f64 {
        if self.max_connections <= 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = self.active_connections as f64 / self.max_connections as f64;
        ratio.clamp(0.0, 1.0)
    }
}

/// Read side of the indexer database.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Opens a new unit of work.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StorageError>;

    /// Creates the checkpoint table if it does not exist.
    async fn ensure_schema(&self) -> Result<(), StorageError>;

    /// Loads one checkpoint row.
    async fn load_checkpoint(&self, job_name: &str) -> Result<Option<Checkpoint>, StorageError>;

    /// Loads the checkpoint rows of several jobs; absent jobs are omitted.
    async fn load_checkpoints(
        &self,
        job_names: &[String],
    ) -> Result<HashMap<String, Checkpoint>, StorageError>;

    /// All checkpoint rows, ordered by job name.
    async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, StorageError>;

    /// Returns `true` if the table (or view) exists.
    async fn table_exists(&self, table: &str) -> Result<bool, StorageError>;

    /// Returns `true` if the table is a partitioned parent.
    async fn is_partitioned(&self, table: &str) -> Result<bool, StorageError>;

    /// Highest id of the table, `None` if it is empty.
    async fn max_id(&self, table: &str) -> Result<Option<i64>, StorageError>;

    /// Up to `limit` ids greater than `after`, ascending.
    async fn ids_after(
        &self,
        table: &str,
        after: i64,
        limit: i64,
    ) -> Result<Vec<i64>, StorageError>;

    /// Minimum and maximum of `column`, `None` if the table is empty.
    async fn height_bounds(
        &self,
        table: &str,
        column: &str,
    ) -> Result<Option<HeightBounds>, StorageError>;

    /// Partitions attached to `parent`, ordered by lower bound.
    async fn attached_partitions(
        &self,
        parent: &str,
    ) -> Result<Vec<PartitionDescriptor>, StorageError>;

    /// Names of the CHECK constraints defined on `table`.
    async fn check_constraints(&self, table: &str) -> Result<Vec<String>, StorageError>;

    /// Current connection usage, used as the load signal.
    async fn activity(&self) -> Result<StoreActivity, StorageError>;
}

/// One database transaction.
///
/// Implementations must roll back when dropped without a commit.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Reads a checkpoint inside the transaction.
    async fn load_checkpoint(&mut self, job_name: &str)
        -> Result<Option<Checkpoint>, StorageError>;

    /// Upserts a checkpoint row and returns the timestamp written.
    ///
    /// A height lower than the stored one leaves the row unchanged.
    async fn save_checkpoint(
        &mut self,
        checkpoint: &Checkpoint,
    ) -> Result<DateTime<Utc>, StorageError>;

    /// Creates `partition` from `template` and attaches it to `parent`.
    async fn create_partition(
        &mut self,
        parent: &str,
        template: &str,
        partition: &PartitionDescriptor,
    ) -> Result<(), StorageError>;

    /// Adds a CHECK constraint as `NOT VALID`.
    async fn add_check_constraint(
        &mut self,
        table: &str,
        constraint: &CheckConstraint,
    ) -> Result<(), StorageError>;

    /// Validates a `NOT VALID` constraint against existing rows.
    async fn validate_constraint(&mut self, table: &str, name: &str) -> Result<(), StorageError>;

    /// Drops a constraint if it exists.
    async fn drop_constraint(&mut self, table: &str, name: &str) -> Result<(), StorageError>;

    /// Minimum and maximum of `column` as seen by this transaction.
    async fn height_bounds(
        &mut self,
        table: &str,
        column: &str,
    ) -> Result<Option<HeightBounds>, StorageError>;

    /// Copies the rows with the given ids and returns how many were inserted.
    async fn copy_rows(&mut self, from: &str, to: &str, ids: &[i64])
        -> Result<u64, StorageError>;

    /// Takes `ACCESS EXCLUSIVE` locks on all tables at once.
    async fn lock_exclusive(&mut self, tables: &[&str]) -> Result<(), StorageError>;

    /// Highest id of the table as seen by this transaction.
    async fn max_id(&mut self, table: &str) -> Result<Option<i64>, StorageError>;

    /// Drops every foreign key in other tables that references `table`.
    ///
    /// Returns the dropped constraints as `table.constraint`.
    async fn drop_referencing_foreign_keys(
        &mut self,
        table: &str,
    ) -> Result<Vec<String>, StorageError>;

    /// Renames `from` to `to` within the same schema.
    async fn rename_table(&mut self, from: &str, to: &str) -> Result<(), StorageError>;

    /// Moves the id sequence of `to` to the last value of `from`'s sequence.
    ///
    /// Returns the value applied, `None` if either table owns no sequence.
    async fn continue_sequence(&mut self, from: &str, to: &str)
        -> Result<Option<i64>, StorageError>;

    /// Runs an arbitrary statement and returns the affected row count.
    async fn execute(&mut self, sql: &str) -> Result<u64, StorageError>;

    /// Commits the transaction.
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    /// Rolls the transaction back.
    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}
