//! In-memory storage engine.
//!
//! [`MemoryStore`] emulates the parts of PostgreSQL the indexer relies on:
//! range-partitioned parents that route rows to their partitions, CHECK
//! constraints (enforced on insert, scanned on validate), foreign keys,
//! owned id sequences, renames and transactional rollback. It backs the
//! integration tests and local dry runs.
//!
//! A unit of work holds the store's lock until it commits or is dropped.
//! Reading through the store from the same task while a unit of work is
//! open waits forever.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use strata_core::{CheckConstraint, Checkpoint, HeightBounds, PartitionDescriptor};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::StorageError;
use crate::store::{IndexStore, StoreActivity, UnitOfWork};

/// A stored row: its id and the value of its height column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRow {
    /// Primary key.
    pub id: i64,
    /// Block height the row belongs to.
    pub height: i64,
}

/// A CHECK constraint and whether it has been validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConstraint {
    /// The constraint definition.
    pub constraint: CheckConstraint,
    /// `false` while the constraint is `NOT VALID`.
    pub validated: bool,
}

#[derive(Debug, Clone)]
struct ForeignKey {
    name: String,
    references: String,
}

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    partitioned: bool,
    rows: BTreeMap<i64, MemoryRow>,
    partitions: Vec<PartitionDescriptor>,
    constraints: Vec<MemoryConstraint>,
    foreign_keys: Vec<ForeignKey>,
    sequence: Option<(i64, bool)>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    tables: BTreeMap<String, MemoryTable>,
    checkpoints: BTreeMap<String, Checkpoint>,
    activity: StoreActivity,
    statements: Vec<String>,
    fail_commit_after: Option<u64>,
    commits: u64,
}

impl MemoryState {
    fn table(&self, name: &str) -> Result<&MemoryTable, StorageError> {
        self.tables
            .get(name)
            .ok_or_else(|| StorageError::UnknownTable(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemoryTable, StorageError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StorageError::UnknownTable(name.to_string()))
    }

    /// Rows of a table; a partitioned parent yields the rows of its partitions.
    fn rows(&self, name: &str) -> Result<Vec<MemoryRow>, StorageError> {
        let table = self.table(name)?;
        if !table.partitioned {
            return Ok(table.rows.values().copied().collect());
        }
        let mut rows = Vec::new();
        for partition in &table.partitions {
            rows.extend(self.rows(&partition.name)?);
        }
        rows.sort_by_key(|r| r.id);
        Ok(rows)
    }

    fn max_id(&self, name: &str) -> Result<Option<i64>, StorageError> {
        Ok(self.rows(name)?.last().map(|r| r.id))
    }

    fn height_bounds(&self, name: &str) -> Result<Option<HeightBounds>, StorageError> {
        let rows = self.rows(name)?;
        let min = rows.iter().map(|r| r.height).min();
        let max = rows.iter().map(|r| r.height).max();
        Ok(min.zip(max).map(|(min, max)| HeightBounds { min, max }))
    }

    fn insert(&mut self, name: &str, row: MemoryRow) -> Result<(), StorageError> {
        let table = self.table(name)?;
        if table.partitioned {
            let target = table
                .partitions
                .iter()
                .find(|p| p.contains(row.id))
                .map(|p| p.name.clone())
                .ok_or_else(|| {
                    StorageError::Integrity(format!(
                        "no partition of relation '{name}' found for row id {}",
                        row.id
                    ))
                })?;
            return self.insert(&target, row);
        }
        if table.rows.contains_key(&row.id) {
            return Err(StorageError::Integrity(format!(
                "duplicate key id={} in '{name}'",
                row.id
            )));
        }
        if let Some(violated) = table
            .constraints
            .iter()
            .find(|c| !c.constraint.admits(row.height))
        {
            return Err(StorageError::Integrity(format!(
                "row id={} violates check constraint '{}'",
                row.id, violated.constraint.name
            )));
        }
        let table = self.table_mut(name)?;
        table.rows.insert(row.id, row);
        if let Some((value, called)) = table.sequence.as_mut() {
            *value = (*value).max(row.id);
            *called = true;
        }
        Ok(())
    }

    fn log(&mut self, statement: String) {
        self.statements.push(statement);
    }
}

/// In-memory [`IndexStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a plain table.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Integrity`] if the table already exists.
    pub async fn create_table(&self, name: &str) -> Result<(), StorageError> {
        self.create(name, false).await
    }

    /// Creates a range-partitioned parent with no partitions.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Integrity`] if the table already exists.
    pub async fn create_partitioned_table(&self, name: &str) -> Result<(), StorageError> {
        self.create(name, true).await
    }

    async fn create(&self, name: &str, partitioned: bool) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        if state.tables.contains_key(name) {
            return Err(StorageError::Integrity(format!(
                "relation '{name}' already exists"
            )));
        }
        state.tables.insert(
            name.to_string(),
            MemoryTable {
                partitioned,
                ..MemoryTable::default()
            },
        );
        Ok(())
    }

    /// Inserts a row, routing it to a partition when `table` is partitioned.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Integrity`] for duplicate ids, ids no
    /// partition covers, or rows violating a CHECK constraint.
    pub async fn insert(&self, table: &str, id: i64, height: i64) -> Result<(), StorageError> {
        self.state.lock().await.insert(table, MemoryRow { id, height })
    }

    /// Rows of `table` ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnknownTable`] if the table does not exist.
    pub async fn rows(&self, table: &str) -> Result<Vec<MemoryRow>, StorageError> {
        self.state.lock().await.rows(table)
    }

    /// Names of all tables.
    pub async fn table_names(&self) -> Vec<String> {
        self.state.lock().await.tables.keys().cloned().collect()
    }

    /// Partitions attached to `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnknownTable`] if the table does not exist.
    pub async fn partitions(&self, parent: &str) -> Result<Vec<PartitionDescriptor>, StorageError> {
        let state = self.state.lock().await;
        let mut partitions = state.table(parent)?.partitions.clone();
        partitions.sort_by_key(|p| p.from_id);
        Ok(partitions)
    }

    /// CHECK constraints defined on `table`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnknownTable`] if the table does not exist.
    pub async fn constraints(&self, table: &str) -> Result<Vec<MemoryConstraint>, StorageError> {
        Ok(self.state.lock().await.table(table)?.constraints.clone())
    }

    /// Adds a foreign key on `table` referencing `references`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnknownTable`] if either table does not exist.
    pub async fn add_foreign_key(
        &self,
        table: &str,
        name: &str,
        references: &str,
    ) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        state.table(references)?;
        state.table_mut(table)?.foreign_keys.push(ForeignKey {
            name: name.to_string(),
            references: references.to_string(),
        });
        Ok(())
    }

    /// Names of the foreign keys defined on `table`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnknownTable`] if the table does not exist.
    pub async fn foreign_keys(&self, table: &str) -> Result<Vec<String>, StorageError> {
        let state = self.state.lock().await;
        Ok(state
            .table(table)?
            .foreign_keys
            .iter()
            .map(|fk| fk.name.clone())
            .collect())
    }

    /// Gives `table` an owned id sequence whose last value is `value`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnknownTable`] if the table does not exist.
    pub async fn set_sequence(&self, table: &str, value: i64) -> Result<(), StorageError> {
        self.state.lock().await.table_mut(table)?.sequence = Some((value, true));
        Ok(())
    }

    /// Last value of the sequence owned by `table`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnknownTable`] if the table does not exist.
    pub async fn sequence_value(&self, table: &str) -> Result<Option<i64>, StorageError> {
        Ok(self
            .state
            .lock()
            .await
            .table(table)?
            .sequence
            .map(|(value, _)| value))
    }

    /// Writes a checkpoint row directly, bypassing monotonicity.
    pub async fn set_checkpoint(&self, job_name: &str, height: i64) {
        let mut cp = Checkpoint::pending(job_name, height);
        cp.mark_persisted(Utc::now());
        self.state
            .lock()
            .await
            .checkpoints
            .insert(job_name.to_string(), cp);
    }

    /// Sets the connection usage reported by [`IndexStore::activity`].
    pub async fn set_activity(&self, active_connections: i64, max_connections: i64) {
        self.state.lock().await.activity = StoreActivity {
            active_connections,
            max_connections,
        };
    }

    /// Makes the next commit fail with a transient error and roll back.
    pub async fn fail_next_commit(&self) {
        self.fail_commit_after(0).await;
    }

    /// Lets `successes` more commits through, then fails the next one.
    pub async fn fail_commit_after(&self, successes: u64) {
        self.state.lock().await.fail_commit_after = Some(successes);
    }

    /// Number of successful commits so far.
    pub async fn commits(&self) -> u64 {
        self.state.lock().await.commits
    }

    /// Statements passed to [`UnitOfWork::execute`] and committed.
    pub async fn statements(&self) -> Vec<String> {
        self.state.lock().await.statements.clone()
    }
}

#[async_trait]
impl IndexStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StorageError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let snapshot = guard.clone();
        Ok(Box::new(MemoryUnitOfWork {
            guard: Some(guard),
            snapshot: Some(snapshot),
        }))
    }

    async fn ensure_schema(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn load_checkpoint(&self, job_name: &str) -> Result<Option<Checkpoint>, StorageError> {
        Ok(self.state.lock().await.checkpoints.get(job_name).cloned())
    }

    async fn load_checkpoints(
        &self,
        job_names: &[String],
    ) -> Result<HashMap<String, Checkpoint>, StorageError> {
        let state = self.state.lock().await;
        Ok(job_names
            .iter()
            .filter_map(|name| {
                state
                    .checkpoints
                    .get(name)
                    .map(|cp| (name.clone(), cp.clone()))
            })
            .collect())
    }

    async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, StorageError> {
        Ok(self.state.lock().await.checkpoints.values().cloned().collect())
    }

    async fn table_exists(&self, table: &str) -> Result<bool, StorageError> {
        Ok(self.state.lock().await.tables.contains_key(table))
    }

    async fn is_partitioned(&self, table: &str) -> Result<bool, StorageError> {
        Ok(self
            .state
            .lock()
            .await
            .tables
            .get(table)
            .is_some_and(|t| t.partitioned))
    }

    async fn max_id(&self, table: &str) -> Result<Option<i64>, StorageError> {
        self.state.lock().await.max_id(table)
    }

    async fn ids_after(
        &self,
        table: &str,
        after: i64,
        limit: i64,
    ) -> Result<Vec<i64>, StorageError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .state
            .lock()
            .await
            .rows(table)?
            .into_iter()
            .map(|r| r.id)
            .filter(|id| *id > after)
            .take(limit)
            .collect())
    }

    async fn height_bounds(
        &self,
        table: &str,
        _column: &str,
    ) -> Result<Option<HeightBounds>, StorageError> {
        self.state.lock().await.height_bounds(table)
    }

    async fn attached_partitions(
        &self,
        parent: &str,
    ) -> Result<Vec<PartitionDescriptor>, StorageError> {
        // An unknown parent has no partitions, as in the catalog.
        Ok(match self.partitions(parent).await {
            Ok(partitions) => partitions,
            Err(StorageError::UnknownTable(_)) => Vec::new(),
            Err(err) => return Err(err),
        })
    }

    async fn check_constraints(&self, table: &str) -> Result<Vec<String>, StorageError> {
        let state = self.state.lock().await;
        Ok(state
            .tables
            .get(table)
            .map(|t| {
                t.constraints
                    .iter()
                    .map(|c| c.constraint.name.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn activity(&self) -> Result<StoreActivity, StorageError> {
        Ok(self.state.lock().await.activity)
    }
}

/// Unit of work over a [`MemoryStore`]; rolls back by restoring a snapshot.
pub struct MemoryUnitOfWork {
    guard: Option<OwnedMutexGuard<MemoryState>>,
    snapshot: Option<MemoryState>,
}

impl MemoryUnitOfWork {
    fn state(&mut self) -> Result<&mut MemoryState, StorageError> {
        self.guard.as_deref_mut().ok_or(StorageError::Closed)
    }

    fn restore(&mut self) {
        if let (Some(guard), Some(snapshot)) = (self.guard.as_mut(), self.snapshot.take()) {
            **guard = snapshot;
        }
    }
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        if self.guard.is_some() {
            debug!("memory unit of work dropped without commit, rolling back");
            self.restore();
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn load_checkpoint(
        &mut self,
        job_name: &str,
    ) -> Result<Option<Checkpoint>, StorageError> {
        Ok(self.state()?.checkpoints.get(job_name).cloned())
    }

    async fn save_checkpoint(
        &mut self,
        checkpoint: &Checkpoint,
    ) -> Result<DateTime<Utc>, StorageError> {
        let now = Utc::now();
        let state = self.state()?;
        let stored = state.checkpoints.get(&checkpoint.job_name);
        if stored.map_or(true, |s| s.height <= checkpoint.height) {
            let mut row = checkpoint.clone();
            row.mark_persisted(now);
            state.checkpoints.insert(row.job_name.clone(), row);
        }
        Ok(now)
    }

    async fn create_partition(
        &mut self,
        parent: &str,
        template: &str,
        partition: &PartitionDescriptor,
    ) -> Result<(), StorageError> {
        let state = self.state()?;
        state.table(template)?;
        let parent_table = state.table(parent)?;
        if !parent_table.partitioned {
            return Err(StorageError::Contract(format!(
                "table '{parent}' is not partitioned"
            )));
        }
        if state.tables.contains_key(&partition.name) {
            return Err(StorageError::Integrity(format!(
                "relation '{}' already exists",
                partition.name
            )));
        }
        if let Some(other) = parent_table
            .partitions
            .iter()
            .find(|p| p.overlaps(partition))
        {
            return Err(StorageError::Integrity(format!(
                "partition '{}' would overlap partition '{}'",
                partition.name, other.name
            )));
        }
        state
            .tables
            .insert(partition.name.clone(), MemoryTable::default());
        state.table_mut(parent)?.partitions.push(partition.clone());
        Ok(())
    }

    async fn add_check_constraint(
        &mut self,
        table: &str,
        constraint: &CheckConstraint,
    ) -> Result<(), StorageError> {
        let target = self.state()?.table_mut(table)?;
        if target
            .constraints
            .iter()
            .any(|c| c.constraint.name == constraint.name)
        {
            return Err(StorageError::Integrity(format!(
                "constraint '{}' for relation '{table}' already exists",
                constraint.name
            )));
        }
        target.constraints.push(MemoryConstraint {
            constraint: constraint.clone(),
            validated: false,
        });
        Ok(())
    }

    async fn validate_constraint(&mut self, table: &str, name: &str) -> Result<(), StorageError> {
        let target = self.state()?.table_mut(table)?;
        let rows: Vec<MemoryRow> = target.rows.values().copied().collect();
        let entry = target
            .constraints
            .iter_mut()
            .find(|c| c.constraint.name == name)
            .ok_or_else(|| {
                StorageError::Contract(format!(
                    "constraint '{name}' of relation '{table}' does not exist"
                ))
            })?;
        if let Some(row) = rows.iter().find(|r| !entry.constraint.admits(r.height)) {
            return Err(StorageError::Integrity(format!(
                "check constraint '{name}' is violated by row id={}",
                row.id
            )));
        }
        entry.validated = true;
        Ok(())
    }

    async fn drop_constraint(&mut self, table: &str, name: &str) -> Result<(), StorageError> {
        self.state()?
            .table_mut(table)?
            .constraints
            .retain(|c| c.constraint.name != name);
        Ok(())
    }

    async fn height_bounds(
        &mut self,
        table: &str,
        _column: &str,
    ) -> Result<Option<HeightBounds>, StorageError> {
        self.state()?.height_bounds(table)
    }

    async fn copy_rows(
        &mut self,
        from: &str,
        to: &str,
        ids: &[i64],
    ) -> Result<u64, StorageError> {
        let state = self.state()?;
        let source: Vec<MemoryRow> = state
            .rows(from)?
            .into_iter()
            .filter(|r| ids.contains(&r.id))
            .collect();
        state.table(to)?;
        for row in &source {
            state.insert(to, *row)?;
        }
        Ok(source.len() as u64)
    }

    async fn lock_exclusive(&mut self, tables: &[&str]) -> Result<(), StorageError> {
        let state = self.state()?;
        for table in tables {
            state.table(table)?;
        }
        Ok(())
    }

    async fn max_id(&mut self, table: &str) -> Result<Option<i64>, StorageError> {
        self.state()?.max_id(table)
    }

    async fn drop_referencing_foreign_keys(
        &mut self,
        table: &str,
    ) -> Result<Vec<String>, StorageError> {
        let state = self.state()?;
        let mut dropped = Vec::new();
        for (owner, t) in &mut state.tables {
            t.foreign_keys.retain(|fk| {
                if fk.references == table {
                    dropped.push(format!("{owner}.{}", fk.name));
                    false
                } else {
                    true
                }
            });
        }
        Ok(dropped)
    }

    async fn rename_table(&mut self, from: &str, to: &str) -> Result<(), StorageError> {
        let state = self.state()?;
        if state.tables.contains_key(to) {
            return Err(StorageError::Integrity(format!(
                "relation '{to}' already exists"
            )));
        }
        let table = state
            .tables
            .remove(from)
            .ok_or_else(|| StorageError::UnknownTable(from.to_string()))?;
        state.tables.insert(to.to_string(), table);
        // Foreign keys follow the table, not its name.
        for t in state.tables.values_mut() {
            for fk in &mut t.foreign_keys {
                if fk.references == from {
                    fk.references = to.to_string();
                }
            }
        }
        Ok(())
    }

    async fn continue_sequence(
        &mut self,
        from: &str,
        to: &str,
    ) -> Result<Option<i64>, StorageError> {
        let state = self.state()?;
        let Some(source) = state.table(from)?.sequence else {
            return Ok(None);
        };
        let target = state.table_mut(to)?;
        if target.sequence.is_none() {
            return Ok(None);
        }
        target.sequence = Some(source);
        Ok(Some(source.0))
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, StorageError> {
        self.state()?.log(sql.to_string());
        Ok(0)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StorageError> {
        let state = self.state()?;
        let pending = state.fail_commit_after;
        if pending == Some(0) {
            self.restore();
            if let Some(guard) = self.guard.as_mut() {
                guard.fail_commit_after = None;
            }
            self.guard = None;
            return Err(StorageError::Transient("injected commit failure".to_string()));
        }
        state.fail_commit_after = pending.map(|n| n - 1);
        state.commits += 1;
        self.snapshot = None;
        self.guard = None;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StorageError> {
        self.state()?;
        self.restore();
        self.guard = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn partitioned() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_table("event_template").await.unwrap();
        store.create_partitioned_table("event").await.unwrap();
        let mut uow = store.begin().await.unwrap();
        uow.create_partition(
            "event",
            "event_template",
            &PartitionDescriptor::for_range("event", 0, 1_000),
        )
        .await
        .unwrap();
        uow.commit().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_rows_route_to_partitions() {
        let store = partitioned().await;
        store.insert("event", 5, 100).await.unwrap();
        assert_eq!(store.rows("event_0_1000").await.unwrap().len(), 1);
        assert_eq!(store.max_id("event").await.unwrap(), Some(5));
        let err = store.insert("event", 1_000, 1).await.unwrap_err();
        assert!(err.is_integrity());
    }

    #[tokio::test]
    async fn test_overlapping_partition_is_integrity_error() {
        let store = partitioned().await;
        let mut uow = store.begin().await.unwrap();
        let err = uow
            .create_partition(
                "event",
                "event_template",
                &PartitionDescriptor::for_range("event_b", 500, 1_500),
            )
            .await
            .unwrap_err();
        assert!(err.is_integrity());
    }

    #[tokio::test]
    async fn test_drop_without_commit_rolls_back() {
        let store = MemoryStore::new();
        {
            let mut uow = store.begin().await.unwrap();
            uow.save_checkpoint(&Checkpoint::pending("crawl", 10))
                .await
                .unwrap();
        }
        assert!(store.load_checkpoint("crawl").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_injected_commit_failure_rolls_back_once() {
        let store = MemoryStore::new();
        store.fail_next_commit().await;
        let mut uow = store.begin().await.unwrap();
        uow.save_checkpoint(&Checkpoint::pending("crawl", 10))
            .await
            .unwrap();
        assert!(uow.commit().await.unwrap_err().is_transient());
        assert!(store.load_checkpoint("crawl").await.unwrap().is_none());

        let mut uow = store.begin().await.unwrap();
        uow.save_checkpoint(&Checkpoint::pending("crawl", 10))
            .await
            .unwrap();
        uow.commit().await.unwrap();
        assert_eq!(store.load_checkpoint("crawl").await.unwrap().unwrap().height, 10);
        assert_eq!(store.commits().await, 1);
    }

    #[tokio::test]
    async fn test_commit_failure_after_successes() {
        let store = MemoryStore::new();
        store.fail_commit_after(2).await;
        for height in [10, 20] {
            let mut uow = store.begin().await.unwrap();
            uow.save_checkpoint(&Checkpoint::pending("crawl", height))
                .await
                .unwrap();
            uow.commit().await.unwrap();
        }
        let mut uow = store.begin().await.unwrap();
        uow.save_checkpoint(&Checkpoint::pending("crawl", 30))
            .await
            .unwrap();
        assert!(uow.commit().await.unwrap_err().is_transient());
        assert_eq!(store.load_checkpoint("crawl").await.unwrap().unwrap().height, 20);
        assert_eq!(store.commits().await, 2);
    }

    #[tokio::test]
    async fn test_checkpoint_upsert_never_regresses() {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        uow.save_checkpoint(&Checkpoint::pending("crawl", 50))
            .await
            .unwrap();
        uow.save_checkpoint(&Checkpoint::pending("crawl", 40))
            .await
            .unwrap();
        uow.commit().await.unwrap();
        assert_eq!(store.load_checkpoint("crawl").await.unwrap().unwrap().height, 50);
    }

    #[tokio::test]
    async fn test_validate_scans_rows() {
        let store = partitioned().await;
        store.insert("event", 1, 10).await.unwrap();
        store.insert("event", 2, 20).await.unwrap();
        let mut uow = store.begin().await.unwrap();
        let tight = CheckConstraint::done(
            "event_0_1000",
            "height",
            HeightBounds { min: 10, max: 15 },
        );
        uow.add_check_constraint("event_0_1000", &tight).await.unwrap();
        let err = uow
            .validate_constraint("event_0_1000", &tight.name)
            .await
            .unwrap_err();
        assert!(err.is_integrity());
    }

    #[tokio::test]
    async fn test_rename_carries_foreign_keys_and_sequence() {
        let store = MemoryStore::new();
        store.create_table("event").await.unwrap();
        store.create_table("log").await.unwrap();
        store.add_foreign_key("log", "log_event_fk", "event").await.unwrap();
        store.set_sequence("event", 77).await.unwrap();
        let mut uow = store.begin().await.unwrap();
        uow.rename_table("event", "event_backup").await.unwrap();
        let dropped = uow.drop_referencing_foreign_keys("event_backup").await.unwrap();
        uow.commit().await.unwrap();
        assert_eq!(dropped, vec!["log.log_event_fk".to_string()]);
        assert_eq!(store.sequence_value("event_backup").await.unwrap(), Some(77));
        assert!(!store.table_exists("event").await.unwrap());
    }
}
