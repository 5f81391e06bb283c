//! Transaction over a pooled connection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Object;
use strata_core::{ddl, CheckConstraint, Checkpoint, HeightBounds, PartitionDescriptor};
use tracing::{debug, warn};

use super::{catalog, StoreConfig};
use crate::error::StorageError;
use crate::store::UnitOfWork;

/// A `BEGIN ... COMMIT` block on one pooled connection.
///
/// Dropping it without committing detaches the connection from the pool
/// and closes it, which makes the server roll the transaction back.
pub struct PgUnitOfWork {
    client: Option<Object>,
    checkpoint_table: String,
    id_column: String,
}

impl PgUnitOfWork {
    pub(super) async fn begin(client: Object, config: &StoreConfig) -> Result<Self, StorageError> {
        let millis = u64::try_from(config.statement_timeout.as_millis()).unwrap_or(u64::MAX);
        let setup = format!("BEGIN; {}", ddl::set_local_statement_timeout(millis));
        if let Err(err) = client.batch_execute(&setup).await {
            drop(Object::take(client));
            return Err(err.into());
        }
        Ok(Self {
            client: Some(client),
            checkpoint_table: config.checkpoint_table.clone(),
            id_column: config.id_column.clone(),
        })
    }

    fn client(&self) -> Result<&Object, StorageError> {
        self.client.as_ref().ok_or(StorageError::Closed)
    }

    async fn batch(&self, sql: &str) -> Result<(), StorageError> {
        self.client()?.batch_execute(sql).await?;
        Ok(())
    }

    async fn finish(&mut self, statement: &str) -> Result<(), StorageError> {
        let client = self.client.take().ok_or(StorageError::Closed)?;
        match client.batch_execute(statement).await {
            Ok(()) => Ok(()),
            Err(err) => {
                // The session state is unknown; never hand it back to the pool.
                drop(Object::take(client));
                Err(err.into())
            }
        }
    }
}

impl Drop for PgUnitOfWork {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            debug!("unit of work dropped without commit, discarding connection");
            drop(Object::take(client));
        }
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn load_checkpoint(
        &mut self,
        job_name: &str,
    ) -> Result<Option<Checkpoint>, StorageError> {
        let sql = catalog::select_checkpoint(&self.checkpoint_table);
        let row = self.client()?.query_opt(&sql, &[&job_name]).await?;
        row.as_ref().map(catalog::checkpoint_from_row).transpose()
    }

    async fn save_checkpoint(
        &mut self,
        checkpoint: &Checkpoint,
    ) -> Result<DateTime<Utc>, StorageError> {
        let now = Utc::now();
        let sql = ddl::upsert_checkpoint(&self.checkpoint_table);
        let written = self
            .client()?
            .execute(&sql, &[&checkpoint.job_name, &checkpoint.height, &now])
            .await?;
        if written == 0 {
            warn!(
                job = %checkpoint.job_name,
                height = checkpoint.height,
                "checkpoint not written: stored height is higher"
            );
        }
        Ok(now)
    }

    async fn create_partition(
        &mut self,
        parent: &str,
        template: &str,
        partition: &PartitionDescriptor,
    ) -> Result<(), StorageError> {
        self.batch(&ddl::create_partition_table(&partition.name, template))
            .await?;
        self.batch(&ddl::attach_partition(
            parent,
            &partition.name,
            partition.from_id,
            partition.to_id,
        ))
        .await
    }

    async fn add_check_constraint(
        &mut self,
        table: &str,
        constraint: &CheckConstraint,
    ) -> Result<(), StorageError> {
        self.batch(&ddl::add_check_not_valid(table, constraint)).await
    }

    async fn validate_constraint(&mut self, table: &str, name: &str) -> Result<(), StorageError> {
        self.batch(&ddl::validate_constraint(table, name)).await
    }

    async fn drop_constraint(&mut self, table: &str, name: &str) -> Result<(), StorageError> {
        self.batch(&ddl::drop_constraint(table, name)).await
    }

    async fn height_bounds(
        &mut self,
        table: &str,
        column: &str,
    ) -> Result<Option<HeightBounds>, StorageError> {
        let row = self
            .client()?
            .query_one(&ddl::select_height_bounds(table, column), &[])
            .await?;
        catalog::bounds_from_row(&row)
    }

    async fn copy_rows(
        &mut self,
        from: &str,
        to: &str,
        ids: &[i64],
    ) -> Result<u64, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = ddl::copy_rows_by_id(from, to, &self.id_column);
        Ok(self.client()?.execute(&sql, &[&ids]).await?)
    }

    async fn lock_exclusive(&mut self, tables: &[&str]) -> Result<(), StorageError> {
        self.batch(&ddl::lock_exclusive(tables)).await
    }

    async fn max_id(&mut self, table: &str) -> Result<Option<i64>, StorageError> {
        let sql = ddl::select_max_id(table, &self.id_column);
        let row = self.client()?.query_opt(&sql, &[]).await?;
        Ok(row.map(|r| r.try_get(0)).transpose()?)
    }

    async fn drop_referencing_foreign_keys(
        &mut self,
        table: &str,
    ) -> Result<Vec<String>, StorageError> {
        let rows = self
            .client()?
            .query(catalog::REFERENCING_FOREIGN_KEYS, &[&table])
            .await?;
        let mut dropped = Vec::with_capacity(rows.len());
        for row in &rows {
            let owner: String = row.try_get(0)?;
            let name: String = row.try_get(1)?;
            self.batch(&catalog::drop_foreign_key(&owner, &name)).await?;
            dropped.push(format!("{owner}.{name}"));
        }
        Ok(dropped)
    }

    async fn rename_table(&mut self, from: &str, to: &str) -> Result<(), StorageError> {
        self.batch(&ddl::rename_table(from, to)).await
    }

    async fn continue_sequence(
        &mut self,
        from: &str,
        to: &str,
    ) -> Result<Option<i64>, StorageError> {
        let id_column = self.id_column.clone();
        let client = self.client()?;
        let source: Option<String> = client
            .query_one(catalog::SERIAL_SEQUENCE, &[&from, &id_column])
            .await?
            .try_get(0)?;
        let target: Option<String> = client
            .query_one(catalog::SERIAL_SEQUENCE, &[&to, &id_column])
            .await?
            .try_get(0)?;
        let (Some(source), Some(target)) = (source, target) else {
            return Ok(None);
        };
        let state = client
            .query_one(&catalog::select_sequence_state(&source), &[])
            .await?;
        let last_value: i64 = state.try_get(0)?;
        let is_called: bool = state.try_get(1)?;
        if source != target {
            client
                .query_one(catalog::SET_SEQUENCE, &[&target, &last_value, &is_called])
                .await?;
        }
        Ok(Some(last_value))
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, StorageError> {
        Ok(self.client()?.execute(sql, &[]).await?)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StorageError> {
        self.finish("COMMIT").await
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StorageError> {
        self.finish("ROLLBACK").await
    }
}
