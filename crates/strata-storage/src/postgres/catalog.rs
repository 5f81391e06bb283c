//! Catalog queries and row decoding.

use strata_core::partition::parse_partition_bound;
use strata_core::{ddl, Checkpoint, HeightBounds, PartitionDescriptor};
use tokio_postgres::Row;
use tracing::warn;

use crate::error::StorageError;

pub(super) const TABLE_EXISTS: &str = "SELECT to_regclass($1) IS NOT NULL";

pub(super) const IS_PARTITIONED: &str =
    "SELECT c.relkind = 'p' FROM pg_class c WHERE c.oid = to_regclass($1)";

pub(super) const ATTACHED_PARTITIONS: &str = "\
    SELECT c.relname::text, pg_get_expr(c.relpartbound, c.oid) \
    FROM pg_inherits i \
    JOIN pg_class c ON c.oid = i.inhrelid \
    WHERE i.inhparent = to_regclass($1)";

pub(super) const CHECK_CONSTRAINTS: &str = "\
    SELECT conname::text FROM pg_constraint \
    WHERE conrelid = to_regclass($1) AND contype = 'c' \
    ORDER BY conname";

pub(super) const REFERENCING_FOREIGN_KEYS: &str = "\
    SELECT conrelid::regclass::text, conname::text FROM pg_constraint \
    WHERE confrelid = to_regclass($1) AND contype = 'f' \
    ORDER BY 1, 2";

pub(super) const SERIAL_SEQUENCE: &str = "SELECT pg_get_serial_sequence($1, $2)";

pub(super) const SET_SEQUENCE: &str = "SELECT setval(to_regclass($1), $2, $3)";

pub(super) const ACTIVITY: &str = "\
    SELECT (SELECT count(*) FROM pg_stat_activity WHERE state = 'active')::bigint, \
    current_setting('max_connections')::bigint";

pub(super) fn select_checkpoint(table: &str) -> String {
    format!(
        "SELECT job_name, height, updated_at FROM {} WHERE job_name = $1",
        ddl::quote_qualified(table)
    )
}

pub(super) fn select_checkpoints(table: &str) -> String {
    format!(
        "SELECT job_name, height, updated_at FROM {} WHERE job_name = ANY($1)",
        ddl::quote_qualified(table)
    )
}

pub(super) fn select_all_checkpoints(table: &str) -> String {
    format!(
        "SELECT job_name, height, updated_at FROM {} ORDER BY job_name",
        ddl::quote_qualified(table)
    )
}

/// `last_value` and `is_called` of a sequence named by the catalog.
///
/// `sequence` comes from `pg_get_serial_sequence`, which already quotes it.
pub(super) fn select_sequence_state(sequence: &str) -> String {
    format!("SELECT last_value, is_called FROM {sequence}")
}

/// Drops a constraint on a table named by `regclass::text` (already quoted).
pub(super) fn drop_foreign_key(table: &str, name: &str) -> String {
    format!(
        "ALTER TABLE {table} DROP CONSTRAINT {}",
        ddl::quote_ident(name)
    )
}

pub(super) fn checkpoint_from_row(row: &Row) -> Result<Checkpoint, StorageError> {
    Ok(Checkpoint::loaded(
        row.try_get::<_, String>(0)?,
        row.try_get(1)?,
        row.try_get(2)?,
    ))
}

pub(super) fn bounds_from_row(row: &Row) -> Result<Option<HeightBounds>, StorageError> {
    let min: Option<i64> = row.try_get(0)?;
    let max: Option<i64> = row.try_get(1)?;
    Ok(match (min, max) {
        (Some(min), Some(max)) => Some(HeightBounds { min, max }),
        _ => None,
    })
}

/// Decodes `(relname, bound)` rows into descriptors sorted by lower bound.
///
/// Names keep the parent's schema prefix. `DEFAULT` partitions hold no range
/// and are skipped.
pub(super) fn partitions_from_rows(
    parent: &str,
    rows: &[Row],
) -> Result<Vec<PartitionDescriptor>, StorageError> {
    let schema = parent.rsplit_once('.').map(|(schema, _)| schema);
    let mut partitions = Vec::with_capacity(rows.len());
    for row in rows {
        let relname: String = row.try_get(0)?;
        let bound: Option<String> = row.try_get(1)?;
        let Some(bound) = bound else {
            return Err(StorageError::Contract(format!(
                "partition '{relname}' of '{parent}' has no bound"
            )));
        };
        if bound.trim().eq_ignore_ascii_case("DEFAULT") {
            warn!(parent, partition = %relname, "skipping default partition");
            continue;
        }
        let (from_id, to_id) = parse_partition_bound(&bound)?;
        let name = match schema {
            Some(schema) => format!("{schema}.{relname}"),
            None => relname,
        };
        partitions.push(PartitionDescriptor {
            name,
            from_id,
            to_id,
        });
    }
    partitions.sort_by_key(|p| p.from_id);
    Ok(partitions)
}
