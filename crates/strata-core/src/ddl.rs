//! SQL statement builders.
//!
//! Identifiers are always double-quoted; schema-qualified names
//! (`schema.table`) are quoted part by part. Values that end up inside DDL
//! (partition bounds, constraint bounds) are integers and are rendered
//! inline, since DDL does not accept bind parameters. Everything else is
//! passed as `$N` parameters by the caller.

use crate::constraint::CheckConstraint;
use crate::error::CoreError;

/// Maximum identifier length accepted by PostgreSQL (`NAMEDATALEN - 1`).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Quotes a single identifier, doubling embedded quotes.
#[must_use]
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quotes a possibly schema-qualified name part by part.
#[must_use]
pub fn quote_qualified(name: &str) -> String {
    name.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

/// Unqualified part of a possibly schema-qualified name.
#[must_use]
pub fn unqualified(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Checks that every dot-separated part is a usable identifier.
///
/// # Errors
///
/// Returns [`CoreError::InvalidIdentifier`] for empty parts, parts longer
/// than [`MAX_IDENTIFIER_LEN`] bytes, or embedded NUL bytes.
pub fn validate_identifier(name: &str) -> Result<(), CoreError> {
    let ok = !name.is_empty()
        && name.split('.').all(|part| {
            !part.is_empty() && part.len() <= MAX_IDENTIFIER_LEN && !part.contains('\0')
        });
    if ok {
        Ok(())
    } else {
        Err(CoreError::InvalidIdentifier(name.to_string()))
    }
}

/// `CREATE TABLE` for the checkpoint store.
#[must_use]
pub fn create_checkpoint_table(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\
         job_name TEXT PRIMARY KEY, \
         height BIGINT NOT NULL, \
         updated_at TIMESTAMPTZ)",
        quote_qualified(table)
    )
}

/// Monotonic upsert of one checkpoint row.
///
/// Parameters: `$1` job name, `$2` height, `$3` timestamp. A lower height
/// than the stored one leaves the row untouched.
#[must_use]
pub fn upsert_checkpoint(table: &str) -> String {
    let t = quote_qualified(table);
    format!(
        "INSERT INTO {t} (job_name, height, updated_at) VALUES ($1, $2, $3) \
         ON CONFLICT (job_name) DO UPDATE \
         SET height = EXCLUDED.height, updated_at = EXCLUDED.updated_at \
         WHERE {t}.height <= EXCLUDED.height"
    )
}

/// Clones the template's columns, defaults and indexes into a new table.
#[must_use]
pub fn create_partition_table(partition: &str, template: &str) -> String {
    format!(
        "CREATE TABLE {} (LIKE {} INCLUDING ALL EXCLUDING CONSTRAINTS)",
        quote_qualified(partition),
        quote_qualified(template)
    )
}

/// Attaches `partition` to `parent` for `[from, to)`.
#[must_use]
pub fn attach_partition(parent: &str, partition: &str, from: i64, to: i64) -> String {
    format!(
        "ALTER TABLE {} ATTACH PARTITION {} FOR VALUES FROM ({from}) TO ({to})",
        quote_qualified(parent),
        quote_qualified(partition)
    )
}

/// Adds a CHECK constraint without scanning existing rows.
#[must_use]
pub fn add_check_not_valid(table: &str, constraint: &CheckConstraint) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} CHECK ({}) NOT VALID",
        quote_qualified(table),
        quote_ident(&constraint.name),
        constraint.expression()
    )
}

/// Validates a previously added `NOT VALID` constraint.
#[must_use]
pub fn validate_constraint(table: &str, name: &str) -> String {
    format!(
        "ALTER TABLE {} VALIDATE CONSTRAINT {}",
        quote_qualified(table),
        quote_ident(name)
    )
}

/// Drops a constraint by name.
#[must_use]
pub fn drop_constraint(table: &str, name: &str) -> String {
    format!(
        "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
        quote_qualified(table),
        quote_ident(name)
    )
}

/// Takes `ACCESS EXCLUSIVE` locks on all `tables` in one statement.
#[must_use]
pub fn lock_exclusive(tables: &[&str]) -> String {
    let list = tables
        .iter()
        .map(|t| quote_qualified(t))
        .collect::<Vec<_>>()
        .join(", ");
    format!("LOCK TABLE {list} IN ACCESS EXCLUSIVE MODE")
}

/// Renames a table; the new name stays in the same schema.
#[must_use]
pub fn rename_table(from: &str, to: &str) -> String {
    format!(
        "ALTER TABLE {} RENAME TO {}",
        quote_qualified(from),
        quote_ident(unqualified(to))
    )
}

/// Transaction-scoped statement timeout.
#[must_use]
pub fn set_local_statement_timeout(millis: u64) -> String {
    format!("SET LOCAL statement_timeout = {millis}")
}

/// Highest id of a table (`ORDER BY id DESC LIMIT 1`).
#[must_use]
pub fn select_max_id(table: &str, id_column: &str) -> String {
    let id = quote_ident(id_column);
    format!(
        "SELECT {id}::bigint FROM {} ORDER BY {id} DESC LIMIT 1",
        quote_qualified(table)
    )
}

/// Minimum and maximum of the height column.
#[must_use]
pub fn select_height_bounds(table: &str, column: &str) -> String {
    let c = quote_ident(column);
    format!(
        "SELECT MIN({c})::bigint, MAX({c})::bigint FROM {}",
        quote_qualified(table)
    )
}

/// Ids above `$1`, ascending, at most `$2` of them.
#[must_use]
pub fn select_ids_after(table: &str, id_column: &str) -> String {
    let id = quote_ident(id_column);
    format!(
        "SELECT {id}::bigint FROM {} WHERE {id} > $1 ORDER BY {id} LIMIT $2",
        quote_qualified(table)
    )
}

/// Copies the rows whose ids are in `$1` from one table into another.
#[must_use]
pub fn copy_rows_by_id(from: &str, to: &str, id_column: &str) -> String {
    format!(
        "INSERT INTO {} SELECT * FROM {} WHERE {} = ANY($1::bigint[])",
        quote_qualified(to),
        quote_qualified(from),
        quote_ident(id_column)
    )
}
