//! Indexer configuration.
//!
//! Loaded from TOML; every section and field has a default, so an empty
//! file is a valid (if not very useful) configuration. The database URL can
//! be overridden with `STRATA_DATABASE_URL`.

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strata_core::{ddl, PartitionLayout, RatePolicy};
use strata_storage::StoreConfig;

use crate::error::DbError;

/// Environment variable overriding `database.url`.
pub const DATABASE_URL_ENV: &str = "STRATA_DATABASE_URL";

/// Default name of the migration checkpoint.
pub const DEFAULT_MIGRATION_JOB: &str = "migrate-event-data";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Connection and timeout settings.
    pub database: DatabaseConfig,
    /// Start heights of jobs without a checkpoint row.
    pub checkpoint: CheckpointConfig,
    /// Fallback for downstream jobs whose dependencies never ran.
    pub bootstrap: BootstrapConfig,
    /// Health probe settings shared by all batch configs.
    pub rate: RateConfig,
    /// Named batch configurations.
    pub batches: BTreeMap<String, BatchConfig>,
    /// Windowed jobs by name.
    pub jobs: BTreeMap<String, JobConfig>,
    /// Range-partitioned tables to keep extended.
    pub partitions: Vec<PartitionJobConfig>,
    /// Constraint reconciliation.
    pub constraints: ConstraintConfig,
    /// Legacy table migration, if one is pending.
    pub migration: Option<MigrationConfig>,
    /// Scheduler behaviour.
    pub scheduler: SchedulerSettings,
}

/// `[database]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection string (key-value or URI form).
    pub url: String,
    /// Maximum pooled connections.
    pub pool_size: usize,
    /// Deadline for obtaining a pooled connection.
    pub acquire_timeout_ms: u64,
    /// `statement_timeout` applied to every transaction.
    pub statement_timeout_ms: u64,
    /// Primary-key column of indexed tables.
    pub id_column: String,
    /// Checkpoint table name.
    pub checkpoint_table: String,
    /// How long the binary keeps retrying the first connection.
    pub connect_retry_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/indexer".to_string(),
            pool_size: 10,
            acquire_timeout_ms: 5_000,
            statement_timeout_ms: 30_000,
            id_column: "id".to_string(),
            checkpoint_table: "checkpoint".to_string(),
            connect_retry_ms: 60_000,
        }
    }
}

impl DatabaseConfig {
    /// Backend settings for [`strata_storage::PgIndexStore`].
    #[must_use]
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            checkpoint_table: self.checkpoint_table.clone(),
            id_column: self.id_column.clone(),
            pool_size: self.pool_size,
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
            statement_timeout: Duration::from_millis(self.statement_timeout_ms),
        }
    }
}

/// `[checkpoint]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Start height of any job without an entry in `starts`.
    pub genesis: i64,
    /// Per-job start heights.
    pub starts: BTreeMap<String, i64>,
}

impl CheckpointConfig {
    /// Height a job starts from before its first checkpoint is written.
    #[must_use]
    pub fn start_for(&self, job_name: &str) -> i64 {
        self.starts.get(job_name).copied().unwrap_or(self.genesis)
    }
}

/// `[bootstrap]`
///
/// When a job's dependencies have never written a checkpoint but the anchor
/// job is past `threshold`, the missing dependencies contribute the anchor
/// table's max id instead of zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Primary block-following job.
    pub anchor_job: Option<String>,
    /// Table the anchor job fills.
    pub anchor_table: Option<String>,
    /// Anchor height above which the fallback may fire.
    pub threshold: i64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            anchor_job: None,
            anchor_table: None,
            threshold: 1_000,
        }
    }
}

/// `[rate]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    /// How long a health sample stays valid.
    pub cache_ttl_ms: u64,
    /// Load at or above which batches are at their minimum.
    pub high_load: f64,
    /// Load at or below which batches are at their maximum.
    pub low_load: f64,
    /// Table whose emptiness marks a fresh start.
    pub sentinel_table: Option<String>,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 5_000,
            high_load: 0.8,
            low_load: 0.3,
            sentinel_table: None,
        }
    }
}

/// `[batches.<name>]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Batch size on a fresh start.
    pub blocks_per_call: i64,
    /// Batch size while reindexing under low load.
    pub chunk_size: i64,
    /// Smallest batch while reindexing.
    pub min_batch: i64,
    /// Pause after a batch under low load.
    pub base_delay_ms: u64,
    /// Pause after a batch under high load.
    pub max_delay_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            blocks_per_call: 1_000,
            chunk_size: 100,
            min_batch: 10,
            base_delay_ms: 0,
            max_delay_ms: 5_000,
        }
    }
}

impl BatchConfig {
    /// Sizing policy combining this batch config with the load thresholds.
    #[must_use]
    pub fn policy(&self, rate: &RateConfig) -> RatePolicy {
        RatePolicy {
            blocks_per_call: self.blocks_per_call,
            chunk_size: self.chunk_size,
            min_batch: self.min_batch,
            high_load: rate.high_load,
            low_load: rate.low_load,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// `[jobs.<name>]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Jobs whose checkpoints bound this job's windows.
    pub depends_on: Vec<String>,
    /// Batch config name, if windows are size-limited.
    pub batch: Option<String>,
    /// Statement run for each window; `{start}` and `{end}` are replaced by
    /// the window bounds.
    pub sql: Option<String>,
    /// Tick interval.
    pub interval_ms: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            depends_on: Vec::new(),
            batch: None,
            sql: None,
            interval_ms: 1_000,
        }
    }
}

/// `[[partitions]]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionJobConfig {
    /// Partitioned parent table.
    pub parent: String,
    /// Table whose structure new partitions copy.
    pub template: String,
    /// Ids per partition.
    pub step: i64,
    /// Column the CHECK constraints bound.
    pub height_column: String,
    /// First id covered when the parent has no partitions yet.
    pub initial_id: i64,
    /// Tick interval.
    pub interval_ms: u64,
}

impl Default for PartitionJobConfig {
    fn default() -> Self {
        Self {
            parent: String::new(),
            template: String::new(),
            step: 100_000,
            height_column: "height".to_string(),
            initial_id: 0,
            interval_ms: 10_000,
        }
    }
}

impl PartitionJobConfig {
    /// Layout for this table.
    ///
    /// # Errors
    ///
    /// Returns an error if `step` is not positive.
    pub fn layout(&self) -> Result<PartitionLayout, DbError> {
        Ok(PartitionLayout::new(self.step)?)
    }
}

/// `[constraints]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintConfig {
    /// Run the reconciler at all.
    pub enabled: bool,
    /// Tick interval.
    pub interval_ms: u64,
}

impl Default for ConstraintConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
        }
    }
}

/// `[migration]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Checkpoint name of the copy progress.
    pub job_name: String,
    /// Monolithic table being replaced; keeps its name after cutover.
    pub legacy_table: String,
    /// Partitioned table receiving the copy.
    pub partitioned_table: String,
    /// Name the legacy table gets at cutover.
    pub backup_table: String,
    /// Structure template for partitions of the partitioned table.
    pub template_table: String,
    /// Ids per partition.
    pub step: i64,
    /// Checkpoint value before the first copy.
    pub start_id: i64,
    /// Ids fetched per copy batch.
    pub limit_record_get: i64,
    /// Ids per `INSERT ... SELECT` inside a batch.
    pub chunk_size_insert: usize,
    /// Tick interval.
    pub interval_ms: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            job_name: DEFAULT_MIGRATION_JOB.to_string(),
            legacy_table: "event".to_string(),
            partitioned_table: "event_partitioned".to_string(),
            backup_table: "event_backup".to_string(),
            template_table: "event_template".to_string(),
            step: 100_000,
            start_id: 0,
            limit_record_get: 10_000,
            chunk_size_insert: 1_000,
            interval_ms: 1_000,
        }
    }
}

/// `[scheduler]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Pause after a transient failure before the job ticks again.
    pub transient_backoff_ms: u64,
    /// A job without progress for this long is reported as stalled.
    pub stall_threshold_ms: u64,
    /// Interval of the checkpoint summary log.
    pub summary_interval_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            transient_backoff_ms: 5_000,
            stall_threshold_ms: 300_000,
            summary_interval_ms: 60_000,
        }
    }
}

impl IndexerConfig {
    /// Parses TOML and validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] for syntax errors or invalid values.
    pub fn from_toml_str(raw: &str) -> Result<Self, DbError> {
        let config: Self =
            toml::from_str(raw).map_err(|e| DbError::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a TOML file, applies process environment overrides, and
    /// validates.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the file cannot be read or is invalid.
    pub fn load(path: &Path) -> Result<Self, DbError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DbError::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut config: Self =
            toml::from_str(&raw).map_err(|e| DbError::Config(format!("invalid TOML: {e}")))?;
        let env: HashMap<String, String> = std::env::vars().collect();
        config.apply_env_overrides(&env);
        config.validate()?;
        Ok(config)
    }

    /// Applies environment overrides; returns the keys that were used.
    pub fn apply_env_overrides<S: BuildHasher>(
        &mut self,
        env: &HashMap<String, String, S>,
    ) -> Vec<&'static str> {
        let mut used = Vec::new();
        if let Some(url) = env.get(DATABASE_URL_ENV).filter(|u| !u.is_empty()) {
            self.database.url.clone_from(url);
            used.push(DATABASE_URL_ENV);
        }
        used
    }

    /// Looks up a batch config by name.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if no batch config has that name.
    pub fn batch(&self, name: &str) -> Result<&BatchConfig, DbError> {
        self.batches
            .get(name)
            .ok_or_else(|| DbError::Config(format!("unknown batch config '{name}'")))
    }

    /// Checks cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<(), DbError> {
        let db = &self.database;
        if db.url.trim().is_empty() {
            return Err(DbError::Config("database.url is empty".into()));
        }
        if db.pool_size == 0 {
            return Err(DbError::Config("database.pool_size must be > 0".into()));
        }
        identifier("database.id_column", &db.id_column)?;
        identifier("database.checkpoint_table", &db.checkpoint_table)?;

        if self.bootstrap.threshold < 0 {
            return Err(DbError::Config("bootstrap.threshold must be >= 0".into()));
        }
        if self.bootstrap.anchor_job.is_some() != self.bootstrap.anchor_table.is_some() {
            return Err(DbError::Config(
                "bootstrap.anchor_job and bootstrap.anchor_table must be set together".into(),
            ));
        }
        if let Some(table) = &self.bootstrap.anchor_table {
            identifier("bootstrap.anchor_table", table)?;
        }
        if let Some(table) = &self.rate.sentinel_table {
            identifier("rate.sentinel_table", table)?;
        }

        for (name, batch) in &self.batches {
            batch
                .policy(&self.rate)
                .validate()
                .map_err(|e| DbError::Config(format!("batches.{name}: {e}")))?;
        }

        for (name, job) in &self.jobs {
            if name.trim().is_empty() {
                return Err(DbError::Config("job names must not be empty".into()));
            }
            if let Some(batch) = &job.batch {
                self.batch(batch)
                    .map_err(|e| DbError::Config(format!("jobs.{name}: {e}")))?;
            } else if job.depends_on.is_empty() {
                return Err(DbError::Config(format!(
                    "jobs.{name}: a job without dependencies needs a batch config"
                )));
            }
            if job.interval_ms == 0 {
                return Err(DbError::Config(format!("jobs.{name}.interval_ms must be > 0")));
            }
        }

        for partition in &self.partitions {
            identifier("partitions.parent", &partition.parent)?;
            identifier("partitions.template", &partition.template)?;
            identifier("partitions.height_column", &partition.height_column)?;
            partition
                .layout()
                .map_err(|e| DbError::Config(format!("partitions '{}': {e}", partition.parent)))?;
            if partition.interval_ms == 0 {
                return Err(DbError::Config(format!(
                    "partitions '{}': interval_ms must be > 0",
                    partition.parent
                )));
            }
        }
        if self.constraints.enabled && self.constraints.interval_ms == 0 {
            return Err(DbError::Config("constraints.interval_ms must be > 0".into()));
        }

        if let Some(migration) = &self.migration {
            if migration.job_name.trim().is_empty() {
                return Err(DbError::Config("migration.job_name is empty".into()));
            }
            identifier("migration.legacy_table", &migration.legacy_table)?;
            identifier("migration.partitioned_table", &migration.partitioned_table)?;
            identifier("migration.backup_table", &migration.backup_table)?;
            identifier("migration.template_table", &migration.template_table)?;
            if migration.step <= 0 {
                return Err(DbError::Config("migration.step must be > 0".into()));
            }
            if migration.limit_record_get <= 0 || migration.chunk_size_insert == 0 {
                return Err(DbError::Config(
                    "migration.limit_record_get and chunk_size_insert must be > 0".into(),
                ));
            }
            if migration.interval_ms == 0 {
                return Err(DbError::Config("migration.interval_ms must be > 0".into()));
            }
        }
        if self.scheduler.summary_interval_ms == 0 {
            return Err(DbError::Config("scheduler.summary_interval_ms must be > 0".into()));
        }
        Ok(())
    }
}

fn identifier(field: &str, value: &str) -> Result<(), DbError> {
    ddl::validate_identifier(value).map_err(|e| DbError::Config(format!("{field}: {e}")))
}
