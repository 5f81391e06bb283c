//! `strata-indexer`: runs the configured jobs against PostgreSQL until
//! interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use strata_db::config::IndexerConfig;
use strata_db::{
    CheckpointSummaryJob, ConstraintJob, DbError, IncrementalJob, JobRegistry, MetricsRegistry,
    MigrationOrchestrator, PartitionJob, RateController, Scheduler, SqlWindowProcessor,
    StoreHealthProbe, WindowCalculator,
};
use strata_storage::{IndexStore, PgIndexStore, StorageError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "strata-indexer", version, about = "Checkpointed indexer and partition manager")]
struct Args {
    /// Path to the TOML configuration.
    #[arg(long, env = "STRATA_CONFIG", default_value = "config/strata.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = IndexerConfig::load(&args.config)?;
    if args.check_config {
        info!(path = %args.config.display(), "configuration is valid");
        return Ok(());
    }

    let store = Arc::new(PgIndexStore::connect(
        &config.database.url,
        config.database.store_config(),
    )?);
    wait_for_database(&store, Duration::from_millis(config.database.connect_retry_ms)).await?;
    store.ensure_schema().await?;
    let store: Arc<dyn IndexStore> = store;

    let metrics = Arc::new(MetricsRegistry::new());
    let registry = Arc::new(register_jobs(&config, &store, &metrics)?);
    let scheduler = Scheduler::new(
        registry,
        metrics,
        Duration::from_millis(config.scheduler.transient_backoff_ms),
    );
    scheduler.start();

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");
    scheduler.shutdown().await;
    Ok(())
}

/// Retries the first connection with exponential backoff.
async fn wait_for_database(store: &PgIndexStore, max_elapsed: Duration) -> Result<(), StorageError> {
    let op = || async {
        store.ping().await.map_err(|e| {
            if e.is_transient() {
                warn!(error = %e, "database not reachable yet");
                backoff::Error::transient(e)
            } else {
                backoff::Error::permanent(e)
            }
        })
    };
    let policy = backoff::ExponentialBackoffBuilder::new()
        .with_max_elapsed_time(Some(max_elapsed))
        .build();
    backoff::future::retry(policy, op).await
}

fn register_jobs(
    config: &IndexerConfig,
    store: &Arc<dyn IndexStore>,
    metrics: &Arc<MetricsRegistry>,
) -> Result<JobRegistry, DbError> {
    let registry = JobRegistry::new();

    let probe = Arc::new(StoreHealthProbe::new(
        Arc::clone(store),
        config.rate.sentinel_table.clone(),
    ));
    let rate = Arc::new(RateController::new(
        probe,
        Duration::from_millis(config.rate.cache_ttl_ms),
    ));
    let calculator = Arc::new(WindowCalculator::new(Arc::clone(store), rate, config));
    for (name, job) in &config.jobs {
        let Some(sql) = &job.sql else {
            warn!(job = %name, "no sql configured, job not scheduled");
            continue;
        };
        let handler = IncrementalJob::from_config(
            name.clone(),
            job,
            Arc::clone(&calculator),
            Arc::new(SqlWindowProcessor::new(sql.clone())),
        );
        registry.register(Arc::new(handler), Duration::from_millis(job.interval_ms))?;
    }

    for table in &config.partitions {
        let job = PartitionJob::from_config(Arc::clone(store), table)?;
        registry.register(Arc::new(job), Duration::from_millis(table.interval_ms))?;
    }

    if config.constraints.enabled && !config.partitions.is_empty() {
        registry.register(
            Arc::new(ConstraintJob::new(store, &config.partitions)),
            Duration::from_millis(config.constraints.interval_ms),
        )?;
    }

    if let Some(migration) = &config.migration {
        let interval = Duration::from_millis(migration.interval_ms);
        let job = MigrationOrchestrator::new(Arc::clone(store), migration.clone())?;
        registry.register(Arc::new(job), interval)?;
    }

    registry.register(
        Arc::new(CheckpointSummaryJob::new(
            Arc::clone(store),
            Arc::clone(metrics),
            Duration::from_millis(config.scheduler.stall_threshold_ms),
        )),
        Duration::from_millis(config.scheduler.summary_interval_ms),
    )?;

    info!(jobs = ?registry.names(), "jobs registered");
    Ok(registry)
}
