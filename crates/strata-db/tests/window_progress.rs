//! Integration test: a chain of incremental jobs advances in contiguous
//! windows and never runs ahead of its dependencies.

use std::sync::Arc;
use std::time::Duration;

use strata_core::HealthSnapshot;
use strata_db::config::{BatchConfig, IndexerConfig, JobConfig};
use strata_db::{
    IncrementalJob, JobRegistry, MetricsRegistry, RateController, Scheduler, SqlWindowProcessor,
    TickOutcome, WindowCalculator,
};
use strata_storage::{IndexStore, MemoryStore};

fn config() -> IndexerConfig {
    let mut config = IndexerConfig::default();
    config.batches.insert(
        "small".into(),
        BatchConfig {
            blocks_per_call: 50,
            chunk_size: 10,
            min_batch: 2,
            ..BatchConfig::default()
        },
    );
    config.jobs.insert(
        "decode".into(),
        JobConfig {
            depends_on: vec!["crawl-block".into()],
            batch: Some("small".into()),
            sql: Some("DECODE {start} {end}".into()),
            ..JobConfig::default()
        },
    );
    config.jobs.insert(
        "index".into(),
        JobConfig {
            depends_on: vec!["decode".into(), "crawl-block".into()],
            sql: Some("INDEX {start} {end}".into()),
            ..JobConfig::default()
        },
    );
    config
}

fn scheduler(
    store: &Arc<MemoryStore>,
    config: &IndexerConfig,
    health: HealthSnapshot,
) -> Scheduler {
    let rate = Arc::new(RateController::fixed(health));
    let calculator = Arc::new(WindowCalculator::new(store.clone(), rate, config));
    let registry = Arc::new(JobRegistry::new());
    for (name, job) in &config.jobs {
        let sql = job.sql.clone().unwrap();
        let handler = IncrementalJob::from_config(
            name.clone(),
            job,
            calculator.clone(),
            Arc::new(SqlWindowProcessor::new(sql)),
        );
        registry
            .register(Arc::new(handler), Duration::from_millis(job.interval_ms))
            .unwrap();
    }
    Scheduler::new(registry, Arc::new(MetricsRegistry::new()), Duration::from_secs(1))
}

async fn height(store: &MemoryStore, job: &str) -> Option<i64> {
    store.load_checkpoint(job).await.unwrap().map(|cp| cp.height)
}

#[tokio::test]
async fn test_dependent_jobs_never_overtake() {
    let store = Arc::new(MemoryStore::new());
    store.set_checkpoint("crawl-block", 35).await;
    let scheduler = scheduler(&store, &config(), HealthSnapshot::idle());

    for _ in 0..10 {
        scheduler.run_once("decode").await.unwrap();
        scheduler.run_once("index").await.unwrap();
        let decode = height(&store, "decode").await.unwrap_or(0);
        let index = height(&store, "index").await.unwrap_or(0);
        assert!(decode <= 35);
        assert!(index <= decode);
    }
    assert_eq!(height(&store, "decode").await, Some(35));
    assert_eq!(height(&store, "index").await, Some(35));

    let statements = store.statements().await;
    let decode: Vec<_> = statements.iter().filter(|s| s.starts_with("DECODE")).collect();
    assert_eq!(decode, vec!["DECODE 0 10", "DECODE 10 20", "DECODE 20 30", "DECODE 30 35"]);
    assert!(statements.iter().any(|s| s == "INDEX 0 10"));
}

#[tokio::test]
async fn test_fresh_start_uses_large_batches() {
    let store = Arc::new(MemoryStore::new());
    store.set_checkpoint("crawl-block", 200).await;
    let fresh = HealthSnapshot {
        load: 0.0,
        fresh_start: true,
    };
    let scheduler = scheduler(&store, &config(), fresh);
    assert_eq!(
        scheduler.run_once("decode").await.unwrap(),
        TickOutcome::Advanced {
            to: 50,
            pause: Duration::ZERO
        }
    );
}

#[tokio::test]
async fn test_loaded_database_shrinks_batches() {
    let store = Arc::new(MemoryStore::new());
    store.set_checkpoint("crawl-block", 200).await;
    let loaded = HealthSnapshot {
        load: 1.0,
        fresh_start: false,
    };
    let scheduler = scheduler(&store, &config(), loaded);
    assert!(matches!(
        scheduler.run_once("decode").await.unwrap(),
        TickOutcome::Advanced { to: 2, .. }
    ));
}

#[tokio::test]
async fn test_idle_when_caught_up() {
    let store = Arc::new(MemoryStore::new());
    store.set_checkpoint("crawl-block", 0).await;
    let scheduler = scheduler(&store, &config(), HealthSnapshot::idle());
    assert_eq!(scheduler.run_once("index").await.unwrap(), TickOutcome::Idle);
    assert_eq!(scheduler.metrics().snapshot()["index"].idle, 1);
}
