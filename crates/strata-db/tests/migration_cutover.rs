//! Integration test: live migration of `event` into a partitioned table,
//! including the crash/retry path and the cutover swap.

use std::collections::BTreeSet;
use std::sync::Arc;

use strata_core::{Checkpoint, PartitionDescriptor};
use strata_db::config::MigrationConfig;
use strata_db::{JobHandler, MigrationOrchestrator, TickOutcome};
use strata_storage::{ErrorClass, IndexStore, MemoryStore};

const STEP: i64 = 1_000;

/// Legacy table with ids 1..=2500, an empty partitioned twin with its
/// first partition, a dependent table holding a foreign key, and sequences.
async fn legacy_store() -> Arc<MemoryStore> {
    legacy_store_up_to(2_500).await
}

async fn legacy_store_up_to(max_id: i64) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.create_table("event").await.unwrap();
    store.create_table("event_template").await.unwrap();
    store.create_partitioned_table("event_partitioned").await.unwrap();
    store.create_table("transfer").await.unwrap();
    store
        .add_foreign_key("transfer", "transfer_event_id_fkey", "event")
        .await
        .unwrap();
    for id in 1..=max_id {
        store.insert("event", id, id / 10).await.unwrap();
    }
    store.set_sequence("event", max_id).await.unwrap();
    store.set_sequence("event_partitioned", 0).await.unwrap();
    attach(&store, 0).await;
    store
}

async fn attach(store: &MemoryStore, from: i64) {
    let mut uow = store.begin().await.unwrap();
    uow.create_partition(
        "event_partitioned",
        "event_template",
        &PartitionDescriptor::for_range("event_partitioned", from, from + STEP),
    )
    .await
    .unwrap();
    uow.commit().await.unwrap();
}

fn orchestrator(store: &Arc<MemoryStore>) -> MigrationOrchestrator {
    MigrationOrchestrator::new(
        store.clone(),
        MigrationConfig {
            step: STEP,
            limit_record_get: 1_000,
            chunk_size_insert: 300,
            ..MigrationConfig::default()
        },
    )
    .unwrap()
}

#[tokio::test]
async fn test_copy_then_cutover() {
    let store = legacy_store().await;
    let report = orchestrator(&store).migrate().await.unwrap();

    assert_eq!(report.batches, 3);
    assert_eq!(report.rows_copied, 2_500);
    assert_eq!(report.partitions_created, 3);
    assert_eq!(report.checkpoint, 2_500);
    assert!(report.cut_over);

    let partitions: Vec<(i64, i64)> = store
        .partitions("event")
        .await
        .unwrap()
        .into_iter()
        .map(|p| (p.from_id, p.to_id))
        .collect();
    assert_eq!(
        partitions,
        vec![(0, 1_000), (1_000, 2_000), (2_000, 3_000), (3_000, 4_000)]
    );

    assert!(store.is_partitioned("event").await.unwrap());
    assert!(!store.table_exists("event_partitioned").await.unwrap());
    assert_eq!(store.rows("event").await.unwrap(), store.rows("event_backup").await.unwrap());
    assert!(store.foreign_keys("transfer").await.unwrap().is_empty());
    assert_eq!(store.sequence_value("event").await.unwrap(), Some(2_500));
    assert_eq!(
        store
            .load_checkpoint("migrate-event-data")
            .await
            .unwrap()
            .unwrap()
            .height,
        2_500
    );
}

#[tokio::test]
async fn test_failed_batch_is_retried_without_duplicates() {
    let store = legacy_store().await;
    attach(&store, 1_000).await;
    attach(&store, 2_000).await;
    let orchestrator = orchestrator(&store);

    store.fail_next_commit().await;
    let err = orchestrator.migrate().await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Transient);
    assert!(store.rows("event_partitioned").await.unwrap().is_empty());
    assert!(store
        .load_checkpoint("migrate-event-data")
        .await
        .unwrap()
        .is_none());

    let report = orchestrator.migrate().await.unwrap();
    assert_eq!(report.rows_copied, 2_500);
    assert_eq!(report.partitions_created, 1);
    assert!(report.cut_over);
    assert_eq!(store.rows("event").await.unwrap().len(), 2_500);
}

#[tokio::test]
async fn test_partial_copy_resumes_without_duplicates() {
    let store = legacy_store().await;
    attach(&store, 1_000).await;
    attach(&store, 2_000).await;
    let orchestrator = orchestrator(&store);

    // The first batch commits, the second one fails.
    store.fail_commit_after(1).await;
    assert!(orchestrator.migrate().await.is_err());
    assert_eq!(store.rows("event_partitioned").await.unwrap().len(), 1_000);
    assert_eq!(
        store
            .load_checkpoint("migrate-event-data")
            .await
            .unwrap()
            .unwrap()
            .height,
        1_000
    );

    let report = orchestrator.migrate().await.unwrap();
    assert_eq!(report.batches, 2);
    assert_eq!(report.rows_copied, 1_500);
    assert!(report.cut_over);

    let live = store.rows("event").await.unwrap();
    assert_eq!(live.len(), 2_500);
    assert_eq!(live.iter().map(|r| r.id).collect::<BTreeSet<_>>().len(), 2_500);
    assert_eq!(live, store.rows("event_backup").await.unwrap());
}

#[tokio::test]
async fn test_resumes_from_committed_checkpoint() {
    let store = legacy_store().await;
    attach(&store, 1_000).await;
    let copied: Vec<i64> = (1..=1_800).collect();
    let mut uow = store.begin().await.unwrap();
    uow.copy_rows("event", "event_partitioned", &copied)
        .await
        .unwrap();
    uow.save_checkpoint(&Checkpoint::pending("migrate-event-data", 1_800))
        .await
        .unwrap();
    uow.commit().await.unwrap();

    let report = orchestrator(&store).migrate().await.unwrap();
    assert_eq!(report.batches, 1);
    assert_eq!(report.rows_copied, 700);
    assert_eq!(report.partitions_created, 2);
    assert!(report.cut_over);

    let live = store.rows("event").await.unwrap();
    assert_eq!(live.len(), 2_500);
    assert_eq!(live, store.rows("event_backup").await.unwrap());
}

#[tokio::test]
async fn test_live_table_has_room_for_the_next_id() {
    let store = legacy_store_up_to(1_999).await;
    let report = orchestrator(&store).migrate().await.unwrap();
    assert!(report.cut_over);

    let partitions: Vec<(i64, i64)> = store
        .partitions("event")
        .await
        .unwrap()
        .into_iter()
        .map(|p| (p.from_id, p.to_id))
        .collect();
    assert_eq!(partitions, vec![(0, 1_000), (1_000, 2_000), (2_000, 3_000)]);
    store.insert("event", 2_000, 200).await.unwrap();
}

#[tokio::test]
async fn test_job_completes_and_recognises_finished_cutover() {
    let store = legacy_store().await;
    let job = orchestrator(&store);
    assert_eq!(job.name(), "migrate-event-data");
    assert_eq!(job.run().await.unwrap(), TickOutcome::Completed);

    let restarted = orchestrator(&store);
    let report = restarted.migrate().await.unwrap();
    assert!(report.already_completed);
    assert_eq!(report.batches, 0);
    assert_eq!(restarted.run().await.unwrap(), TickOutcome::Completed);
}
