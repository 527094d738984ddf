//! PostgreSQL store checks. Need a live database:
//!
//! ```text
//! DATABASE_URL=postgres://localhost/taskrelay_test cargo test --test pg_task_store_test -- --ignored
//! ```

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;

use taskrelay_core::config::{DatabaseConfig, StoreBackend};
use taskrelay_core::database::{PgTaskStore, TaskStore};
use taskrelay_core::models::{NewTask, OutboxRoute, Priority, StorageTier, TaskType};
use taskrelay_core::state_machine::{TaskEvent, TaskStateMachine, TaskStatus};
use taskrelay_core::TaskRelayError;

async fn connect() -> PgTaskStore {
    let config = DatabaseConfig {
        backend: StoreBackend::Postgres,
        url: Some(std::env::var("DATABASE_URL").expect("DATABASE_URL must be set")),
        ..DatabaseConfig::default()
    };
    PgTaskStore::connect(&config, TaskStateMachine::default())
        .await
        .expect("database reachable")
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_chain_rows_and_transitions_round_trip() {
    let store = connect().await;
    let dag_id = uuid::Uuid::now_v7();
    let now = Utc::now();
    let first = NewTask::new("pg-tenant", TaskType::Text, Priority::High, json!({"prompt": "p"}))
        .in_chain(dag_id, None)
        .into_task(now);
    let second = NewTask::new("pg-tenant", TaskType::Image, Priority::High, json!({}))
        .in_chain(dag_id, Some(first.id))
        .into_task(now);

    let entries = store.insert_tasks(&[first.clone(), second.clone()]).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].route, OutboxRoute::Lane);

    let chain = store.chain_tasks(dag_id).await.unwrap();
    assert_eq!(chain.iter().map(|t| t.id).collect::<Vec<_>>(), vec![first.id, second.id]);
    assert_eq!(store.children_of(first.id).await.unwrap()[0].id, second.id);

    store.transition(first.id, TaskEvent::Start).await.unwrap();
    let failed = store.transition(first.id, TaskEvent::fail("oom")).await.unwrap();
    assert_eq!(failed.task.status, TaskStatus::Failed);
    assert_eq!(failed.outbox.map(|entry| entry.route), Some(OutboxRoute::Retry));

    // Retry entry delivered: FAILED -> QUEUED
    let pending = store.undelivered_outbox(Utc::now() + ChronoDuration::minutes(1), 10).await.unwrap();
    for entry in pending.iter().filter(|entry| entry.task_id == first.id) {
        store.mark_outbox_delivered(entry.id).await.unwrap();
    }
    assert_eq!(store.get_task(first.id).await.unwrap().unwrap().status, TaskStatus::Queued);

    store.transition(first.id, TaskEvent::Start).await.unwrap();
    let done = store
        .transition(first.id, TaskEvent::complete(json!({"url": "u"}), "v1.0.0"))
        .await
        .unwrap();
    assert_eq!(done.task.retry_count, 1);

    // Second completion of the same task is refused
    assert!(matches!(
        store.transition(first.id, TaskEvent::complete(json!({}), "v1.0.0")).await,
        Err(TaskRelayError::StateTransitionError(_))
    ));

    store.record_cost(first.id, 0.001).await.unwrap();
    assert_eq!(store.stalled_chain_steps(10).await.unwrap().iter().filter(|t| t.id == second.id).count(), 1);

    let moved = store
        .migrate_storage_tier(StorageTier::Hot, StorageTier::Warm, Utc::now() + ChronoDuration::seconds(1))
        .await
        .unwrap();
    assert!(moved >= 1);
    let row = store.get_task(first.id).await.unwrap().unwrap();
    assert_eq!(row.storage_tier, StorageTier::Warm);
    assert_eq!(row.cost, 0.001);
}
