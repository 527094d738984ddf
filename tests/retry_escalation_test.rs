//! Retry escalation through the wait lanes, end to end on a paused clock.

mod common;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use common::{wait_until, Harness, ScriptedExecutor};
use taskrelay_core::constants::topology;
use taskrelay_core::database::TaskStore;
use taskrelay_core::models::TaskType;
use taskrelay_core::orchestration::SubmitRequest;
use taskrelay_core::worker::ExecutorRegistry;
use taskrelay_core::{TaskStatus, MAX_RETRY_COUNT};

fn text_request() -> SubmitRequest {
    SubmitRequest {
        tenant_id: "acme".to_string(),
        task_type: "TEXT".to_string(),
        priority: 0,
        payload: json!({"prompt": "a haiku about queues"}),
        region: None,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_failing_task_escalates_through_wait_lanes_then_dead_letters() {
    let executor = ScriptedExecutor::failing(TaskType::Text);
    let mut harness = Harness::start(
        ExecutorRegistry::new().with_executor(Arc::new(executor.clone())),
    )
    .await;

    let receipt = harness.handle.submissions().submit(text_request()).await.unwrap();
    let task_id = receipt.task_id;

    let store = harness.store.clone();
    let broker = harness.broker.clone();
    wait_until("task dead-lettered", || {
        let store = store.clone();
        let broker = broker.clone();
        async move {
            let status = store.get_task(task_id).await.unwrap().map(|t| t.status);
            status == Some(TaskStatus::DeadLettered)
                && !broker.routed_to(topology::DEAD_LETTER_QUEUE).is_empty()
        }
    })
    .await;

    let task = harness.store.get_task(task_id).await.unwrap().unwrap();
    assert_eq!(task.retry_count, MAX_RETRY_COUNT);
    assert!(task.error_message.unwrap().contains("scripted failure #4"));
    assert!(task.result.is_none());
    // One first attempt plus one per retry
    assert_eq!(executor.attempts(), MAX_RETRY_COUNT as usize + 1);

    let broker = &harness.broker;
    let short = broker.routed_to(topology::SHORT_WAIT_QUEUE);
    let medium = broker.routed_to(topology::MEDIUM_WAIT_QUEUE);
    let long = broker.routed_to(topology::LONG_WAIT_QUEUE);
    assert_eq!(short.len(), 1);
    assert_eq!(medium.len(), 1);
    assert_eq!(long.len(), 1);
    assert_eq!(short[0].retry_count, Some(1));
    assert_eq!(medium[0].retry_count, Some(2));
    assert_eq!(long[0].retry_count, Some(3));
    assert_eq!(broker.routed_to(topology::DEAD_LETTER_QUEUE).len(), 1);

    // Every expired retry comes back to the original lane, no sooner than its TTL
    let lane = broker.routed_to(topology::HIGH_LANE_QUEUE);
    assert_eq!(lane.len(), 4);
    assert!(lane[1].at - short[0].at >= Duration::from_secs(5));
    assert!(lane[2].at - medium[0].at >= Duration::from_secs(15));
    assert!(lane[3].at - long[0].at >= Duration::from_secs(60));
    assert_eq!(lane[3].retry_count, Some(3));

    // Terminal: nothing else is ever routed for the task
    let routed = broker.routing_log().len();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(broker.routing_log().len(), routed);
    assert_eq!(executor.attempts(), MAX_RETRY_COUNT as usize + 1);

    let depths = harness.handle.fabric().lane_depths().await.unwrap();
    assert_eq!((depths.high, depths.medium, depths.low), (0, 0, 0));
    assert_eq!(depths.dead_letter, 1);

    let statuses: Vec<TaskStatus> = harness
        .drain_notifications()
        .into_iter()
        .filter(|event| event.task_id == task_id)
        .map(|event| event.status)
        .collect();
    assert_eq!(statuses.first(), Some(&TaskStatus::Queued));
    assert_eq!(statuses.last(), Some(&TaskStatus::DeadLettered));
    assert_eq!(statuses.iter().filter(|s| **s == TaskStatus::Failed).count(), 3);
    assert_eq!(statuses.iter().filter(|s| **s == TaskStatus::Processing).count(), 4);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_task_recovering_on_second_attempt_completes() {
    let executor = ScriptedExecutor::failing_times(TaskType::Text, 1);
    let harness = Harness::start(
        ExecutorRegistry::new().with_executor(Arc::new(executor.clone())),
    )
    .await;

    let task_id = harness.handle.submissions().submit(text_request()).await.unwrap().task_id;

    let store = harness.store.clone();
    wait_until("task completed", || {
        let store = store.clone();
        async move {
            store.get_task(task_id).await.unwrap().map(|t| t.status) == Some(TaskStatus::Completed)
        }
    })
    .await;

    let task = harness.handle.submissions().get_task(task_id).await.unwrap();
    assert_eq!(task.retry_count, 1);
    assert_eq!(task.worker_version.as_deref(), Some("v1.0.0"));
    assert_eq!(task.result.unwrap()["type"], "TEXT");
    assert_eq!(executor.attempts(), 2);
    assert_eq!(harness.broker.routed_to(topology::SHORT_WAIT_QUEUE).len(), 1);
    assert!(harness.broker.routed_to(topology::MEDIUM_WAIT_QUEUE).is_empty());
    assert!(harness.broker.routed_to(topology::DEAD_LETTER_QUEUE).is_empty());

    harness.stop().await;
}
