mod common;

use chrono::{Duration, Utc};
use common::{new_operation, store};
use opsflow_state::{LogLevel, OperationMode, OperationStatus, StoreError};

#[tokio::test]
async fn test_operation_lifecycle() {
    let store = store().await;
    let op = store
        .create_operation(&new_operation("vnet-create", OperationMode::Normal))
        .await
        .unwrap();
    assert_eq!(op.status, OperationStatus::Pending);
    assert!(op.id.starts_with("vnet-create-"));
    assert_eq!(op.total_steps, 2);

    let now = Utc::now();
    store.start_operation(&op.id, now).await.unwrap();
    store.update_progress(&op.id, 1, 2, "create vnet").await.unwrap();
    store.append_log(&op.id, LogLevel::Info, "step 1 ok").await.unwrap();
    store.complete_operation(&op.id, now).await.unwrap();

    let done = store.get_operation(&op.id).await.unwrap().unwrap();
    assert_eq!(done.status, OperationStatus::Completed);
    assert_eq!(done.current_step, 1);
    assert_eq!(done.current_step_label.as_deref(), Some("create vnet"));
    assert!(done.started_at.is_some());
    assert!(done.finished_at.is_some());

    // 終了後のログ追記は可能
    store.append_log(&op.id, LogLevel::Warn, "trailing").await.unwrap();
    let logs = store.operation_logs(&op.id).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[1].level, LogLevel::Warn);
}

#[tokio::test]
async fn test_transitions_are_one_way() {
    let store = store().await;
    let op = store
        .create_operation(&new_operation("rg-create", OperationMode::Normal))
        .await
        .unwrap();
    store.fail_operation(&op.id, "prerequisite missing", Utc::now()).await.unwrap();

    for result in [
        store.start_operation(&op.id, Utc::now()).await,
        store.complete_operation(&op.id, Utc::now()).await,
        store.fail_operation(&op.id, "again", Utc::now()).await,
    ] {
        match result {
            Err(StoreError::InvalidTransition { from, .. }) => {
                assert_eq!(from, OperationStatus::Failed)
            }
            other => panic!("Expected invalid transition, got {:?}", other),
        }
    }

    let failed = store.get_operation(&op.id).await.unwrap().unwrap();
    assert_eq!(failed.error.as_deref(), Some("prerequisite missing"));

    assert!(matches!(
        store.start_operation("nope", Utc::now()).await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_summary_is_computed_from_rows() {
    let store = store().await;
    let a = store.create_operation(&new_operation("a", OperationMode::Normal)).await.unwrap();
    let b = store.create_operation(&new_operation("b", OperationMode::Force)).await.unwrap();
    let c = store.create_operation(&new_operation("c", OperationMode::DryRun)).await.unwrap();
    store.create_operation(&new_operation("d", OperationMode::Normal)).await.unwrap();
    let now = Utc::now();
    store.start_operation(&a.id, now).await.unwrap();
    store.complete_operation(&a.id, now).await.unwrap();
    store.fail_operation(&b.id, "boom", now).await.unwrap();
    store.complete_operation(&c.id, now).await.unwrap();

    let summary = store.operation_summary().await.unwrap();
    assert_eq!(summary.pending, 1);
    assert_eq!(summary.running, 0);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.dry_runs, 1);

    let failed = store.failed_operations(10).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, b.id);
    assert_eq!(store.list_operations(None, 10).await.unwrap().len(), 4);
    assert_eq!(store.list_operations(None, 2).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_locks() {
    let store = store().await;
    let now = Utc::now();
    let lease = Duration::seconds(60);

    store.acquire_lock("res/a", "op-1", now, lease).await.unwrap();
    // 同じ操作なら再取得できる
    store.acquire_lock("res/a", "op-1", now, lease).await.unwrap();

    match store.acquire_lock("res/a", "op-2", now, lease).await {
        Err(StoreError::LockHeld { key, holder }) => {
            assert_eq!(key, "res/a");
            assert_eq!(holder, "op-1");
        }
        other => panic!("Expected lock held, got {:?}", other),
    }

    // 期限切れのリースは引き継げる
    store
        .acquire_lock("res/a", "op-2", now + Duration::seconds(61), lease)
        .await
        .unwrap();
    assert!(!store.release_lock("res/a", "op-1").await.unwrap());
    assert!(store.release_lock("res/a", "op-2").await.unwrap());

    store.acquire_lock("res/b", "op-3", now, lease).await.unwrap();
    store.acquire_lock("res/c", "op-3", now, lease).await.unwrap();
    assert_eq!(store.release_locks_for("op-3").await.unwrap(), 2);
    store.acquire_lock("res/b", "op-4", now, lease).await.unwrap();
}

#[tokio::test]
async fn test_lock_with_unbounded_lease() {
    let store = store().await;
    let now = Utc::now();
    let lease = opsflow_state::span_from_secs(u64::MAX);

    store.acquire_lock("res/a", "op-1", now, lease).await.unwrap();
    // 期限は表現できる最大時刻で頭打ちになり、他の操作は取得できない
    assert!(matches!(
        store
            .acquire_lock("res/a", "op-2", now + Duration::days(365 * 1000), lease)
            .await,
        Err(StoreError::LockHeld { .. })
    ));
}

#[tokio::test]
async fn test_stale_operations() {
    let store = store().await;
    let op = store.create_operation(&new_operation("a", OperationMode::Normal)).await.unwrap();
    let done = store.create_operation(&new_operation("b", OperationMode::Normal)).await.unwrap();
    store.complete_operation(&done.id, Utc::now()).await.unwrap();

    assert!(
        store
            .stale_operations(Utc::now() - Duration::hours(1))
            .await
            .unwrap()
            .is_empty()
    );
    let stale = store
        .stale_operations(Utc::now() + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, op.id);
}
