mod common;

use common::*;
use opflow::context::{ContextDiff, SnapshotTrigger, TaskContextPatch, TaskContextStore};
use opflow::error::StoreError;
use opflow::storage::{self, Scope, SqliteUnitOfWork, UnitOfWork};
use opflow::workflow::Task;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

async fn seeded(store: &SqliteUnitOfWork, tenant_id: Option<Uuid>) -> Uuid {
    let task = Task::new(Uuid::new_v4(), tenant_id, Map::new());
    let id = task.id;
    storage::run(store, move |repos| Box::pin(async move { repos.insert_task(&task).await }))
        .await
        .unwrap();
    id
}

fn contexts(store: &SqliteUnitOfWork) -> TaskContextStore {
    let uow: Arc<dyn UnitOfWork> = Arc::new(store.clone());
    TaskContextStore::new(uow).with_retry(8, Duration::from_millis(1))
}

#[tokio::test]
async fn patches_bump_the_version_by_one() {
    let store = SqliteUnitOfWork::in_memory().await.unwrap();
    let task_id = seeded(&store, None).await;
    let contexts = contexts(&store);

    let initial = contexts.initialize_state(task_id).await.unwrap();
    assert_eq!(initial.version, 1);
    assert!(initial.data.is_empty());

    let patch = TaskContextPatch::new(task_id, "detect", 1, ContextDiff::new().set("a.b", json!(5)));
    let applied = contexts.apply_patch(patch).await.unwrap();
    assert_eq!((applied.before_version, applied.after_version), (1, 2));

    let state = contexts.get_state(task_id).await.unwrap();
    assert_eq!(state.version, 2);
    assert_eq!(Value::Object(state.data), json!({"a": {"b": 5}}));

    let patch = TaskContextPatch::new(task_id, "detect", 2, ContextDiff::new().unset("a.b"));
    contexts.apply_patch(patch).await.unwrap();
    let state = contexts.get_state(task_id).await.unwrap();
    assert_eq!(state.version, 3);
    assert_eq!(Value::Object(state.data), json!({"a": {}}));
}

#[tokio::test]
async fn stale_patch_conflicts_and_changes_nothing() {
    let store = SqliteUnitOfWork::in_memory().await.unwrap();
    let task_id = seeded(&store, None).await;
    let contexts = contexts(&store);
    contexts.initialize_state(task_id).await.unwrap();

    let first = TaskContextPatch::new(task_id, "a", 1, ContextDiff::new().set("shared.x", json!(1)));
    contexts.apply_patch(first).await.unwrap();

    let stale = TaskContextPatch::new(task_id, "b", 1, ContextDiff::new().set("shared.x", json!(2)));
    let err = contexts.apply_patch(stale).await.unwrap_err();
    assert!(err.is_version_conflict());
    assert_eq!(err.to_string(), "task context version conflict");

    let state = contexts.get_state(task_id).await.unwrap();
    assert_eq!(state.version, 2);
    assert_eq!(state.data["shared"]["x"], json!(1));
    assert_eq!(contexts.list_patches(task_id, 0, 0).await.unwrap().total, 1);
}

#[tokio::test]
async fn snapshot_every_twenty_versions() {
    let store = SqliteUnitOfWork::in_memory().await.unwrap();
    let task_id = seeded(&store, None).await;
    let contexts = contexts(&store);
    contexts.initialize_state(task_id).await.unwrap();

    for i in 0..20 {
        let diff = ContextDiff::new().set(format!("shared.step{}", i), json!(i));
        contexts.apply_with_retry(task_id, "writer", diff).await.unwrap();
    }

    let state = contexts.get_state(task_id).await.unwrap();
    assert_eq!(state.version, 21);
    let snapshots = contexts.list_snapshots(task_id).await.unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].version, 20);
    assert_eq!(snapshots[0].trigger, SnapshotTrigger::Periodic);
    assert!(snapshots[0].data["shared"].get("step19").is_none());
    assert_eq!(snapshots[0].data["shared"]["step18"], json!(18));

    let manual = contexts.create_snapshot(task_id).await.unwrap();
    assert_eq!(manual.version, 21);
    assert_eq!(manual.trigger, SnapshotTrigger::Manual);
    assert_eq!(contexts.list_snapshots(task_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn patch_pages_are_newest_first() {
    let store = SqliteUnitOfWork::in_memory().await.unwrap();
    let task_id = seeded(&store, None).await;
    let contexts = contexts(&store);
    contexts.initialize_state(task_id).await.unwrap();

    for i in 0..5 {
        let diff = ContextDiff::new().set("shared.counter", json!(i));
        contexts.apply_with_retry(task_id, &format!("n{}", i), diff).await.unwrap();
    }

    let page = contexts.list_patches(task_id, 2, 1).await.unwrap();
    assert_eq!(page.total, 5);
    let versions: Vec<i64> = page.patches.iter().map(|p| p.after_version).collect();
    assert_eq!(versions, vec![5, 4]);
    assert_eq!(page.patches[0].writer_node_key, "n3");

    // Non-positive limit falls back to the default page size
    let all = contexts.list_patches(task_id, -1, -3).await.unwrap();
    assert_eq!(all.patches.len(), 5);
}

#[tokio::test]
async fn other_tenants_tasks_are_invisible() {
    let store = SqliteUnitOfWork::in_memory().await.unwrap();
    let owner = Uuid::new_v4();
    let task_id = seeded(&store, Some(owner)).await;
    contexts(&store).initialize_state(task_id).await.unwrap();

    let own = contexts(&store.scoped(Scope::tenant(owner)));
    assert_eq!(own.get_state(task_id).await.unwrap().version, 1);

    let stranger = contexts(&store.scoped(Scope::tenant(Uuid::new_v4())));
    assert!(matches!(
        stranger.get_state(task_id).await,
        Err(StoreError::NotFound { entity: "task context", .. })
    ));
    assert_eq!(stranger.list_patches(task_id, 10, 0).await.unwrap().total, 0);
}

#[tokio::test]
async fn initialize_requires_a_visible_task() {
    let store = SqliteUnitOfWork::in_memory().await.unwrap();
    let err = contexts(&store).initialize_state(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { entity: "task", .. }));
}

#[tokio::test]
async fn concurrent_writers_all_land_on_a_file_database() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("context.db").display());
    let store = SqliteUnitOfWork::connect(&url).await.unwrap();
    let task_id = seeded(&store, None).await;
    let contexts = contexts(&store);
    contexts.initialize_state(task_id).await.unwrap();

    let mut writers = tokio::task::JoinSet::new();
    for i in 0..8 {
        let contexts = contexts.clone();
        writers.spawn(async move {
            let diff = ContextDiff::new().set(format!("nodes.w{}.status", i), json!("success"));
            contexts.apply_with_retry(task_id, &format!("w{}", i), diff).await
        });
    }
    while let Some(joined) = writers.join_next().await {
        joined.unwrap().unwrap();
    }

    let state = contexts.get_state(task_id).await.unwrap();
    assert_eq!(state.version, 9);
    assert_eq!(state.data["nodes"].as_object().map(|m| m.len()), Some(8));

    let page = contexts.list_patches(task_id, 100, 0).await.unwrap();
    let mut versions: Vec<i64> = page.patches.iter().map(|p| p.after_version).collect();
    versions.sort();
    assert_eq!(versions, (2..=9).collect::<Vec<_>>());
}

#[tokio::test]
async fn engine_harness_shares_the_context_store() {
    let h = harness().await;
    let wf = workflow(vec![node("only", None)], vec![]);
    let mut task = h.task(&wf, Map::new()).await;
    h.engine.execute(&wf, &mut task).await.unwrap();

    let snapshot = h.engine.contexts().create_snapshot(task.id).await.unwrap();
    assert_eq!(snapshot.version, 2);
    assert_eq!(snapshot.data["nodes"]["only"]["status"], json!("success"));
}
