use std::sync::Arc;

use exam_core::model::{SessionId, TimerState, Violation, ViolationKind, ViolationLedger};
use exam_core::time::fixed_now;
use storage::repository::KeyValueStore;
use storage::session_store::{ProgressEntryRecord, ProgressRecord, SessionStore};
use storage::sqlite::SqliteRepository;

async fn connect(name: &str) -> SqliteRepository {
    let repo = SqliteRepository::connect(&format!("sqlite:file:{name}?mode=memory&cache=shared"))
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

#[tokio::test]
async fn sqlite_kv_set_overwrites_and_removes() {
    let repo = connect("memdb_kv_basic").await;

    repo.set("exam:a:timer", "1").await.unwrap();
    repo.set("exam:a:timer", "2").await.unwrap();
    assert_eq!(repo.get("exam:a:timer").await.unwrap().as_deref(), Some("2"));

    repo.remove("exam:a:timer").await.unwrap();
    assert_eq!(repo.get("exam:a:timer").await.unwrap(), None);
}

#[tokio::test]
async fn sqlite_prefix_scan_is_exact() {
    let repo = connect("memdb_kv_prefix").await;
    for key in ["exam:s_1:progress", "exam:s_1:timer", "exam:sx1:timer", "exam:S_1:timer"] {
        repo.set(key, "x").await.unwrap();
    }

    let keys = repo.keys_with_prefix("exam:s_1:").await.unwrap();
    assert_eq!(keys, vec!["exam:s_1:progress", "exam:s_1:timer"]);
}

#[tokio::test]
async fn session_records_survive_reconnect() {
    let url = "sqlite:file:memdb_session_reload?mode=memory&cache=shared";
    let first = SqliteRepository::connect(url).await.unwrap();
    first.migrate().await.unwrap();
    let session_id = SessionId::new("reload").unwrap();

    let store = SessionStore::new(Arc::new(first.clone()), session_id.clone());
    let mut ledger = ViolationLedger::new();
    for _ in 0..5 {
        ledger.append(Violation::new(ViolationKind::WindowBlurred, fixed_now()));
    }
    store.save_violations(&ledger).await.unwrap();
    store
        .save_timer(&TimerState::started(fixed_now()))
        .await
        .unwrap();
    store
        .save_progress(&ProgressRecord {
            current_index: 3,
            entries: vec![ProgressEntryRecord {
                question_id: "q1".parse().unwrap(),
                status: exam_core::model::QuestionStatus::Answered,
                selected_option: Some(2),
            }],
        })
        .await
        .unwrap();

    // a second pool over the same shared-cache database sees the records
    let second = SqliteRepository::connect(url).await.unwrap();
    second.migrate().await.unwrap();
    let reloaded = SessionStore::new(Arc::new(second), session_id);

    assert_eq!(
        reloaded.load_violations().await.unwrap().unwrap().warning_count(),
        5
    );
    assert_eq!(
        reloaded.load_timer().await.unwrap(),
        Some(TimerState::started(fixed_now()))
    );
    assert_eq!(reloaded.load_progress().await.unwrap().unwrap().current_index, 3);

    reloaded.clear_all().await.unwrap();
    assert!(first.keys_with_prefix("exam:reload:").await.unwrap().is_empty());
    drop(first);
}
