//! Service store behavior over both backends

use service_store::{
    Error, LogEntry, LogLevel, ServiceRecord, ServiceStatus, ServiceStore, SledBackend,
};
use std::sync::Arc;

fn record(name: &str) -> ServiceRecord {
    ServiceRecord::new(name, name, "go-service", name, serde_json::Map::new())
}

async fn stores() -> Vec<ServiceStore> {
    let sled = SledBackend::in_memory().await.unwrap();
    vec![
        ServiceStore::in_memory(),
        ServiceStore::with_backend(Arc::new(sled)),
    ]
}

#[smol_potat::test]
async fn test_create_get_and_duplicate() {
    for store in stores().await {
        let created = store.create(record("demo")).await.unwrap();
        let fetched = store.get(&created.id).await.unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.status, ServiceStatus::Creating);

        let err = store.create(created.clone()).await.unwrap_err();
        assert!(matches!(err, Error::ServiceExists(_)));
    }
}

#[smol_potat::test]
async fn test_log_history_keeps_emission_order() {
    for store in stores().await {
        let rec = store.create(record("ordered")).await.unwrap();
        let other = store.create(record("other")).await.unwrap();

        for i in 0..20 {
            store
                .append_log(&rec.id, &LogEntry::info(format!("line {i}")))
                .await
                .unwrap();
            store
                .append_log(&other.id, &LogEntry::error(format!("noise {i}")))
                .await
                .unwrap();
        }

        let history = store.history(&rec.id).await.unwrap();
        let messages: Vec<_> = history.iter().map(|e| e.message.clone()).collect();
        let expected: Vec<_> = (0..20).map(|i| format!("line {i}")).collect();
        assert_eq!(messages, expected);
        assert!(history.iter().all(|e| e.level == LogLevel::Info));
    }
}

#[smol_potat::test]
async fn test_append_to_unknown_service_fails() {
    let store = ServiceStore::in_memory();
    let err = store
        .append_log("missing", &LogEntry::info("hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ServiceNotFound(_)));
}

#[smol_potat::test]
async fn test_status_transitions_are_enforced() {
    let store = ServiceStore::in_memory();
    let rec = store.create(record("svc")).await.unwrap();

    let err = store
        .set_status(&rec.id, ServiceStatus::Inactive)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidStateTransition { .. }));

    store.set_status(&rec.id, ServiceStatus::Active).await.unwrap();
    store.set_status(&rec.id, ServiceStatus::Inactive).await.unwrap();
    let back = store.set_status(&rec.id, ServiceStatus::Active).await.unwrap();
    assert_eq!(back.status, ServiceStatus::Active);
}

#[smol_potat::test]
async fn test_mark_deleted_stamps_once_and_hides_from_list() {
    let store = ServiceStore::in_memory();
    let rec = store.create(record("gone")).await.unwrap();
    let kept = store.create(record("kept")).await.unwrap();

    let first = store.mark_deleted(&rec.id).await.unwrap();
    let stamp = first.deleted_at.expect("deletion timestamp");
    let second = store.mark_deleted(&rec.id).await.unwrap();
    assert_eq!(second.deleted_at, Some(stamp));

    let visible = store.list(false).await.unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id, kept.id);
    assert_eq!(store.list(true).await.unwrap().len(), 2);

    assert!(store.find_by_name("gone").await.unwrap().is_none());
    assert_eq!(store.find_by_name("kept").await.unwrap().unwrap().id, kept.id);
}

#[smol_potat::test]
async fn test_sled_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");

    let id = {
        let store = ServiceStore::open(&path).await.unwrap();
        let rec = store.create(record("durable")).await.unwrap();
        store
            .append_log(&rec.id, &LogEntry::success("created"))
            .await
            .unwrap();
        store.flush().await.unwrap();
        rec.id
    };

    let store = ServiceStore::open(&path).await.unwrap();
    let rec = store.get(&id).await.unwrap();
    assert_eq!(rec.name, "durable");
    let history = store.history(&id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].level, LogLevel::Success);
}

#[smol_potat::test]
async fn test_sequence_numbers_increase_per_service() {
    for store in stores().await {
        let a = store.create(record("a")).await.unwrap();
        let b = store.create(record("b")).await.unwrap();

        let mut seqs = Vec::new();
        for i in 0..10 {
            seqs.push(store.append_log(&a.id, &LogEntry::info(format!("a {i}"))).await.unwrap());
            store.append_log(&b.id, &LogEntry::info(format!("b {i}"))).await.unwrap();
        }
        assert!(seqs.windows(2).all(|w| w[0] < w[1]), "{seqs:?}");
    }
}
