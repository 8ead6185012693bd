//! Replay-then-tail and delivery isolation of the log hub

use service_store::{
    LogBroadcastHub, LogEntry, MemoryBackend, ServiceRecord, ServiceStore, StoreBackend,
};
use std::sync::Arc;

async fn hub_with_service() -> (LogBroadcastHub, String) {
    let store = Arc::new(ServiceStore::in_memory());
    let rec = store
        .create(ServiceRecord::new(
            "demo",
            "demo",
            "go-service",
            "demo",
            serde_json::Map::new(),
        ))
        .await
        .unwrap();
    (LogBroadcastHub::new(store), rec.id)
}

#[smol_potat::test]
async fn test_late_subscriber_gets_history_before_live_entries() {
    let (hub, id) = hub_with_service().await;

    for i in 0..5 {
        hub.publish(&id, LogEntry::info(format!("old {i}"))).await;
    }

    let sub = hub.subscribe(&id).await.unwrap();
    hub.publish(&id, LogEntry::info("new 0")).await;
    hub.publish(&id, LogEntry::info("new 1")).await;

    let mut seen = Vec::new();
    for _ in 0..7 {
        seen.push(sub.receiver.recv().await.unwrap().message);
    }
    assert_eq!(
        seen,
        vec!["old 0", "old 1", "old 2", "old 3", "old 4", "new 0", "new 1"]
    );
    assert!(sub.receiver.try_recv().is_err());
}

#[smol_potat::test]
async fn test_connect_and_disconnect_are_idempotent() {
    let (hub, id) = hub_with_service().await;
    hub.publish(&id, LogEntry::info("first")).await;

    let (tx, rx) = async_channel::unbounded();
    assert!(hub.connect(&id, "client-1", tx.clone()).await.unwrap());
    assert!(!hub.connect(&id, "client-1", tx).await.unwrap());
    assert_eq!(hub.subscriber_count(&id).await, 1);

    // History was replayed exactly once
    assert_eq!(rx.recv().await.unwrap().message, "first");
    assert!(rx.try_recv().is_err());

    assert!(hub.disconnect(&id, "client-1").await);
    assert!(!hub.disconnect(&id, "client-1").await);
    assert!(!hub.disconnect(&id, "never-connected").await);
    assert_eq!(hub.subscriber_count(&id).await, 0);
}

#[smol_potat::test]
async fn test_closed_subscriber_does_not_block_others() {
    let (hub, id) = hub_with_service().await;

    let gone = hub.subscribe(&id).await.unwrap();
    let alive = hub.subscribe(&id).await.unwrap();
    drop(gone.receiver);

    let delivered = hub.broadcast(&LogEntry::warning("careful"), &id).await;

    assert_eq!(delivered, 1);
    assert_eq!(alive.receiver.recv().await.unwrap().message, "careful");
    assert_eq!(hub.subscriber_count(&id).await, 1);
}

/// Memory backend whose log appends always fail
struct ReadOnlyLogs(MemoryBackend);

#[async_trait::async_trait]
impl StoreBackend for ReadOnlyLogs {
    async fn init(&self) -> service_store::Result<()> {
        self.0.init().await
    }
    async fn put_record(&self, record: &ServiceRecord) -> service_store::Result<()> {
        self.0.put_record(record).await
    }
    async fn get_record(&self, id: &str) -> service_store::Result<Option<ServiceRecord>> {
        self.0.get_record(id).await
    }
    async fn list_records(&self) -> service_store::Result<Vec<ServiceRecord>> {
        self.0.list_records().await
    }
    async fn append_log(&self, _: &str, _: &LogEntry) -> service_store::Result<u64> {
        Err(std::io::Error::other("disk full").into())
    }
    async fn read_logs(&self, id: &str) -> service_store::Result<Vec<LogEntry>> {
        self.0.read_logs(id).await
    }
}

#[smol_potat::test]
async fn test_persistence_failure_still_delivers_live() {
    let store = Arc::new(ServiceStore::with_backend(Arc::new(ReadOnlyLogs(
        MemoryBackend::new(),
    ))));
    let rec = store
        .create(ServiceRecord::new("x", "x", "go-service", "x", serde_json::Map::new()))
        .await
        .unwrap();
    let hub = LogBroadcastHub::new(store);
    let sub = hub.subscribe(&rec.id).await.unwrap();

    let seq = hub.publish(&rec.id, LogEntry::info("unpersisted")).await;

    assert!(seq.is_none());
    assert_eq!(sub.receiver.recv().await.unwrap().message, "unpersisted");
    assert!(hub.store().history(&rec.id).await.unwrap().is_empty());
}

#[smol_potat::test]
async fn test_concurrent_publishers_keep_per_service_order() {
    let (hub, id) = hub_with_service().await;
    let hub = Arc::new(hub);

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let hub = hub.clone();
            let id = id.clone();
            smol::spawn(async move {
                for i in 0..25 {
                    hub.publish(&id, LogEntry::info(format!("{w}:{i}"))).await;
                }
            })
        })
        .collect();
    for writer in writers {
        writer.await;
    }

    let history = hub.store().history(&id).await.unwrap();
    assert_eq!(history.len(), 100);
    for w in 0..4 {
        let mine: Vec<usize> = history
            .iter()
            .filter_map(|e| {
                let (writer, seq) = e.message.split_once(':')?;
                (writer == w.to_string()).then(|| seq.parse().ok()).flatten()
            })
            .collect();
        assert_eq!(mine, (0..25).collect::<Vec<_>>());
    }
}

#[smol_potat::test]
async fn test_idle_topics_are_forgotten() {
    let (hub, id) = hub_with_service().await;

    hub.publish(&id, LogEntry::info("nobody listening")).await;
    hub.broadcast(&LogEntry::info("still nobody"), "other-service").await;
    assert_eq!(hub.topic_count(), 0);

    let sub = hub.subscribe(&id).await.unwrap();
    assert_eq!(hub.topic_count(), 1);
    assert!(hub.disconnect(&id, &sub.id).await);
    assert_eq!(hub.topic_count(), 0);

    // A subscriber that went away is pruned by the next delivery
    let sub = hub.subscribe(&id).await.unwrap();
    drop(sub);
    hub.publish(&id, LogEntry::info("after close")).await;
    assert_eq!(hub.topic_count(), 0);

    // History is unaffected by forgetting the topic
    let sub = hub.subscribe(&id).await.unwrap();
    let messages: Vec<_> = (0..2)
        .map(|_| sub.receiver.try_recv().unwrap().message)
        .collect();
    assert_eq!(messages, vec!["nobody listening", "after close"]);
}
