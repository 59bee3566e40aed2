//! Per-network lock exclusivity under concurrent mutation.

use netmesh_core::{
    HostId, LocalNetworkStore, NetworkEvent, NetworkEventType, NetworkStore, NetworkStoreDelegate,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Default)]
struct RecordingDelegate {
    events: Mutex<Vec<NetworkEventType>>,
}

impl NetworkStoreDelegate for RecordingDelegate {
    fn notify(&self, event: NetworkEvent) {
        self.events.lock().push(event.event_type);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_to_one_network_all_land() {
    let store = Arc::new(LocalNetworkStore::new());
    let delegate = Arc::new(RecordingDelegate::default());
    store.register_delegate(delegate.clone());
    store.put_network("net1").await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..8 {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            store
                .add_host("net1", &HostId::new(format!("h{i}")))
                .await
                .unwrap()
        }));
    }
    for task in tasks {
        // Every add succeeds and reports a non-empty post-mutation set.
        assert!(!task.await.unwrap().is_empty());
    }

    let hosts = store.hosts("net1").await.unwrap();
    let expected: BTreeSet<HostId> = (0..8).map(|i| HostId::new(format!("h{i}"))).collect();
    assert_eq!(hosts, expected);

    // One ADDED for the network plus exactly one UPDATED per host: no event
    // lost or duplicated under contention.
    let events = delegate.events.lock();
    assert_eq!(events.len(), 9);
    assert_eq!(
        events
            .iter()
            .filter(|kind| **kind == NetworkEventType::Updated)
            .count(),
        8
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_emit_one_event() {
    let store = Arc::new(LocalNetworkStore::new());
    let delegate = Arc::new(RecordingDelegate::default());
    store.register_delegate(delegate.clone());

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            store.put_network("net1").await.unwrap()
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(store.networks().await.unwrap().len(), 1);
    assert_eq!(*delegate.events.lock(), vec![NetworkEventType::Added]);
}
