//! Mesh-delta and intent-lifecycle coordination above the store.
//!
//! The manager validates inputs, turns membership changes into connectivity
//! intent deltas, hands those to the external [`IntentService`], and
//! republishes store change events to registered listeners. It never touches
//! the store's internals, only its contract operations.

use crate::error::{require_non_empty, Result};
use crate::intent::{ConnectivityIntent, IntentService};
use crate::store::{DelegateHandle, NetworkStore, NetworkStoreDelegate};
use crate::types::{HostId, NetworkEvent};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

const TARGET: &str = "netmesh::manager";

/// Externally registered recipient of republished network events.
pub trait NetworkListener: Send + Sync {
    fn event(&self, event: &NetworkEvent);
}

/// Fan-out registry for [`NetworkListener`]s. The store itself stays
/// single-slot; this is the layer where multiple observers attach.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<Arc<dyn NetworkListener>>>,
}

impl ListenerRegistry {
    pub fn add_listener(&self, listener: Arc<dyn NetworkListener>) {
        self.listeners.write().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn NetworkListener>) {
        self.listeners
            .write()
            .retain(|registered| !Arc::ptr_eq(registered, listener));
    }

    /// Delivers `event` to every listener, in registration order. Called
    /// from the store delegate, so events arrive in emission order.
    pub fn post(&self, event: &NetworkEvent) {
        let listeners: Vec<_> = self.listeners.read().iter().cloned().collect();
        for listener in listeners {
            listener.event(event);
        }
    }
}

/// Republishes every store event to the listener registry.
struct InternalStoreDelegate {
    listeners: Arc<ListenerRegistry>,
}

impl NetworkStoreDelegate for InternalStoreDelegate {
    fn notify(&self, event: NetworkEvent) {
        self.listeners.post(&event);
    }
}

/// Coordinates network membership and the full-mesh intent lifecycle.
pub struct NetworkManager<S: NetworkStore + ?Sized> {
    store: Arc<S>,
    intent_service: Arc<dyn IntentService>,
    listeners: Arc<ListenerRegistry>,
    delegate_handle: Mutex<Option<DelegateHandle>>,
}

impl<S: NetworkStore + ?Sized> NetworkManager<S> {
    pub fn new(store: Arc<S>, intent_service: Arc<dyn IntentService>) -> Self {
        Self {
            store,
            intent_service,
            listeners: Arc::new(ListenerRegistry::default()),
            delegate_handle: Mutex::new(None),
        }
    }

    /// Hooks the manager into the store's change feed.
    pub fn activate(&self) {
        let delegate = Arc::new(InternalStoreDelegate {
            listeners: Arc::clone(&self.listeners),
        });
        let handle = self.store.register_delegate(delegate);
        *self.delegate_handle.lock() = Some(handle);
        info!(target: TARGET, "Started");
    }

    /// Detaches from the store's change feed.
    pub fn deactivate(&self) {
        if let Some(handle) = self.delegate_handle.lock().take() {
            self.store.unregister_delegate(handle);
        }
        info!(target: TARGET, "Stopped");
    }

    pub async fn create_network(&self, network: &str) -> Result<()> {
        require_non_empty(network, "network name")?;
        self.store.put_network(network).await
    }

    /// Withdraws the network's intents first, then removes it: once the
    /// network is gone there is no bookkeeping left to locate them.
    pub async fn delete_network(&self, network: &str) -> Result<()> {
        require_non_empty(network, "network name")?;
        let withdrawn = self.store.remove_all_intents(network).await?;
        self.remove_from_mesh(withdrawn).await;
        self.store.remove_network(network).await
    }

    pub async fn networks(&self) -> Result<BTreeSet<String>> {
        self.store.networks().await
    }

    pub async fn add_host(&self, network: &str, host: &HostId) -> Result<()> {
        require_non_empty(network, "network name")?;
        require_non_empty(host.as_str(), "host id")?;
        let hosts = self.store.add_host(network, host).await?;
        let intents = self.add_to_mesh(host, &hosts).await;
        if !intents.is_empty() {
            self.store.add_intents(network, intents).await?;
        }
        Ok(())
    }

    pub async fn remove_host(&self, network: &str, host: &HostId) -> Result<()> {
        require_non_empty(network, "network name")?;
        require_non_empty(host.as_str(), "host id")?;
        self.store.remove_host(network, host).await?;
        let withdrawn = self.store.remove_intents_by_host(network, host).await?;
        self.remove_from_mesh(withdrawn).await;
        Ok(())
    }

    pub async fn hosts(&self, network: &str) -> Result<BTreeSet<HostId>> {
        require_non_empty(network, "network name")?;
        self.store.hosts(network).await
    }

    pub fn add_listener(&self, listener: Arc<dyn NetworkListener>) {
        self.listeners.add_listener(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn NetworkListener>) {
        self.listeners.remove_listener(listener);
    }

    /// Builds and submits one intent from `src` to every other member of
    /// the post-mutation host set. An empty set means the membership did not
    /// change, so no intents are built.
    async fn add_to_mesh(
        &self,
        src: &HostId,
        existing: &BTreeSet<HostId>,
    ) -> BTreeSet<ConnectivityIntent> {
        let mut submitted = BTreeSet::new();
        for dst in existing {
            if dst != src {
                let intent = ConnectivityIntent::between(src.clone(), dst.clone());
                self.intent_service.submit(intent.clone()).await;
                submitted.insert(intent);
            }
        }
        submitted
    }

    async fn remove_from_mesh(&self, intents: BTreeSet<ConnectivityIntent>) {
        for intent in intents {
            self.intent_service.withdraw(intent).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::intent::TrafficSelector;
    use crate::store::local::LocalNetworkStore;
    use crate::types::NetworkEventType;
    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingIntentService {
        submitted: Mutex<Vec<ConnectivityIntent>>,
        withdrawn: Mutex<Vec<ConnectivityIntent>>,
    }

    #[async_trait]
    impl IntentService for RecordingIntentService {
        async fn submit(&self, intent: ConnectivityIntent) {
            self.submitted.lock().push(intent);
        }

        async fn withdraw(&self, intent: ConnectivityIntent) {
            self.withdrawn.lock().push(intent);
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<(NetworkEventType, String)>>,
    }

    impl NetworkListener for RecordingListener {
        fn event(&self, event: &NetworkEvent) {
            self.events
                .lock()
                .push((event.event_type, event.network.clone()));
        }
    }

    fn manager() -> (
        NetworkManager<LocalNetworkStore>,
        Arc<LocalNetworkStore>,
        Arc<RecordingIntentService>,
    ) {
        let store = Arc::new(LocalNetworkStore::new());
        let intents = Arc::new(RecordingIntentService::default());
        let manager = NetworkManager::new(Arc::clone(&store), intents.clone());
        manager.activate();
        (manager, store, intents)
    }

    fn intent(a: &str, b: &str) -> ConnectivityIntent {
        ConnectivityIntent::between(HostId::from(a), HostId::from(b))
    }

    #[tokio::test]
    async fn adding_hosts_builds_the_full_mesh() {
        let (manager, store, intents) = manager();
        manager.create_network("net1").await.unwrap();

        manager.add_host("net1", &HostId::from("h1")).await.unwrap();
        manager.add_host("net1", &HostId::from("h2")).await.unwrap();
        manager.add_host("net1", &HostId::from("h3")).await.unwrap();

        let expected = BTreeSet::from([
            intent("h1", "h2"),
            intent("h1", "h3"),
            intent("h2", "h3"),
        ]);
        assert_eq!(store.remove_all_intents("net1").await.unwrap(), expected);
        assert_eq!(
            intents.submitted.lock().iter().cloned().collect::<BTreeSet<_>>(),
            expected
        );
    }

    #[tokio::test]
    async fn re_adding_a_host_submits_nothing() {
        let (manager, _, intents) = manager();
        manager.create_network("net1").await.unwrap();
        manager.add_host("net1", &HostId::from("h1")).await.unwrap();
        manager.add_host("net1", &HostId::from("h2")).await.unwrap();
        let submitted_before = intents.submitted.lock().len();

        manager.add_host("net1", &HostId::from("h2")).await.unwrap();

        assert_eq!(intents.submitted.lock().len(), submitted_before);
    }

    #[tokio::test]
    async fn removing_a_host_withdraws_only_its_intents() {
        let (manager, store, intents) = manager();
        manager.create_network("net1").await.unwrap();
        manager.add_host("net1", &HostId::from("h1")).await.unwrap();
        manager.add_host("net1", &HostId::from("h2")).await.unwrap();
        manager.add_host("net1", &HostId::from("h3")).await.unwrap();

        manager
            .remove_host("net1", &HostId::from("h2"))
            .await
            .unwrap();

        let withdrawn: BTreeSet<_> = intents.withdrawn.lock().iter().cloned().collect();
        assert_eq!(
            withdrawn,
            BTreeSet::from([intent("h1", "h2"), intent("h2", "h3")])
        );
        assert_eq!(
            store.hosts("net1").await.unwrap(),
            BTreeSet::from([HostId::from("h1"), HostId::from("h3")])
        );
        assert_eq!(
            store.remove_all_intents("net1").await.unwrap(),
            BTreeSet::from([intent("h1", "h3")])
        );
    }

    #[tokio::test]
    async fn deleting_a_network_withdraws_everything_first() {
        let (manager, store, intents) = manager();
        manager.create_network("net1").await.unwrap();
        manager.add_host("net1", &HostId::from("h1")).await.unwrap();
        manager.add_host("net1", &HostId::from("h2")).await.unwrap();
        manager.add_host("net1", &HostId::from("h3")).await.unwrap();

        manager.delete_network("net1").await.unwrap();

        assert_eq!(intents.withdrawn.lock().len(), 3);
        assert!(store.hosts("net1").await.unwrap_err().is_not_found());
        assert!(manager.networks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn listeners_see_events_in_emission_order() {
        let (manager, _, _) = manager();
        let listener = Arc::new(RecordingListener::default());
        manager.add_listener(listener.clone());

        manager.create_network("net1").await.unwrap();
        manager.add_host("net1", &HostId::from("h1")).await.unwrap();
        manager.delete_network("net1").await.unwrap();

        assert_eq!(
            *listener.events.lock(),
            vec![
                (NetworkEventType::Added, "net1".to_string()),
                (NetworkEventType::Updated, "net1".to_string()),
                (NetworkEventType::Removed, "net1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn removed_listener_hears_nothing_more() {
        let (manager, _, _) = manager();
        let listener = Arc::new(RecordingListener::default());
        let registered: Arc<dyn NetworkListener> = listener.clone();
        manager.add_listener(registered.clone());

        manager.create_network("net1").await.unwrap();
        manager.remove_listener(&registered);
        manager.create_network("net2").await.unwrap();

        assert_eq!(listener.events.lock().len(), 1);
    }

    #[tokio::test]
    async fn empty_identifiers_are_rejected() {
        let (manager, store, _) = manager();

        assert!(matches!(
            manager.create_network("  ").await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            manager.add_host("net1", &HostId::from("")).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(store.networks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_network_errors_propagate() {
        let (manager, _, intents) = manager();

        let err = manager
            .add_host("ghost", &HostId::from("h1"))
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert!(intents.submitted.lock().is_empty());
    }

    #[tokio::test]
    async fn mesh_uses_empty_selector_and_treatment() {
        let (manager, store, _) = manager();
        manager.create_network("net1").await.unwrap();
        manager.add_host("net1", &HostId::from("h1")).await.unwrap();
        manager.add_host("net1", &HostId::from("h2")).await.unwrap();

        let stored = store.remove_all_intents("net1").await.unwrap();
        let only = stored.iter().next().unwrap();
        assert_eq!(*only.selector(), TrafficSelector::empty());
        assert!(only.treatment().instructions.is_empty());
    }
}
