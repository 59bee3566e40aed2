//! Cluster-replicated store variant backed by etcd.
//!
//! The network map lives under `{namespace}/networks/`, one key per network
//! holding the JSON host set; intent sets live under `{namespace}/intents/`.
//! Mutations serialize on etcd's lock service, one lock key per network
//! name, and change events are not raised by the mutating process directly:
//! every process, including the originator, observes them through a watch on
//! the `networks/` prefix. Intent keys sit outside the watched prefix, so
//! intent writes never produce an event of their own.

use super::config::StoreConfig;
use super::{DelegateHandle, DelegateSlot, NetworkStore, NetworkStoreDelegate};
use crate::error::{Error, Result};
use crate::intent::ConnectivityIntent;
use crate::types::{HostId, NetworkEvent, NetworkEventType};
use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, EventType, GetOptions, LockOptions, Txn, TxnOp, WatchOptions,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const TARGET: &str = "netmesh::store::distributed";

/// A held per-network lock: the granted lock key plus the lease that bounds
/// its lifetime if this process dies while holding it.
struct NetworkLock {
    key: Vec<u8>,
    lease_id: i64,
}

/// etcd-backed [`NetworkStore`] shared by every process in the cluster.
pub struct DistributedNetworkStore {
    client: Client,
    config: StoreConfig,
    delegate: Arc<DelegateSlot>,
    watch_task: Mutex<Option<JoinHandle<()>>>,
}

impl DistributedNetworkStore {
    /// Connects to etcd and starts the change-feed watcher.
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        let client = Client::connect(&config.etcd_endpoints, None).await?;
        let delegate = Arc::new(DelegateSlot::default());

        let watch_task = spawn_watch_task(
            client.clone(),
            format!("{}/networks/", config.namespace),
            Arc::clone(&delegate),
            config.reconnect_delay,
        );

        info!(
            target: TARGET,
            endpoints = ?config.etcd_endpoints,
            namespace = %config.namespace,
            "Started"
        );

        Ok(Self {
            client,
            config,
            delegate,
            watch_task: Mutex::new(Some(watch_task)),
        })
    }

    /// Stops the change-feed watcher. Pending events are dropped.
    pub fn shutdown(&self) {
        if let Some(task) = self.watch_task.lock().take() {
            task.abort();
            info!(target: TARGET, "Stopped");
        }
    }

    fn networks_prefix(&self) -> String {
        format!("{}/networks/", self.config.namespace)
    }

    fn network_key(&self, network: &str) -> String {
        format!("{}{}", self.networks_prefix(), network)
    }

    fn intents_key(&self, network: &str) -> String {
        format!("{}/intents/{}", self.config.namespace, network)
    }

    fn lock_key(&self, network: &str) -> String {
        format!("{}/locks/{}", self.config.namespace, network)
    }

    /// Acquires the exclusive per-network lock, bounded by the configured
    /// deadline. The lock rides on a fresh lease so it cannot outlive a
    /// crashed holder beyond `lock_ttl`.
    async fn lock_network(&self, network: &str) -> Result<NetworkLock> {
        let mut client = self.client.clone();
        let lease_id = client.lease_grant(self.config.lock_ttl, None).await?.id();
        let options = LockOptions::new().with_lease(lease_id);
        let acquire = client.lock(self.lock_key(network), Some(options));

        let response = match self.config.lock_timeout {
            Some(deadline) => match tokio::time::timeout(deadline, acquire).await {
                Ok(acquired) => acquired,
                Err(_) => {
                    // Revoking the lease also releases a lock the server may
                    // have granted after the deadline fired.
                    let _ = client.lease_revoke(lease_id).await;
                    return Err(Error::LockTimeout {
                        network: network.to_string(),
                    });
                }
            },
            None => acquire.await,
        };

        match response {
            Ok(resp) => Ok(NetworkLock {
                key: resp.key().to_vec(),
                lease_id,
            }),
            Err(e) => {
                let _ = client.lease_revoke(lease_id).await;
                Err(e.into())
            }
        }
    }

    /// Releases a lock taken by [`Self::lock_network`]. Runs on every exit
    /// path of a mutation; a release failure is logged, not surfaced, since
    /// the lease TTL reclaims the lock either way.
    async fn unlock_network(&self, lock: NetworkLock) {
        let mut client = self.client.clone();
        if let Err(e) = client.unlock(lock.key).await {
            warn!(target: TARGET, error = %e, "Failed to release network lock");
        }
        if let Err(e) = client.lease_revoke(lock.lease_id).await {
            warn!(target: TARGET, error = %e, "Failed to revoke lock lease");
        }
    }

    async fn read_hosts(&self, network: &str) -> Result<BTreeSet<HostId>> {
        let mut client = self.client.clone();
        let resp = client.get(self.network_key(network), None).await?;
        let kv = resp
            .kvs()
            .first()
            .ok_or_else(|| Error::not_found(network))?;
        Ok(serde_json::from_slice(kv.value())?)
    }

    async fn write_hosts(&self, network: &str, hosts: &BTreeSet<HostId>) -> Result<()> {
        let mut client = self.client.clone();
        client
            .put(self.network_key(network), serde_json::to_vec(hosts)?, None)
            .await?;
        Ok(())
    }

    async fn read_intents(&self, network: &str) -> Result<BTreeSet<ConnectivityIntent>> {
        let mut client = self.client.clone();
        let resp = client.get(self.intents_key(network), None).await?;
        let kv = resp
            .kvs()
            .first()
            .ok_or_else(|| Error::not_found(network))?;
        Ok(serde_json::from_slice(kv.value())?)
    }

    async fn write_intents(
        &self,
        network: &str,
        intents: &BTreeSet<ConnectivityIntent>,
    ) -> Result<()> {
        let mut client = self.client.clone();
        client
            .put(self.intents_key(network), serde_json::to_vec(intents)?, None)
            .await?;
        Ok(())
    }

    async fn put_network_locked(&self, network: &str) -> Result<()> {
        let mut client = self.client.clone();
        let empty_hosts = serde_json::to_vec(&BTreeSet::<HostId>::new())?;
        let empty_intents = serde_json::to_vec(&BTreeSet::<ConnectivityIntent>::new())?;

        // Guarded on first creation: a repeat call writes nothing, so the
        // watch feed sees no spurious event.
        let txn = Txn::new()
            .when(vec![Compare::create_revision(
                self.network_key(network),
                CompareOp::Equal,
                0,
            )])
            .and_then(vec![
                TxnOp::put(self.network_key(network), empty_hosts, None),
                TxnOp::put(self.intents_key(network), empty_intents, None),
            ]);

        let resp = client.txn(txn).await?;
        if resp.succeeded() {
            debug!(target: TARGET, network = %network, "Created network");
        } else {
            debug!(target: TARGET, network = %network, "Network already exists");
        }
        Ok(())
    }

    async fn remove_network_locked(&self, network: &str) -> Result<()> {
        let mut client = self.client.clone();
        // One transaction drops both sets, so no reader observes a network
        // whose intent set is already gone.
        let txn = Txn::new().and_then(vec![
            TxnOp::delete(self.network_key(network), None),
            TxnOp::delete(self.intents_key(network), None),
        ]);
        client.txn(txn).await?;
        debug!(target: TARGET, network = %network, "Removed network");
        Ok(())
    }

    async fn add_host_locked(&self, network: &str, host: &HostId) -> Result<BTreeSet<HostId>> {
        let mut hosts = self.read_hosts(network).await?;
        if !hosts.insert(host.clone()) {
            return Ok(BTreeSet::new());
        }
        self.write_hosts(network, &hosts).await?;
        debug!(target: TARGET, network = %network, host = %host, "Added host");
        Ok(hosts)
    }

    async fn remove_host_locked(&self, network: &str, host: &HostId) -> Result<()> {
        let mut hosts = self.read_hosts(network).await?;
        if !hosts.remove(host) {
            return Ok(());
        }
        self.write_hosts(network, &hosts).await?;
        debug!(target: TARGET, network = %network, host = %host, "Removed host");
        Ok(())
    }

    async fn add_intents_locked(
        &self,
        network: &str,
        intents: BTreeSet<ConnectivityIntent>,
    ) -> Result<()> {
        let mut existing = self.read_intents(network).await?;
        let before = existing.len();
        existing.extend(intents);
        if existing.len() != before {
            self.write_intents(network, &existing).await?;
        }
        Ok(())
    }

    async fn remove_intents_by_host_locked(
        &self,
        network: &str,
        host: &HostId,
    ) -> Result<BTreeSet<ConnectivityIntent>> {
        let existing = self.read_intents(network).await?;
        let (matching, remaining): (BTreeSet<_>, BTreeSet<_>) = existing
            .into_iter()
            .partition(|intent| intent.involves(host));
        if !matching.is_empty() {
            self.write_intents(network, &remaining).await?;
        }
        Ok(matching)
    }

    async fn remove_all_intents_locked(
        &self,
        network: &str,
    ) -> Result<BTreeSet<ConnectivityIntent>> {
        let existing = self.read_intents(network).await?;
        if !existing.is_empty() {
            // The key stays in place, emptied: the intent set exists for as
            // long as the network does.
            self.write_intents(network, &BTreeSet::new()).await?;
        }
        Ok(existing)
    }
}

impl Drop for DistributedNetworkStore {
    fn drop(&mut self) {
        if let Some(task) = self.watch_task.lock().take() {
            task.abort();
        }
    }
}

#[async_trait]
impl NetworkStore for DistributedNetworkStore {
    async fn put_network(&self, network: &str) -> Result<()> {
        let lock = self.lock_network(network).await?;
        let result = self.put_network_locked(network).await;
        self.unlock_network(lock).await;
        result
    }

    async fn remove_network(&self, network: &str) -> Result<()> {
        let lock = self.lock_network(network).await?;
        let result = self.remove_network_locked(network).await;
        self.unlock_network(lock).await;
        result
    }

    async fn networks(&self) -> Result<BTreeSet<String>> {
        let mut client = self.client.clone();
        let prefix = self.networks_prefix();
        let resp = client
            .get(
                prefix.clone(),
                Some(GetOptions::new().with_prefix().with_keys_only()),
            )
            .await?;

        let mut names = BTreeSet::new();
        for kv in resp.kvs() {
            let key = kv.key_str()?;
            if let Some(name) = key.strip_prefix(prefix.as_str()) {
                names.insert(name.to_string());
            }
        }
        Ok(names)
    }

    async fn add_host(&self, network: &str, host: &HostId) -> Result<BTreeSet<HostId>> {
        let lock = self.lock_network(network).await?;
        let result = self.add_host_locked(network, host).await;
        self.unlock_network(lock).await;
        result
    }

    async fn remove_host(&self, network: &str, host: &HostId) -> Result<()> {
        let lock = self.lock_network(network).await?;
        let result = self.remove_host_locked(network, host).await;
        self.unlock_network(lock).await;
        result
    }

    async fn hosts(&self, network: &str) -> Result<BTreeSet<HostId>> {
        self.read_hosts(network).await
    }

    async fn add_intents(
        &self,
        network: &str,
        intents: BTreeSet<ConnectivityIntent>,
    ) -> Result<()> {
        // Fail-fast, before the lock: nothing is persisted for a batch that
        // carries any invalid intent.
        for intent in &intents {
            intent.validate()?;
        }
        let lock = self.lock_network(network).await?;
        let result = self.add_intents_locked(network, intents).await;
        self.unlock_network(lock).await;
        result
    }

    async fn remove_intents_by_host(
        &self,
        network: &str,
        host: &HostId,
    ) -> Result<BTreeSet<ConnectivityIntent>> {
        let lock = self.lock_network(network).await?;
        let result = self.remove_intents_by_host_locked(network, host).await;
        self.unlock_network(lock).await;
        result
    }

    async fn remove_all_intents(&self, network: &str) -> Result<BTreeSet<ConnectivityIntent>> {
        let lock = self.lock_network(network).await?;
        let result = self.remove_all_intents_locked(network).await;
        self.unlock_network(lock).await;
        result
    }

    fn register_delegate(&self, delegate: Arc<dyn NetworkStoreDelegate>) -> DelegateHandle {
        self.delegate.register(delegate)
    }

    fn unregister_delegate(&self, handle: DelegateHandle) {
        self.delegate.unregister(handle);
    }
}

/// Watches the `networks/` prefix and forwards every replicated map change
/// to the registered delegate, reconnecting after stream failures. This is
/// how a mutation committed on one process reaches every other process's
/// delegate.
fn spawn_watch_task(
    client: Client,
    prefix: String,
    delegate: Arc<DelegateSlot>,
    reconnect_delay: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut client = client;
        loop {
            let (mut watcher, mut stream) = match client
                .watch(prefix.clone(), Some(WatchOptions::new().with_prefix()))
                .await
            {
                Ok(pair) => pair,
                Err(e) => {
                    error!(target: TARGET, error = %e, "Failed to start watch, retrying");
                    tokio::time::sleep(reconnect_delay).await;
                    continue;
                }
            };

            debug!(target: TARGET, prefix = %prefix, "Watching network map");

            loop {
                match stream.message().await {
                    Ok(Some(resp)) => {
                        for event in resp.events() {
                            let Some(kv) = event.kv() else { continue };
                            let key = match kv.key_str() {
                                Ok(key) => key,
                                Err(e) => {
                                    warn!(target: TARGET, error = %e, "Invalid key encoding");
                                    continue;
                                }
                            };
                            let Some(network) = key.strip_prefix(prefix.as_str()) else {
                                continue;
                            };

                            let event_type = match event.event_type() {
                                EventType::Put if kv.create_revision() == kv.mod_revision() => {
                                    NetworkEventType::Added
                                }
                                EventType::Put => NetworkEventType::Updated,
                                EventType::Delete => NetworkEventType::Removed,
                            };
                            delegate.notify(NetworkEvent::new(event_type, network));
                        }
                    }
                    Ok(None) => {
                        warn!(target: TARGET, "Watch stream ended, reconnecting");
                        break;
                    }
                    Err(e) => {
                        error!(target: TARGET, error = %e, "Watch error, reconnecting");
                        break;
                    }
                }
            }

            let _ = watcher.cancel().await;
            tokio::time::sleep(reconnect_delay).await;
        }
    })
}
