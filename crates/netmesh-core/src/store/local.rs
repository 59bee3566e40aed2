//! Single-process, in-memory store variant.

use super::{DelegateHandle, DelegateSlot, NetworkStore, NetworkStoreDelegate};
use crate::error::{Error, Result};
use crate::intent::ConnectivityIntent;
use crate::types::{HostId, NetworkEvent, NetworkEventType};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Host and intent sets of one network. Held as a single map value so the
/// two sets are created and destroyed together.
#[derive(Debug, Default)]
struct NetworkRecord {
    hosts: BTreeSet<HostId>,
    intents: BTreeSet<ConnectivityIntent>,
}

/// In-memory [`NetworkStore`] for a single process.
///
/// Map entries double as the per-network critical section: a mutation holds
/// the entry guard for the whole read-modify-write, and the delegate is
/// notified before the guard is released, so same-network events arrive in
/// mutation order. Operations on distinct networks do not block each other.
#[derive(Default)]
pub struct LocalNetworkStore {
    networks: DashMap<String, NetworkRecord>,
    delegate: DelegateSlot,
}

impl LocalNetworkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NetworkStore for LocalNetworkStore {
    async fn put_network(&self, network: &str) -> Result<()> {
        match self.networks.entry(network.to_string()) {
            Entry::Occupied(_) => {}
            Entry::Vacant(slot) => {
                slot.insert(NetworkRecord::default());
                self.delegate
                    .notify(NetworkEvent::new(NetworkEventType::Added, network));
            }
        }
        Ok(())
    }

    async fn remove_network(&self, network: &str) -> Result<()> {
        if self.networks.remove(network).is_some() {
            self.delegate
                .notify(NetworkEvent::new(NetworkEventType::Removed, network));
        }
        Ok(())
    }

    async fn networks(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .networks
            .iter()
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn add_host(&self, network: &str, host: &HostId) -> Result<BTreeSet<HostId>> {
        let mut record = self
            .networks
            .get_mut(network)
            .ok_or_else(|| Error::not_found(network))?;
        if record.hosts.insert(host.clone()) {
            let hosts = record.hosts.clone();
            self.delegate
                .notify(NetworkEvent::new(NetworkEventType::Updated, network));
            Ok(hosts)
        } else {
            Ok(BTreeSet::new())
        }
    }

    async fn remove_host(&self, network: &str, host: &HostId) -> Result<()> {
        let mut record = self
            .networks
            .get_mut(network)
            .ok_or_else(|| Error::not_found(network))?;
        if record.hosts.remove(host) {
            self.delegate
                .notify(NetworkEvent::new(NetworkEventType::Updated, network));
        }
        Ok(())
    }

    async fn hosts(&self, network: &str) -> Result<BTreeSet<HostId>> {
        let record = self
            .networks
            .get(network)
            .ok_or_else(|| Error::not_found(network))?;
        Ok(record.hosts.clone())
    }

    async fn add_intents(
        &self,
        network: &str,
        intents: BTreeSet<ConnectivityIntent>,
    ) -> Result<()> {
        for intent in &intents {
            intent.validate()?;
        }
        let mut record = self
            .networks
            .get_mut(network)
            .ok_or_else(|| Error::not_found(network))?;
        record.intents.extend(intents);
        Ok(())
    }

    async fn remove_intents_by_host(
        &self,
        network: &str,
        host: &HostId,
    ) -> Result<BTreeSet<ConnectivityIntent>> {
        let mut record = self
            .networks
            .get_mut(network)
            .ok_or_else(|| Error::not_found(network))?;
        let (matching, remaining): (BTreeSet<_>, BTreeSet<_>) = std::mem::take(&mut record.intents)
            .into_iter()
            .partition(|intent| intent.involves(host));
        record.intents = remaining;
        Ok(matching)
    }

    async fn remove_all_intents(&self, network: &str) -> Result<BTreeSet<ConnectivityIntent>> {
        let mut record = self
            .networks
            .get_mut(network)
            .ok_or_else(|| Error::not_found(network))?;
        Ok(std::mem::take(&mut record.intents))
    }

    fn register_delegate(&self, delegate: Arc<dyn NetworkStoreDelegate>) -> DelegateHandle {
        self.delegate.register(delegate)
    }

    fn unregister_delegate(&self, handle: DelegateHandle) {
        self.delegate.unregister(handle);
    }
}
