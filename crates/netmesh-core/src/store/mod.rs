//! Network membership storage.
//!
//! Two variants implement the same [`NetworkStore`] contract:
//! [`local::LocalNetworkStore`] keeps the map in process memory, while
//! [`distributed::DistributedNetworkStore`] replicates it through etcd with
//! per-network mutual exclusion and cluster-wide change propagation.

pub mod config;
pub mod distributed;
pub mod local;

use crate::error::Result;
use crate::intent::ConnectivityIntent;
use crate::types::{HostId, NetworkEvent};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Receives change events from a store.
///
/// A store holds at most one delegate at a time. Notification may run inside
/// the store's per-network critical section, so implementations must not call
/// back into the store.
pub trait NetworkStoreDelegate: Send + Sync {
    fn notify(&self, event: NetworkEvent);
}

/// Identifies one delegate registration. Unregistering with a stale handle
/// (after another registration replaced it) does nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelegateHandle(u64);

/// Replicated mapping from network name to host set and intent set.
///
/// All mutating operations on one network name are serialized across
/// concurrent callers; operations on distinct names proceed independently.
/// Every getter returns an owned snapshot, never a live reference into the
/// store. State-changing mutations deliver exactly one [`NetworkEvent`] to
/// the registered delegate, in per-network mutation order; no-ops deliver
/// nothing.
#[async_trait]
pub trait NetworkStore: Send + Sync {
    /// Creates `network` with empty host and intent sets. Idempotent: a
    /// repeat call mutates nothing and emits nothing.
    async fn put_network(&self, network: &str) -> Result<()>;

    /// Deletes `network` together with its intent set. Safe no-op if the
    /// network does not exist.
    async fn remove_network(&self, network: &str) -> Result<()>;

    /// Snapshot of all network names.
    async fn networks(&self) -> Result<BTreeSet<String>>;

    /// Adds `host` to `network` and returns the post-mutation host set,
    /// including `host`. Returns an empty set, mutating nothing, if the host
    /// was already a member.
    async fn add_host(&self, network: &str, host: &HostId) -> Result<BTreeSet<HostId>>;

    /// Removes `host` from `network`. No-op if the host is not a member.
    async fn remove_host(&self, network: &str, host: &HostId) -> Result<()>;

    /// Snapshot of the host set of `network`.
    async fn hosts(&self, network: &str) -> Result<BTreeSet<HostId>>;

    /// Merges `intents` into the stored intent set of `network`. Every
    /// intent is validated first; nothing is persisted if any fails.
    async fn add_intents(
        &self,
        network: &str,
        intents: BTreeSet<ConnectivityIntent>,
    ) -> Result<()>;

    /// Removes and returns the stored intents that name `host` as either
    /// endpoint, leaving the rest in place.
    async fn remove_intents_by_host(
        &self,
        network: &str,
        host: &HostId,
    ) -> Result<BTreeSet<ConnectivityIntent>>;

    /// Removes and returns the entire stored intent set of `network`.
    async fn remove_all_intents(&self, network: &str) -> Result<BTreeSet<ConnectivityIntent>>;

    /// Registers `delegate` as the single change observer, replacing any
    /// previous registration.
    fn register_delegate(&self, delegate: Arc<dyn NetworkStoreDelegate>) -> DelegateHandle;

    /// Drops the registration identified by `handle`, if still active.
    fn unregister_delegate(&self, handle: DelegateHandle);
}

/// Single-slot delegate holder shared by both store variants.
#[derive(Default)]
pub(crate) struct DelegateSlot {
    active: RwLock<Option<(DelegateHandle, Arc<dyn NetworkStoreDelegate>)>>,
    next_id: AtomicU64,
}

impl DelegateSlot {
    pub(crate) fn register(&self, delegate: Arc<dyn NetworkStoreDelegate>) -> DelegateHandle {
        let handle = DelegateHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        *self.active.write() = Some((handle, delegate));
        handle
    }

    pub(crate) fn unregister(&self, handle: DelegateHandle) {
        let mut active = self.active.write();
        if matches!(*active, Some((current, _)) if current == handle) {
            *active = None;
        }
    }

    pub(crate) fn notify(&self, event: NetworkEvent) {
        // Clone the Arc out so the callback runs without the slot lock held.
        let delegate = self.active.read().as_ref().map(|(_, d)| Arc::clone(d));
        if let Some(delegate) = delegate {
            delegate.notify(event);
        }
    }
}
