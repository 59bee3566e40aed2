//! Network membership and full-mesh connectivity management.
//!
//! A **network** is a named, dynamic set of hosts that should enjoy full
//! mesh connectivity: one connectivity intent per host pair. This crate
//! provides the replicated membership store at the center of that system:
//!
//! - Data model: host identifiers, connectivity intents, change events
//! - The [`NetworkStore`] contract with per-network mutual exclusion and
//!   single-slot change notification
//! - [`LocalNetworkStore`], the in-process variant
//! - [`DistributedNetworkStore`], the etcd-replicated variant with a
//!   cluster-wide change feed
//! - [`NetworkManager`], which computes mesh deltas, drives the external
//!   intent service, and fans events out to listeners

pub mod error;
pub mod intent;
pub mod manager;
pub mod store;
pub mod types;

pub use error::{Error, Result};
pub use intent::{
    ConnectivityIntent, IntentService, LoggingIntentService, TrafficSelector, TrafficTreatment,
};
pub use manager::{ListenerRegistry, NetworkListener, NetworkManager};
pub use store::config::StoreConfig;
pub use store::distributed::DistributedNetworkStore;
pub use store::local::LocalNetworkStore;
pub use store::{DelegateHandle, NetworkStore, NetworkStoreDelegate};
pub use types::{HostId, NetworkEvent, NetworkEventType};
