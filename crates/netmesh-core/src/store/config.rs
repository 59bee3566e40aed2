//! Distributed store configuration with environment variable overrides.

use std::time::Duration;

/// Configuration for [`super::distributed::DistributedNetworkStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// etcd endpoints (env: ETCD_ENDPOINTS, comma-separated)
    pub etcd_endpoints: Vec<String>,

    /// Key namespace isolating this deployment's entries
    /// (env: NETMESH_NAMESPACE)
    pub namespace: String,

    /// TTL in seconds for the lease backing each per-network lock, so a
    /// crashed holder cannot deadlock the network name
    /// (env: NETMESH_LOCK_TTL)
    pub lock_ttl: i64,

    /// Deadline for acquiring a per-network lock; `None` waits indefinitely
    /// (env: NETMESH_LOCK_TIMEOUT_MS, 0 disables the deadline)
    pub lock_timeout: Option<Duration>,

    /// Delay before reconnecting after a watch stream failure
    pub reconnect_delay: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            etcd_endpoints: vec!["http://127.0.0.1:2379".to_string()],
            namespace: "/netmesh".to_string(),
            lock_ttl: 30,
            lock_timeout: Some(Duration::from_secs(10)),
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

impl StoreConfig {
    /// Create configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(endpoints) = std::env::var("ETCD_ENDPOINTS") {
            config.etcd_endpoints = endpoints.split(',').map(String::from).collect();
        }

        if let Ok(namespace) = std::env::var("NETMESH_NAMESPACE") {
            config.namespace = namespace;
        }

        if let Ok(ttl) = std::env::var("NETMESH_LOCK_TTL") {
            if let Ok(parsed) = ttl.parse::<i64>() {
                config.lock_ttl = parsed;
            }
        }

        if let Ok(timeout) = std::env::var("NETMESH_LOCK_TIMEOUT_MS") {
            if let Ok(parsed) = timeout.parse::<u64>() {
                config.lock_timeout = if parsed == 0 {
                    None
                } else {
                    Some(Duration::from_millis(parsed))
                };
            }
        }

        config
    }
}
