//! Error types shared across the workspace.

use thiserror::Error;

/// Result type alias for netmesh operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the membership store and the manager.
#[derive(Debug, Error)]
pub enum Error {
    /// The referenced network does not exist in the store.
    #[error("network {network} not found")]
    NotFound { network: String },

    /// An argument was rejected before any mutation took place.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The per-network lock could not be acquired within the configured
    /// deadline. Distinct from [`Error::NotFound`] so callers can retry.
    #[error("timed out acquiring lock for network {network}")]
    LockTimeout { network: String },

    /// etcd transport or server error.
    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),

    /// A stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn not_found(network: &str) -> Self {
        Error::NotFound {
            network: network.to_string(),
        }
    }

    /// True if this error reports a missing network.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

/// Rejects empty identifier arguments before any store call.
pub(crate) fn require_non_empty(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidArgument(format!("{what} must not be empty")));
    }
    Ok(())
}
