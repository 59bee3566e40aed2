//! Core identifiers and change events for the network map.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of an end-station attached to a network.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(String);

impl HostId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HostId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for HostId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Kind of change applied to the network map.
///
/// Intent mutations never produce an event of their own; the membership
/// change that triggered them is reported as [`NetworkEventType::Updated`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkEventType {
    /// A network was created.
    Added,
    /// A network's host set changed.
    Updated,
    /// A network was removed.
    Removed,
}

/// Describes a single change to the network map.
#[derive(Debug, Clone)]
pub struct NetworkEvent {
    /// What happened.
    pub event_type: NetworkEventType,
    /// Name of the affected network.
    pub network: String,
    /// When the event was observed locally.
    pub time: DateTime<Utc>,
}

impl NetworkEvent {
    pub fn new(event_type: NetworkEventType, network: impl Into<String>) -> Self {
        Self {
            event_type,
            network: network.into(),
            time: Utc::now(),
        }
    }
}
