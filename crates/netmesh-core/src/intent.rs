//! Connectivity intents and the downstream intent service contract.
//!
//! An intent is a declarative request for bidirectional reachability between
//! two hosts. The store treats intents as opaque values; only the endpoints
//! are inspected, for removal-by-host queries.

use crate::error::{Error, Result};
use crate::types::HostId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::info;

/// Match criteria restricting which traffic an intent covers. Empty means
/// all traffic between the endpoints.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TrafficSelector {
    pub criteria: BTreeSet<String>,
}

impl TrafficSelector {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Actions applied to traffic covered by an intent. Empty means forward
/// unmodified.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TrafficTreatment {
    pub instructions: BTreeSet<String>,
}

impl TrafficTreatment {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// A request for bidirectional reachability between exactly two hosts.
///
/// Equality is by the unordered endpoint pair plus selector and treatment.
/// The constructor stores endpoints in canonical order, so the derived
/// `Eq`/`Ord`/`Hash` realize unordered-pair semantics.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectivityIntent {
    one: HostId,
    two: HostId,
    selector: TrafficSelector,
    treatment: TrafficTreatment,
}

impl ConnectivityIntent {
    pub fn new(
        a: HostId,
        b: HostId,
        selector: TrafficSelector,
        treatment: TrafficTreatment,
    ) -> Self {
        let (one, two) = if a <= b { (a, b) } else { (b, a) };
        Self {
            one,
            two,
            selector,
            treatment,
        }
    }

    /// Intent between two hosts covering all traffic.
    pub fn between(a: HostId, b: HostId) -> Self {
        Self::new(a, b, TrafficSelector::empty(), TrafficTreatment::empty())
    }

    pub fn one(&self) -> &HostId {
        &self.one
    }

    pub fn two(&self) -> &HostId {
        &self.two
    }

    pub fn selector(&self) -> &TrafficSelector {
        &self.selector
    }

    pub fn treatment(&self) -> &TrafficTreatment {
        &self.treatment
    }

    /// True if `host` is either endpoint.
    pub fn involves(&self, host: &HostId) -> bool {
        self.one == *host || self.two == *host
    }

    /// Checks the two-endpoint invariant: both endpoints present and
    /// distinct. Applied by the store before any intent is persisted.
    pub fn validate(&self) -> Result<()> {
        if self.one.as_str().is_empty() || self.two.as_str().is_empty() {
            return Err(Error::InvalidArgument(
                "intent endpoints must not be empty".to_string(),
            ));
        }
        if self.one == self.two {
            return Err(Error::InvalidArgument(format!(
                "intent endpoints must be distinct, got {} twice",
                self.one
            )));
        }
        Ok(())
    }
}

/// Downstream service that establishes and tears down connectivity.
///
/// Requests are fire-and-forget; the core consumes no return value.
#[async_trait]
pub trait IntentService: Send + Sync {
    /// Request that the connectivity described by `intent` be established.
    async fn submit(&self, intent: ConnectivityIntent);

    /// Request that previously submitted connectivity be torn down.
    async fn withdraw(&self, intent: ConnectivityIntent);
}

/// Intent service that only records requests in the log. Used where no real
/// intent installer is wired in, such as the CLI.
#[derive(Debug, Default)]
pub struct LoggingIntentService;

#[async_trait]
impl IntentService for LoggingIntentService {
    async fn submit(&self, intent: ConnectivityIntent) {
        info!(
            target: "netmesh::intent",
            one = %intent.one(),
            two = %intent.two(),
            "Submitting connectivity intent"
        );
    }

    async fn withdraw(&self, intent: ConnectivityIntent) {
        info!(
            target: "netmesh::intent",
            one = %intent.one(),
            two = %intent.two(),
            "Withdrawing connectivity intent"
        );
    }
}
