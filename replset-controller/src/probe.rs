//! Single-node leadership probe.

use replset_core::{AdminConnector, AdminSession, Candidate, HelloReply, MemberState, Result};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Tri-state classification of a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeVerdict {
    Leader,
    Follower,
    Unreachable,
}

impl fmt::Display for ProbeVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeVerdict::Leader => write!(f, "leader"),
            ProbeVerdict::Follower => write!(f, "follower"),
            ProbeVerdict::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// Outcome of probing one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub address: String,
    pub reachable: bool,
    pub is_leader: bool,
    pub role: MemberState,
    /// Why the node could not be queried
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl ProbeResult {
    fn answered(address: &str, hello: &HelloReply, elapsed: Duration) -> Self {
        Self {
            address: address.to_string(),
            reachable: true,
            is_leader: hello.is_writable_primary,
            role: hello.role(),
            error: None,
            elapsed,
        }
    }

    fn unreachable(address: &str, error: String, elapsed: Duration) -> Self {
        Self {
            address: address.to_string(),
            reachable: false,
            is_leader: false,
            role: MemberState::Unreachable,
            error: Some(error),
            elapsed,
        }
    }

    pub fn verdict(&self) -> ProbeVerdict {
        if !self.reachable {
            ProbeVerdict::Unreachable
        } else if self.is_leader {
            ProbeVerdict::Leader
        } else {
            ProbeVerdict::Follower
        }
    }
}

/// Asks one node whether it is the primary.
///
/// A probe never fails: connection, authentication and protocol errors all
/// come back as an unreachable [`ProbeResult`]. Connect plus query together
/// are bounded by the probe timeout.
pub struct NodeProbe<C> {
    connector: Arc<C>,
    timeout: Duration,
}

impl<C> Clone for NodeProbe<C> {
    fn clone(&self) -> Self {
        Self {
            connector: self.connector.clone(),
            timeout: self.timeout,
        }
    }
}

impl<C: AdminConnector> NodeProbe<C> {
    pub fn new(connector: Arc<C>, timeout: Duration) -> Self {
        Self { connector, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn probe(&self, candidate: &Candidate) -> ProbeResult {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, self.query(candidate)).await;
        let elapsed = started.elapsed();

        let result = match outcome {
            Ok(Ok(hello)) => ProbeResult::answered(&candidate.address, &hello, elapsed),
            Ok(Err(e)) => ProbeResult::unreachable(&candidate.address, e.to_string(), elapsed),
            Err(_) => ProbeResult::unreachable(
                &candidate.address,
                format!("probe timed out after {:?}", self.timeout),
                elapsed,
            ),
        };

        match result.verdict() {
            ProbeVerdict::Unreachable => warn!(
                address = %candidate.address,
                error = result.error.as_deref().unwrap_or_default(),
                "Candidate unreachable"
            ),
            verdict => debug!(
                address = %candidate.address,
                role = %result.role,
                %verdict,
                elapsed_ms = elapsed.as_millis() as u64,
                "Probed candidate"
            ),
        }

        result
    }

    async fn query(&self, candidate: &Candidate) -> Result<HelloReply> {
        let mut session = self.connector.connect(candidate, self.timeout).await?;
        let hello = session.hello().await;
        if let Err(e) = session.close().await {
            debug!(address = %candidate.address, "Failed to close probe session: {}", e);
        }
        hello
    }
}
