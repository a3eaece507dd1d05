//! Cluster status snapshots.

use crate::locator::PrimaryLocator;
use crate::probe::{ProbeResult, ProbeVerdict};
use crate::{ControlError, ControlResult};
use replset_core::{
    with_timeout, AdminConnector, AdminSession, Candidate, ClusterConfig, MemberState,
    ReplSetStatus, Result,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Closes a session, logging rather than propagating shutdown errors.
pub(crate) async fn release<S: AdminSession>(session: S) {
    let address = session.address().to_string();
    if let Err(e) = session.close().await {
        debug!(%address, "Failed to close session: {}", e);
    }
}

/// Reads replica-set status from one node over a fresh session.
pub async fn fetch_status<C: AdminConnector>(
    connector: &C,
    candidate: &Candidate,
    timeout: Duration,
) -> Result<ReplSetStatus> {
    with_timeout(timeout, "replSetGetStatus", async {
        let mut session = connector.connect(candidate, timeout).await?;
        let status = session.replset_status().await;
        release(session).await;
        status
    })
    .await
}

/// True when every member of `config` shows up in `status` in a settled
/// state.
pub fn is_stabilized(status: &ReplSetStatus, config: &ClusterConfig) -> bool {
    config.members.iter().all(|member| {
        status
            .member(member.id)
            .is_some_and(|s| s.state.is_stable())
    })
}

/// Members of `config` that are not yet settled according to `status`.
pub fn unsettled_members(
    status: &ReplSetStatus,
    config: &ClusterConfig,
) -> Vec<(String, MemberState)> {
    config
        .members
        .iter()
        .filter_map(|member| match status.member(member.id) {
            Some(s) if s.state.is_stable() => None,
            Some(s) => Some((member.host.clone(), s.state)),
            None => Some((member.host.clone(), MemberState::Unreachable)),
        })
        .collect()
}

/// Probe results for every candidate plus the group status as seen by the
/// primary (or the first reachable node when there is none).
#[derive(Debug, Clone)]
pub struct ClusterStatus {
    pub probes: Vec<ProbeResult>,
    /// Address the status was read from
    pub source: String,
    pub status: ReplSetStatus,
}

impl ClusterStatus {
    pub fn primary(&self) -> Option<&ProbeResult> {
        self.probes.iter().find(|p| p.verdict() == ProbeVerdict::Leader)
    }
}

pub struct StatusReader<C> {
    connector: Arc<C>,
    locator: PrimaryLocator<C>,
    timeout: Duration,
}

impl<C: AdminConnector> StatusReader<C> {
    pub fn new(connector: Arc<C>, locator: PrimaryLocator<C>, timeout: Duration) -> Self {
        Self {
            connector,
            locator,
            timeout,
        }
    }

    pub async fn read(&self, candidates: &[Candidate]) -> ControlResult<ClusterStatus> {
        let probes = self.locator.probe_all(candidates).await;

        let source = probes
            .iter()
            .position(|p| p.is_leader)
            .or_else(|| probes.iter().position(|p| p.reachable))
            .and_then(|i| candidates.get(i))
            .ok_or(ControlError::NoPrimaryFound {
                candidates: candidates.len(),
                unreachable: probes.iter().filter(|p| !p.reachable).count(),
            })?;

        let status = fetch_status(self.connector.as_ref(), source, self.timeout)
            .await
            .map_err(|source_err| ControlError::Status {
                address: source.address.clone(),
                source: source_err,
            })?;

        Ok(ClusterStatus {
            probes,
            source: source.address.clone(),
            status,
        })
    }
}
