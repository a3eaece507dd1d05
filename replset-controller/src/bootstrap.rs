//! First-time initiation of a replica set through a single seed node.

use crate::status::release;
use crate::{ControlError, ControlResult};
use replset_core::{
    with_timeout, AdminConnector, AdminSession, Candidate, ClusterConfig, ReplSetError, Validator,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// This call created the replica set
    Initiated,
    /// The seed already belongs to a configured set; nothing was changed
    AlreadyInitialized,
}

#[derive(Debug, Clone)]
pub struct BootstrapReport {
    pub seed: String,
    pub set_name: String,
    pub members: usize,
    pub outcome: BootstrapOutcome,
}

/// Submits the initial configuration to one seed node.
///
/// Safe to run repeatedly: an "already initialized" answer from the seed is
/// reported as [`BootstrapOutcome::AlreadyInitialized`], not as an error.
pub struct Bootstrapper<C> {
    connector: Arc<C>,
    timeout: Duration,
}

impl<C: AdminConnector> Bootstrapper<C> {
    pub fn new(connector: Arc<C>, timeout: Duration) -> Self {
        Self { connector, timeout }
    }

    pub async fn bootstrap(
        &self,
        seed: &Candidate,
        initial: &ClusterConfig,
    ) -> ControlResult<BootstrapReport> {
        initial
            .validate()
            .map_err(|source| ControlError::InvalidTopology { source })?;

        let failed = |source: ReplSetError| ControlError::Bootstrap {
            seed: seed.address.clone(),
            source,
        };

        let mut session = self
            .connector
            .connect(seed, self.timeout)
            .await
            .map_err(failed)?;
        let result = self.initiate(&mut session, initial).await;
        release(session).await;

        let outcome = match result {
            Ok(()) => BootstrapOutcome::Initiated,
            Err(e) if e.is_already_initialized() => BootstrapOutcome::AlreadyInitialized,
            Err(e) => return Err(failed(e)),
        };

        info!(
            seed = %seed.address,
            set = %initial.set_name,
            members = initial.members.len(),
            ?outcome,
            "Bootstrap complete"
        );

        Ok(BootstrapReport {
            seed: seed.address.clone(),
            set_name: initial.set_name.clone(),
            members: initial.members.len(),
            outcome,
        })
    }

    async fn initiate(
        &self,
        session: &mut C::Session,
        initial: &ClusterConfig,
    ) -> replset_core::Result<()> {
        with_timeout(self.timeout, "ping", session.ping()).await?;
        with_timeout(self.timeout, "replSetInitiate", session.initiate(initial.clone())).await
    }
}
