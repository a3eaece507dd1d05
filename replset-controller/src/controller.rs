use crate::bootstrap::{BootstrapReport, Bootstrapper};
use crate::config::ControllerConfig;
use crate::credentials::{AppUser, CredentialProvisioner, ProvisionOutcome};
use crate::locator::{LocatedPrimary, PrimaryLocator};
use crate::probe::{NodeProbe, ProbeResult};
use crate::reconciler::{ReconcilePlan, ReconcileReport, Reconciler};
use crate::status::{ClusterStatus, StatusReader};
use crate::ControlResult;
use replset_core::{AdminConnector, Candidate, ClusterConfig, DesiredTopology};
use std::sync::Arc;

/// Entry point tying the control operations to one connector and config.
///
/// Holds no state between calls beyond its configuration; every operation
/// opens and closes its own sessions.
pub struct ReplicaSetController<C> {
    connector: Arc<C>,
    config: ControllerConfig,
}

impl<C: AdminConnector> ReplicaSetController<C> {
    pub fn new(connector: C, config: ControllerConfig) -> Self {
        Self::with_shared(Arc::new(connector), config)
    }

    pub fn with_shared(connector: Arc<C>, config: ControllerConfig) -> Self {
        Self { connector, config }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn connector(&self) -> &Arc<C> {
        &self.connector
    }

    pub fn probe(&self) -> NodeProbe<C> {
        NodeProbe::new(self.connector.clone(), self.config.probe_timeout)
    }

    pub fn locator(&self) -> PrimaryLocator<C> {
        PrimaryLocator::new(self.probe(), self.config.scan_mode)
    }

    pub async fn probe_node(&self, candidate: &Candidate) -> ProbeResult {
        self.probe().probe(candidate).await
    }

    pub async fn find_primary(&self, candidates: &[Candidate]) -> ControlResult<LocatedPrimary> {
        self.locator().find_primary(candidates).await
    }

    pub async fn status(&self, candidates: &[Candidate]) -> ControlResult<ClusterStatus> {
        StatusReader::new(self.connector.clone(), self.locator(), self.config.command_timeout)
            .read(candidates)
            .await
    }

    pub async fn plan(
        &self,
        candidates: &[Candidate],
        desired: &DesiredTopology,
    ) -> ControlResult<ReconcilePlan> {
        self.reconciler().plan(candidates, desired).await
    }

    pub async fn reconcile(
        &self,
        candidates: &[Candidate],
        desired: &DesiredTopology,
    ) -> ControlResult<ReconcileReport> {
        self.reconciler().reconcile(candidates, desired).await
    }

    pub async fn bootstrap(
        &self,
        seed: &Candidate,
        initial: &ClusterConfig,
    ) -> ControlResult<BootstrapReport> {
        Bootstrapper::new(self.connector.clone(), self.config.command_timeout)
            .bootstrap(seed, initial)
            .await
    }

    /// Creates `user` on the current primary.
    pub async fn ensure_user(
        &self,
        candidates: &[Candidate],
        user: &AppUser,
    ) -> ControlResult<ProvisionOutcome> {
        let primary = self.find_primary(candidates).await?;
        CredentialProvisioner::new(self.connector.clone(), self.config.command_timeout)
            .ensure_user(&primary.candidate, user)
            .await
    }

    fn reconciler(&self) -> Reconciler<C> {
        Reconciler::new(self.connector.clone(), self.locator(), self.config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockConnector, MockNode};
    use crate::ControlError;
    use replset_core::{Credentials, MemberConfig};

    #[tokio::test]
    async fn test_ensure_user_targets_primary() {
        let connector = MockConnector::new()
            .with_node("a:1", MockNode::secondary())
            .with_node("b:1", MockNode::primary());
        let controller = ReplicaSetController::new(connector, ControllerConfig::default());
        let candidates = vec![
            Candidate::new("a:1", Credentials::new("root", "pw")),
            Candidate::new("b:1", Credentials::new("root", "pw")),
        ];

        controller
            .ensure_user(&candidates, &AppUser::read_write("appdb", "appuser", "pw"))
            .await
            .unwrap();

        let connector = controller.connector();
        assert_eq!(connector.node("a:1").lock().unwrap().count("createUser"), 0);
        assert_eq!(connector.node("b:1").lock().unwrap().count("createUser"), 1);
    }

    #[tokio::test]
    async fn test_ensure_user_without_primary() {
        let controller = ReplicaSetController::new(
            MockConnector::new().with_node("a:1", MockNode::secondary()),
            ControllerConfig::default(),
        );
        let candidates = vec![Candidate::new("a:1", Credentials::new("root", "pw"))];

        let err = controller
            .ensure_user(&candidates, &AppUser::read_write("appdb", "appuser", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::NoPrimaryFound { .. }));
    }

    #[tokio::test]
    async fn test_bootstrap_through_facade() {
        let controller = ReplicaSetController::new(
            MockConnector::new().with_node("a:1", MockNode::secondary()),
            ControllerConfig::default(),
        );
        let seed = Candidate::new("a:1", Credentials::new("root", "pw"));
        let initial = ClusterConfig::initial("rs0", vec![MemberConfig::new(0, "a:1")]);

        let report = controller.bootstrap(&seed, &initial).await.unwrap();
        assert_eq!(report.set_name, "rs0");
    }
}
