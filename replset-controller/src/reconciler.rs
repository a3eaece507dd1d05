//! Read-modify-verify reconciliation of the replica-set member list.
//!
//! A run locates the primary, fetches the live configuration from it, diffs
//! it against the desired topology and, when something differs, submits the
//! next configuration and polls until the members settle. The configuration
//! is never submitted without a fetch in the same run, and a failed fetch or
//! submission is reported rather than retried: a blind retry could overwrite
//! a change someone else made in between.

use crate::config::ControllerConfig;
use crate::locator::{LocatedPrimary, PrimaryLocator};
use crate::status::{fetch_status, is_stabilized, release, unsettled_members};
use crate::{ControlError, ControlResult, ReconfigStage};
use replset_core::{
    apply, diff, with_timeout, AdminConnector, AdminSession, Candidate, ClusterConfig,
    DesiredTopology, MemberId, ReplSetStatus, TopologyDiff, Validator,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What a reconciliation would do, computed against a freshly fetched
/// configuration.
#[derive(Debug, Clone)]
pub struct ReconcilePlan {
    pub primary: LocatedPrimary,
    pub current: ClusterConfig,
    pub desired: DesiredTopology,
    pub diff: TopologyDiff,
    /// Configuration that would be submitted; `None` when nothing changes
    pub proposed: Option<ClusterConfig>,
}

impl ReconcilePlan {
    pub fn changed_members(&self) -> BTreeSet<MemberId> {
        self.diff.changed_members()
    }

    pub fn is_noop(&self) -> bool {
        self.proposed.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub changed: bool,
    pub set_name: String,
    pub primary: String,
    pub previous_version: u64,
    pub version: u64,
    pub changed_members: BTreeSet<MemberId>,
    /// Last status snapshot read while polling
    pub final_status: Option<ReplSetStatus>,
    /// False when the poll budget ran out before every member settled.
    /// A no-op run has nothing to wait for and reports true.
    pub stabilized: bool,
    pub poll_attempts: u32,
}

pub struct Reconciler<C> {
    connector: Arc<C>,
    locator: PrimaryLocator<C>,
    config: ControllerConfig,
}

impl<C: AdminConnector> Reconciler<C> {
    pub fn new(connector: Arc<C>, locator: PrimaryLocator<C>, config: ControllerConfig) -> Self {
        Self {
            connector,
            locator,
            config,
        }
    }

    /// Computes the plan without submitting anything.
    pub async fn plan(
        &self,
        candidates: &[Candidate],
        desired: &DesiredTopology,
    ) -> ControlResult<ReconcilePlan> {
        validate_desired(desired)?;
        let primary = self.locator.find_primary(candidates).await?;
        let mut session = self.open(&primary).await?;
        let plan = self.build_plan(&mut session, primary, desired).await;
        release(session).await;
        plan
    }

    pub async fn reconcile(
        &self,
        candidates: &[Candidate],
        desired: &DesiredTopology,
    ) -> ControlResult<ReconcileReport> {
        validate_desired(desired)?;
        let run_id = Uuid::new_v4();

        let primary = self.locator.find_primary(candidates).await?;
        let mut session = self.open(&primary).await?;

        let plan = match self.build_plan(&mut session, primary, desired).await {
            Ok(plan) => plan,
            Err(e) => {
                release(session).await;
                return Err(e);
            }
        };

        let next = match &plan.proposed {
            Some(next) => next.clone(),
            None => {
                release(session).await;
                info!(
                    %run_id,
                    set = %plan.current.set_name,
                    version = plan.current.version,
                    "Configuration already matches desired topology"
                );
                return Ok(ReconcileReport {
                    changed: false,
                    set_name: plan.current.set_name.clone(),
                    primary: plan.primary.address().to_string(),
                    previous_version: plan.current.version,
                    version: plan.current.version,
                    changed_members: BTreeSet::new(),
                    final_status: None,
                    stabilized: true,
                    poll_attempts: 0,
                });
            }
        };

        let force = self.config.reconfig_mode.is_forced();
        info!(
            %run_id,
            primary = %plan.primary.address(),
            set = %next.set_name,
            from = plan.current.version,
            to = next.version,
            force,
            changed = ?plan.changed_members(),
            "Submitting reconfiguration"
        );

        let submitted = with_timeout(
            self.config.command_timeout,
            "replSetReconfig",
            session.reconfigure(next.clone(), force),
        )
        .await;
        release(session).await;
        submitted.map_err(|source| ControlError::Reconfig {
            stage: ReconfigStage::Submit,
            primary: plan.primary.address().to_string(),
            source,
        })?;

        let (final_status, stabilized, poll_attempts) =
            self.await_stabilization(&plan.primary.candidate, &next).await;

        if stabilized {
            info!(
                %run_id,
                version = next.version,
                attempts = poll_attempts,
                "Replica set stabilized"
            );
        } else {
            warn!(
                %run_id,
                version = next.version,
                attempts = poll_attempts,
                "Replica set not yet stabilized; reconfiguration was accepted"
            );
        }

        Ok(ReconcileReport {
            changed: true,
            set_name: next.set_name.clone(),
            primary: plan.primary.address().to_string(),
            previous_version: plan.current.version,
            version: next.version,
            changed_members: plan.changed_members(),
            final_status,
            stabilized,
            poll_attempts,
        })
    }

    async fn open(&self, primary: &LocatedPrimary) -> ControlResult<C::Session> {
        self.connector
            .connect(&primary.candidate, self.config.command_timeout)
            .await
            .map_err(|source| ControlError::Reconfig {
                stage: ReconfigStage::Fetch,
                primary: primary.address().to_string(),
                source,
            })
    }

    async fn build_plan(
        &self,
        session: &mut C::Session,
        primary: LocatedPrimary,
        desired: &DesiredTopology,
    ) -> ControlResult<ReconcilePlan> {
        let current = with_timeout(
            self.config.command_timeout,
            "replSetGetConfig",
            session.replset_config(),
        )
        .await
        .map_err(|source| ControlError::Reconfig {
            stage: ReconfigStage::Fetch,
            primary: primary.address().to_string(),
            source,
        })?;

        debug!(
            set = %current.set_name,
            version = current.version,
            members = current.members.len(),
            "Fetched current configuration"
        );

        let diff = diff(&current, desired);
        let proposed = if diff.is_empty() {
            None
        } else {
            Some(
                apply(&current, desired)
                    .map_err(|source| ControlError::InvalidTopology { source })?,
            )
        };

        Ok(ReconcilePlan {
            primary,
            current,
            desired: desired.clone(),
            diff,
            proposed,
        })
    }

    /// Polls status until every member of `config` settles or the attempt
    /// budget or deadline runs out. Poll failures count as attempts.
    async fn await_stabilization(
        &self,
        target: &Candidate,
        config: &ClusterConfig,
    ) -> (Option<ReplSetStatus>, bool, u32) {
        let started = Instant::now();
        let remaining = || self.config.poll_deadline.saturating_sub(started.elapsed());
        let mut snapshot = None;
        let mut attempts = 0;

        while attempts < self.config.poll_attempts {
            let left = remaining();
            if left.is_zero() {
                break;
            }
            tokio::time::sleep(self.config.poll_interval.min(left)).await;

            let left = remaining();
            if left.is_zero() {
                break;
            }
            attempts += 1;

            let timeout = self.config.command_timeout.min(left);
            match fetch_status(self.connector.as_ref(), target, timeout).await {
                Ok(status) => {
                    let settled = is_stabilized(&status, config);
                    if !settled {
                        debug!(
                            attempt = attempts,
                            pending = ?unsettled_members(&status, config),
                            "Waiting for members to settle"
                        );
                    }
                    snapshot = Some(status);
                    if settled {
                        return (snapshot, true, attempts);
                    }
                }
                Err(e) => warn!(
                    attempt = attempts,
                    address = %target.address,
                    "Status poll failed: {}",
                    e
                ),
            }
        }

        (snapshot, false, attempts)
    }
}

fn validate_desired(desired: &DesiredTopology) -> ControlResult<()> {
    desired
        .validate()
        .map_err(|source| ControlError::InvalidTopology { source })
}

/// Longest a run may spend polling for stabilization.
pub fn poll_budget(config: &ControllerConfig) -> Duration {
    config
        .poll_interval
        .checked_mul(config.poll_attempts)
        .map_or(config.poll_deadline, |total| total.min(config.poll_deadline))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReconfigMode, ScanMode};
    use crate::probe::NodeProbe;
    use crate::test_support::{MockConnector, MockNode};
    use replset_core::{
        codes, CommandFailure, Credentials, Health, MemberConfig, MemberState, MemberStatus,
    };

    fn current() -> ClusterConfig {
        let mut config = ClusterConfig::initial(
            "rs0",
            vec![
                MemberConfig::new(0, "h0:1"),
                MemberConfig::new(1, "h1:1"),
                MemberConfig::new(2, "h2:1"),
            ],
        );
        config.version = 5;
        config
    }

    fn status(states: [MemberState; 3]) -> ReplSetStatus {
        ReplSetStatus {
            set: "rs0".to_string(),
            members: states
                .iter()
                .enumerate()
                .map(|(i, state)| MemberStatus {
                    id: MemberId::new(i as u32),
                    name: format!("h{}:1", i),
                    state: *state,
                    health: Health::Up,
                })
                .collect(),
        }
    }

    fn settled() -> ReplSetStatus {
        status([MemberState::Primary, MemberState::Secondary, MemberState::Secondary])
    }

    fn desired() -> DesiredTopology {
        DesiredTopology::new()
            .with_member(0, "h0-new:1")
            .with_member(1, "h1:1")
            .with_member(2, "h2:1")
    }

    fn reconciler(
        connector: Arc<MockConnector>,
        config: ControllerConfig,
    ) -> Reconciler<MockConnector> {
        let locator = PrimaryLocator::new(
            NodeProbe::new(connector.clone(), config.probe_timeout),
            ScanMode::Sequential,
        );
        Reconciler::new(connector, locator, config)
    }

    fn fast() -> ControllerConfig {
        ControllerConfig::default()
            .with_poll_interval(Duration::from_millis(1))
            .with_poll_attempts(5)
    }

    fn candidates() -> Vec<Candidate> {
        vec![Candidate::new("p:1", Credentials::new("root", "pw"))]
    }

    #[tokio::test]
    async fn test_reconcile_changes_then_noop() {
        let connector = Arc::new(MockConnector::new().with_node(
            "p:1",
            MockNode::primary().with_config(current()).with_status(settled()),
        ));
        let reconciler = reconciler(connector.clone(), fast());

        let first = reconciler.reconcile(&candidates(), &desired()).await.unwrap();
        assert!(first.changed);
        assert_eq!(first.previous_version, 5);
        assert_eq!(first.version, 6);
        assert!(first.stabilized);
        assert_eq!(first.changed_members.len(), 1);

        let second = reconciler.reconcile(&candidates(), &desired()).await.unwrap();
        assert!(!second.changed);
        assert_eq!(second.version, 6);

        let node = connector.node("p:1");
        let node = node.lock().unwrap();
        assert_eq!(node.count("replSetReconfig"), 1);
        assert_eq!(node.config.as_ref().map(|c| c.version), Some(6));
        drop(node);
        assert_eq!(connector.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_safe_mode_does_not_force() {
        let connector = Arc::new(MockConnector::new().with_node(
            "p:1",
            MockNode::primary().with_config(current()).with_status(settled()),
        ));
        reconciler(connector.clone(), fast())
            .reconcile(&candidates(), &desired())
            .await
            .unwrap();
        reconciler(connector.clone(), fast().with_reconfig_mode(ReconfigMode::Forced))
            .reconcile(&candidates(), &desired().with_member(3, "h3:1"))
            .await
            .unwrap();

        let node = connector.node("p:1");
        let forces: Vec<bool> = node
            .lock()
            .unwrap()
            .commands
            .iter()
            .filter_map(|c| match c {
                replset_core::AdminCommand::ReplSetReconfig { force, .. } => Some(*force),
                _ => None,
            })
            .collect();
        assert_eq!(forces, vec![false, true]);
    }

    #[tokio::test]
    async fn test_stuck_member_reports_unstabilized() {
        let stuck = status([MemberState::Primary, MemberState::Recovering, MemberState::Secondary]);
        let connector = Arc::new(MockConnector::new().with_node(
            "p:1",
            MockNode::primary().with_config(current()).with_status(stuck),
        ));

        let report = reconciler(connector, fast().with_poll_attempts(3))
            .reconcile(&candidates(), &desired())
            .await
            .unwrap();
        assert!(report.changed);
        assert!(!report.stabilized);
        assert_eq!(report.poll_attempts, 3);
        assert!(report.final_status.is_some());
    }

    #[tokio::test]
    async fn test_submit_failure_is_reconfig_error() {
        let connector = Arc::new(MockConnector::new().with_node(
            "p:1",
            MockNode::primary().with_config(current()).failing(
                "replSetReconfig",
                CommandFailure::new(
                    codes::NEW_REPLICA_SET_CONFIGURATION_INCOMPATIBLE,
                    "NewReplicaSetConfigurationIncompatible",
                    "version mismatch",
                ),
            ),
        ));

        let err = reconciler(connector.clone(), fast())
            .reconcile(&candidates(), &desired())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControlError::Reconfig {
                stage: ReconfigStage::Submit,
                ..
            }
        ));
        assert_eq!(connector.node("p:1").lock().unwrap().count("replSetReconfig"), 1);
        assert_eq!(connector.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_reconfig_error() {
        // No config on the node: replSetGetConfig answers NotYetInitialized
        let connector = Arc::new(MockConnector::new().with_node("p:1", MockNode::primary()));

        let err = reconciler(connector.clone(), fast())
            .reconcile(&candidates(), &desired())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControlError::Reconfig {
                stage: ReconfigStage::Fetch,
                ..
            }
        ));
        assert_eq!(connector.node("p:1").lock().unwrap().count("replSetReconfig"), 0);
    }

    #[tokio::test]
    async fn test_invalid_desired_rejected_before_io() {
        let connector = Arc::new(MockConnector::new().with_node("p:1", MockNode::primary()));
        let bad = DesiredTopology::new().with_member(0, "");

        let err = reconciler(connector.clone(), fast())
            .reconcile(&candidates(), &bad)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidTopology { .. }));
        assert_eq!(connector.opened(), 0);
    }

    #[tokio::test]
    async fn test_plan_does_not_submit() {
        let connector = Arc::new(MockConnector::new().with_node(
            "p:1",
            MockNode::primary().with_config(current()),
        ));

        let plan = reconciler(connector.clone(), fast())
            .plan(&candidates(), &desired())
            .await
            .unwrap();
        assert!(!plan.is_noop());
        assert_eq!(plan.proposed.as_ref().map(|c| c.version), Some(6));
        assert_eq!(plan.changed_members().into_iter().collect::<Vec<_>>(), vec![MemberId::new(0)]);
        assert_eq!(connector.node("p:1").lock().unwrap().count("replSetReconfig"), 0);
    }

    #[test]
    fn test_poll_budget() {
        let config = ControllerConfig::default()
            .with_poll_interval(Duration::from_secs(2))
            .with_poll_attempts(5)
            .with_poll_deadline(Duration::from_secs(30));
        assert_eq!(poll_budget(&config), Duration::from_secs(10));
    }

    #[test]
    fn test_poll_budget_overflow_falls_back_to_deadline() {
        let config = ControllerConfig::default()
            .with_poll_interval(Duration::from_millis(u64::MAX))
            .with_poll_attempts(2000)
            .with_poll_deadline(Duration::from_secs(30));
        assert_eq!(poll_budget(&config), Duration::from_secs(30));

        let config = config.with_poll_deadline(Duration::MAX);
        assert_eq!(poll_budget(&config), Duration::MAX);
    }

    #[tokio::test]
    async fn test_unbounded_deadline_stops_at_attempts() {
        let stuck = status([MemberState::Primary, MemberState::Recovering, MemberState::Secondary]);
        let connector = Arc::new(MockConnector::new().with_node(
            "p:1",
            MockNode::primary().with_config(current()).with_status(stuck),
        ));

        let report = reconciler(
            connector,
            fast().with_poll_attempts(2).with_poll_deadline(Duration::MAX),
        )
        .reconcile(&candidates(), &desired())
        .await
        .unwrap();
        assert!(!report.stabilized);
        assert_eq!(report.poll_attempts, 2);
    }
}
