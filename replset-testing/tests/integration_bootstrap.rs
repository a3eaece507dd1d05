//! Bootstrap, user provisioning and status reads against a simulated set.

use std::time::Duration;

use replset_controller::{
    AppUser, BootstrapOutcome, ControlError, ControllerConfig, ErrorClass, ProvisionOutcome,
    ReplicaSetController,
};
use replset_core::{ClusterConfig, MemberConfig, MemberId, MemberState, RoleGrant};
use replset_testing::{Fault, SimulatedCluster};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

fn initial() -> ClusterConfig {
    ClusterConfig::initial(
        "rs0",
        vec![
            MemberConfig::new(0, "mongo-0:27030"),
            MemberConfig::new(1, "mongo-1:27031"),
            MemberConfig::new(2, "mongo-2:27032"),
        ],
    )
}

fn controller(cluster: &SimulatedCluster) -> ReplicaSetController<SimulatedCluster> {
    ReplicaSetController::new(
        cluster.clone(),
        ControllerConfig::default()
            .with_probe_timeout(Duration::from_millis(200))
            .with_command_timeout(Duration::from_millis(500)),
    )
}

#[tokio::test]
async fn test_bootstrap_then_noop() {
    init_logging();
    let cluster = SimulatedCluster::new("rs0", 3);
    let controller = controller(&cluster);
    let seed = cluster.candidates().remove(0);

    let first = controller.bootstrap(&seed, &initial()).await.unwrap();
    assert_eq!(first.outcome, BootstrapOutcome::Initiated);
    assert_eq!(cluster.version(), Some(1));
    assert_eq!(cluster.state_of(0), Some(MemberState::Primary));

    for _ in 0..2 {
        let again = controller.bootstrap(&seed, &initial()).await.unwrap();
        assert_eq!(again.outcome, BootstrapOutcome::AlreadyInitialized);
    }
    assert_eq!(cluster.stats().initiations, 1);
    assert_eq!(cluster.open_sessions(), 0);
}

#[tokio::test]
async fn test_bootstrap_on_running_set_is_noop() {
    init_logging();
    let cluster = SimulatedCluster::three_node(7);
    let seed = cluster.candidates().remove(1);

    let report = controller(&cluster).bootstrap(&seed, &initial()).await.unwrap();
    assert_eq!(report.outcome, BootstrapOutcome::AlreadyInitialized);
    assert_eq!(cluster.version(), Some(7));
}

#[tokio::test]
async fn test_bootstrap_with_mismatched_set_name_fails() {
    init_logging();
    let cluster = SimulatedCluster::new("rs0", 1);
    let seed = cluster.candidates().remove(0);
    let wrong = ClusterConfig::initial("other", vec![MemberConfig::new(0, "mongo-0:27030")]);

    let err = controller(&cluster).bootstrap(&seed, &wrong).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Bootstrap);
    assert!(err.to_string().contains(&seed.address));
}

#[tokio::test]
async fn test_bootstrap_seed_down() {
    init_logging();
    let cluster = SimulatedCluster::new("rs0", 3);
    cluster.inject(Fault::NodeDown(MemberId::new(0)));
    let seed = cluster.candidates().remove(0);

    let err = controller(&cluster).bootstrap(&seed, &initial()).await.unwrap_err();
    assert!(matches!(err, ControlError::Bootstrap { .. }));
    assert_eq!(cluster.version(), None);
}

#[tokio::test]
async fn test_bootstrap_then_reconcile_then_user() {
    init_logging();
    let cluster = SimulatedCluster::new("rs0", 3);
    let controller = controller(&cluster);
    let candidates = cluster.candidates();

    controller.bootstrap(&candidates[0], &initial()).await.unwrap();

    let user = AppUser::read_write("appdb", "appuser", "appuserpassword");
    let created = controller.ensure_user(&candidates, &user).await.unwrap();
    assert_eq!(created, ProvisionOutcome::Created);
    let existing = controller.ensure_user(&candidates, &user).await.unwrap();
    assert_eq!(existing, ProvisionOutcome::AlreadyExists);
    assert_eq!(
        cluster.user_roles("appdb", "appuser"),
        Some(vec![RoleGrant::new("readWrite", "appdb")])
    );
    assert_eq!(cluster.stats().users_created, 1);
}

#[tokio::test]
async fn test_status_reads_from_primary() {
    init_logging();
    let cluster = SimulatedCluster::three_node(3);
    cluster.inject(Fault::NodeDown(MemberId::new(1)));
    cluster.elect(2);

    let report = controller(&cluster).status(&cluster.candidates()).await.unwrap();
    assert_eq!(report.source, cluster.address(2));
    assert_eq!(report.status.set, "rs0");
    assert_eq!(report.probes.len(), 3);
    assert!(!report.probes[1].reachable);
    assert_eq!(
        report.status.member(MemberId::new(1)).map(|m| m.state),
        Some(MemberState::Down)
    );
    assert_eq!(
        report.status.primary().map(|m| m.name.as_str()),
        Some("h2")
    );
    assert_eq!(cluster.open_sessions(), 0);
}
