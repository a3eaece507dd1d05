//! In-process replica set that answers the administrative command set.
//!
//! Node `i` backs member id `i` and is reached at [`SimulatedCluster::address`].
//! The advertised hosts in the group configuration are independent of those
//! addresses, the same way a real deployment may advertise container names
//! while the operator connects through mapped ports.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

use replset_core::{
    codes, with_timeout, AdminCommand, AdminConnector, AdminReply, AdminSession, Candidate,
    ClusterConfig, CommandFailure, Credentials, Health, HelloReply, MemberId, MemberState,
    MemberStatus, ReplSetError, ReplSetStatus, Result, RoleGrant, Secret, Validator,
};

use crate::fault_injection::Fault;

const INVALID_REPLICA_SET_CONFIG: i32 = 93;

#[derive(Debug, Clone)]
struct SimNode {
    address: String,
    state: MemberState,
    down: bool,
    reject_credentials: bool,
    latency: Duration,
    stuck: Option<MemberState>,
}

#[derive(Debug, Default, Clone)]
pub struct SimStats {
    pub reconfigs: u64,
    pub forced_reconfigs: u64,
    pub initiations: u64,
    pub status_polls: u64,
    pub users_created: u64,
}

#[derive(Debug)]
struct ClusterState {
    set_name: String,
    nodes: Vec<SimNode>,
    config: Option<ClusterConfig>,
    admin: Credentials,
    users: BTreeMap<(String, String), Vec<RoleGrant>>,
    settle_polls: u32,
    unsettled_polls_left: u32,
    reject_reconfig: Option<CommandFailure>,
    stats: SimStats,
}

impl ClusterState {
    fn node_of(&self, id: MemberId) -> Option<&SimNode> {
        self.nodes.get(id.value() as usize)
    }

    fn node_mut(&mut self, id: MemberId) -> Option<&mut SimNode> {
        self.nodes.get_mut(id.value() as usize)
    }

    fn is_member(&self, index: usize) -> bool {
        self.config
            .as_ref()
            .is_some_and(|c| c.member(MemberId::new(index as u32)).is_some())
    }

    fn make_primary(&mut self, index: usize) {
        for (i, node) in self.nodes.iter_mut().enumerate() {
            if node.state == MemberState::Primary && i != index {
                node.state = MemberState::Secondary;
            }
        }
        if let Some(node) = self.nodes.get_mut(index) {
            node.state = MemberState::Primary;
        }
    }

    /// Re-derives roles after the configuration changed membership.
    fn apply_membership(&mut self) {
        for index in 0..self.nodes.len() {
            let member = self.is_member(index);
            let node = &mut self.nodes[index];
            node.state = match (member, node.state) {
                (false, _) => MemberState::Removed,
                (true, MemberState::Primary) => MemberState::Primary,
                (true, _) => MemberState::Secondary,
            };
        }
    }

    fn hello(&self, index: usize) -> HelloReply {
        let node = &self.nodes[index];
        let configured = self.config.as_ref();
        HelloReply {
            is_writable_primary: node.state == MemberState::Primary,
            secondary: node.state == MemberState::Secondary,
            arbiter_only: node.state == MemberState::Arbiter,
            set_name: configured.map(|c| c.set_name.clone()),
            primary: configured.and_then(|c| {
                self.nodes
                    .iter()
                    .position(|n| n.state == MemberState::Primary && !n.down)
                    .and_then(|i| c.host_of(MemberId::new(i as u32)))
                    .map(str::to_string)
            }),
            me: configured
                .and_then(|c| c.host_of(MemberId::new(index as u32)))
                .map(str::to_string),
        }
    }

    fn status(&mut self) -> std::result::Result<ReplSetStatus, CommandFailure> {
        let config = self.config.clone().ok_or_else(not_initialized)?;
        self.stats.status_polls += 1;
        let settling = self.unsettled_polls_left > 0;
        if settling {
            self.unsettled_polls_left -= 1;
        }

        let members = config
            .members
            .iter()
            .map(|member| {
                let (state, health) = match self.node_of(member.id) {
                    None => (MemberState::Unknown, Health::Down),
                    Some(node) if node.down => (MemberState::Down, Health::Down),
                    Some(node) => {
                        let state = match node.stuck {
                            Some(stuck) => stuck,
                            None if settling && node.state != MemberState::Primary => {
                                MemberState::Recovering
                            }
                            None => node.state,
                        };
                        (state, Health::Up)
                    }
                };
                MemberStatus {
                    id: member.id,
                    name: member.host.clone(),
                    state,
                    health,
                }
            })
            .collect();

        Ok(ReplSetStatus {
            set: config.set_name,
            members,
        })
    }

    fn reconfigure(
        &mut self,
        index: usize,
        next: ClusterConfig,
        force: bool,
    ) -> std::result::Result<(), CommandFailure> {
        if let Some(failure) = &self.reject_reconfig {
            return Err(failure.clone());
        }
        let current = self.config.as_ref().ok_or_else(not_initialized)?;
        if !force && self.nodes[index].state != MemberState::Primary {
            return Err(CommandFailure::new(
                codes::NOT_WRITABLE_PRIMARY,
                "NotWritablePrimary",
                "replSetReconfig should only be run on a writable PRIMARY",
            ));
        }
        let acceptable = if force {
            next.version > current.version
        } else {
            next.version == current.version + 1
        };
        if !acceptable {
            return Err(CommandFailure::new(
                codes::NEW_REPLICA_SET_CONFIGURATION_INCOMPATIBLE,
                "NewReplicaSetConfigurationIncompatible",
                format!(
                    "new config version {} is not valid after version {}",
                    next.version, current.version
                ),
            ));
        }
        if next.set_name != current.set_name {
            return Err(invalid_config(format!(
                "set name {} does not match {}",
                next.set_name, current.set_name
            )));
        }
        next.validate().map_err(|e| invalid_config(e.to_string()))?;

        info!(version = next.version, force, "Simulated cluster accepted reconfiguration");
        self.config = Some(next);
        self.apply_membership();
        self.unsettled_polls_left = self.settle_polls;
        self.stats.reconfigs += 1;
        if force {
            self.stats.forced_reconfigs += 1;
        }
        Ok(())
    }

    fn initiate(
        &mut self,
        index: usize,
        config: ClusterConfig,
    ) -> std::result::Result<(), CommandFailure> {
        if self.config.is_some() {
            return Err(CommandFailure::new(
                codes::ALREADY_INITIALIZED,
                "AlreadyInitialized",
                "already initialized",
            ));
        }
        config.validate().map_err(|e| invalid_config(e.to_string()))?;
        if config.set_name != self.set_name {
            return Err(invalid_config(format!(
                "Attempting to initiate a replica set with name {}, but command line reports {}",
                config.set_name, self.set_name
            )));
        }

        info!(
            set = %config.set_name,
            members = config.members.len(),
            "Simulated cluster initiated"
        );
        self.config = Some(config);
        self.apply_membership();
        if self.is_member(index) {
            self.make_primary(index);
        }
        self.stats.initiations += 1;
        Ok(())
    }

    fn create_user(
        &mut self,
        index: usize,
        database: String,
        user: String,
        roles: Vec<RoleGrant>,
    ) -> std::result::Result<(), CommandFailure> {
        if self.nodes[index].state != MemberState::Primary {
            return Err(CommandFailure::new(
                codes::NOT_WRITABLE_PRIMARY,
                "NotWritablePrimary",
                "not primary",
            ));
        }
        let key = (database, user);
        if self.users.contains_key(&key) {
            return Err(CommandFailure::new(
                codes::USER_ALREADY_EXISTS,
                "Location51003",
                format!("User \"{}@{}\" already exists", key.1, key.0),
            ));
        }
        self.users.insert(key, roles);
        self.stats.users_created += 1;
        Ok(())
    }
}

fn not_initialized() -> CommandFailure {
    CommandFailure::new(
        codes::NOT_YET_INITIALIZED,
        "NotYetInitialized",
        "no replset config has been received",
    )
}

fn invalid_config(message: String) -> CommandFailure {
    CommandFailure::new(INVALID_REPLICA_SET_CONFIG, "InvalidReplicaSetConfig", message)
}

/// Cheap-to-clone handle on a simulated replica set.
#[derive(Clone)]
pub struct SimulatedCluster {
    state: Arc<Mutex<ClusterState>>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl SimulatedCluster {
    /// A set of `node_count` nodes that has never been initiated.
    pub fn new(set_name: impl Into<String>, node_count: usize) -> Self {
        let nodes = (0..node_count)
            .map(|i| SimNode {
                address: format!("sim-{}:{}", i, 27030 + i),
                state: MemberState::Startup,
                down: false,
                reject_credentials: false,
                latency: Duration::ZERO,
                stuck: None,
            })
            .collect();

        Self {
            state: Arc::new(Mutex::new(ClusterState {
                set_name: set_name.into(),
                nodes,
                config: None,
                admin: Credentials::new("admin", "admin"),
                users: BTreeMap::new(),
                settle_polls: 0,
                unsettled_polls_left: 0,
                reject_reconfig: None,
                stats: SimStats::default(),
            })),
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A set already running `config`, with node 0 as primary.
    pub fn initiated(config: ClusterConfig, node_count: usize) -> Self {
        let cluster = Self::new(config.set_name.clone(), node_count);
        {
            let mut state = cluster.state.lock();
            state.config = Some(config);
            state.apply_membership();
            if state.is_member(0) {
                state.make_primary(0);
            }
        }
        cluster
    }

    /// A three-node set advertising `h0`, `h1`, `h2` at `version`.
    pub fn three_node(version: u64) -> Self {
        let mut config = ClusterConfig::initial(
            "rs0",
            vec![
                replset_core::MemberConfig::new(0, "h0"),
                replset_core::MemberConfig::new(1, "h1"),
                replset_core::MemberConfig::new(2, "h2"),
            ],
        );
        config.version = version;
        Self::initiated(config, 3)
    }

    pub fn node_count(&self) -> usize {
        self.state.lock().nodes.len()
    }

    /// Connect address of node `id`.
    pub fn address(&self, id: impl Into<MemberId>) -> String {
        let id = id.into();
        self.state
            .lock()
            .node_of(id)
            .map(|n| n.address.clone())
            .unwrap_or_default()
    }

    /// One candidate per node, in node order, with the accepted admin login.
    pub fn candidates(&self) -> Vec<Candidate> {
        let state = self.state.lock();
        state
            .nodes
            .iter()
            .map(|n| Candidate::new(n.address.clone(), state.admin.clone()))
            .collect()
    }

    pub fn inject(&self, fault: Fault) {
        debug!("Injecting fault: {}", fault.describe());
        let mut state = self.state.lock();
        match fault {
            Fault::NodeDown(id) => {
                if let Some(node) = state.node_mut(id) {
                    node.down = true;
                }
            }
            Fault::NodeUp(id) => {
                if let Some(node) = state.node_mut(id) {
                    node.down = false;
                }
            }
            Fault::RejectCredentials(id) => {
                if let Some(node) = state.node_mut(id) {
                    node.reject_credentials = true;
                }
            }
            Fault::Latency { node, delay } => {
                if let Some(node) = state.node_mut(node) {
                    node.latency = delay;
                }
            }
            Fault::StickInState { node, state: stuck } => {
                if let Some(node) = state.node_mut(node) {
                    node.stuck = Some(stuck);
                }
            }
            Fault::SettleAfter { polls } => state.settle_polls = polls,
            Fault::RejectReconfig(failure) => state.reject_reconfig = Some(failure),
        }
    }

    /// Makes `id` the only primary.
    pub fn elect(&self, id: impl Into<MemberId>) {
        let id = id.into();
        self.state.lock().make_primary(id.value() as usize);
    }

    /// Demotes every node, as during an election.
    pub fn step_down_all(&self) {
        for node in self.state.lock().nodes.iter_mut() {
            if node.state == MemberState::Primary {
                node.state = MemberState::Secondary;
            }
        }
    }

    /// Elects a random reachable member; `None` when no node can lead.
    pub fn elect_random<R: Rng>(&self, rng: &mut R) -> Option<MemberId> {
        let mut state = self.state.lock();
        let eligible: Vec<usize> = (0..state.nodes.len())
            .filter(|&i| !state.nodes[i].down && state.is_member(i))
            .collect();
        let chosen = *eligible.choose(rng)?;
        state.make_primary(chosen);
        Some(MemberId::new(chosen as u32))
    }

    pub fn set_state(&self, id: impl Into<MemberId>, new_state: MemberState) {
        if let Some(node) = self.state.lock().node_mut(id.into()) {
            node.state = new_state;
        }
    }

    pub fn state_of(&self, id: impl Into<MemberId>) -> Option<MemberState> {
        self.state.lock().node_of(id.into()).map(|n| n.state)
    }

    pub fn config(&self) -> Option<ClusterConfig> {
        self.state.lock().config.clone()
    }

    pub fn version(&self) -> Option<u64> {
        self.state.lock().config.as_ref().map(|c| c.version)
    }

    pub fn user_roles(&self, database: &str, user: &str) -> Option<Vec<RoleGrant>> {
        self.state
            .lock()
            .users
            .get(&(database.to_string(), user.to_string()))
            .cloned()
    }

    pub fn stats(&self) -> SimStats {
        self.state.lock().stats.clone()
    }

    pub fn sessions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions_opened() - self.sessions_closed()
    }

    pub(crate) fn index_of(&self, address: &str) -> Option<usize> {
        self.state
            .lock()
            .nodes
            .iter()
            .position(|n| n.address == address)
    }

    pub(crate) fn latency(&self, index: usize) -> Duration {
        self.state.lock().nodes[index].latency
    }

    pub(crate) fn is_down(&self, index: usize) -> bool {
        self.state.lock().nodes[index].down
    }

    /// Login check as node `index` would perform it.
    pub(crate) fn check_login(
        &self,
        index: usize,
        username: &str,
        password: &Secret,
    ) -> std::result::Result<(), CommandFailure> {
        let state = self.state.lock();
        let node = &state.nodes[index];
        if node.reject_credentials
            || username != state.admin.username
            || password.expose() != state.admin.password.expose()
        {
            return Err(CommandFailure::new(
                codes::AUTHENTICATION_FAILED,
                "AuthenticationFailed",
                "Authentication failed.",
            ));
        }
        Ok(())
    }

    /// Executes `command` as node `index`.
    pub(crate) fn dispatch(
        &self,
        index: usize,
        command: AdminCommand,
    ) -> std::result::Result<AdminReply, CommandFailure> {
        let mut state = self.state.lock();
        match command {
            AdminCommand::Authenticate {
                username, password, ..
            } => {
                drop(state);
                self.check_login(index, &username, &password)
                    .map(|_| AdminReply::Ok)
            }
            AdminCommand::Ping => Ok(AdminReply::Ok),
            AdminCommand::Hello => Ok(AdminReply::Hello(state.hello(index))),
            AdminCommand::ReplSetGetStatus => state.status().map(AdminReply::Status),
            AdminCommand::ReplSetGetConfig => state
                .config
                .clone()
                .map(AdminReply::Config)
                .ok_or_else(not_initialized),
            AdminCommand::ReplSetReconfig { config, force } => {
                state.reconfigure(index, config, force).map(|_| AdminReply::Ok)
            }
            AdminCommand::ReplSetInitiate { config } => {
                state.initiate(index, config).map(|_| AdminReply::Ok)
            }
            AdminCommand::CreateUser {
                database,
                user,
                roles,
                ..
            } => state
                .create_user(index, database, user, roles)
                .map(|_| AdminReply::Ok),
        }
    }
}

#[async_trait]
impl AdminConnector for SimulatedCluster {
    type Session = SimSession;

    async fn connect(&self, candidate: &Candidate, timeout: Duration) -> Result<SimSession> {
        with_timeout(timeout, &format!("connect to {}", candidate.address), async {
            let index = self.index_of(&candidate.address).ok_or_else(|| {
                ReplSetError::network(format!("{}: connection refused", candidate.address))
            })?;

            let latency = self.latency(index);
            if !latency.is_zero() {
                sleep(latency).await;
            }
            if self.is_down(index) {
                return Err(ReplSetError::network(format!(
                    "{}: connection refused",
                    candidate.address
                )));
            }

            let credentials = &candidate.credentials;
            self.check_login(index, &credentials.username, &credentials.password)
                .map_err(|failure| {
                    ReplSetError::authentication(format!(
                        "{} rejected {}: {}",
                        candidate.address, credentials.username, failure
                    ))
                })?;

            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(SimSession {
                cluster: self.clone(),
                index,
                address: candidate.address.clone(),
            })
        })
        .await
    }
}

/// Session on one simulated node. Dropping it counts as closing it.
pub struct SimSession {
    cluster: SimulatedCluster,
    index: usize,
    address: String,
}

#[async_trait]
impl AdminSession for SimSession {
    fn address(&self) -> &str {
        &self.address
    }

    async fn execute(&mut self, command: AdminCommand) -> Result<AdminReply> {
        let latency = self.cluster.latency(self.index);
        if !latency.is_zero() {
            sleep(latency).await;
        }
        if self.cluster.is_down(self.index) {
            return Err(ReplSetError::network(format!(
                "{}: connection reset",
                self.address
            )));
        }

        let name = command.name();
        self.cluster
            .dispatch(self.index, command)
            .map_err(|failure| ReplSetError::command_failed(name, failure))
    }

    async fn close(self) -> Result<()> {
        Ok(())
    }
}

impl Drop for SimSession {
    fn drop(&mut self) {
        self.cluster.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replset_core::MemberConfig;

    fn admin() -> Credentials {
        Credentials::new("admin", "admin")
    }

    #[tokio::test]
    async fn test_uninitialized_cluster() {
        let cluster = SimulatedCluster::new("rs0", 3);
        let candidate = Candidate::new(cluster.address(0), admin());
        let mut session = cluster.connect(&candidate, Duration::from_secs(1)).await.unwrap();

        let hello = session.hello().await.unwrap();
        assert!(!hello.is_writable_primary);
        assert!(hello.set_name.is_none());

        let err = session.replset_config().await.unwrap_err();
        assert_eq!(
            err.command_failure().map(|f| f.code),
            Some(codes::NOT_YET_INITIALIZED)
        );
        drop(session);
        assert_eq!(cluster.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_safe_reconfig_requires_next_version() {
        let cluster = SimulatedCluster::three_node(5);
        let candidate = Candidate::new(cluster.address(0), admin());
        let mut session = cluster.connect(&candidate, Duration::from_secs(1)).await.unwrap();

        let mut next = cluster.config().unwrap();
        next.version = 7;
        let err = session.reconfigure(next.clone(), false).await.unwrap_err();
        assert_eq!(
            err.command_failure().map(|f| f.code),
            Some(codes::NEW_REPLICA_SET_CONFIGURATION_INCOMPATIBLE)
        );

        session.reconfigure(next, true).await.unwrap();
        assert_eq!(cluster.version(), Some(7));
        assert_eq!(cluster.stats().forced_reconfigs, 1);
    }

    #[tokio::test]
    async fn test_safe_reconfig_on_secondary_rejected() {
        let cluster = SimulatedCluster::three_node(1);
        let candidate = Candidate::new(cluster.address(1), admin());
        let mut session = cluster.connect(&candidate, Duration::from_secs(1)).await.unwrap();

        let mut next = cluster.config().unwrap();
        next.version = 2;
        let err = session.reconfigure(next, false).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_settle_after_reports_recovering() {
        let cluster = SimulatedCluster::three_node(1);
        cluster.inject(Fault::SettleAfter { polls: 1 });
        let candidate = Candidate::new(cluster.address(0), admin());
        let mut session = cluster.connect(&candidate, Duration::from_secs(1)).await.unwrap();

        let mut next = cluster.config().unwrap();
        next.version = 2;
        session.reconfigure(next, false).await.unwrap();

        let first = session.replset_status().await.unwrap();
        assert_eq!(first.member(MemberId::new(1)).map(|m| m.state), Some(MemberState::Recovering));
        assert_eq!(first.member(MemberId::new(0)).map(|m| m.state), Some(MemberState::Primary));

        let second = session.replset_status().await.unwrap();
        assert_eq!(second.member(MemberId::new(1)).map(|m| m.state), Some(MemberState::Secondary));
    }

    #[tokio::test]
    async fn test_down_node_refuses_and_shows_down() {
        let cluster = SimulatedCluster::three_node(1);
        cluster.inject(Fault::NodeDown(MemberId::new(2)));

        let candidate = Candidate::new(cluster.address(2), admin());
        assert!(cluster.connect(&candidate, Duration::from_secs(1)).await.is_err());

        let candidate = Candidate::new(cluster.address(0), admin());
        let mut session = cluster.connect(&candidate, Duration::from_secs(1)).await.unwrap();
        let status = session.replset_status().await.unwrap();
        let down = status.member(MemberId::new(2)).unwrap();
        assert_eq!(down.state, MemberState::Down);
        assert_eq!(down.health, Health::Down);
    }

    #[tokio::test]
    async fn test_initiate_then_already_initialized() {
        let cluster = SimulatedCluster::new("rs0", 2);
        let candidate = Candidate::new(cluster.address(0), admin());
        let mut session = cluster.connect(&candidate, Duration::from_secs(1)).await.unwrap();
        let config = ClusterConfig::initial(
            "rs0",
            vec![MemberConfig::new(0, "a:1"), MemberConfig::new(1, "b:1")],
        );

        session.initiate(config.clone()).await.unwrap();
        assert_eq!(cluster.state_of(0), Some(MemberState::Primary));
        assert_eq!(cluster.state_of(1), Some(MemberState::Secondary));

        let err = session.initiate(config).await.unwrap_err();
        assert!(err.is_already_initialized());
        assert_eq!(cluster.stats().initiations, 1);
    }

    #[tokio::test]
    async fn test_wrong_credentials() {
        let cluster = SimulatedCluster::three_node(1);
        let candidate = Candidate::new(cluster.address(0), Credentials::new("admin", "nope"));
        let err = cluster
            .connect(&candidate, Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ReplSetError::Authentication { .. }));
        assert_eq!(cluster.sessions_opened(), 0);
    }

    #[test]
    fn test_elect_random_only_picks_reachable_members() {
        use rand::SeedableRng;

        let cluster = SimulatedCluster::three_node(1);
        cluster.inject(Fault::NodeDown(MemberId::new(0)));
        cluster.inject(Fault::NodeDown(MemberId::new(1)));
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);

        for _ in 0..10 {
            assert_eq!(cluster.elect_random(&mut rng), Some(MemberId::new(2)));
        }
        assert_eq!(cluster.state_of(0), Some(MemberState::Secondary));
    }
}
