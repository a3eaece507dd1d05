//! # Administrative Interface
//!
//! The command set the controller uses to inspect and reconfigure a replica
//! set, and the connector/session traits that carry those commands to a
//! node. A transport (TCP, in-process simulation, a database driver) only
//! has to implement [`AdminConnector`] and [`AdminSession::execute`]; the
//! typed helpers are provided on top.

use crate::topology::ClusterConfig;
use crate::types::{Candidate, Health, MemberId, MemberState, Secret};
use crate::{ReplSetError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Well-known command failure codes.
pub mod codes {
    pub const UNAUTHORIZED: i32 = 13;
    pub const AUTHENTICATION_FAILED: i32 = 18;
    pub const ALREADY_INITIALIZED: i32 = 23;
    pub const NOT_YET_INITIALIZED: i32 = 94;
    pub const NEW_REPLICA_SET_CONFIGURATION_INCOMPATIBLE: i32 = 103;
    pub const NOT_WRITABLE_PRIMARY: i32 = 10107;
    pub const USER_ALREADY_EXISTS: i32 = 51003;
}

/// A privilege granted to an application user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub role: String,
    pub db: String,
}

impl RoleGrant {
    pub fn new(role: impl Into<String>, db: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            db: db.into(),
        }
    }
}

/// Commands understood by a replica-set member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum AdminCommand {
    /// Session login; issued by transports right after connecting
    Authenticate {
        username: String,
        password: Secret,
        source: String,
    },
    Ping,
    /// Leadership/role query
    Hello,
    ReplSetGetStatus,
    ReplSetGetConfig,
    ReplSetReconfig {
        config: ClusterConfig,
        force: bool,
    },
    ReplSetInitiate {
        config: ClusterConfig,
    },
    CreateUser {
        database: String,
        user: String,
        password: Secret,
        roles: Vec<RoleGrant>,
    },
}

impl AdminCommand {
    /// Protocol name of the command, safe to log.
    pub fn name(&self) -> &'static str {
        match self {
            AdminCommand::Authenticate { .. } => "authenticate",
            AdminCommand::Ping => "ping",
            AdminCommand::Hello => "hello",
            AdminCommand::ReplSetGetStatus => "replSetGetStatus",
            AdminCommand::ReplSetGetConfig => "replSetGetConfig",
            AdminCommand::ReplSetReconfig { .. } => "replSetReconfig",
            AdminCommand::ReplSetInitiate { .. } => "replSetInitiate",
            AdminCommand::CreateUser { .. } => "createUser",
        }
    }
}

/// Answer to the leadership query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HelloReply {
    pub is_writable_primary: bool,
    pub secondary: bool,
    pub arbiter_only: bool,
    pub set_name: Option<String>,
    /// Address of the primary as known by this node
    pub primary: Option<String>,
    /// Address this node advertises for itself
    pub me: Option<String>,
}

impl HelloReply {
    /// Role implied by the reply flags.
    pub fn role(&self) -> MemberState {
        if self.is_writable_primary {
            MemberState::Primary
        } else if self.secondary {
            MemberState::Secondary
        } else if self.arbiter_only {
            MemberState::Arbiter
        } else {
            MemberState::Unknown
        }
    }
}

/// Per-member entry of a replica-set status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberStatus {
    #[serde(rename = "_id")]
    pub id: MemberId,
    pub name: String,
    pub state: MemberState,
    pub health: Health,
}

/// Replica-set status as reported by one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplSetStatus {
    pub set: String,
    pub members: Vec<MemberStatus>,
}

impl ReplSetStatus {
    pub fn member(&self, id: MemberId) -> Option<&MemberStatus> {
        self.members.iter().find(|m| m.id == id)
    }

    pub fn primary(&self) -> Option<&MemberStatus> {
        self.members
            .iter()
            .find(|m| m.state == MemberState::Primary)
    }
}

/// Failure reported by a node that received and executed a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandFailure {
    pub code: i32,
    pub code_name: String,
    pub message: String,
}

impl CommandFailure {
    pub fn new(code: i32, code_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            code_name: code_name.into(),
            message: message.into(),
        }
    }

    pub fn is_already_initialized(&self) -> bool {
        self.code == codes::ALREADY_INITIALIZED || self.code_name == "AlreadyInitialized"
    }

    pub fn is_already_exists(&self) -> bool {
        self.code == codes::USER_ALREADY_EXISTS || self.message.contains("already exists")
    }

    pub fn is_not_primary(&self) -> bool {
        self.code == codes::NOT_WRITABLE_PRIMARY
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self.code,
            codes::AUTHENTICATION_FAILED | codes::UNAUTHORIZED
        )
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.code_name, self.code, self.message)
    }
}

/// Successful reply to an [`AdminCommand`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", content = "body", rename_all = "camelCase")]
pub enum AdminReply {
    /// Acknowledgement without payload
    Ok,
    Hello(HelloReply),
    Status(ReplSetStatus),
    Config(ClusterConfig),
}

impl AdminReply {
    pub fn kind(&self) -> &'static str {
        match self {
            AdminReply::Ok => "ok",
            AdminReply::Hello(_) => "hello",
            AdminReply::Status(_) => "status",
            AdminReply::Config(_) => "config",
        }
    }
}

fn unexpected(command: &str, reply: &AdminReply) -> ReplSetError {
    ReplSetError::UnexpectedReply {
        command: command.to_string(),
        reply: reply.kind().to_string(),
    }
}

/// Opens administrative sessions to individual nodes.
///
/// Connections are always direct: a session talks to exactly the node it
/// was opened against and never follows topology hints elsewhere.
#[async_trait]
pub trait AdminConnector: Send + Sync {
    type Session: AdminSession;

    /// Connects and authenticates to `candidate`, bounded by `timeout`.
    async fn connect(&self, candidate: &Candidate, timeout: Duration) -> Result<Self::Session>;
}

/// A short-lived administrative session with one node.
///
/// Dropping a session releases it; [`AdminSession::close`] releases it
/// explicitly and reports shutdown errors.
#[async_trait]
pub trait AdminSession: Send {
    /// Address of the node this session talks to.
    fn address(&self) -> &str;

    async fn execute(&mut self, command: AdminCommand) -> Result<AdminReply>;

    async fn close(self) -> Result<()>
    where
        Self: Sized;

    async fn ping(&mut self) -> Result<()> {
        match self.execute(AdminCommand::Ping).await? {
            AdminReply::Ok => Ok(()),
            other => Err(unexpected("ping", &other)),
        }
    }

    async fn hello(&mut self) -> Result<HelloReply> {
        match self.execute(AdminCommand::Hello).await? {
            AdminReply::Hello(reply) => Ok(reply),
            other => Err(unexpected("hello", &other)),
        }
    }

    async fn replset_status(&mut self) -> Result<ReplSetStatus> {
        match self.execute(AdminCommand::ReplSetGetStatus).await? {
            AdminReply::Status(status) => Ok(status),
            other => Err(unexpected("replSetGetStatus", &other)),
        }
    }

    async fn replset_config(&mut self) -> Result<ClusterConfig> {
        match self.execute(AdminCommand::ReplSetGetConfig).await? {
            AdminReply::Config(config) => Ok(config),
            other => Err(unexpected("replSetGetConfig", &other)),
        }
    }

    async fn reconfigure(&mut self, config: ClusterConfig, force: bool) -> Result<()> {
        match self
            .execute(AdminCommand::ReplSetReconfig { config, force })
            .await?
        {
            AdminReply::Ok => Ok(()),
            other => Err(unexpected("replSetReconfig", &other)),
        }
    }

    async fn initiate(&mut self, config: ClusterConfig) -> Result<()> {
        match self
            .execute(AdminCommand::ReplSetInitiate { config })
            .await?
        {
            AdminReply::Ok => Ok(()),
            other => Err(unexpected("replSetInitiate", &other)),
        }
    }

    async fn create_user(
        &mut self,
        database: String,
        user: String,
        password: Secret,
        roles: Vec<RoleGrant>,
    ) -> Result<()> {
        match self
            .execute(AdminCommand::CreateUser {
                database,
                user,
                password,
                roles,
            })
            .await?
        {
            AdminReply::Ok => Ok(()),
            other => Err(unexpected("createUser", &other)),
        }
    }
}

/// Runs `operation`, failing with [`ReplSetError::Timeout`] after `limit`.
pub async fn with_timeout<T, F>(limit: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ReplSetError::timeout(format!(
            "{} after {:?}",
            operation, limit
        ))),
    }
}
