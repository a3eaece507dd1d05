//! # Core Types
//!
//! Identities, member states and connection descriptors shared by every
//! layer of the controller.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable ordinal identity of a replica-set member.
///
/// Member ids are assigned when the set is first configured and are never
/// reused, so they are the key used when diffing configurations. The
/// advertised host of a member may change; its id does not.
///
/// # Examples
///
/// ```rust
/// use replset_core::MemberId;
///
/// let id = MemberId::new(2);
/// assert_eq!(id.value(), 2);
/// assert_eq!(id.to_string(), "2");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub u32);

impl MemberId {
    /// Creates a member identifier from its ordinal.
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the numeric ordinal of this member.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for MemberId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Observed state of a replica-set member.
///
/// The numeric codes follow the replication protocol's own numbering.
/// `Unreachable` has no protocol code: it is the local sentinel recorded when
/// the controller itself cannot get an answer from the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberState {
    Startup,
    Primary,
    Secondary,
    Recovering,
    Startup2,
    Unknown,
    Arbiter,
    Down,
    Rollback,
    Removed,
    Unreachable,
}

impl MemberState {
    /// Decodes a protocol state code. Unrecognised codes map to `Unknown`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use replset_core::MemberState;
    ///
    /// assert_eq!(MemberState::from_code(1), MemberState::Primary);
    /// assert_eq!(MemberState::from_code(5), MemberState::Startup2);
    /// assert_eq!(MemberState::from_code(42), MemberState::Unknown);
    /// ```
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Startup,
            1 => Self::Primary,
            2 => Self::Secondary,
            3 => Self::Recovering,
            5 => Self::Startup2,
            6 => Self::Unknown,
            7 => Self::Arbiter,
            8 => Self::Down,
            9 => Self::Rollback,
            10 => Self::Removed,
            _ => Self::Unknown,
        }
    }

    /// Protocol code for this state; `None` for the local `Unreachable` sentinel.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Startup => Some(0),
            Self::Primary => Some(1),
            Self::Secondary => Some(2),
            Self::Recovering => Some(3),
            Self::Startup2 => Some(5),
            Self::Unknown => Some(6),
            Self::Arbiter => Some(7),
            Self::Down => Some(8),
            Self::Rollback => Some(9),
            Self::Removed => Some(10),
            Self::Unreachable => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Startup => "STARTUP",
            Self::Primary => "PRIMARY",
            Self::Secondary => "SECONDARY",
            Self::Recovering => "RECOVERING",
            Self::Startup2 => "STARTUP2",
            Self::Unknown => "UNKNOWN",
            Self::Arbiter => "ARBITER",
            Self::Down => "DOWN",
            Self::Rollback => "ROLLBACK",
            Self::Removed => "REMOVED",
            Self::Unreachable => "UNREACHABLE",
        }
    }

    /// A member has settled after a reconfiguration once it is no longer
    /// recovering, in initial sync, or unreachable.
    pub fn is_stable(&self) -> bool {
        !matches!(self, Self::Recovering | Self::Startup2 | Self::Unreachable)
    }
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health flag reported for a member by the replica-set status command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    Up,
    Down,
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Health::Up => write!(f, "UP"),
            Health::Down => write!(f, "DOWN"),
        }
    }
}

/// A secret string that never shows up in `Debug` or `Display` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the secret value. Callers must not log it.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

fn default_auth_source() -> String {
    "admin".to_string()
}

/// Credentials used to open an administrative session on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: Secret,
    /// Database the user is defined in
    #[serde(default = "default_auth_source")]
    pub auth_source: String,
}

impl Credentials {
    /// Credentials authenticated against the `admin` database.
    pub fn new(username: impl Into<String>, password: impl Into<Secret>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            auth_source: default_auth_source(),
        }
    }

    pub fn with_auth_source(mut self, source: impl Into<String>) -> Self {
        self.auth_source = source.into();
        self
    }
}

/// A node the controller may talk to: where it lives and how to log in.
///
/// Candidates are supplied by the caller in a fixed order; that order is
/// the scan order used when looking for the primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Endpoint in `host:port` form
    pub address: String,
    pub credentials: Credentials,
}

impl Candidate {
    pub fn new(address: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            address: address.into(),
            credentials,
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}
