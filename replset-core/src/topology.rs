//! # Topology
//!
//! Replica-set configuration documents and the pure diff/apply logic used to
//! move from the configuration a primary reports to the one the operator
//! wants.

use crate::validation::Validator;
use crate::{MemberId, ReplSetError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// One member entry of a replica-set configuration.
///
/// Only the identity and the advertised host are interpreted. Any other
/// attribute (priority, votes, tags, ...) is carried through `extra`
/// untouched so that a read-modify-write cycle never loses it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberConfig {
    #[serde(rename = "_id")]
    pub id: MemberId,

    /// Advertised `host:port`
    pub host: String,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl MemberConfig {
    pub fn new(id: impl Into<MemberId>, host: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            extra: BTreeMap::new(),
        }
    }
}

/// A versioned replica-set configuration.
///
/// Member order is the canonical order used by the replication group and is
/// preserved by every transformation in this module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Replica-set name, e.g. `rs0`
    #[serde(rename = "_id")]
    pub set_name: String,

    /// Configuration version; strictly increases on each reconfiguration
    #[serde(default)]
    pub version: u64,

    pub members: Vec<MemberConfig>,

    /// Set-level settings and protocol fields, carried opaquely
    #[serde(flatten)]
    pub settings: BTreeMap<String, Value>,
}

impl ClusterConfig {
    /// Creates an initial configuration (version 1) for a brand-new set.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use replset_core::{ClusterConfig, MemberConfig};
    ///
    /// let config = ClusterConfig::initial(
    ///     "rs0",
    ///     vec![
    ///         MemberConfig::new(0, "mongo-0:27030"),
    ///         MemberConfig::new(1, "mongo-1:27031"),
    ///     ],
    /// );
    /// assert_eq!(config.version, 1);
    /// assert_eq!(config.members.len(), 2);
    /// ```
    pub fn initial(set_name: impl Into<String>, members: Vec<MemberConfig>) -> Self {
        Self {
            set_name: set_name.into(),
            version: 1,
            members,
            settings: BTreeMap::new(),
        }
    }

    pub fn member(&self, id: MemberId) -> Option<&MemberConfig> {
        self.members.iter().find(|m| m.id == id)
    }

    pub fn member_ids(&self) -> Vec<MemberId> {
        self.members.iter().map(|m| m.id).collect()
    }

    pub fn host_of(&self, id: MemberId) -> Option<&str> {
        self.member(id).map(|m| m.host.as_str())
    }
}

/// A desired identity → address binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredMember {
    pub id: MemberId,
    pub host: String,
}

/// The membership an operator wants the replica set to converge to.
///
/// Members bound here get the given host (and are appended if new).
/// Members listed in `removed` are dropped. Members of the current
/// configuration that appear in neither list are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredTopology {
    pub members: Vec<DesiredMember>,

    #[serde(default)]
    pub removed: BTreeSet<MemberId>,
}

impl DesiredTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `id` to `host`, replacing an earlier binding for the same id.
    pub fn with_member(mut self, id: impl Into<MemberId>, host: impl Into<String>) -> Self {
        self.set_member(id, host);
        self
    }

    /// Marks `id` for removal from the configuration.
    pub fn with_removed(mut self, id: impl Into<MemberId>) -> Self {
        self.removed.insert(id.into());
        self
    }

    pub fn set_member(&mut self, id: impl Into<MemberId>, host: impl Into<String>) {
        let id = id.into();
        let host = host.into();
        match self.members.iter_mut().find(|m| m.id == id) {
            Some(existing) => existing.host = host,
            None => self.members.push(DesiredMember { id, host }),
        }
    }

    pub fn host_of(&self, id: MemberId) -> Option<&str> {
        self.members
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.host.as_str())
    }

    /// Desired state mirroring every member of `config`.
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self {
            members: config
                .members
                .iter()
                .map(|m| DesiredMember {
                    id: m.id,
                    host: m.host.clone(),
                })
                .collect(),
            removed: BTreeSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty() && self.removed.is_empty()
    }
}

/// A member whose advertised host changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostChange {
    pub id: MemberId,
    pub from: String,
    pub to: String,
}

/// Difference between a current configuration and a desired topology.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyDiff {
    /// Members present on both sides whose host differs
    pub changed: Vec<HostChange>,
    /// Members wanted but absent from the current configuration
    pub added: Vec<DesiredMember>,
    /// Members marked removed that the current configuration still has
    pub removed: BTreeSet<MemberId>,
    /// Current members the desired topology does not mention; kept as-is
    pub retained: BTreeSet<MemberId>,
}

impl TopologyDiff {
    /// True when applying the desired topology would change nothing.
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.added.is_empty() && self.removed.is_empty()
    }

    /// Every identity that a reconfiguration would touch.
    pub fn changed_members(&self) -> BTreeSet<MemberId> {
        self.changed
            .iter()
            .map(|c| c.id)
            .chain(self.added.iter().map(|m| m.id))
            .chain(self.removed.iter().copied())
            .collect()
    }
}

/// Computes what would change if `desired` were applied to `current`.
///
/// # Examples
///
/// ```rust
/// use replset_core::{diff, ClusterConfig, DesiredTopology, MemberConfig, MemberId};
///
/// let current = ClusterConfig::initial(
///     "rs0",
///     vec![MemberConfig::new(0, "127.0.0.1:27030"), MemberConfig::new(1, "mongo-1:27031")],
/// );
/// let desired = DesiredTopology::new()
///     .with_member(0, "mongo-0:27030")
///     .with_member(1, "mongo-1:27031");
///
/// let d = diff(&current, &desired);
/// assert_eq!(d.changed_members().into_iter().collect::<Vec<_>>(), vec![MemberId::new(0)]);
/// ```
pub fn diff(current: &ClusterConfig, desired: &DesiredTopology) -> TopologyDiff {
    let mut result = TopologyDiff::default();

    for wanted in &desired.members {
        match current.member(wanted.id) {
            Some(existing) if existing.host != wanted.host => result.changed.push(HostChange {
                id: wanted.id,
                from: existing.host.clone(),
                to: wanted.host.clone(),
            }),
            Some(_) => {}
            None => result.added.push(wanted.clone()),
        }
    }

    for member in &current.members {
        if desired.removed.contains(&member.id) {
            result.removed.insert(member.id);
        } else if desired.host_of(member.id).is_none() {
            result.retained.insert(member.id);
        }
    }

    result
}

/// Produces the next configuration: desired hosts applied, removed members
/// dropped, new members appended, version bumped by exactly one.
///
/// Members not mentioned by `desired` keep their position and attributes.
/// The result is validated before it is returned.
///
/// # Examples
///
/// ```rust
/// use replset_core::{apply, ClusterConfig, DesiredTopology, MemberConfig};
///
/// let mut current = ClusterConfig::initial(
///     "rs0",
///     vec![
///         MemberConfig::new(0, "h0"),
///         MemberConfig::new(1, "h1"),
///         MemberConfig::new(2, "h2"),
///     ],
/// );
/// current.version = 5;
///
/// let desired = DesiredTopology::new()
///     .with_member(0, "h0-new")
///     .with_member(1, "h1")
///     .with_member(2, "h2");
///
/// let next = apply(&current, &desired).unwrap();
/// assert_eq!(next.version, 6);
/// assert_eq!(next.members[0].host, "h0-new");
/// assert_eq!(next.members[2].host, "h2");
/// ```
pub fn apply(current: &ClusterConfig, desired: &DesiredTopology) -> Result<ClusterConfig> {
    desired.validate()?;

    let version = current.version.checked_add(1).ok_or_else(|| {
        ReplSetError::invalid_config(format!(
            "configuration version {} cannot be incremented",
            current.version
        ))
    })?;

    let mut members: Vec<MemberConfig> = current
        .members
        .iter()
        .filter(|m| !desired.removed.contains(&m.id))
        .map(|m| {
            let mut member = m.clone();
            if let Some(host) = desired.host_of(m.id) {
                member.host = host.to_string();
            }
            member
        })
        .collect();

    for wanted in &desired.members {
        if !members.iter().any(|m| m.id == wanted.id) {
            members.push(MemberConfig::new(wanted.id, wanted.host.clone()));
        }
    }

    let next = ClusterConfig {
        set_name: current.set_name.clone(),
        version,
        members,
        settings: current.settings.clone(),
    };
    next.validate()?;

    Ok(next)
}
