//! # Replset Core
//!
//! Core types for controlling a primary/secondary replica set through its
//! administrative command interface.
//!
//! This crate provides:
//!
//! - **Identities and states**: [`MemberId`], [`MemberState`], [`Health`]
//! - **Connection descriptors**: [`Candidate`] and [`Credentials`]
//! - **Topology**: [`ClusterConfig`], [`DesiredTopology`] and the pure
//!   [`diff`]/[`apply`] functions that plan a reconfiguration
//! - **Administrative interface**: [`AdminCommand`], [`AdminReply`] and the
//!   [`AdminConnector`]/[`AdminSession`] traits implemented by transports
//! - **Error Handling**: [`ReplSetError`] and the [`Result`] alias
//!
//! ## Planning a reconfiguration
//!
//! ```rust
//! use replset_core::{apply, diff, ClusterConfig, DesiredTopology, MemberConfig};
//!
//! let current = ClusterConfig::initial(
//!     "rs0",
//!     vec![
//!         MemberConfig::new(0, "127.0.0.1:27030"),
//!         MemberConfig::new(1, "127.0.0.1:27031"),
//!     ],
//! );
//! let desired = DesiredTopology::new()
//!     .with_member(0, "mongo-0:27030")
//!     .with_member(1, "mongo-1:27031");
//!
//! assert_eq!(diff(&current, &desired).changed_members().len(), 2);
//!
//! let next = apply(&current, &desired).unwrap();
//! assert_eq!(next.version, current.version + 1);
//! assert!(diff(&next, &desired).is_empty());
//! ```

pub mod admin;
pub mod error;
pub mod topology;
pub mod types;
pub mod validation;

pub use admin::{
    codes, with_timeout, AdminCommand, AdminConnector, AdminReply, AdminSession, CommandFailure,
    HelloReply, MemberStatus, ReplSetStatus, RoleGrant,
};
pub use error::*;
pub use topology::{
    apply, diff, ClusterConfig, DesiredMember, DesiredTopology, HostChange, MemberConfig,
    TopologyDiff,
};
pub use types::*;
pub use validation::Validator;
