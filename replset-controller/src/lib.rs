//! # Replset Controller
//!
//! Topology control for primary/secondary replica sets.
//!
//! This crate provides functionality for:
//! - Probing single nodes for leadership ([`NodeProbe`])
//! - Locating the current primary ([`PrimaryLocator`])
//! - Reconciling the member list against a desired topology ([`Reconciler`])
//! - First-time initiation of a new set ([`Bootstrapper`])
//! - Application user provisioning and status snapshots
//!
//! Every operation is generic over an [`AdminConnector`](replset_core::AdminConnector)
//! and opens its own short-lived sessions; nothing is cached between calls.

pub mod bootstrap;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod errors;
pub mod locator;
pub mod probe;
pub mod reconciler;
pub mod status;

#[cfg(test)]
pub(crate) mod test_support;

pub use bootstrap::{BootstrapOutcome, BootstrapReport, Bootstrapper};
pub use config::{ControllerConfig, ReconfigMode, ScanMode};
pub use controller::ReplicaSetController;
pub use credentials::{AppUser, CredentialProvisioner, ProvisionOutcome};
pub use errors::{ControlError, ControlResult, ErrorClass, ReconfigStage};
pub use locator::{LocatedPrimary, PrimaryLocator};
pub use probe::{NodeProbe, ProbeResult, ProbeVerdict};
pub use reconciler::{poll_budget, ReconcilePlan, ReconcileReport, Reconciler};
pub use status::{fetch_status, is_stabilized, ClusterStatus, StatusReader};
