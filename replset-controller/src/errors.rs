//! Error types for replica-set control operations.

use replset_core::ReplSetError;
use std::fmt;
use thiserror::Error;

/// Result type for control operations
pub type ControlResult<T> = Result<T, ControlError>;

/// Which half of a reconfiguration failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconfigStage {
    Fetch,
    Submit,
}

impl fmt::Display for ReconfigStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconfigStage::Fetch => write!(f, "fetch current configuration"),
            ReconfigStage::Submit => write!(f, "submit new configuration"),
        }
    }
}

/// Coarse classification used by callers to pick an exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    Reconfig,
    Bootstrap,
    Credentials,
    Status,
    InvalidInput,
    Internal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::NotFound => "not-found",
            ErrorClass::Reconfig => "reconfig",
            ErrorClass::Bootstrap => "bootstrap",
            ErrorClass::Credentials => "credentials",
            ErrorClass::Status => "status",
            ErrorClass::InvalidInput => "invalid-input",
            ErrorClass::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while controlling a replica set
#[derive(Error, Debug)]
pub enum ControlError {
    /// No candidate reported leadership
    #[error("No primary found among {candidates} candidates ({unreachable} unreachable)")]
    NoPrimaryFound {
        candidates: usize,
        unreachable: usize,
    },

    /// Fetching or submitting the configuration against the primary failed
    #[error("Reconfiguration failed on primary {primary}: could not {stage}: {source}")]
    Reconfig {
        stage: ReconfigStage,
        primary: String,
        #[source]
        source: ReplSetError,
    },

    /// Initiation failed for a reason other than "already initialized"
    #[error("Bootstrap via seed {seed} failed: {source}")]
    Bootstrap {
        seed: String,
        #[source]
        source: ReplSetError,
    },

    /// Application user could not be created
    #[error("Creating user {user} on {address} failed: {source}")]
    CredentialProvisioning {
        user: String,
        address: String,
        #[source]
        source: ReplSetError,
    },

    /// Replica-set status could not be read
    #[error("Reading replica-set status from {address} failed: {source}")]
    Status {
        address: String,
        #[source]
        source: ReplSetError,
    },

    /// Desired or initial topology is malformed
    #[error("Invalid topology: {source}")]
    InvalidTopology {
        #[source]
        source: ReplSetError,
    },

    /// Internal system error
    #[error("Internal system error: {reason}")]
    Internal { reason: String },
}

impl ControlError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ControlError::NoPrimaryFound { .. } => ErrorClass::NotFound,
            ControlError::Reconfig { .. } => ErrorClass::Reconfig,
            ControlError::Bootstrap { .. } => ErrorClass::Bootstrap,
            ControlError::CredentialProvisioning { .. } => ErrorClass::Credentials,
            ControlError::Status { .. } => ErrorClass::Status,
            ControlError::InvalidTopology { .. } => ErrorClass::InvalidInput,
            ControlError::Internal { .. } => ErrorClass::Internal,
        }
    }

    /// The transport or protocol error underneath, if any.
    pub fn cause(&self) -> Option<&ReplSetError> {
        match self {
            ControlError::Reconfig { source, .. }
            | ControlError::Bootstrap { source, .. }
            | ControlError::CredentialProvisioning { source, .. }
            | ControlError::Status { source, .. }
            | ControlError::InvalidTopology { source } => Some(source),
            ControlError::NoPrimaryFound { .. } | ControlError::Internal { .. } => None,
        }
    }

    /// True when the caller may simply try again later.
    pub fn is_transient(&self) -> bool {
        match self {
            ControlError::NoPrimaryFound { .. } => true,
            other => other.cause().is_some_and(ReplSetError::is_retryable),
        }
    }
}

impl From<anyhow::Error> for ControlError {
    fn from(err: anyhow::Error) -> Self {
        ControlError::Internal {
            reason: err.to_string(),
        }
    }
}
