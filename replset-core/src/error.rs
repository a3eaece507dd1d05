//! # Error Types
//!
//! Transport and protocol level errors raised while talking to replica-set
//! members through the administrative command interface.

use crate::admin::CommandFailure;
use thiserror::Error;

/// Error types that can occur while issuing administrative commands.
///
/// These cover the whole path from opening a connection to decoding the
/// reply. Classification into controller-level failures (no primary,
/// reconfiguration failure, ...) happens one layer up, in the controller.
///
/// # Error Categories
///
/// - **Transport Errors**: connection refused, reset, or timed out
/// - **Authentication Errors**: credentials rejected by the node
/// - **Command Errors**: the node answered with a command failure
/// - **Protocol Errors**: the reply did not match the command
/// - **Configuration Errors**: a replica-set configuration failed validation
///
/// # Examples
///
/// ```rust
/// use replset_core::ReplSetError;
///
/// let error = ReplSetError::network("Connection refused");
/// assert!(error.is_retryable());
/// ```
#[derive(Error, Debug)]
pub enum ReplSetError {
    /// Network communication failure with a node
    #[error("Network error: {message}")]
    Network { message: String },

    /// Operation exceeded its timeout limit
    #[error("Timeout occurred: {operation}")]
    Timeout { operation: String },

    /// The node rejected the supplied credentials
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The node executed the command and reported a failure
    #[error("Command {command} failed: {failure}")]
    CommandFailed {
        command: String,
        failure: CommandFailure,
    },

    /// The reply type did not match the command that was sent
    #[error("Unexpected reply to {command}: {reply}")]
    UnexpectedReply { command: String, reply: String },

    /// A replica-set configuration violated an invariant
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// JSON serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Socket level I/O failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Type alias for Results returned by the administrative interface.
pub type Result<T> = std::result::Result<T, ReplSetError>;

impl ReplSetError {
    /// Creates a new network error with the given message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a new timeout error for the named operation.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Creates a new authentication error with the given message.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Creates a new command failure for the named command.
    pub fn command_failed(command: impl Into<String>, failure: CommandFailure) -> Self {
        Self::CommandFailed {
            command: command.into(),
            failure,
        }
    }

    /// Creates a new configuration validation error.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use replset_core::ReplSetError;
    ///
    /// let error = ReplSetError::invalid_config("duplicate member id 2");
    /// assert!(!error.is_retryable());
    /// ```
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Creates a new internal error with the given message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the command failure reported by the node, if any.
    pub fn command_failure(&self) -> Option<&CommandFailure> {
        match self {
            Self::CommandFailed { failure, .. } => Some(failure),
            _ => None,
        }
    }

    /// Whether the node reported that the replica set is already initiated.
    pub fn is_already_initialized(&self) -> bool {
        self.command_failure()
            .is_some_and(CommandFailure::is_already_initialized)
    }

    /// Whether the node reported that the object being created already exists.
    pub fn is_already_exists(&self) -> bool {
        self.command_failure()
            .is_some_and(CommandFailure::is_already_exists)
    }

    /// Whether the error happened before or outside command execution,
    /// i.e. the node could not be reached or would not let us in.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Timeout { .. } | Self::Authentication { .. } | Self::Io(_)
        )
    }

    /// Determines if this error condition is potentially transient.
    ///
    /// Note that retryable does not mean the controller retries it: a
    /// reconfiguration is never resubmitted without re-reading the config.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } | Self::Io(_) => true,
            Self::CommandFailed { failure, .. } => failure.is_not_primary(),
            _ => false,
        }
    }
}
