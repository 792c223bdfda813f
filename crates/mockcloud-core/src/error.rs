//! Error types for Mockcloud

use thiserror::Error;

use crate::types::VmState;

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, CloudError>;

/// Core error type for simulated provider operations
#[derive(Error, Debug)]
pub enum CloudError {
    /// Referenced resource does not exist in the caller's scope
    #[error("No such {kind}: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Lifecycle transition is not legal from the current state
    #[error("Virtual machine {id} is {state} and cannot {operation}")]
    InvalidState {
        id: String,
        state: VmState,
        operation: &'static str,
    },

    /// Address space or quota exhausted
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Duplicate rule, address already assigned, VM already terminated
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Caller does not own the resource
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Operation not implemented by the simulated provider
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Launch precondition (credential, shell key) not met
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error category, for callers that only care about the class of failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    ResourceExhausted,
    Conflict,
    Forbidden,
    Unsupported,
    PreconditionFailed,
    Config,
    Io,
    Internal,
}

impl CloudError {
    /// Create a not-found error
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create an invalid-state error
    pub fn invalid_state(id: impl Into<String>, state: VmState, operation: &'static str) -> Self {
        Self::InvalidState {
            id: id.into(),
            state,
            operation,
        }
    }

    /// Create a resource-exhausted error
    pub fn exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a forbidden error
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    /// Create an unsupported-operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create a precondition error
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::PreconditionFailed(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            Self::Config(_) | Self::Yaml(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        assert_eq!(
            CloudError::not_found("firewall", "fw-1").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            CloudError::invalid_state("usmn-1", VmState::Pending, "stop").kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(CloudError::conflict("dup").kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_error_messages() {
        let err = CloudError::invalid_state("usmn-1", VmState::Pending, "stop");
        assert_eq!(
            err.to_string(),
            "Virtual machine usmn-1 is PENDING and cannot stop"
        );

        let err = CloudError::not_found("virtual machine", "usmn-9");
        assert_eq!(err.to_string(), "No such virtual machine: usmn-9");
    }
}
