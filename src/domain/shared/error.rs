//! Domain errors

use thiserror::Error;

/// Domain result type
pub type Result<T> = std::result::Result<T, DomainError>;

/// Every failure in the system is scoped to one session or one user action.
/// None of these variants is allowed to take the orchestrator down.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Already joined the directory")]
    AlreadyJoined,

    #[error("Not joined to the directory")]
    NotJoined,

    #[error("Directory error: {0}")]
    Directory(String),

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    #[error("Signaling delivery failed: {0}")]
    SignalingDelivery(String),

    #[error("Negotiation error: {0}")]
    Negotiation(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Capability unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DomainError {
    /// Errors that end the session they occurred in
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            DomainError::Negotiation(_) | DomainError::ConnectionFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_fatal_classification() {
        assert!(DomainError::Negotiation("answer before offer".into()).is_session_fatal());
        assert!(DomainError::ConnectionFailed("ice failed".into()).is_session_fatal());
        assert!(!DomainError::SignalingDelivery("closed".into()).is_session_fatal());
        assert!(!DomainError::ExternalService("502".into()).is_session_fatal());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            DomainError::UnknownPeer("p1".into()).to_string(),
            "Unknown peer: p1"
        );
        assert_eq!(DomainError::AlreadyJoined.to_string(), "Already joined the directory");
    }
}
