//! Caller-facing error taxonomy.

use thiserror::Error;

use crate::id::TicketId;

/// Result type used by every ticket operation exposed to protocol layers.
pub type TicketResult<T> = Result<T, TicketError>;

/// Ticket-level failure.
///
/// All variants are recoverable by the caller (typically by sending the user back to
/// authenticate). None of them carries cryptographic or backend detail.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TicketError {
    /// The ticket is absent, expired, of the wrong kind, or failed authenticity checks.
    #[error("invalid ticket: {0}")]
    InvalidTicket(TicketId),

    /// The authentication did not satisfy the named policy.
    #[error("authentication does not satisfy policy '{0}'")]
    UnsatisfiedAuthenticationPolicy(String),

    /// A service in the proxy chain is not allowed to proxy.
    #[error("unauthorized proxying: {0}")]
    UnauthorizedProxying(String),

    /// The service does not match the ticket, or is unknown/disabled.
    #[error("invalid service: {0}")]
    InvalidService(String),

    /// A fresh authentication belongs to a different principal than the session.
    #[error("principal '{actual}' does not match session principal '{expected}'")]
    MixedPrincipal { expected: String, actual: String },

    /// The backing registry could not be reached in time. Callers may retry.
    #[error("ticket registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// A ticket could not be minted.
    #[error("ticket creation failed: {0}")]
    Creation(String),
}

impl TicketError {
    pub fn invalid_ticket(id: &TicketId) -> Self {
        Self::InvalidTicket(id.clone())
    }

    pub fn unsatisfied_policy(policy: impl Into<String>) -> Self {
        Self::UnsatisfiedAuthenticationPolicy(policy.into())
    }

    pub fn unauthorized_proxying(msg: impl Into<String>) -> Self {
        Self::UnauthorizedProxying(msg.into())
    }

    pub fn invalid_service(msg: impl Into<String>) -> Self {
        Self::InvalidService(msg.into())
    }

    pub fn registry_unavailable(msg: impl Into<String>) -> Self {
        Self::RegistryUnavailable(msg.into())
    }

    pub fn creation(msg: impl Into<String>) -> Self {
        Self::Creation(msg.into())
    }

    /// Transient failures may succeed on retry; everything else requires re-authentication.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RegistryUnavailable(_))
    }
}
