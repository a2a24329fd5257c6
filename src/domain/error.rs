//! Error taxonomy for the orchestration engine.
//!
//! Each enum groups the error kinds of §7 by the component boundary they
//! cross. `is_transient`/`is_permanent` drive retry decisions in the
//! Provider Pool and the Orchestrator's propagation policy; they are never
//! derived from string matching.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the Session Layer at the client boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("credential expired or revoked")]
    AuthExpired,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("session busy, outbound buffer full")]
    SessionBusy,

    #[error("session idle beyond configured timeout")]
    IdleExpired,

    #[error("client missed too many pings")]
    ClientUnresponsive,

    #[error("session not found: {0}")]
    NotFound(Uuid),
}

/// Errors surfaced by the Orchestrator's dispatch and admission logic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no supervisor declares the required capabilities")]
    NoCapableAgent,

    #[error("queue wait exceeded deadline")]
    QueueTimeout,

    #[error("task deadline already in the past")]
    TimedOut,

    #[error("task was cancelled")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unauthorized")]
    Unauthorized,
}

impl DispatchError {
    /// Admission faults the client may retry.
    pub const fn is_retryable_by_client(&self) -> bool {
        matches!(self, Self::NoCapableAgent | Self::QueueTimeout)
    }
}

/// Errors surfaced by a Supervisor while selecting and aggregating sub-agents.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("no sub-agent under this supervisor can serve the requested capability")]
    NoCapableAgent,

    #[error("sub-agent {0} did not complete within its deadline")]
    SubAgentTimeout(Uuid),

    #[error("aggregation failed: {0}")]
    AggregationFailed(String),

    #[error("budget exhausted: {0}")]
    BudgetExhausted(String),

    #[error("queue wait exceeded deadline")]
    QueueTimeout,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Sub-kinds of a provider fault, per §7.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderErrorKind {
    #[error("transient failure")]
    Transient,
    #[error("authentication failure")]
    Auth,
    #[error("malformed request")]
    BadRequest,
    #[error("rate limited by provider")]
    RateLimited,
    #[error("provider unavailable")]
    Unavailable,
}

impl ProviderErrorKind {
    /// Whether the Provider Pool should retry a call that failed this way.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited | Self::Unavailable)
    }
}

/// Errors surfaced by the Provider Pool's admission and execution path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider error: {0}")]
    Call(ProviderErrorKind),

    #[error("configured queue bound exceeded")]
    QueueFull,

    #[error("deadline exceeded while queued")]
    DeadlineExceeded,

    #[error("provider is disabled or circuit-open")]
    ProviderDisabled,

    #[error("request/token budget exhausted for this window")]
    BudgetExhausted,
}

impl ProviderError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Call(k) if k.is_transient())
    }
}

/// Errors surfaced by the Agent Registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("agent id already registered: {0}")]
    Conflict(Uuid),

    #[error("parent agent does not exist or is not of a strictly lower tier")]
    InvalidParent,

    #[error("capability set is invalid for this agent's tier")]
    InvalidCapability,

    #[error("agent not found: {0}")]
    NotFound(Uuid),
}

/// Errors surfaced by the Message Bus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("mailbox full; producer must slow down")]
    Backpressure,

    #[error("no subscriber for correlation id {0}")]
    NoSubscriber(Uuid),
}

/// An internal invariant violation. Never exposed to a client; always logged
/// with full context and converted to a `Failed` terminal task state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("internal error: {0}")]
pub struct InternalError(pub String);

/// The structured, client-safe failure attached to a terminal `TaskResult`.
///
/// Mirrors §7's closed taxonomy without leaking stack traces, internal ids
/// beyond the task id, or credential material.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "message")]
pub enum ErrorKind {
    Unauthorized(String),
    AuthExpired(String),
    InvalidRequest(String),
    NoCapableAgent(String),
    QueueTimeout(String),
    SessionBusy(String),
    TimedOut(String),
    Cancelled(String),
    SubAgentTimeout(String),
    AggregationFailed(String),
    ProviderError(String),
    BudgetExhausted(String),
    ProviderDisabled(String),
    InternalError(String),
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "Unauthorized",
            Self::AuthExpired(_) => "AuthExpired",
            Self::InvalidRequest(_) => "InvalidRequest",
            Self::NoCapableAgent(_) => "NoCapableAgent",
            Self::QueueTimeout(_) => "QueueTimeout",
            Self::SessionBusy(_) => "SessionBusy",
            Self::TimedOut(_) => "TimedOut",
            Self::Cancelled(_) => "Cancelled",
            Self::SubAgentTimeout(_) => "SubAgentTimeout",
            Self::AggregationFailed(_) => "AggregationFailed",
            Self::ProviderError(_) => "ProviderError",
            Self::BudgetExhausted(_) => "BudgetExhausted",
            Self::ProviderDisabled(_) => "ProviderDisabled",
            Self::InternalError(_) => "InternalError",
        }
    }
}

impl From<DispatchError> for ErrorKind {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::NoCapableAgent => Self::NoCapableAgent(e.to_string()),
            DispatchError::QueueTimeout => Self::QueueTimeout(e.to_string()),
            DispatchError::TimedOut => Self::TimedOut(e.to_string()),
            DispatchError::Cancelled => Self::Cancelled(e.to_string()),
            DispatchError::InvalidRequest(_) => Self::InvalidRequest(e.to_string()),
            DispatchError::Unauthorized => Self::Unauthorized(e.to_string()),
        }
    }
}

impl From<SupervisorError> for ErrorKind {
    fn from(e: SupervisorError) -> Self {
        match e {
            SupervisorError::NoCapableAgent => Self::NoCapableAgent(e.to_string()),
            SupervisorError::SubAgentTimeout(_) => Self::SubAgentTimeout(e.to_string()),
            SupervisorError::AggregationFailed(_) => Self::AggregationFailed(e.to_string()),
            SupervisorError::BudgetExhausted(_) => Self::BudgetExhausted(e.to_string()),
            SupervisorError::QueueTimeout => Self::QueueTimeout(e.to_string()),
            SupervisorError::Provider(p) => p.into(),
        }
    }
}

impl From<ProviderError> for ErrorKind {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::ProviderDisabled => Self::ProviderDisabled(e.to_string()),
            ProviderError::BudgetExhausted | ProviderError::QueueFull => {
                Self::BudgetExhausted(e.to_string())
            }
            ProviderError::DeadlineExceeded => Self::TimedOut(e.to_string()),
            ProviderError::Call(_) => Self::ProviderError(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_transience_matches_kind() {
        assert!(ProviderError::Call(ProviderErrorKind::Transient).is_transient());
        assert!(ProviderError::Call(ProviderErrorKind::RateLimited).is_transient());
        assert!(!ProviderError::Call(ProviderErrorKind::Auth).is_transient());
        assert!(!ProviderError::Call(ProviderErrorKind::BadRequest).is_transient());
        assert!(!ProviderError::QueueFull.is_transient());
    }

    #[test]
    fn dispatch_error_client_retry_surface() {
        assert!(DispatchError::NoCapableAgent.is_retryable_by_client());
        assert!(DispatchError::QueueTimeout.is_retryable_by_client());
        assert!(!DispatchError::Unauthorized.is_retryable_by_client());
    }

    #[test]
    fn error_kind_conversion_preserves_taxonomy() {
        let kind: ErrorKind = DispatchError::NoCapableAgent.into();
        assert_eq!(kind.as_str(), "NoCapableAgent");

        let kind: ErrorKind = SupervisorError::SubAgentTimeout(Uuid::nil()).into();
        assert_eq!(kind.as_str(), "SubAgentTimeout");
    }
}
