//! IdentityVerifier: external collaborator consulted on session connect.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub principal: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("credential rejected")]
    Rejected,
    #[error("credential expired")]
    Expired,
}

/// Authentication is explicitly out of scope for the core; this port is
/// the seam at which an external verifier is consulted.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<VerifiedIdentity, AuthError>;
}
