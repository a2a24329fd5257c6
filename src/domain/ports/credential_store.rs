//! CredentialStore: external collaborator resolving provider secrets.
//!
//! Secrets resolved through this port must never be logged; the ambient
//! logging layer's secret-scrubbing pass is the backstop, not the contract.

use async_trait::async_trait;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CredentialError {
    #[error("no credential configured for provider {0}")]
    NotFound(String),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn resolve(&self, provider_id: &str) -> Result<String, CredentialError>;
}
