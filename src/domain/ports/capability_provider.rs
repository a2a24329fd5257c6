//! CapabilityProvider: the external collaborator invoked through the
//! Provider Pool. One implementation per external model service.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::error::ProviderError;
use crate::domain::models::task::Payload;

#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub payload: Payload,
    pub token_budget: u64,
}

#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub result: Payload,
    pub tokens_used: u64,
}

/// Opaque, per-service adapter. The core never matches on which external
/// service a given provider id maps to.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    async fn invoke(
        &self,
        request: ProviderRequest,
        cancel: CancellationToken,
    ) -> Result<ProviderResponse, ProviderError>;
}
