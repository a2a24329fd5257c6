//! In-memory `CapabilityProvider` stub for tests and local development
//! without a configured external model service.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::error::ProviderError;
use crate::domain::ports::capability_provider::{CapabilityProvider, ProviderRequest, ProviderResponse};

/// Echoes the request payload back, reporting a fixed token cost.
pub struct EchoCapabilityProvider {
    pub fixed_tokens_used: u64,
}

impl Default for EchoCapabilityProvider {
    fn default() -> Self {
        Self {
            fixed_tokens_used: 10,
        }
    }
}

#[async_trait]
impl CapabilityProvider for EchoCapabilityProvider {
    async fn invoke(&self, request: ProviderRequest, _cancel: CancellationToken) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            result: request.payload,
            tokens_used: self.fixed_tokens_used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::task::Payload;

    #[tokio::test]
    async fn echoes_payload_back() {
        let provider = EchoCapabilityProvider::default();
        let response = provider
            .invoke(
                ProviderRequest {
                    payload: Payload::text("hi"),
                    token_budget: 100,
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(response.result.bytes, b"hi");
    }
}
