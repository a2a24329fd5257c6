//! HTTP-backed `CapabilityProvider` adapter, invoking an external model
//! service through `reqwest`. Credentials are resolved per call through a
//! `CredentialStore` and never logged.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::domain::error::{ProviderError, ProviderErrorKind};
use crate::domain::models::task::Payload;
use crate::domain::ports::capability_provider::{CapabilityProvider, ProviderRequest, ProviderResponse};
use crate::domain::ports::credential_store::CredentialStore;

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    mime: &'a str,
    #[serde(with = "serde_bytes_as_base64")]
    payload: &'a [u8],
    token_budget: u64,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    mime: String,
    payload_base64: String,
    tokens_used: u64,
}

mod serde_bytes_as_base64 {
    use base64::Engine;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &&[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }
}

pub struct HttpCapabilityProvider {
    provider_id: String,
    endpoint: String,
    client: reqwest::Client,
    credentials: Arc<dyn CredentialStore>,
}

impl HttpCapabilityProvider {
    pub fn new(provider_id: impl Into<String>, endpoint: impl Into<String>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            provider_id: provider_id.into(),
            endpoint: endpoint.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("reqwest client builds with static config"),
            credentials,
        }
    }
}

#[async_trait]
impl CapabilityProvider for HttpCapabilityProvider {
    async fn invoke(&self, request: ProviderRequest, cancel: CancellationToken) -> Result<ProviderResponse, ProviderError> {
        let secret = self
            .credentials
            .resolve(&self.provider_id)
            .await
            .map_err(|_| ProviderError::Call(ProviderErrorKind::Auth))?;

        let body = WireRequest {
            mime: &request.payload.mime,
            payload: &request.payload.bytes,
            token_budget: request.token_budget,
        };

        let send = self
            .client
            .post(&self.endpoint)
            .bearer_auth(secret)
            .json(&body)
            .send();

        let response = tokio::select! {
            result = send => result.map_err(classify_reqwest_error)?,
            () = cancel.cancelled() => return Err(ProviderError::Call(ProviderErrorKind::Unavailable)),
        };

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::Call(ProviderErrorKind::RateLimited));
        }
        if response.status().is_client_error() {
            return Err(ProviderError::Call(ProviderErrorKind::BadRequest));
        }
        if response.status().is_server_error() {
            return Err(ProviderError::Call(ProviderErrorKind::Transient));
        }

        let decoded: WireResponse = response
            .json()
            .await
            .map_err(|_| ProviderError::Call(ProviderErrorKind::BadRequest))?;

        let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, decoded.payload_base64)
            .map_err(|_| ProviderError::Call(ProviderErrorKind::BadRequest))?;

        Ok(ProviderResponse {
            result: Payload {
                mime: decoded.mime,
                bytes,
            },
            tokens_used: decoded.tokens_used,
        })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() || err.is_connect() {
        ProviderError::Call(ProviderErrorKind::Transient)
    } else {
        ProviderError::Call(ProviderErrorKind::Unavailable)
    }
}
